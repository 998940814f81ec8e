// crates/lc_da/src/covariance.rs

//! 集合协方差估计
//!
//! 集合矩阵以行表示展平的 状态×深度（可附加辅助列），列表示成员：
//!
//! ```text
//! P = inflation · Σ_m d_m d_mᵀ / (N - 1)
//! ```
//!
//! 单成员集合的协方差定义为零矩阵，此时卡尔曼增益为零、不做校正。

use nalgebra::DMatrix;

/// 集合距平矩阵（每行减去行均值）
pub fn anomalies(ensemble: &DMatrix<f64>) -> DMatrix<f64> {
    let n = ensemble.ncols();
    let mut dev = ensemble.clone();
    if n == 0 {
        return dev;
    }
    for mut row in dev.row_iter_mut() {
        let mean = row.sum() / n as f64;
        row.add_scalar_mut(-mean);
    }
    dev
}

/// 样本协方差 `inflation · D Dᵀ / (N-1)`
pub fn ensemble_covariance(ensemble: &DMatrix<f64>, inflation: f64) -> DMatrix<f64> {
    let (rows, n) = ensemble.shape();
    if n < 2 {
        return DMatrix::zeros(rows, rows);
    }
    let d = anomalies(ensemble);
    (&d * d.transpose()) * (inflation / (n - 1) as f64)
}

/// 参数 - 状态交叉协方差 `Dp Dxᵀ / (N-1)`
pub fn cross_covariance(pars: &DMatrix<f64>, ensemble: &DMatrix<f64>) -> DMatrix<f64> {
    let n = ensemble.ncols();
    if n < 2 {
        return DMatrix::zeros(pars.nrows(), ensemble.nrows());
    }
    let dp = anomalies(pars);
    let dx = anomalies(ensemble);
    (&dp * dx.transpose()) / (n - 1) as f64
}
