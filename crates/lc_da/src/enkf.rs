// crates/lc_da/src/enkf.rs

//! 集合卡尔曼滤波（扰动观测版本）
//!
//! # 算法
//!
//! ```text
//! Y = z + ε,  ε ~ N(0, R)                 每成员一组扰动观测
//! K = P Hᵀ (H P Hᵀ + R)⁻¹
//! X_a = X + K (Y - H X)
//! Θ_a = Θ + K_θ (Y - H X),  K_θ = P_θx Hᵀ (H P Hᵀ + R)⁻¹
//! ```
//!
//! 新息协方差 `S = H P Hᵀ + R` 对称，先做 Cholesky 分解求解；
//! 分解失败（近奇异）时退化为带容差的 SVD 求解并发出警告。

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

use lc_foundation::{stream_rng, StreamKind};

use crate::covariance::{cross_covariance, ensemble_covariance};
use crate::error::{DaError, DaResult};
use crate::localization::CovarianceLocalizer;
use crate::obs_operator::ObsOperator;

/// SVD 退化求解的相对奇异值容差
pub const GAIN_SOLVE_EPS: f64 = 1e-10;

/// 卡尔曼增益
#[derive(Debug, Clone)]
pub struct GainSolution {
    /// 状态增益 `(n_cols, n_obs)`
    pub k: DMatrix<f64>,
    /// 参数增益 `(n_pars, n_obs)`
    pub k_pars: Option<DMatrix<f64>>,
    /// 是否使用了退化求解
    pub degenerate: bool,
}

/// 计算卡尔曼增益
pub fn kalman_gain(
    p: &DMatrix<f64>,
    h: &DMatrix<f64>,
    r: &DVector<f64>,
    p_cross: Option<&DMatrix<f64>>,
) -> DaResult<GainSolution> {
    let n = p.nrows();
    let k = h.nrows();
    DaError::check_dim("H.ncols", n, h.ncols())?;
    DaError::check_dim("R", k, r.len())?;

    let ph_t = p * h.transpose();
    let mut s = h * &ph_t;
    for i in 0..k {
        s[(i, i)] += r[i];
    }

    let np = p_cross.map_or(0, |c| c.nrows());
    let mut rhs = DMatrix::<f64>::zeros(k, n + np);
    rhs.columns_mut(0, n).copy_from(&ph_t.transpose());
    if let Some(c) = p_cross {
        DaError::check_dim("P_params.ncols", n, c.ncols())?;
        rhs.columns_mut(n, np).copy_from(&(h * c.transpose()));
    }

    let (sol, degenerate) = solve_symmetric(s, &rhs)?;
    Ok(GainSolution {
        k: sol.columns(0, n).transpose(),
        k_pars: p_cross.map(|_| sol.columns(n, np).transpose()),
        degenerate,
    })
}

/// 求解 `S X = B`，S 对称
fn solve_symmetric(s: DMatrix<f64>, b: &DMatrix<f64>) -> DaResult<(DMatrix<f64>, bool)> {
    if let Some(chol) = s.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Ok((x, false));
        }
    }

    warn!(
        "新息协方差近奇异 ({}x{})，改用 SVD 容差求解",
        s.nrows(),
        s.ncols()
    );
    let svd = s.svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = (GAIN_SOLVE_EPS * max_sv).max(f64::MIN_POSITIVE);
    let x = svd
        .solve(b, eps)
        .map_err(|e| DaError::InvalidState(format!("增益求解失败: {e}")))?;
    Ok((x, true))
}

/// 抽取扰动观测 `(n_obs, n_members)`
///
/// 非主变量的扰动观测负值截断为零。`perturb = false` 时每个成员直接使用
/// 实际观测值。
pub fn perturbed_observations(
    op: &ObsOperator,
    n_members: usize,
    perturb: bool,
    seed: u64,
    step: usize,
) -> DMatrix<f64> {
    let k = op.n_obs();
    let mut y = DMatrix::<f64>::zeros(k, n_members);
    for m in 0..n_members {
        let mut rng = stream_rng(seed, step, m, StreamKind::ObsPerturbation);
        for i in 0..k {
            let noise = if perturb {
                let w: f64 = rng.sample(StandardNormal);
                w * op.r[i].sqrt()
            } else {
                0.0
            };
            let mut value = op.z[i] + noise;
            if !op.rows[i].is_primary() && value < 0.0 {
                value = 0.0;
            }
            y[(i, m)] = value;
        }
    }
    y
}

/// EnKF 分析设置
pub struct EnkfSettings<'a> {
    /// 协方差膨胀系数
    pub inflation: f64,
    /// 局地化实现与距离
    pub localization: Option<(&'a dyn CovarianceLocalizer, f64)>,
    /// 模型深度坐标
    pub depths: &'a [f64],
    /// 状态数
    pub n_states: usize,
}

/// EnKF 分析结果
#[derive(Debug, Clone)]
pub struct EnkfUpdate {
    /// 更新后的集合矩阵 `(n_cols, n_members)`
    pub states: DMatrix<f64>,
    /// 更新后的参数 `(n_pars, n_members)`
    pub pars: Option<DMatrix<f64>>,
    /// 是否使用了退化求解
    pub degenerate: bool,
}

/// 执行一次 EnKF 分析
///
/// `x` 为展平的集合矩阵，`pars` 为已经过拟合策略处理的参数集合，
/// `y` 为扰动观测。
pub fn analysis(
    x: &DMatrix<f64>,
    pars: Option<&DMatrix<f64>>,
    op: &ObsOperator,
    y: &DMatrix<f64>,
    settings: &EnkfSettings<'_>,
) -> DaResult<EnkfUpdate> {
    DaError::check_dim("ensemble rows", op.n_cols(), x.nrows())?;
    DaError::check_dim("perturbed obs rows", op.n_obs(), y.nrows())?;
    DaError::check_dim("perturbed obs members", x.ncols(), y.ncols())?;

    let mut p = ensemble_covariance(x, settings.inflation);
    if let Some((localizer, distance)) = settings.localization {
        let n_single = x.nrows().saturating_sub(settings.n_states * settings.depths.len());
        p = localizer.localize(&p, settings.depths, settings.n_states, distance, n_single)?;
    }

    let cross = pars.map(|pm| cross_covariance(pm, x));
    let gain = kalman_gain(&p, &op.h, &op.r, cross.as_ref())?;

    let innovation = y - &op.h * x;
    let states = x + &gain.k * &innovation;
    let pars = match (pars, gain.k_pars.as_ref()) {
        (Some(pm), Some(kp)) => Some(pm + kp * &innovation),
        _ => None,
    };

    Ok(EnkfUpdate {
        states,
        pars,
        degenerate: gain.degenerate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs_operator::ObsRow;

    fn scalar_operator(z: f64, sd: f64, rows: usize, col: usize, primary: bool) -> ObsOperator {
        let mut h = DMatrix::zeros(1, rows);
        h[(0, col)] = 1.0;
        ObsOperator {
            h,
            z: DVector::from_element(1, z),
            r: DVector::from_element(1, sd * sd),
            z_index: vec![col],
            rows: vec![if primary {
                ObsRow::Depth { var: 0, depth: col }
            } else {
                ObsRow::Depth { var: 1, depth: col }
            }],
            aux_active: false,
        }
    }

    fn settings(depths: &[f64]) -> EnkfSettings<'_> {
        EnkfSettings {
            inflation: 1.0,
            localization: None,
            depths,
            n_states: 1,
        }
    }

    #[test]
    fn test_scalar_gain_matches_closed_form() {
        // P = [[4]], H = [1], R = [1] → K = 4/5
        let p = DMatrix::from_element(1, 1, 4.0);
        let h = DMatrix::from_element(1, 1, 1.0);
        let r = DVector::from_element(1, 1.0);
        let gain = kalman_gain(&p, &h, &r, None).unwrap();
        assert!((gain.k[(0, 0)] - 0.8).abs() < 1e-12);
        assert!(!gain.degenerate);
    }

    #[test]
    fn test_singular_innovation_falls_back_to_svd() {
        let p = DMatrix::from_element(2, 2, 1.0);
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        let r = DVector::from_element(2, 0.0);
        let gain = kalman_gain(&p, &h, &r, None).unwrap();
        assert!(gain.degenerate);
        assert!(gain.k.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_member_gets_no_correction() {
        let depths = [0.0, 1.0];
        let x = DMatrix::from_row_slice(2, 1, &[12.0, 11.0]);
        let op = scalar_operator(20.0, 0.5, 2, 0, true);
        let y = perturbed_observations(&op, 1, true, 3, 1);
        let out = analysis(&x, None, &op, &y, &settings(&depths)).unwrap();
        assert_eq!(out.states, x);
    }

    #[test]
    fn test_precise_observation_pulls_mean_to_value() {
        let depths = [0.0, 1.0];
        let x = DMatrix::from_row_slice(2, 4, &[10.0, 11.0, 12.0, 13.0, 9.0, 10.5, 11.0, 12.5]);
        let op = scalar_operator(11.0, 1e-6, 2, 0, true);
        let y = perturbed_observations(&op, 4, true, 8, 2);
        let out = analysis(&x, None, &op, &y, &settings(&depths)).unwrap();
        let mean = out.states.row(0).sum() / 4.0;
        assert!((mean - 11.0).abs() < 1e-4);
    }

    #[test]
    fn test_parameter_update_follows_correlation() {
        let depths = [0.0];
        let x = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        let pars = DMatrix::from_row_slice(1, 3, &[0.1, 0.2, 0.3]);
        let op = scalar_operator(3.0, 0.1, 1, 0, true);
        let y = perturbed_observations(&op, 3, false, 0, 1);
        let out = analysis(&x, Some(&pars), &op, &y, &settings(&depths)).unwrap();
        let updated = out.pars.unwrap();
        let before = pars.row(0).sum() / 3.0;
        let after = updated.row(0).sum() / 3.0;
        assert!(after > before, "正相关参数应随观测上调");
    }

    #[test]
    fn test_nonprimary_perturbed_obs_clipped() {
        let op = scalar_operator(0.0, 5.0, 1, 0, false);
        let y = perturbed_observations(&op, 50, true, 17, 4);
        assert!(y.iter().all(|&v| v >= 0.0));
        assert!(y.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_unperturbed_obs_equal_actual() {
        let op = scalar_operator(7.5, 1.0, 1, 0, true);
        let y = perturbed_observations(&op, 3, false, 1, 1);
        assert!(y.iter().all(|&v| v == 7.5));
    }
}
