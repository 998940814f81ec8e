// crates/lc_da/src/localization.rs

//! 垂向协方差局地化
//!
//! 小集合估计的远距离协方差多为伪相关，按深度间距 Δ 对协方差做锥化。
//! 锥化只作用于 状态×深度 块；末尾不按深度索引的“单值”列保持不变。
//!
//! 局地化是可插拔的外部例程，核心只依赖 [`CovarianceLocalizer`] 约定：
//! 输入原始协方差、深度坐标、状态数、局地化距离、单值列数，
//! 返回同形状的协方差。

use nalgebra::DMatrix;

use lc_config::LocalizationKind;

use crate::error::{DaError, DaResult};

/// 协方差局地化接口
pub trait CovarianceLocalizer: Send + Sync {
    /// 名称
    fn name(&self) -> &'static str;

    /// 间距 `separation` 处的锥化权重，`separation = 0` 时为 1
    fn weight(&self, separation: f64, distance: f64) -> f64;

    /// 对协方差做局地化
    ///
    /// 协方差须为 `(n_states·n_depths + n_single)` 方阵，否则返回维度错误。
    fn localize(
        &self,
        cov: &DMatrix<f64>,
        depths: &[f64],
        n_states: usize,
        distance: f64,
        n_single: usize,
    ) -> DaResult<DMatrix<f64>> {
        let nd = depths.len();
        let block = n_states * nd;
        DaError::check_dim("localized covariance rows", block + n_single, cov.nrows())?;
        DaError::check_dim("localized covariance cols", block + n_single, cov.ncols())?;
        let mut out = cov.clone();
        for i in 0..block {
            let zi = depths[i % nd];
            for j in 0..block {
                let w = self.weight((zi - depths[j % nd]).abs(), distance);
                out[(i, j)] *= w;
            }
        }
        Ok(out)
    }
}

/// Gaspari-Cohn 五阶分段多项式
///
/// 半宽取局地化距离的一半，间距超过局地化距离时权重严格为零。
#[derive(Debug, Clone, Copy, Default)]
pub struct GaspariCohn;

impl CovarianceLocalizer for GaspariCohn {
    fn name(&self) -> &'static str {
        "gaspari-cohn"
    }

    fn weight(&self, separation: f64, distance: f64) -> f64 {
        let c = 0.5 * distance;
        if c <= 0.0 {
            return if separation == 0.0 { 1.0 } else { 0.0 };
        }
        let r = separation.abs() / c;
        if r <= 1.0 {
            -0.25 * r.powi(5) + 0.5 * r.powi(4) + 0.625 * r.powi(3) - 5.0 / 3.0 * r.powi(2) + 1.0
        } else if r <= 2.0 {
            r.powi(5) / 12.0 - 0.5 * r.powi(4) + 0.625 * r.powi(3) + 5.0 / 3.0 * r.powi(2)
                - 5.0 * r
                + 4.0
                - 2.0 / (3.0 * r)
        } else {
            0.0
        }
    }
}

/// 高斯衰减 `exp(-Δ² / 2L²)`
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianTaper;

impl CovarianceLocalizer for GaussianTaper {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn weight(&self, separation: f64, distance: f64) -> f64 {
        (-0.5 * (separation / distance).powi(2)).exp()
    }
}

/// 由配置选择局地化实现
pub fn localizer_for(kind: LocalizationKind) -> Box<dyn CovarianceLocalizer> {
    match kind {
        LocalizationKind::GaspariCohn => Box::new(GaspariCohn),
        LocalizationKind::Gaussian => Box::new(GaussianTaper),
    }
}
