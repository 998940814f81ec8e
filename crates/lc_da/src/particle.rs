// crates/lc_da/src/particle.rs

//! 粒子滤波（似然加权重采样）
//!
//! 每个成员经观测算子投影后按高斯对数似然打分，再按 `exp(logL)` 的
//! 比例有放回地抽取成员索引。重采样是整体粒子替换：状态、参数、
//! 诊断量和物理辅助状态使用同一组索引（见
//! [`EnsembleStore::resample_members`](crate::store::EnsembleStore::resample_members)）。

use nalgebra::DMatrix;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::warn;

use lc_foundation::{stream_rng, StreamKind};

use crate::error::{DaError, DaResult};
use crate::obs_operator::ObsOperator;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// 重采样结果
#[derive(Debug, Clone)]
pub struct Resampling {
    /// 输出成员 `i` 的来源成员
    pub indices: Vec<usize>,
    /// 归一化权重
    pub weights: Vec<f64>,
    /// 有效样本数 `1 / Σw²`
    pub effective_sample_size: f64,
}

/// 各成员的高斯对数似然
pub fn log_likelihoods(op: &ObsOperator, ensemble: &DMatrix<f64>) -> DaResult<Vec<f64>> {
    DaError::check_dim("ensemble rows", op.n_cols(), ensemble.nrows())?;
    let projected = &op.h * ensemble;
    let sd: Vec<f64> = op.r.iter().map(|v| v.sqrt()).collect();
    Ok((0..ensemble.ncols())
        .map(|m| {
            (0..op.n_obs())
                .map(|i| {
                    let resid = (op.z[i] - projected[(i, m)]) / sd[i];
                    -0.5 * resid * resid - sd[i].ln() - LN_SQRT_2PI
                })
                .sum()
        })
        .collect())
}

/// 对数似然归一化为权重（减去最大值防止下溢）
///
/// 全部非有限时退化为等权重。
pub fn normalized_weights(log_lik: &[f64]) -> Vec<f64> {
    let n = log_lik.len();
    let max = log_lik
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        warn!("粒子权重全部退化，改用等权重");
        return vec![1.0 / n as f64; n];
    }
    let raw: Vec<f64> = log_lik
        .iter()
        .map(|&l| if l.is_finite() { (l - max).exp() } else { 0.0 })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// 有效样本数
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// 按似然抽取重采样索引
pub fn resample(
    op: &ObsOperator,
    ensemble: &DMatrix<f64>,
    seed: u64,
    step: usize,
) -> DaResult<Resampling> {
    let log_lik = log_likelihoods(op, ensemble)?;
    let weights = normalized_weights(&log_lik);
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| DaError::InvalidState(format!("粒子权重无效: {e}")))?;
    let mut rng = stream_rng(seed, step, 0, StreamKind::Resample);
    let indices = (0..weights.len()).map(|_| dist.sample(&mut rng)).collect();
    let ess = effective_sample_size(&weights);
    if ess < 0.1 * weights.len() as f64 {
        warn!("第 {step} 步有效样本数 {ess:.2} 过低");
    }
    Ok(Resampling {
        indices,
        weights,
        effective_sample_size: ess,
    })
}
