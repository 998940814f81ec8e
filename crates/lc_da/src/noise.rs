// crates/lc_da/src/noise.rs

//! 过程噪声注入
//!
//! 对每个成员、每个状态组抽取沿深度 AR(1) 相关的高斯噪声：
//!
//! ```text
//! w_new[0] = w[0]
//! w_new[d] = α·w_new[d-1] + sqrt(1-α²)·w[d]
//! q[s, d]  = w_new[d] · model_sd[s, d]
//! ```
//!
//! 相邻深度的噪声相关，不同状态组之间独立。

use rand::Rng;
use rand_distr::StandardNormal;

use lc_config::{DaConfig, StateSpace};
use lc_foundation::{is_missing, stream_rng, StreamKind};

use crate::store::EnsembleDims;

/// 过程噪声注入器
#[derive(Debug, Clone)]
pub struct ProcessNoise {
    /// `model_sd[s][d]`
    model_sd: Vec<Vec<f64>>,
    /// 每个状态组的垂向相关系数
    alpha: Vec<f64>,
    seed: u64,
}

impl ProcessNoise {
    /// 直接构造
    pub fn new(model_sd: Vec<Vec<f64>>, alpha: Vec<f64>, seed: u64) -> Self {
        Self {
            model_sd,
            alpha,
            seed,
        }
    }

    /// 由配置构造
    pub fn from_config(config: &DaConfig) -> Self {
        Self::new(
            config.states.iter().map(|s| s.model_sd.clone()).collect(),
            config.states.iter().map(|s| s.alpha()).collect(),
            config.ensemble.seed,
        )
    }

    /// 对第 `step` 步状态切片 `[s][d][m]` 原地加噪
    ///
    /// `skip` 中的成员（被隔离的失败成员）保持不变。
    pub fn inject(&self, slab: &mut [f64], dims: &EnsembleDims, step: usize, skip: &[usize]) {
        for m in (0..dims.n_members).filter(|m| !skip.contains(m)) {
            let mut rng = stream_rng(self.seed, step, m, StreamKind::ProcessNoise);
            for (s, (sd, &alpha)) in self.model_sd.iter().zip(&self.alpha).enumerate() {
                let q = correlated_noise(alpha, sd, &mut rng);
                for (d, qd) in q.into_iter().enumerate() {
                    slab[dims.state_offset(s, d, m)] += qd;
                }
            }
        }
    }
}

/// 抽取沿深度 AR(1) 相关的噪声 `q[d] = w_new[d]·sd[d]`
pub fn correlated_noise<R: Rng + ?Sized>(alpha: f64, sd: &[f64], rng: &mut R) -> Vec<f64> {
    let innovation = (1.0 - alpha * alpha).max(0.0).sqrt();
    let mut q = Vec::with_capacity(sd.len());
    let mut prev = 0.0;
    for (d, &sigma) in sd.iter().enumerate() {
        let w: f64 = rng.sample(StandardNormal);
        let w_new = if d == 0 { w } else { alpha * prev + innovation * w };
        prev = w_new;
        q.push(w_new * sigma);
    }
    q
}

/// 将非主状态（`s > 0`）的负值截断为零，返回截断次数
///
/// 对数空间同化时不截断。
pub fn clip_nonprimary(slab: &mut [f64], dims: &EnsembleDims, space: StateSpace) -> usize {
    if space == StateSpace::Log {
        return 0;
    }
    let start = dims.n_depths * dims.n_members;
    let mut clipped = 0;
    for v in slab[start..].iter_mut() {
        if !is_missing(*v) && *v < 0.0 {
            *v = 0.0;
            clipped += 1;
        }
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dims() -> EnsembleDims {
        EnsembleDims {
            n_steps: 2,
            n_states: 2,
            n_depths: 4,
            n_members: 3,
            n_pars: 0,
            n_diag: 0,
        }
    }

    #[test]
    fn test_zero_sd_is_identity() {
        let d = dims();
        let noise = ProcessNoise::new(vec![vec![0.0; 4]; 2], vec![0.6, 0.2], 7);
        let original: Vec<f64> = (0..24).map(|i| i as f64 * 0.37 - 3.0).collect();
        for step in 1..5 {
            let mut slab = original.clone();
            noise.inject(&mut slab, &d, step, &[]);
            assert_eq!(slab, original);
        }
    }

    #[test]
    fn test_alpha_one_gives_identical_innovations() {
        let mut rng = StdRng::seed_from_u64(3);
        let q = correlated_noise(1.0, &[1.0, 1.0, 1.0], &mut rng);
        assert_eq!(q[0], q[1]);
        assert_eq!(q[1], q[2]);
    }

    #[test]
    fn test_alpha_zero_matches_white_noise() {
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let q = correlated_noise(0.0, &[2.0, 0.5], &mut a);
        let w0: f64 = b.sample(StandardNormal);
        let w1: f64 = b.sample(StandardNormal);
        assert!((q[0] - 2.0 * w0).abs() < 1e-15);
        assert!((q[1] - 0.5 * w1).abs() < 1e-15);
    }

    #[test]
    fn test_noise_is_reproducible_and_member_specific() {
        let d = dims();
        let noise = ProcessNoise::new(vec![vec![1.0; 4]; 2], vec![0.5, 0.5], 99);
        let mut a = vec![0.0; 24];
        let mut b = vec![0.0; 24];
        noise.inject(&mut a, &d, 3, &[]);
        noise.inject(&mut b, &d, 3, &[]);
        assert_eq!(a, b);
        assert_ne!(a[d.state_offset(0, 0, 0)], a[d.state_offset(0, 0, 1)]);
    }

    #[test]
    fn test_noise_keeps_missing_missing() {
        let d = dims();
        let noise = ProcessNoise::new(vec![vec![1.0; 4]; 2], vec![0.5, 0.5], 1);
        let mut slab = vec![0.0; 24];
        slab[d.state_offset(0, 3, 2)] = f64::NAN;
        noise.inject(&mut slab, &d, 1, &[]);
        assert!(slab[d.state_offset(0, 3, 2)].is_nan());
    }

    #[test]
    fn test_skipped_members_untouched() {
        let d = dims();
        let noise = ProcessNoise::new(vec![vec![1.0; 4]; 2], vec![0.5, 0.5], 5);
        let mut slab = vec![2.0; 24];
        noise.inject(&mut slab, &d, 2, &[1]);
        for s in 0..2 {
            for z in 0..4 {
                assert_eq!(slab[d.state_offset(s, z, 1)], 2.0);
                assert_ne!(slab[d.state_offset(s, z, 0)], 2.0);
            }
        }
    }

    #[test]
    fn test_clip_nonprimary_only() {
        let d = dims();
        let mut slab = vec![-1.0; 24];
        slab[d.state_offset(1, 2, 0)] = f64::NAN;
        let clipped = clip_nonprimary(&mut slab, &d, StateSpace::Linear);
        assert_eq!(clipped, 11);
        assert_eq!(slab[d.state_offset(0, 1, 1)], -1.0);
        assert_eq!(slab[d.state_offset(1, 1, 1)], 0.0);
        assert!(slab[d.state_offset(1, 2, 0)].is_nan());

        let mut slab = vec![-1.0; 24];
        assert_eq!(clip_nonprimary(&mut slab, &d, StateSpace::Log), 0);
    }
}
