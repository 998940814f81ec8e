// crates/lc_da/src/init.rs

//! 集合初始化（步 0）
//!
//! - 写入初始状态剖面与物理辅助状态
//! - 开启初始条件不确定性时按过程噪声模型展开初始离散度
//! - 率定参数从 `N(init_mean, init_sd)` 抽样并截断到上下限

use rand::Rng;
use rand_distr::StandardNormal;

use lc_config::{DaConfig, ParameterConfig};
use lc_foundation::{stream_rng, StreamKind};

use crate::error::{DaError, DaResult};
use crate::model::PhysicalState;
use crate::noise::ProcessNoise;
use crate::qc::clip_parameters;
use crate::store::{EnsembleDims, EnsembleStore};

/// 初始集合
#[derive(Debug, Clone)]
pub struct InitialEnsemble {
    /// 初始状态，布局 `[s][d][m]`
    pub states: Vec<f64>,
    /// 各成员物理辅助状态
    pub physics: Vec<PhysicalState>,
}

impl InitialEnsemble {
    /// 所有成员共用同一剖面（布局 `[s][d]`）
    pub fn from_profile(profile: &[f64], physics: PhysicalState, n_members: usize) -> Self {
        let states = profile
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(n_members))
            .collect();
        Self {
            states,
            physics: vec![physics; n_members],
        }
    }
}

/// 初始化器
#[derive(Debug, Clone)]
pub struct Initializer {
    parameters: Vec<ParameterConfig>,
    parameter_uncertainty: bool,
    initial_spread: Option<ProcessNoise>,
    seed: u64,
}

impl Initializer {
    /// 由配置构造
    pub fn from_config(config: &DaConfig) -> Self {
        Self {
            parameters: config.parameters.clone(),
            parameter_uncertainty: config.uncertainty.parameter,
            initial_spread: config
                .uncertainty
                .initial_condition
                .then(|| ProcessNoise::from_config(config)),
            seed: config.ensemble.seed,
        }
    }

    /// 抽样初始参数，布局 `[p][m]`
    pub fn sample_parameters(&self, n_members: usize) -> Vec<f64> {
        let np = self.parameters.len();
        let mut pars = vec![0.0; np * n_members];
        for m in 0..n_members {
            let mut rng = stream_rng(self.seed, 0, m, StreamKind::Initialization);
            for (p, cfg) in self.parameters.iter().enumerate() {
                let value = if self.parameter_uncertainty {
                    let w: f64 = rng.sample(StandardNormal);
                    cfg.init_mean + cfg.init_sd * w
                } else {
                    cfg.init_mean
                };
                pars[p * n_members + m] = value;
            }
        }
        let bounds: Vec<(f64, f64)> = self.parameters.iter().map(|p| (p.lower, p.upper)).collect();
        clip_parameters(&mut pars, n_members, &bounds);
        pars
    }

    /// 写入步 0
    pub fn initialize(&self, store: &mut EnsembleStore, initial: InitialEnsemble) -> DaResult<()> {
        let dims: EnsembleDims = store.dims();
        DaError::check_dim("initial parameters", dims.n_pars, self.parameters.len())?;

        let mut states = initial.states;
        DaError::check_dim("initial states", dims.n_state_rows() * dims.n_members, states.len())?;
        if let Some(noise) = &self.initial_spread {
            noise.inject(&mut states, &dims, 0, &[]);
        }

        let mut physics = initial.physics;
        physics.iter_mut().for_each(PhysicalState::truncate_internal_grid);

        let pars = (dims.n_pars > 0).then(|| self.sample_parameters(dims.n_members));
        store.write_initial(&states, pars.as_deref(), physics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DaConfig {
        let mut c = DaConfig::default();
        c.parameters = vec![ParameterConfig {
            name: "kw".into(),
            init_mean: 0.5,
            init_sd: 10.0,
            lower: 0.0,
            upper: 1.0,
            perturb_sd: 0.1,
        }];
        c
    }

    #[test]
    fn test_parameters_sampled_within_bounds() {
        let init = Initializer::from_config(&config());
        let pars = init.sample_parameters(50);
        assert!(pars.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(pars.iter().any(|&p| p != pars[0]));
    }

    #[test]
    fn test_parameter_uncertainty_off_uses_mean() {
        let mut c = config();
        c.uncertainty.parameter = false;
        let pars = Initializer::from_config(&c).sample_parameters(4);
        assert_eq!(pars, vec![0.5; 4]);
    }

    #[test]
    fn test_profile_replicated_per_member() {
        let init = InitialEnsemble::from_profile(&[1.0, 2.0], PhysicalState::with_lake_depth(3.0), 3);
        assert_eq!(init.states, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(init.physics.len(), 3);
    }

    #[test]
    fn test_initialize_without_spread_keeps_profile() {
        let mut c = config();
        c.uncertainty.initial_condition = false;
        let dims = EnsembleDims {
            n_steps: 2,
            n_states: 1,
            n_depths: 4,
            n_members: 2,
            n_pars: 1,
            n_diag: 0,
        };
        let mut store = EnsembleStore::new(dims, c.modeled_depths.clone()).unwrap();
        let initial = InitialEnsemble::from_profile(
            &[20.0, 19.0, 18.0, 17.0],
            PhysicalState::with_lake_depth(10.0),
            2,
        );
        Initializer::from_config(&c).initialize(&mut store, initial).unwrap();
        assert_eq!(store.state(0, 0, 2, 1), 18.0);
        assert!(store.par(0, 0, 0).is_some());
    }
}
