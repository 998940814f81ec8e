// crates/lc_da/tests/common/mod.rs

//! 集成测试共用的确定性模型与数据

#![allow(dead_code)]

use lc_config::{DaConfig, ParameterConfig, StateConfig};
use lc_da::{
    InitialEnsemble, MemberInput, MemberOutput, ModelError, ObservationSet, PhysicalState,
    ProcessModel,
};

/// 确定性湖泊模型：主状态每步增温 `warming`，其余状态不变
///
/// 诊断量记录气象驱动成员号，物理辅助状态记录表层值。
pub struct MockLake {
    pub warming: f64,
    pub fail: Option<(usize, usize)>,
}

impl MockLake {
    pub fn new(warming: f64) -> Self {
        Self { warming, fail: None }
    }

    pub fn failing_at(mut self, step: usize, member: usize) -> Self {
        self.fail = Some((step, member));
        self
    }
}

impl ProcessModel for MockLake {
    fn name(&self) -> &str {
        "mock-lake"
    }

    fn propagate(&self, input: &MemberInput) -> Result<MemberOutput, ModelError> {
        if self.fail == Some((input.step, input.member)) {
            return Err(ModelError::Failed(format!("成员 {} 发散", input.member)));
        }
        let mut out = MemberOutput::persist(input);
        for v in out.states[..DEPTHS.len()].iter_mut() {
            *v += self.warming;
        }
        out.physics.avg_surf_temp = out.states[0];
        out.physics.aux_observable = 0.1 * out.states[0];
        for v in out.diagnostics.iter_mut() {
            *v = input.forcing.weather_member as f64;
        }
        Ok(out)
    }
}

/// 粒子标记模型：不改变状态，把表层状态写进参数与物理辅助状态
pub struct TagModel;

impl ProcessModel for TagModel {
    fn name(&self) -> &str {
        "tag"
    }

    fn propagate(&self, input: &MemberInput) -> Result<MemberOutput, ModelError> {
        let mut out = MemberOutput::persist(input);
        let tag = input.states[0];
        out.pars = Some(vec![tag]);
        out.physics.avg_surf_temp = tag;
        out.physics.mixing_vars = vec![tag];
        Ok(out)
    }
}

pub const DEPTHS: [f64; 4] = [0.0, 1.0, 2.0, 3.0];

/// 4 深度、单状态、6 成员的基础配置
pub fn config(method: &str) -> DaConfig {
    let mut c = DaConfig::default();
    c.da_method = method.to_string();
    c.modeled_depths = DEPTHS.to_vec();
    c.ensemble.members = 6;
    c.ensemble.seed = 2024;
    c.forecast_start_index = 4;
    c
}

pub fn with_model_sd(mut c: DaConfig, sd: f64) -> DaConfig {
    for s in c.states.iter_mut() {
        s.model_sd = vec![sd; c.modeled_depths.len()];
    }
    c
}

pub fn add_state(mut c: DaConfig, name: &str, sd: f64) -> DaConfig {
    c.states.push(StateConfig {
        name: name.to_string(),
        model_sd: vec![sd; c.modeled_depths.len()],
        vert_decorr_length: 1.0,
    });
    c
}

pub fn add_parameter(mut c: DaConfig, lower: f64, upper: f64, perturb_sd: f64) -> DaConfig {
    c.parameters.push(ParameterConfig {
        name: "kw".to_string(),
        init_mean: 0.5 * (lower + upper),
        init_sd: 0.1 * (upper - lower),
        lower,
        upper,
        perturb_sd,
    });
    c
}

/// 主状态 `20 - d`，其余状态 1.0
pub fn profile(n_states: usize) -> Vec<f64> {
    let mut p = Vec::new();
    for s in 0..n_states {
        for d in 0..DEPTHS.len() {
            p.push(if s == 0 { 20.0 - d as f64 } else { 1.0 });
        }
    }
    p
}

pub fn initial(c: &DaConfig, lake_depth: f64) -> InitialEnsemble {
    InitialEnsemble::from_profile(
        &profile(c.n_states()),
        PhysicalState::with_lake_depth(lake_depth),
        c.ensemble.members,
    )
}

/// 6 个时间点，步 1 表层与步 3 深度 1 m 有主变量观测
pub fn observations(c: &DaConfig) -> ObservationSet {
    let mut obs = ObservationSet::empty(c.n_obs_vars(), 6, c.n_depths());
    obs.set(0, 1, 0, 21.0);
    obs.set(0, 3, 1, 19.5);
    obs
}
