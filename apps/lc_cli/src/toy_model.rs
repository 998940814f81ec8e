// apps/lc_cli/src/toy_model.rs

//! 演示用松弛湖泊模型
//!
//! 主状态（水温）向季节性平衡剖面松弛：
//!
//! ```text
//! T_eq(d, t) = T_surf + A·sin(2πt / period) - lapse·z_d + δ_weather
//! T'         = T + k·(T_eq - T)
//! ```
//!
//! 其余状态按一阶衰减 `c' = c·(1 - decay) + source`。
//! 若配置了率定参数，第一个参数作为松弛速率 `k`。

use lc_da::{MemberInput, MemberOutput, ModelError, ProcessModel};
use lc_foundation::is_missing;

/// 松弛湖泊模型
#[derive(Debug, Clone)]
pub struct ToyLakeModel {
    depths: Vec<f64>,
    n_states: usize,
    surface_temp: f64,
    amplitude: f64,
    period: f64,
    lapse: f64,
    default_rate: f64,
    decay: f64,
    source: f64,
}

impl ToyLakeModel {
    /// 创建
    pub fn new(depths: Vec<f64>, n_states: usize) -> Self {
        Self {
            depths,
            n_states,
            surface_temp: 18.0,
            amplitude: 4.0,
            period: 365.0,
            lapse: 0.8,
            default_rate: 0.2,
            decay: 0.05,
            source: 0.1,
        }
    }

    fn equilibrium(&self, d: usize, step: usize, weather_member: usize) -> f64 {
        let phase = 2.0 * std::f64::consts::PI * step as f64 / self.period;
        // 气象驱动成员之间 ±0.5 ℃ 的确定性差异
        let offset = 0.1 * ((weather_member % 11) as f64 - 5.0);
        self.surface_temp + self.amplitude * phase.sin() - self.lapse * self.depths[d] + offset
    }
}

impl ProcessModel for ToyLakeModel {
    fn name(&self) -> &str {
        "toy-lake"
    }

    fn propagate(&self, input: &MemberInput) -> Result<MemberOutput, ModelError> {
        let nd = self.depths.len();
        if input.states.len() != self.n_states * nd {
            return Err(ModelError::Failed(format!(
                "状态长度 {} 与 {}×{} 不一致",
                input.states.len(),
                self.n_states,
                nd
            )));
        }
        let rate = input.pars.first().copied().unwrap_or(self.default_rate);
        if !(0.0..=1.0).contains(&rate) {
            return Err(ModelError::Failed(format!("松弛速率 {rate} 超出 [0, 1]")));
        }

        let mut out = MemberOutput::persist(input);
        for d in 0..nd {
            let t = &mut out.states[d];
            if !is_missing(*t) {
                let eq = self.equilibrium(d, input.step, input.forcing.weather_member);
                *t += rate * (eq - *t);
            }
        }
        for v in out.states[nd..].iter_mut().filter(|v| !is_missing(**v)) {
            *v = *v * (1.0 - self.decay) + self.source;
        }

        let surface = out.states[0];
        out.physics.avg_surf_temp = surface;
        // 透明度代理量随第二个状态（如叶绿素）升高而下降
        out.physics.aux_observable = match out.states.get(nd) {
            Some(&c) if !is_missing(c) => 1.7 / (0.2 + 0.05 * c),
            _ => 0.1 * surface,
        };
        for v in out.diagnostics.iter_mut() {
            *v = surface;
        }
        Ok(out)
    }
}
