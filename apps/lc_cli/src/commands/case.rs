// apps/lc_cli/src/commands/case.rs

//! 算例文件（初始剖面 + 观测序列）
//!
//! ```json
//! {
//!   "n_steps": 6,
//!   "lake_depth": 8.0,
//!   "initial_profile": [20.0, 19.5, 18.0, 15.0],
//!   "observations": [{ "var": 0, "step": 1, "depth": 0, "value": 21.0 }],
//!   "aux": [null, 1.8, null, null, null, null],
//!   "depth": null
//! }
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use lc_config::DaConfig;
use lc_da::{InitialEnsemble, ObservationSet, PhysicalState};
use lc_foundation::MISSING;

/// 单条观测
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsRecord {
    /// 观测变量
    pub var: usize,
    /// 时间步
    pub step: usize,
    /// 深度索引
    pub depth: usize,
    /// 观测值
    pub value: f64,
}

/// 算例文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFile {
    /// 时间步数（含初始步）
    pub n_steps: usize,
    /// 初始湖深 [m]
    pub lake_depth: f64,
    /// 初始剖面，布局 `[state][depth]`
    pub initial_profile: Vec<f64>,
    /// 按深度观测
    #[serde(default)]
    pub observations: Vec<ObsRecord>,
    /// 辅助标量观测序列
    #[serde(default)]
    pub aux: Option<Vec<Option<f64>>>,
    /// 湖深观测序列
    #[serde(default)]
    pub depth: Option<Vec<Option<f64>>>,
}

impl CaseFile {
    /// 从 JSON 文件读取
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取算例文件: {}", path.display()))?;
        serde_json::from_str(&content).context("算例文件 JSON 解析失败")
    }

    /// 检查与配置一致
    pub fn check(&self, config: &DaConfig) -> Result<()> {
        let expected = config.n_states() * config.n_depths();
        if self.initial_profile.len() != expected {
            bail!(
                "initial_profile 长度 {} 与 状态数×深度数 = {} 不一致",
                self.initial_profile.len(),
                expected
            );
        }
        if self.n_steps < 2 {
            bail!("n_steps 至少为 2");
        }
        for rec in &self.observations {
            if rec.var >= config.n_obs_vars() || rec.step >= self.n_steps || rec.depth >= config.n_depths() {
                bail!("观测记录越界: {:?}", rec);
            }
        }
        Ok(())
    }

    /// 构建观测数据集
    pub fn observation_set(&self, config: &DaConfig) -> Result<ObservationSet> {
        let mut obs = ObservationSet::empty(config.n_obs_vars(), self.n_steps, config.n_depths());
        for rec in &self.observations {
            obs.set(rec.var, rec.step, rec.depth, rec.value);
        }
        if let Some(aux) = &self.aux {
            obs = obs.with_aux(fill_missing(aux))?;
        }
        if let Some(depth) = &self.depth {
            obs = obs.with_depth(fill_missing(depth))?;
        }
        Ok(obs)
    }

    /// 构建初始集合
    pub fn initial_ensemble(&self, config: &DaConfig) -> InitialEnsemble {
        let mut physics = PhysicalState::with_lake_depth(self.lake_depth);
        physics.model_internal_depths = config.modeled_depths.clone();
        InitialEnsemble::from_profile(&self.initial_profile, physics, config.ensemble.members)
    }
}

fn fill_missing(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(MISSING)).collect()
}
