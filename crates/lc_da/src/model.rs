// crates/lc_da/src/model.rs

//! 过程模型接口
//!
//! 同化核心不包含水热/生化动力学本身。外部模型实现 [`ProcessModel`]，
//! 每步每成员被调用一次，输入该成员上一步的状态切片、物理辅助状态、
//! 参数向量和驱动选择，返回传播后的结果。
//!
//! # 线程安全
//!
//! 模型必须是 `Send + Sync`：各成员的传播在 rayon 线程池中并行执行。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lc_foundation::MISSING;

/// 过程模型错误
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// 模型运行失败
    #[error("模型运行失败: {0}")]
    Failed(String),
}

/// 物理辅助状态（不参与卡尔曼校正，但恢复模型运行时必需）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    /// 当前湖深 [m]
    pub lake_depth: f64,
    /// 模型内部垂向网格 [m]，超出湖深的网格点为 `NaN`
    pub model_internal_depths: Vec<f64>,
    /// 混合过程变量
    pub mixing_vars: Vec<f64>,
    /// 雪 / 白冰 / 蓝冰厚度 [m]
    pub snow_ice_thickness: [f64; 3],
    /// 表层平均温度
    pub avg_surf_temp: f64,
    /// 辅助标量观测的模型估计（如透明度），无则为 `NaN`
    pub aux_observable: f64,
}

impl Default for PhysicalState {
    fn default() -> Self {
        Self {
            lake_depth: MISSING,
            model_internal_depths: Vec::new(),
            mixing_vars: Vec::new(),
            snow_ice_thickness: [0.0; 3],
            avg_surf_temp: MISSING,
            aux_observable: MISSING,
        }
    }
}

impl PhysicalState {
    /// 以湖深创建，其余量取缺省值
    pub fn with_lake_depth(lake_depth: f64) -> Self {
        Self {
            lake_depth,
            ..Self::default()
        }
    }

    /// 将超出湖深的内部网格点标记为缺测
    pub fn truncate_internal_grid(&mut self) {
        let floor = self.lake_depth;
        for z in self.model_internal_depths.iter_mut() {
            if *z > floor {
                *z = MISSING;
            }
        }
    }
}

/// 驱动数据选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcingSelection {
    /// 气象驱动集合成员
    pub weather_member: usize,
    /// 入流驱动集合成员
    pub inflow_member: usize,
}

/// 单个成员的传播输入
#[derive(Debug, Clone)]
pub struct MemberInput {
    /// 目标时间步
    pub step: usize,
    /// 成员索引
    pub member: usize,
    /// 上一步状态，布局 `[state][depth]`
    pub states: Vec<f64>,
    /// 上一步物理辅助状态
    pub physics: PhysicalState,
    /// 当前参数向量
    pub pars: Vec<f64>,
    /// 上一步诊断量，布局 `[diag][depth]`
    pub diagnostics: Vec<f64>,
    /// 驱动选择
    pub forcing: ForcingSelection,
}

/// 单个成员的传播输出
#[derive(Debug, Clone)]
pub struct MemberOutput {
    /// 传播后状态，布局 `[state][depth]`
    pub states: Vec<f64>,
    /// 传播后物理辅助状态
    pub physics: PhysicalState,
    /// 诊断量，布局 `[diag][depth]`
    pub diagnostics: Vec<f64>,
    /// 模型调整后的参数（`None` 表示不变）
    pub pars: Option<Vec<f64>>,
}

impl MemberOutput {
    /// 沿用输入（失败成员隔离时使用）
    pub fn persist(input: &MemberInput) -> Self {
        Self {
            states: input.states.clone(),
            physics: input.physics.clone(),
            diagnostics: input.diagnostics.clone(),
            pars: None,
        }
    }
}

/// 过程模型 Trait
pub trait ProcessModel: Send + Sync {
    /// 模型名称
    fn name(&self) -> &str;

    /// 将单个成员推进一个时间步
    fn propagate(&self, input: &MemberInput) -> Result<MemberOutput, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_internal_grid() {
        let mut phys = PhysicalState::with_lake_depth(2.5);
        phys.model_internal_depths = vec![0.5, 1.5, 2.5, 3.5];
        phys.truncate_internal_grid();
        assert_eq!(phys.model_internal_depths[2], 2.5);
        assert!(phys.model_internal_depths[3].is_nan());
    }

    #[test]
    fn test_persist_keeps_input() {
        let input = MemberInput {
            step: 3,
            member: 1,
            states: vec![1.0, 2.0],
            physics: PhysicalState::with_lake_depth(4.0),
            pars: vec![0.5],
            diagnostics: vec![],
            forcing: ForcingSelection {
                weather_member: 1,
                inflow_member: 0,
            },
        };
        let out = MemberOutput::persist(&input);
        assert_eq!(out.states, input.states);
        assert_eq!(out.physics.lake_depth, 4.0);
        assert!(out.pars.is_none());
    }
}
