// crates/lc_da/src/flags.rs

//! 时间步标志
//!
//! 每个时间步恰好记录一次标志，运行结束时不允许存在未记录的步。

use serde::{Deserialize, Serialize};

use crate::error::{DaError, DaResult};

/// 时间步类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// 应用了 EnKF / PF 校正
    Assimilated,
    /// 预报期，未校正
    Forecast,
    /// 历史期直通，仅执行质量控制
    PassthroughQc,
}

impl StepKind {
    /// 未校正步的类别
    pub fn uncorrected(step: usize, forecast_start_index: usize) -> Self {
        if step > forecast_start_index {
            Self::Forecast
        } else {
            Self::PassthroughQc
        }
    }

    /// 单字符代码（日志用）
    pub fn code(&self) -> char {
        match self {
            Self::Assimilated => 'A',
            Self::Forecast => 'F',
            Self::PassthroughQc => 'P',
        }
    }
}

/// 标志记录器
#[derive(Debug, Clone)]
pub struct FlagRecorder {
    flags: Vec<Option<StepKind>>,
}

impl FlagRecorder {
    /// 为 `n_steps` 个时间步创建
    pub fn new(n_steps: usize) -> Self {
        Self {
            flags: vec![None; n_steps],
        }
    }

    /// 记录第 `step` 步标志，重复记录返回错误
    pub fn record(&mut self, step: usize, kind: StepKind) -> DaResult<()> {
        let n = self.flags.len();
        let slot = self
            .flags
            .get_mut(step)
            .ok_or_else(|| DaError::dimension("flag step", n, step))?;
        if slot.is_some() {
            return Err(DaError::FlagConflict { step });
        }
        *slot = Some(kind);
        Ok(())
    }

    /// 读取第 `step` 步标志
    pub fn get(&self, step: usize) -> Option<StepKind> {
        self.flags.get(step).copied().flatten()
    }

    /// 检查所有步均已记录并返回标志序列
    pub fn finalize(self) -> DaResult<Vec<StepKind>> {
        self.flags
            .into_iter()
            .enumerate()
            .map(|(step, f)| f.ok_or(DaError::FlagMissing { step }))
            .collect()
    }
}
