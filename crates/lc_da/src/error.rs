// crates/lc_da/src/error.rs

//! 同化层错误类型
//!
//! 配置错误与维度错误在运行前或首次出现时即中止；数值退化不属于错误，
//! 由增益求解降级处理并记录在步报告中；成员传播失败默认中止，
//! 可通过 [`MemberFailurePolicy::Isolate`](lc_config::MemberFailurePolicy) 隔离。

use lc_config::ConfigError;
use lc_foundation::LcError;
use thiserror::Error;

/// 同化结果类型
pub type DaResult<T> = Result<T, DaError>;

/// 同化错误
#[derive(Debug, Error)]
pub enum DaError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 维度不匹配
    #[error("维度不匹配: {what} 期望 {expected}, 实际 {actual}")]
    DimensionMismatch {
        /// 出错的数据
        what: String,
        /// 期望大小
        expected: usize,
        /// 实际大小
        actual: usize,
    },

    /// 单个成员传播失败
    #[error("第 {step} 步成员 {member} 传播失败: {message}")]
    MemberPropagation {
        /// 时间步
        step: usize,
        /// 成员索引
        member: usize,
        /// 模型报告的原因
        message: String,
    },

    /// 所有成员传播失败
    #[error("第 {step} 步所有成员传播失败")]
    AllMembersFailed {
        /// 时间步
        step: usize,
    },

    /// 时间步标志重复写入
    #[error("第 {step} 步标志已写入")]
    FlagConflict {
        /// 时间步
        step: usize,
    },

    /// 时间步标志缺失
    #[error("第 {step} 步没有记录标志")]
    FlagMissing {
        /// 时间步
        step: usize,
    },

    /// 观测数据无效
    #[error("观测数据无效: {0}")]
    InvalidObservation(String),

    /// 集合状态无效
    #[error("集合状态无效: {0}")]
    InvalidState(String),

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] LcError),
}

impl DaError {
    /// 构造维度不匹配错误
    pub fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// 检查维度是否一致
    #[inline]
    pub fn check_dim(what: &str, expected: usize, actual: usize) -> DaResult<()> {
        if expected != actual {
            Err(Self::dimension(what, expected, actual))
        } else {
            Ok(())
        }
    }
}
