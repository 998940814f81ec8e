// crates/lc_config/src/lib.rs

//! LimnoCast Config Layer (Layer 2)
//!
//! 配置层，提供同化运行配置与方法枚举。
//!
//! # 模块概览
//!
//! - [`da_config`]: DaConfig 同化配置（JSON）
//! - [`methods`]: 同化方法、参数拟合方法与各类策略枚举
//! - [`error`]: 配置错误类型

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod da_config;
pub mod error;
pub mod methods;

/// 层级标识
pub const LAYER: u8 = 2;

// 重导出核心类型
pub use da_config::{
    AuxObsConfig, DaConfig, EnsembleConfig, ObsVariableConfig, ObservationConfig,
    ParameterConfig, StateConfig, StateObsLink, UncertaintyConfig,
};
pub use error::ConfigError;
pub use methods::{DaMethod, LocalizationKind, MemberFailurePolicy, ParFitMethod, StateSpace};
