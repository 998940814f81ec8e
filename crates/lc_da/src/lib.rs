// crates/lc_da/src/lib.rs

//! LimnoCast 同化层 (Layer 3) - 集合数据同化引擎
//!
//! 该 crate 逐时间步推进湖泊过程模型的集合轨迹，并用稀疏、含噪声的
//! 观测对其做统计校正，得到再分析历史与概率预报。
//!
//! # 设计原则
//!
//! 1. **模型无关**: 物理过程通过 [`ProcessModel`] 注入，核心不含动力学
//! 2. **并行传播，顺序同化**: 成员传播在 rayon 中并行，同化在屏障之后顺序执行
//! 3. **可复现**: 所有随机抽样按 (种子, 步, 成员, 流) 派生
//!
//! # 模块结构
//!
//! - `store`: 集合状态 / 参数 / 诊断量 / 物理辅助状态存储
//! - `noise`: 沿深度 AR(1) 相关的过程噪声
//! - `obs_operator`: 每步观测算子 `H` 与 `z_index`
//! - `covariance` / `localization`: 集合协方差与垂向局地化
//! - `enkf` / `particle`: 两种更新规则
//! - `par_fit`: 参数拟合策略
//! - `qc`: 质量控制闸门
//! - `flags`: 时间步标志
//! - `engine`: 时间循环
//!
//! # 使用示例
//!
//! ```ignore
//! use lc_config::DaConfig;
//! use lc_da::{Assimilator, InitialEnsemble, ObservationSet};
//!
//! let config = DaConfig::from_file("da.json")?;
//! let assimilator = Assimilator::new(&config)?;
//! let output = assimilator.run(&model, initial, &observations, 0)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod covariance;
pub mod engine;
pub mod enkf;
pub mod error;
pub mod flags;
pub mod init;
pub mod localization;
pub mod model;
pub mod noise;
pub mod obs_operator;
pub mod observations;
pub mod par_fit;
pub mod particle;
pub mod propagate;
pub mod qc;
pub mod store;

/// 层级标识
pub const LAYER: u8 = 3;

// 重导出
pub use engine::{Assimilator, DaOutput, StepReport};
pub use error::{DaError, DaResult};
pub use flags::{FlagRecorder, StepKind};
pub use init::{InitialEnsemble, Initializer};
pub use localization::{CovarianceLocalizer, GaspariCohn, GaussianTaper};
pub use model::{
    ForcingSelection, MemberInput, MemberOutput, ModelError, PhysicalState, ProcessModel,
};
pub use obs_operator::{ObsOperator, ObsOperatorBuilder, ObsRow};
pub use observations::ObservationSet;
pub use par_fit::ParFitStrategy;
pub use store::{EnsembleDims, EnsembleStore};
