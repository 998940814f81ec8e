// crates/lc_foundation/src/lib.rs

//! LimnoCast Foundation Layer (Layer 1)
//!
//! 基础层，提供整个项目共享的最小抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型与 `ensure!` / `require!` 宏
//! - [`array`]: 集合状态使用的稠密多维缓冲区（`NaN` 表示缺测）
//! - [`rng`]: 按 (种子, 时间步, 成员, 流类别) 派生的确定性随机流
//!
//! # 层级架构
//!
//! ```text
//! Layer 5: lc_cli        ─> 命令行
//! Layer 3: lc_da         ─> 同化引擎
//! Layer 2: lc_config     ─> DaConfig
//! Layer 1: lc_foundation ─> LcError, Array3/Array4, 随机流 (本层)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod error;
pub mod rng;

/// 层级标识
pub const LAYER: u8 = 1;

// 重导出常用类型
pub use array::{is_missing, Array3, Array4, MISSING};
pub use error::{LcError, LcResult};
pub use rng::{stream_rng, stream_seed, StreamKind};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::array::{is_missing, Array3, Array4, MISSING};
    pub use crate::error::{LcError, LcResult};
    pub use crate::rng::{stream_rng, StreamKind};
    pub use crate::{ensure, require};
}
