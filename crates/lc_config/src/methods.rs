// crates/lc_config/src/methods.rs

//! 同化方法与策略枚举
//!
//! 同化方法和参数拟合方法在配置文件中以字符串给出，运行前经 `FromStr`
//! 解析；未知名称返回 [`ConfigError::UnknownMethod`]，不会被静默忽略。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// 同化方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaMethod {
    /// 集合卡尔曼滤波
    Enkf,
    /// 粒子滤波
    ParticleFilter,
    /// 不同化（仅传播）
    None,
}

impl DaMethod {
    /// 支持的名称
    pub const NAMES: &'static [&'static str] = &["enkf", "pf", "none"];

    /// 配置名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enkf => "enkf",
            Self::ParticleFilter => "pf",
            Self::None => "none",
        }
    }
}

impl FromStr for DaMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enkf" => Ok(Self::Enkf),
            "pf" => Ok(Self::ParticleFilter),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::UnknownMethod {
                key: "da_method",
                value: s.to_string(),
                supported: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for DaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 参数拟合方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParFitMethod {
    /// 围绕均值放大参数离散度
    Inflate,
    /// 相对扰动（标准差与参数均值成比例）
    Perturb,
    /// 绝对扰动（固定标准差）
    PerturbConst,
    /// 仅在初始化时扰动，之后不更新
    PerturbInit,
}

impl ParFitMethod {
    /// 支持的名称
    pub const NAMES: &'static [&'static str] =
        &["inflate", "perturb", "perturb_const", "perturb_init"];

    /// 配置名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inflate => "inflate",
            Self::Perturb => "perturb",
            Self::PerturbConst => "perturb_const",
            Self::PerturbInit => "perturb_init",
        }
    }
}

impl FromStr for ParFitMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inflate" => Ok(Self::Inflate),
            "perturb" => Ok(Self::Perturb),
            "perturb_const" => Ok(Self::PerturbConst),
            "perturb_init" => Ok(Self::PerturbInit),
            _ => Err(ConfigError::UnknownMethod {
                key: "par_fit_method",
                value: s.to_string(),
                supported: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for ParFitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个成员传播失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberFailurePolicy {
    /// 整步失败
    #[default]
    Abort,
    /// 隔离失败成员（沿用其上一步状态）并继续
    Isolate,
}

/// 协方差局地化函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocalizationKind {
    /// Gaspari-Cohn 五阶分段多项式，在局地化距离处截断为零
    #[default]
    GaspariCohn,
    /// 高斯衰减 exp(-Δ²/2L²)
    Gaussian,
}

/// 同化变量空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateSpace {
    /// 线性空间
    #[default]
    Linear,
    /// 对数空间（保留扩展点：不对非主状态做负值截断）
    Log,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_da_method() {
        assert_eq!("enkf".parse::<DaMethod>().unwrap(), DaMethod::Enkf);
        assert_eq!(" PF ".parse::<DaMethod>().unwrap(), DaMethod::ParticleFilter);
        assert_eq!("none".parse::<DaMethod>().unwrap(), DaMethod::None);
        assert!(matches!(
            "4dvar".parse::<DaMethod>(),
            Err(ConfigError::UnknownMethod { key: "da_method", .. })
        ));
    }

    #[test]
    fn test_parse_par_fit_method() {
        for name in ParFitMethod::NAMES {
            let m: ParFitMethod = name.parse().unwrap();
            assert_eq!(m.as_str(), *name);
        }
        assert!("jitter".parse::<ParFitMethod>().is_err());
    }

    #[test]
    fn test_policy_serde_names() {
        let p: MemberFailurePolicy = serde_json::from_str("\"isolate\"").unwrap();
        assert_eq!(p, MemberFailurePolicy::Isolate);
        let k: LocalizationKind = serde_json::from_str("\"gaspari_cohn\"").unwrap();
        assert_eq!(k, LocalizationKind::GaspariCohn);
    }
}
