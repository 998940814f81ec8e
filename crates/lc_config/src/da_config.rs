// crates/lc_config/src/da_config.rs

//! DaConfig - 集合同化配置
//!
//! 定义同化运行的全部配置项。方法名以字符串存储，由
//! [`DaConfig::da_method`] / [`DaConfig::par_fit_method`] 在运行前解析，
//! 保证未知方法在第一步之前就以配置错误形式报告。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::methods::{DaMethod, LocalizationKind, MemberFailurePolicy, ParFitMethod, StateSpace};

/// 集合同化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaConfig {
    /// 同化方法：`enkf` | `pf` | `none`
    #[serde(default = "default_da_method")]
    pub da_method: String,

    /// 参数拟合方法：`inflate` | `perturb` | `perturb_const` | `perturb_init`
    #[serde(default = "default_par_fit_method")]
    pub par_fit_method: String,

    /// 协方差膨胀系数（缺省为 1.0，即不膨胀）
    #[serde(default)]
    pub inflation_factor: Option<f64>,

    /// 参数离散度膨胀系数（`inflate` 方法使用）
    #[serde(default = "default_one")]
    pub par_inflation: f64,

    /// 垂向局地化距离 [m]，缺省不做局地化
    #[serde(default)]
    pub localization_distance: Option<f64>,

    /// 局地化函数
    #[serde(default)]
    pub localization_kind: LocalizationKind,

    /// 集合设置
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// 各不确定性来源开关
    #[serde(default)]
    pub uncertainty: UncertaintyConfig,

    /// 最后一个历史（再分析）时间步索引，之后为预报步
    pub forecast_start_index: usize,

    /// 是否使用观测约束
    #[serde(default = "default_true")]
    pub use_obs_constraint: bool,

    /// 同化变量空间
    #[serde(default)]
    pub state_space: StateSpace,

    /// 模型输出深度坐标 [m]，严格递增
    pub modeled_depths: Vec<f64>,

    /// 状态变量（第 0 个为主状态，如水温）
    pub states: Vec<StateConfig>,

    /// 观测配置
    #[serde(default)]
    pub observations: ObservationConfig,

    /// 待率定参数
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

fn default_da_method() -> String { "enkf".to_string() }
fn default_par_fit_method() -> String { "inflate".to_string() }
fn default_one() -> f64 { 1.0 }
fn default_true() -> bool { true }

/// 集合设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// 集合成员数
    #[serde(default = "default_members")]
    pub members: usize,

    /// 运行种子
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// 成员传播失败处理策略
    #[serde(default)]
    pub member_failure: MemberFailurePolicy,
}

fn default_members() -> usize { 21 }
fn default_seed() -> u64 { 42 }

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            members: default_members(),
            seed: default_seed(),
            member_failure: MemberFailurePolicy::default(),
        }
    }
}

/// 不确定性来源开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertaintyConfig {
    /// 过程噪声（仅影响预报段，历史段始终注入）
    #[serde(default = "default_true")]
    pub process: bool,
    /// 参数不确定性
    #[serde(default = "default_true")]
    pub parameter: bool,
    /// 初始条件不确定性
    #[serde(default = "default_true")]
    pub initial_condition: bool,
    /// 观测不确定性（关闭时不扰动观测）
    #[serde(default = "default_true")]
    pub observation: bool,
    /// 气象驱动不确定性
    #[serde(default = "default_true")]
    pub weather: bool,
    /// 入流不确定性
    #[serde(default = "default_true")]
    pub inflow: bool,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            process: true,
            parameter: true,
            initial_condition: true,
            observation: true,
            weather: true,
            inflow: true,
        }
    }
}

/// 状态变量配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// 变量名
    pub name: String,
    /// 各深度过程噪声标准差
    pub model_sd: Vec<f64>,
    /// 垂向去相关长度（无量纲，alpha = 1 - exp(-L)）
    #[serde(default)]
    pub vert_decorr_length: f64,
}

impl StateConfig {
    /// 垂向 AR(1) 相关系数
    pub fn alpha(&self) -> f64 {
        1.0 - (-self.vert_decorr_length).exp()
    }
}

/// 观测变量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsVariableConfig {
    /// 变量名
    pub name: String,
    /// 观测误差标准差
    pub obs_sd: f64,
}

/// 状态 → 观测映射
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateObsLink {
    /// 状态索引
    pub state: usize,
    /// 观测变量索引
    pub obs_var: usize,
    /// 映射系数
    #[serde(default = "default_one")]
    pub coefficient: f64,
}

/// 辅助标量观测（如透明度代理量）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxObsConfig {
    /// 变量名
    pub name: String,
    /// 观测误差标准差
    pub obs_sd: f64,
}

/// 观测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// 按深度观测的变量
    #[serde(default)]
    pub variables: Vec<ObsVariableConfig>,
    /// 状态 → 观测映射
    #[serde(default)]
    pub states_to_obs: Vec<StateObsLink>,
    /// 辅助标量观测
    #[serde(default)]
    pub aux: Option<AuxObsConfig>,
    /// 湖深观测重采样标准差 [m]
    #[serde(default = "default_depth_obs_sd")]
    pub depth_obs_sd: f64,
    /// 是否同化湖深观测
    #[serde(default)]
    pub assimilate_depth: bool,
}

fn default_depth_obs_sd() -> f64 { 0.1 }

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            states_to_obs: Vec::new(),
            aux: None,
            depth_obs_sd: default_depth_obs_sd(),
            assimilate_depth: false,
        }
    }
}

/// 率定参数配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// 参数名
    pub name: String,
    /// 初始均值
    pub init_mean: f64,
    /// 初始标准差
    #[serde(default)]
    pub init_sd: f64,
    /// 下界
    pub lower: f64,
    /// 上界
    pub upper: f64,
    /// 每步扰动标准差（`perturb` 为相对值，`perturb_const` 为绝对值）
    #[serde(default)]
    pub perturb_sd: f64,
}

impl Default for DaConfig {
    fn default() -> Self {
        let depths = vec![0.0, 1.0, 2.0, 3.0];
        Self {
            da_method: default_da_method(),
            par_fit_method: default_par_fit_method(),
            inflation_factor: None,
            par_inflation: default_one(),
            localization_distance: None,
            localization_kind: LocalizationKind::default(),
            ensemble: EnsembleConfig::default(),
            uncertainty: UncertaintyConfig::default(),
            forecast_start_index: 10,
            use_obs_constraint: true,
            state_space: StateSpace::default(),
            states: vec![StateConfig {
                name: "temp".to_string(),
                model_sd: vec![0.25; depths.len()],
                vert_decorr_length: 1.0,
            }],
            modeled_depths: depths,
            observations: ObservationConfig {
                variables: vec![ObsVariableConfig {
                    name: "temp".to_string(),
                    obs_sd: 0.5,
                }],
                states_to_obs: vec![StateObsLink {
                    state: 0,
                    obs_var: 0,
                    coefficient: 1.0,
                }],
                ..ObservationConfig::default()
            },
            parameters: Vec::new(),
        }
    }
}

impl DaConfig {
    /// 从 JSON 文件加载并验证
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串加载并验证
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: DaConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 解析同化方法
    pub fn da_method(&self) -> Result<DaMethod, ConfigError> {
        self.da_method.parse()
    }

    /// 解析参数拟合方法
    pub fn par_fit_method(&self) -> Result<ParFitMethod, ConfigError> {
        self.par_fit_method.parse()
    }

    /// 协方差膨胀系数（未设置时为 1.0）
    pub fn inflation(&self) -> f64 {
        self.inflation_factor.unwrap_or(1.0)
    }

    /// 状态数
    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// 深度数
    pub fn n_depths(&self) -> usize {
        self.modeled_depths.len()
    }

    /// 率定参数数
    pub fn n_pars(&self) -> usize {
        self.parameters.len()
    }

    /// 按深度观测的变量数
    pub fn n_obs_vars(&self) -> usize {
        self.observations.variables.len()
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.da_method()?;
        self.par_fit_method()?;

        if self.ensemble.members == 0 {
            return Err(ConfigError::invalid("ensemble.members", 0, "集合成员数必须为正"));
        }

        if self.modeled_depths.is_empty() {
            return Err(ConfigError::Missing("modeled_depths".to_string()));
        }
        if self.modeled_depths.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ConfigError::invalid(
                "modeled_depths",
                format!("{:?}", self.modeled_depths),
                "深度必须为非负有限值",
            ));
        }
        if self.modeled_depths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::invalid(
                "modeled_depths",
                format!("{:?}", self.modeled_depths),
                "深度必须严格递增",
            ));
        }

        if self.states.is_empty() {
            return Err(ConfigError::Missing("states".to_string()));
        }
        for (i, state) in self.states.iter().enumerate() {
            if state.model_sd.len() != self.n_depths() {
                return Err(ConfigError::invalid(
                    format!("states[{i}].model_sd"),
                    state.model_sd.len(),
                    format!("长度必须等于深度数 {}", self.n_depths()),
                ));
            }
            if state.model_sd.iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(ConfigError::invalid(
                    format!("states[{i}].model_sd"),
                    format!("{:?}", state.model_sd),
                    "过程噪声标准差不能为负",
                ));
            }
            if state.vert_decorr_length < 0.0 {
                return Err(ConfigError::invalid(
                    format!("states[{i}].vert_decorr_length"),
                    state.vert_decorr_length,
                    "去相关长度不能为负",
                ));
            }
        }

        for (i, var) in self.observations.variables.iter().enumerate() {
            if !(var.obs_sd > 0.0) {
                return Err(ConfigError::invalid(
                    format!("observations.variables[{i}].obs_sd"),
                    var.obs_sd,
                    "观测误差标准差必须为正",
                ));
            }
        }
        if let Some(aux) = &self.observations.aux {
            if !(aux.obs_sd > 0.0) {
                return Err(ConfigError::invalid("observations.aux.obs_sd", aux.obs_sd, "必须为正"));
            }
        }
        for (i, link) in self.observations.states_to_obs.iter().enumerate() {
            if link.state >= self.n_states() {
                return Err(ConfigError::invalid(
                    format!("observations.states_to_obs[{i}].state"),
                    link.state,
                    "状态索引越界",
                ));
            }
            if link.obs_var >= self.n_obs_vars() {
                return Err(ConfigError::invalid(
                    format!("observations.states_to_obs[{i}].obs_var"),
                    link.obs_var,
                    "观测变量索引越界",
                ));
            }
        }
        if self.observations.depth_obs_sd < 0.0 {
            return Err(ConfigError::invalid(
                "observations.depth_obs_sd",
                self.observations.depth_obs_sd,
                "不能为负",
            ));
        }

        for (i, par) in self.parameters.iter().enumerate() {
            if par.lower > par.upper {
                return Err(ConfigError::invalid(
                    format!("parameters[{i}]"),
                    format!("[{}, {}]", par.lower, par.upper),
                    "下界不能大于上界",
                ));
            }
            if par.init_sd < 0.0 || par.perturb_sd < 0.0 {
                return Err(ConfigError::invalid(
                    format!("parameters[{i}]"),
                    par.name.as_str(),
                    "标准差不能为负",
                ));
            }
        }

        if !(self.inflation() > 0.0) {
            return Err(ConfigError::invalid("inflation_factor", self.inflation(), "必须为正"));
        }
        if !(self.par_inflation > 0.0) {
            return Err(ConfigError::invalid("par_inflation", self.par_inflation, "必须为正"));
        }
        if let Some(distance) = self.localization_distance {
            if !(distance > 0.0) {
                return Err(ConfigError::invalid("localization_distance", distance, "必须为正"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.da_method().unwrap(), DaMethod::Enkf);
        assert_eq!(config.inflation(), 1.0);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut config = DaConfig::default();
        config.da_method = "kalman".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownMethod { .. })));

        let mut config = DaConfig::default();
        config.par_fit_method = "shake".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownMethod { .. })));
    }

    #[test]
    fn test_model_sd_length_checked() {
        let mut config = DaConfig::default();
        config.states[0].model_sd.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_depths_must_increase() {
        let mut config = DaConfig::default();
        config.modeled_depths = vec![0.0, 2.0, 1.0, 3.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alpha_from_decorr_length() {
        let state = StateConfig {
            name: "temp".into(),
            model_sd: vec![],
            vert_decorr_length: 0.0,
        };
        assert_eq!(state.alpha(), 0.0);
        let state = StateConfig { vert_decorr_length: 2.0, ..state };
        assert!((state.alpha() - (1.0 - (-2.0f64).exp())).abs() < 1e-15);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "forecast_start_index": 3,
            "modeled_depths": [0.0, 1.0],
            "states": [{"name": "temp", "model_sd": [0.1, 0.1]}]
        }"#;
        let config = DaConfig::from_json_str(json).unwrap();
        assert_eq!(config.ensemble.members, 21);
        assert_eq!(config.par_fit_method().unwrap(), ParFitMethod::Inflate);
        assert!(config.uncertainty.process);
        assert!(config.localization_distance.is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.modeled_depths, config.modeled_depths);
        assert_eq!(parsed.da_method, config.da_method);
    }
}
