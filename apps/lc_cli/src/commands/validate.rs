// apps/lc_cli/src/commands/validate.rs

//! 配置验证命令
//!
//! 验证同化配置与算例文件，区分错误与警告。

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{error, info, warn};

use lc_config::{DaConfig, DaMethod};

use super::case::CaseFile;

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 同化配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 算例文件路径
    #[arg(long)]
    pub case: Option<PathBuf>,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

#[derive(Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn is_ok(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== LimnoCast 配置验证 ===");

    let Some(config_path) = &args.config else {
        println!("用法: lc_cli validate --config <配置文件> [--case <算例文件>]");
        return Ok(());
    };

    let mut result = ValidationResult::default();
    let config = validate_config(config_path, &mut result);

    if let (Some(case_path), Some(config)) = (&args.case, &config) {
        validate_case(case_path, config, &mut result);
    }

    print_validation_result(&result, args.strict)
}

fn validate_config(path: &PathBuf, result: &mut ValidationResult) -> Option<DaConfig> {
    println!("\n检查配置文件: {}", path.display());

    if !path.exists() {
        result.add_error(format!("配置文件不存在: {}", path.display()));
        return None;
    }

    let config = match DaConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            result.add_error(e.to_string());
            return None;
        }
    };
    println!("  ✓ 配置文件有效");

    let method = config.da_method().ok();
    if method == Some(DaMethod::Enkf) && config.ensemble.members < 2 {
        result.add_warning("EnKF 在单成员下协方差为零，观测不会产生校正");
    }
    if method == Some(DaMethod::ParticleFilter) && config.ensemble.members < 10 {
        result.add_warning(format!(
            "粒子滤波成员数 {} 过少，重采样容易退化",
            config.ensemble.members
        ));
    }
    if method == Some(DaMethod::Enkf)
        && config.localization_distance.is_none()
        && config.n_depths() > config.ensemble.members
    {
        result.add_warning("深度数多于成员数且未设置 localization_distance，协方差秩不足");
    }
    if method != Some(DaMethod::None) && !config.use_obs_constraint {
        result.add_warning("use_obs_constraint = false，不会使用任何观测");
    }
    if config.observations.states_to_obs.is_empty() && config.observations.aux.is_none() {
        result.add_warning("没有任何状态与观测变量关联");
    }
    if !config.uncertainty.process && config.states.iter().any(|s| s.model_sd.iter().any(|v| *v > 0.0)) {
        result.add_warning("过程不确定性关闭，预报阶段不注入 model_sd 噪声");
    }

    Some(config)
}

fn validate_case(path: &PathBuf, config: &DaConfig, result: &mut ValidationResult) {
    println!("\n检查算例文件: {}", path.display());

    let case = match CaseFile::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            result.add_error(format!("{e:#}"));
            return;
        }
    };
    if let Err(e) = case.check(config) {
        result.add_error(e.to_string());
        return;
    }
    if let Err(e) = case.observation_set(config) {
        result.add_error(e.to_string());
        return;
    }
    println!("  ✓ 算例文件有效");

    if config.forecast_start_index >= case.n_steps {
        result.add_warning(format!(
            "forecast_start_index = {} 不小于步数 {}，不会产生预报步",
            config.forecast_start_index, case.n_steps
        ));
    }
    if case.observations.is_empty() && case.aux.is_none() && case.depth.is_none() {
        result.add_warning("算例不含任何观测");
    }
    if !(case.lake_depth > 0.0) {
        result.add_error(format!("lake_depth = {} 必须为正", case.lake_depth));
    }
}

fn print_validation_result(result: &ValidationResult, strict: bool) -> Result<()> {
    println!("\n=== 验证结果 ===");

    if !result.errors.is_empty() {
        println!("\n错误 ({}):", result.errors.len());
        for err in &result.errors {
            error!("  ✗ {}", err);
            println!("  ✗ {}", err);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n警告 ({}):", result.warnings.len());
        for warning in &result.warnings {
            warn!("  ⚠ {}", warning);
            println!("  ⚠ {}", warning);
        }
    }

    if result.is_ok(strict) {
        println!("\n✓ 验证通过");
        Ok(())
    } else {
        println!("\n✗ 验证失败");
        bail!(
            "验证失败：发现 {} 个错误，{} 个警告",
            result.errors.len(),
            result.warnings.len()
        )
    }
}
