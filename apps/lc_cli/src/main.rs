// apps/lc_cli/src/main.rs

//! LimnoCast 命令行界面
//!
//! `run` 读取同化配置与算例，以内置演示模型 [`toy_model::ToyLakeModel`]
//! 驱动集合同化引擎并写出 JSON 结果；`validate` 只做配置与算例检查；
//! `info` 列出支持的同化方法与默认配置。

mod commands;
mod toy_model;

use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

/// LimnoCast 集合同化命令行工具
#[derive(Parser)]
#[command(name = "lc_cli")]
#[command(author = "LimnoCast Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LimnoCast ensemble data assimilation for lake models", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行同化与预报
    Run(commands::run::RunArgs),
    /// 显示信息
    Info(commands::info::InfoArgs),
    /// 验证配置
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = parse_level(&cli.log_level)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Info(args) => commands::info::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

/// 解析日志级别（大小写不敏感）
fn parse_level(name: &str) -> anyhow::Result<Level> {
    Level::from_str(name).with_context(|| format!("无效的日志级别: {name}"))
}
