// apps/lc_cli/src/commands/info.rs

//! 信息显示命令

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use lc_config::{DaConfig, DaMethod, ParFitMethod};

/// 信息显示参数
#[derive(Args)]
pub struct InfoArgs {
    /// 显示系统信息
    #[arg(long)]
    pub system: bool,

    /// 显示支持的方法
    #[arg(long)]
    pub methods: bool,

    /// 显示默认配置
    #[arg(long)]
    pub defaults: bool,
}

/// 执行信息命令
pub fn execute(args: InfoArgs) -> Result<()> {
    info!("=== LimnoCast 信息 ===");

    let show_all = !args.system && !args.methods && !args.defaults;
    if args.system || show_all {
        print_system_info();
        println!();
    }
    if args.methods || show_all {
        print_methods();
        println!();
    }
    if args.defaults || show_all {
        print_default_config()?;
    }

    Ok(())
}

fn print_system_info() {
    println!("=== 系统信息 ===");
    println!("LimnoCast CLI 版本: {}", env!("CARGO_PKG_VERSION"));
    println!("目标平台: {}", std::env::consts::ARCH);
    println!("操作系统: {}", std::env::consts::OS);
    println!("并行线程: {}", available_threads());
}

fn print_methods() {
    println!("=== 支持的方法 ===");
    println!("da_method:      {}", DaMethod::NAMES.join(", "));
    println!("par_fit_method: {}", ParFitMethod::NAMES.join(", "));
}

fn print_default_config() -> Result<()> {
    println!("=== 默认配置 ===");
    let config = DaConfig::default();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("默认配置序列化失败")?
    );
    Ok(())
}

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
