// apps/lc_cli/src/commands/run.rs

//! 运行同化命令
//!
//! 读取同化配置与算例文件，用演示模型驱动同化引擎，结果以 JSON 写出。

use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use lc_config::DaConfig;
use lc_da::{Assimilator, StepKind};

use super::case::CaseFile;
use crate::toy_model::ToyLakeModel;

/// 运行参数
#[derive(Args)]
pub struct RunArgs {
    /// 同化配置文件路径
    #[arg(short, long)]
    pub config: PathBuf,

    /// 算例文件路径（初始剖面与观测）
    #[arg(long)]
    pub case: PathBuf,

    /// 输出文件
    #[arg(short, long, default_value = "output/da_output.json")]
    pub output: PathBuf,

    /// 覆盖随机种子
    #[arg(long)]
    pub seed: Option<u64>,

    /// 覆盖集合成员数
    #[arg(short, long)]
    pub members: Option<usize>,

    /// 诊断量个数
    #[arg(long, default_value = "1")]
    pub n_diag: usize,
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== LimnoCast 同化运行 ===");

    let mut config = DaConfig::from_file(&args.config)
        .with_context(|| format!("无法加载配置: {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.ensemble.seed = seed;
    }
    if let Some(members) = args.members {
        config.ensemble.members = members;
    }
    config.validate().context("覆盖后的配置无效")?;

    let case = CaseFile::from_file(&args.case)?;
    case.check(&config)?;
    if config.forecast_start_index >= case.n_steps {
        warn!(
            "forecast_start_index = {} 不小于步数 {}，不会产生预报步",
            config.forecast_start_index, case.n_steps
        );
    }

    let observations = case.observation_set(&config)?;
    let initial = case.initial_ensemble(&config);
    let model = ToyLakeModel::new(config.modeled_depths.clone(), config.n_states());

    let start = Instant::now();
    let output = Assimilator::new(&config)?.run(&model, initial, &observations, args.n_diag)?;
    let elapsed = start.elapsed();

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建输出目录: {}", parent.display()))?;
        }
    }
    let file = File::create(&args.output)
        .with_context(|| format!("无法创建输出文件: {}", args.output.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &output).context("写出结果失败")?;

    let count = |kind: StepKind| output.flags.iter().filter(|k| **k == kind).count();
    let degenerate = output.reports.iter().filter(|r| r.degenerate_solve).count();
    let isolated: usize = output.reports.iter().map(|r| r.failed_members.len()).sum();

    info!("=== 运行完成 ===");
    info!("耗时: {:.2?}", elapsed);
    info!(
        "标志序列: {}",
        output.flags.iter().map(StepKind::code).collect::<String>()
    );
    info!(
        "步标志: 同化 {}, 仅质控 {}, 预报 {}",
        count(StepKind::Assimilated),
        count(StepKind::PassthroughQc),
        count(StepKind::Forecast)
    );
    if degenerate > 0 {
        warn!("{} 步增益求解退化", degenerate);
    }
    if isolated > 0 {
        warn!("共隔离 {} 次成员失败", isolated);
    }
    let last = output.dims.n_steps - 1;
    info!(
        "末步表层均值 {:.3}, 标准差 {:.3}",
        output.mean(last, 0, 0),
        output.sd(last, 0, 0)
    );
    info!("结果已写入: {}", args.output.display());

    Ok(())
}
