// crates/lc_da/src/propagate.rs

//! 成员并行传播
//!
//! 各成员只读取自身上一步切片并写入自身输出，在 rayon 线程池中并行
//! 调用过程模型；收集全部结果后（屏障）才进入顺序的同化阶段。

use rayon::prelude::*;
use tracing::warn;

use lc_config::MemberFailurePolicy;

use crate::error::{DaError, DaResult};
use crate::model::{MemberInput, MemberOutput, ModelError, ProcessModel};

/// 一步传播结果
#[derive(Debug, Clone)]
pub struct Propagation {
    /// 按成员顺序排列的输出
    pub outputs: Vec<MemberOutput>,
    /// 被隔离的失败成员
    pub failed: Vec<usize>,
}

/// 并行传播所有成员
pub fn propagate_members<M: ProcessModel + ?Sized>(
    model: &M,
    inputs: &[MemberInput],
    policy: MemberFailurePolicy,
    step: usize,
) -> DaResult<Propagation> {
    let results: Vec<Result<MemberOutput, ModelError>> =
        inputs.par_iter().map(|input| model.propagate(input)).collect();
    resolve_failures(inputs, results, policy, step)
}

/// 按失败策略处理传播结果
///
/// `Abort` 返回编号最小的失败成员；`Isolate` 以上一步切片代替失败成员，
/// 全部失败时仍然报错。
pub fn resolve_failures(
    inputs: &[MemberInput],
    results: Vec<Result<MemberOutput, ModelError>>,
    policy: MemberFailurePolicy,
    step: usize,
) -> DaResult<Propagation> {
    DaError::check_dim("propagation results", inputs.len(), results.len())?;
    let mut outputs = Vec::with_capacity(results.len());
    let mut failed = Vec::new();

    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(out) => outputs.push(out),
            Err(e) => match policy {
                MemberFailurePolicy::Abort => {
                    return Err(DaError::MemberPropagation {
                        step,
                        member: input.member,
                        message: e.to_string(),
                    })
                }
                MemberFailurePolicy::Isolate => {
                    warn!("第 {step} 步成员 {} 传播失败，沿用上一步: {e}", input.member);
                    failed.push(input.member);
                    outputs.push(MemberOutput::persist(input));
                }
            },
        }
    }

    if !inputs.is_empty() && failed.len() == inputs.len() {
        return Err(DaError::AllMembersFailed { step });
    }
    Ok(Propagation { outputs, failed })
}
