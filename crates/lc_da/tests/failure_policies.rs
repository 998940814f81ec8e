// crates/lc_da/tests/failure_policies.rs

//! 错误路径测试
//! 配置错误在任何时间步运行前报告；成员传播失败按策略中止或隔离

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use lc_config::{ConfigError, MemberFailurePolicy};
use lc_da::{
    Assimilator, DaError, MemberInput, MemberOutput, ModelError, ObservationSet, ProcessModel,
    StepKind,
};

struct CountingModel {
    calls: AtomicUsize,
}

impl ProcessModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    fn propagate(&self, input: &MemberInput) -> Result<MemberOutput, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MemberOutput::persist(input))
    }
}

/// 测试未知同化方法在运行前即报配置错误
#[test]
fn test_unknown_method_rejected_before_any_step() {
    let model = CountingModel {
        calls: AtomicUsize::new(0),
    };
    let mut c = config("kalman");
    let err = Assimilator::new(&c).err().unwrap();
    assert!(matches!(
        err,
        DaError::Config(ConfigError::UnknownMethod { key: "da_method", .. })
    ));

    c.da_method = "enkf".to_string();
    c.par_fit_method = "wiggle".to_string();
    assert!(matches!(Assimilator::new(&c), Err(DaError::Config(_))));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

/// 测试观测维度错误在运行前报告
#[test]
fn test_observation_shape_mismatch_rejected() {
    let c = config("enkf");
    let model = CountingModel {
        calls: AtomicUsize::new(0),
    };
    let obs = ObservationSet::empty(2, 6, c.n_depths());
    let err = Assimilator::new(&c)
        .unwrap()
        .run(&model, initial(&c, 10.0), &obs, 0)
        .unwrap_err();
    assert!(matches!(err, DaError::DimensionMismatch { .. }));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

/// 测试默认策略下成员失败使整步中止
#[test]
fn test_member_failure_aborts_by_default() {
    let c = with_model_sd(config("enkf"), 0.3);
    assert_eq!(c.ensemble.member_failure, MemberFailurePolicy::Abort);
    let err = Assimilator::new(&c)
        .unwrap()
        .run(&MockLake::new(0.5).failing_at(2, 3), initial(&c, 10.0), &observations(&c), 0)
        .unwrap_err();
    assert!(matches!(
        err,
        DaError::MemberPropagation {
            step: 2,
            member: 3,
            ..
        }
    ));
}

/// 测试隔离策略：失败成员原样沿用上一步（不加过程噪声），运行继续并在报告中列出
#[test]
fn test_member_failure_isolated_when_configured() {
    let mut c = with_model_sd(config("none"), 0.5);
    c.ensemble.member_failure = MemberFailurePolicy::Isolate;
    let out = Assimilator::new(&c)
        .unwrap()
        .run(&MockLake::new(0.5).failing_at(2, 3), initial(&c, 10.0), &observations(&c), 0)
        .unwrap();

    assert_eq!(out.reports[2].failed_members, vec![3]);
    assert!(out.reports[1].failed_members.is_empty());
    assert_eq!(out.flags[2], StepKind::PassthroughQc);
    for d in 0..DEPTHS.len() {
        assert_eq!(out.states.get(2, 0, d, 3), out.states.get(1, 0, d, 3));
        assert_ne!(out.states.get(2, 0, d, 2), out.states.get(1, 0, d, 2));
    }
}

/// 测试隔离策略下全部成员失败仍然报错
#[test]
fn test_all_members_failing_is_fatal() {
    let mut c = config("none");
    c.ensemble.members = 1;
    c.ensemble.member_failure = MemberFailurePolicy::Isolate;
    let err = Assimilator::new(&c)
        .unwrap()
        .run(&MockLake::new(0.5).failing_at(1, 0), initial(&c, 10.0), &observations(&c), 0)
        .unwrap_err();
    assert!(matches!(err, DaError::AllMembersFailed { step: 1 }));
}
