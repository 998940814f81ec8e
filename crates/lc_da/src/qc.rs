// crates/lc_da/src/qc.rs

//! 质量控制闸门
//!
//! 每步（包括直通步）在写入 `t+1` 之前无条件执行：
//!
//! 1. 非主状态的负值截断为零
//! 2. 率定参数截断到配置的上下限
//! 3. 深于成员湖底的状态与诊断量置为缺测

use lc_config::{DaConfig, StateSpace};
use lc_foundation::{is_missing, MISSING};

use crate::model::PhysicalState;
use crate::noise::clip_nonprimary;
use crate::store::{CurrentStep, EnsembleDims};

/// 质量控制闸门
#[derive(Debug, Clone)]
pub struct QcGate {
    space: StateSpace,
    par_bounds: Vec<(f64, f64)>,
}

impl QcGate {
    /// 直接构造
    pub fn new(space: StateSpace, par_bounds: Vec<(f64, f64)>) -> Self {
        Self { space, par_bounds }
    }

    /// 由配置构造
    pub fn from_config(config: &DaConfig) -> Self {
        Self::new(
            config.state_space,
            config.parameters.iter().map(|p| (p.lower, p.upper)).collect(),
        )
    }

    /// 对当前步切片原地执行质量控制，返回被截断的数值个数
    pub fn apply(&self, cur: &mut CurrentStep<'_>, dims: &EnsembleDims, depths: &[f64]) -> usize {
        let mut clipped = clip_nonprimary(cur.states, dims, self.space);
        if let Some(pars) = cur.pars.as_deref_mut() {
            clipped += clip_parameters(pars, dims.n_members, &self.par_bounds);
        }
        mask_below_floor(cur.states, dims.n_members, depths, cur.physics);
        mask_below_floor(cur.diagnostics, dims.n_members, depths, cur.physics);
        clipped
    }
}

/// 参数截断到 `[lower, upper]`，切片布局 `[p][m]`
pub fn clip_parameters(pars: &mut [f64], n_members: usize, bounds: &[(f64, f64)]) -> usize {
    let mut clipped = 0;
    for (row, &(lower, upper)) in pars.chunks_mut(n_members).zip(bounds) {
        for v in row.iter_mut() {
            if is_missing(*v) {
                continue;
            }
            let c = v.clamp(lower, upper);
            if c != *v {
                *v = c;
                clipped += 1;
            }
        }
    }
    clipped
}

/// 将深于成员湖深的行置为缺测
///
/// 切片布局为 `[group][depth][m]`，组数由切片长度推出。
/// 湖深缺测的成员不做处理。
pub fn mask_below_floor(
    slab: &mut [f64],
    n_members: usize,
    depths: &[f64],
    physics: &[PhysicalState],
) {
    let nd = depths.len();
    if nd == 0 || n_members == 0 {
        return;
    }
    for (row, values) in slab.chunks_mut(n_members).enumerate() {
        let z = depths[row % nd];
        for (m, v) in values.iter_mut().enumerate() {
            let floor = physics[m].lake_depth;
            if !is_missing(floor) && z > floor {
                *v = MISSING;
            }
        }
    }
}
