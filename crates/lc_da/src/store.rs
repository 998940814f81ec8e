// crates/lc_da/src/store.rs

//! 集合状态 / 参数存储
//!
//! 运行期间唯一的数据源。所有数组在初始化时按完整时间域一次性分配：
//!
//! - 状态 `x[t, s, d, m]`
//! - 参数 `pars[t, p, m]`（仅在配置了率定参数时存在）
//! - 诊断量 `diag[t, k, d, m]`
//! - 物理辅助状态 `physics[t][m]`
//!
//! 第 `t` 步的切片只由传播 + 校正写入一次；质量控制在进入 `t+1` 前
//! 原地修改刚写入的切片。各阶段通过 [`EnsembleStore::step_views`]
//! 取得上一步只读视图和当前步独占视图，不共享跨成员写入。

use serde::{Deserialize, Serialize};

use lc_foundation::{is_missing, Array3, Array4, LcError, MISSING};

use crate::error::{DaError, DaResult};
use crate::model::{ForcingSelection, MemberInput, MemberOutput, PhysicalState};

/// 集合维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleDims {
    /// 时间步数（含初始步 0）
    pub n_steps: usize,
    /// 状态数
    pub n_states: usize,
    /// 深度数
    pub n_depths: usize,
    /// 成员数
    pub n_members: usize,
    /// 率定参数数（0 表示不率定）
    pub n_pars: usize,
    /// 诊断量数
    pub n_diag: usize,
}

impl EnsembleDims {
    /// 状态 × 深度展平后的长度
    #[inline]
    pub fn n_state_rows(&self) -> usize {
        self.n_states * self.n_depths
    }

    /// 当前步切片中 `(s, d, m)` 的偏移
    #[inline]
    pub fn state_offset(&self, s: usize, d: usize, m: usize) -> usize {
        (s * self.n_depths + d) * self.n_members + m
    }
}

/// 上一步只读视图
pub struct PrevStep<'a> {
    /// 状态切片 `[s][d][m]`
    pub states: &'a [f64],
    /// 参数切片 `[p][m]`
    pub pars: Option<&'a [f64]>,
    /// 诊断切片 `[k][d][m]`
    pub diagnostics: &'a [f64],
    /// 物理辅助状态
    pub physics: &'a [PhysicalState],
}

/// 当前步独占视图
pub struct CurrentStep<'a> {
    /// 状态切片 `[s][d][m]`
    pub states: &'a mut [f64],
    /// 参数切片 `[p][m]`
    pub pars: Option<&'a mut [f64]>,
    /// 诊断切片 `[k][d][m]`
    pub diagnostics: &'a mut [f64],
    /// 物理辅助状态
    pub physics: &'a mut [PhysicalState],
}

/// 集合存储
#[derive(Debug, Clone)]
pub struct EnsembleStore {
    dims: EnsembleDims,
    modeled_depths: Vec<f64>,
    states: Array4,
    pars: Option<Array3>,
    diagnostics: Array4,
    physics: Vec<Vec<PhysicalState>>,
}

impl EnsembleStore {
    /// 按完整时间域预分配
    pub fn new(dims: EnsembleDims, modeled_depths: Vec<f64>) -> DaResult<Self> {
        DaError::check_dim("modeled_depths", dims.n_depths, modeled_depths.len())?;
        if dims.n_steps == 0 || dims.n_members == 0 || dims.n_states == 0 {
            return Err(DaError::InvalidState(format!("集合维度不能为零: {dims:?}")));
        }
        let pars = (dims.n_pars > 0)
            .then(|| Array3::missing([dims.n_steps, dims.n_pars, dims.n_members]));
        Ok(Self {
            dims,
            modeled_depths,
            states: Array4::missing([dims.n_steps, dims.n_states, dims.n_depths, dims.n_members]),
            pars,
            diagnostics: Array4::missing([dims.n_steps, dims.n_diag, dims.n_depths, dims.n_members]),
            physics: vec![vec![PhysicalState::default(); dims.n_members]; dims.n_steps],
        })
    }

    /// 维度
    pub fn dims(&self) -> EnsembleDims {
        self.dims
    }

    /// 模型深度坐标
    pub fn modeled_depths(&self) -> &[f64] {
        &self.modeled_depths
    }

    /// 状态数组
    pub fn states(&self) -> &Array4 {
        &self.states
    }

    /// 参数数组
    pub fn pars(&self) -> Option<&Array3> {
        self.pars.as_ref()
    }

    /// 诊断数组
    pub fn diagnostics(&self) -> &Array4 {
        &self.diagnostics
    }

    /// 第 `t` 步物理辅助状态
    pub fn physics(&self, t: usize) -> &[PhysicalState] {
        &self.physics[t]
    }

    /// 读取状态
    pub fn state(&self, t: usize, s: usize, d: usize, m: usize) -> f64 {
        self.states.get(t, s, d, m)
    }

    /// 读取参数
    pub fn par(&self, t: usize, p: usize, m: usize) -> Option<f64> {
        self.pars.as_ref().map(|a| a.get(t, p, m))
    }

    /// 第 `t` 步成员 `m` 的湖深
    pub fn lake_depth(&self, t: usize, m: usize) -> f64 {
        self.physics[t][m].lake_depth
    }

    /// 取得第 `t-1` 步只读视图和第 `t` 步独占视图
    pub fn step_views(&mut self, t: usize) -> DaResult<(PrevStep<'_>, CurrentStep<'_>)> {
        if t == 0 || t >= self.dims.n_steps {
            return Err(DaError::InvalidState(format!(
                "时间步 {t} 超出可传播范围 1..{}",
                self.dims.n_steps
            )));
        }
        let (prev_states, cur_states) = self.states.slab_pair_mut(t);
        let (prev_diag, cur_diag) = self.diagnostics.slab_pair_mut(t);
        let (prev_pars, cur_pars) = match self.pars.as_mut() {
            Some(p) => {
                let (a, b) = p.slab_pair_mut(t);
                (Some(a), Some(b))
            }
            None => (None, None),
        };
        let (head, tail) = self.physics.split_at_mut(t);
        Ok((
            PrevStep {
                states: prev_states,
                pars: prev_pars,
                diagnostics: prev_diag,
                physics: &head[t - 1],
            },
            CurrentStep {
                states: cur_states,
                pars: cur_pars,
                diagnostics: cur_diag,
                physics: &mut tail[0],
            },
        ))
    }

    /// 取得第 `t` 步独占视图（含步 0）
    pub fn step_mut(&mut self, t: usize) -> DaResult<CurrentStep<'_>> {
        LcError::check_index("time step", t, self.dims.n_steps)?;
        Ok(CurrentStep {
            states: self.states.slab_mut(t),
            pars: self.pars.as_mut().map(|a| a.slab_mut(t)),
            diagnostics: self.diagnostics.slab_mut(t),
            physics: &mut self.physics[t],
        })
    }

    /// 写入初始步（步 0）
    ///
    /// `states` 布局为 `[s][d][m]`，`pars` 布局为 `[p][m]`。
    pub fn write_initial(
        &mut self,
        states: &[f64],
        pars: Option<&[f64]>,
        physics: Vec<PhysicalState>,
    ) -> DaResult<()> {
        let dims = self.dims;
        DaError::check_dim("initial states", dims.n_state_rows() * dims.n_members, states.len())?;
        DaError::check_dim("initial physics", dims.n_members, physics.len())?;
        self.states.slab_mut(0).copy_from_slice(states);
        match (self.pars.as_mut(), pars) {
            (Some(arr), Some(p)) => {
                DaError::check_dim("initial pars", dims.n_pars * dims.n_members, p.len())?;
                arr.slab_mut(0).copy_from_slice(p);
            }
            (Some(_), None) => {
                return Err(DaError::dimension("initial pars", dims.n_pars * dims.n_members, 0))
            }
            (None, Some(p)) if !p.is_empty() => {
                return Err(DaError::dimension("initial pars", 0, p.len()))
            }
            _ => {}
        }
        self.physics[0] = physics;
        Ok(())
    }

    /// 由第 `t-1` 步构造各成员传播输入
    pub fn member_inputs(
        &self,
        t: usize,
        forcing: impl Fn(usize) -> ForcingSelection,
    ) -> Vec<MemberInput> {
        let dims = self.dims;
        let prev = self.states.slab(t - 1);
        let prev_diag = self.diagnostics.slab(t - 1);
        let prev_pars = self.pars.as_ref().map(|a| a.slab(t - 1));
        (0..dims.n_members)
            .map(|m| MemberInput {
                step: t,
                member: m,
                states: gather_member(prev, dims.n_members, m),
                physics: self.physics[t - 1][m].clone(),
                pars: prev_pars
                    .map(|p| gather_member(p, dims.n_members, m))
                    .unwrap_or_default(),
                diagnostics: gather_member(prev_diag, dims.n_members, m),
                forcing: forcing(m),
            })
            .collect()
    }

    /// 将传播结果写入第 `t` 步
    ///
    /// 模型未返回参数时沿用上一步参数。
    pub fn commit_propagated(&mut self, t: usize, outputs: Vec<MemberOutput>) -> DaResult<()> {
        let dims = self.dims;
        DaError::check_dim("propagated members", dims.n_members, outputs.len())?;
        for out in &outputs {
            DaError::check_dim("propagated states", dims.n_state_rows(), out.states.len())?;
            DaError::check_dim(
                "propagated diagnostics",
                dims.n_diag * dims.n_depths,
                out.diagnostics.len(),
            )?;
            if let Some(p) = &out.pars {
                DaError::check_dim("propagated pars", dims.n_pars, p.len())?;
            }
        }

        let (prev, mut cur) = self.step_views(t)?;
        for (m, out) in outputs.into_iter().enumerate() {
            scatter_member(cur.states, dims.n_members, m, &out.states);
            scatter_member(cur.diagnostics, dims.n_members, m, &out.diagnostics);
            if let (Some(cur_pars), Some(prev_pars)) = (cur.pars.as_deref_mut(), prev.pars) {
                match &out.pars {
                    Some(p) => scatter_member(cur_pars, dims.n_members, m, p),
                    None => {
                        for p in 0..dims.n_pars {
                            let i = p * dims.n_members + m;
                            cur_pars[i] = prev_pars[i];
                        }
                    }
                }
            }
            cur.physics[m] = out.physics;
        }
        Ok(())
    }

    /// 按重采样索引替换第 `t` 步所有集合量（状态、参数、诊断、物理辅助状态）
    pub fn resample_members(&mut self, t: usize, indices: &[usize]) -> DaResult<()> {
        let dims = self.dims;
        DaError::check_dim("resample indices", dims.n_members, indices.len())?;
        for &i in indices {
            LcError::check_index("resample source", i, dims.n_members)?;
        }
        permute_members(self.states.slab_mut(t), dims.n_members, indices);
        permute_members(self.diagnostics.slab_mut(t), dims.n_members, indices);
        if let Some(p) = self.pars.as_mut() {
            permute_members(p.slab_mut(t), dims.n_members, indices);
        }
        let source = self.physics[t].clone();
        for (m, &src) in indices.iter().enumerate() {
            self.physics[t][m] = source[src].clone();
        }
        Ok(())
    }
}

/// 成员值的集合均值（忽略缺测），全部缺测时为 `MISSING`
pub fn member_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !is_missing(**v))
        .fold((0.0, 0usize), |(acc, n), v| (acc + v, n + 1));
    if n == 0 {
        MISSING
    } else {
        sum / n as f64
    }
}

/// 成员值的样本标准差（忽略缺测），单个有效值时为零
pub fn member_sd(values: &[f64]) -> f64 {
    let valid: Vec<f64> = values.iter().copied().filter(|v| !is_missing(*v)).collect();
    if valid.len() < 2 {
        return if valid.is_empty() { MISSING } else { 0.0 };
    }
    let mean = member_mean(&valid);
    let var = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (valid.len() - 1) as f64;
    var.sqrt()
}

/// 从 `[row][m]` 切片中取出成员 `m` 的列
pub fn gather_member(slab: &[f64], n_members: usize, m: usize) -> Vec<f64> {
    slab.iter().skip(m).step_by(n_members).copied().collect()
}

/// 将成员 `m` 的列写回 `[row][m]` 切片
pub fn scatter_member(slab: &mut [f64], n_members: usize, m: usize, values: &[f64]) {
    for (dst, v) in slab.iter_mut().skip(m).step_by(n_members).zip(values) {
        *dst = *v;
    }
}

fn permute_members(slab: &mut [f64], n_members: usize, indices: &[usize]) {
    for row in slab.chunks_mut(n_members) {
        let source = row.to_vec();
        for (m, &src) in indices.iter().enumerate() {
            row[m] = source[src];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> EnsembleDims {
        EnsembleDims {
            n_steps: 3,
            n_states: 2,
            n_depths: 3,
            n_members: 4,
            n_pars: 1,
            n_diag: 1,
        }
    }

    fn store() -> EnsembleStore {
        EnsembleStore::new(dims(), vec![0.0, 1.0, 2.0]).unwrap()
    }

    #[test]
    fn test_gather_scatter_member() {
        let slab: Vec<f64> = (0..8).map(|i| i as f64).collect();
        assert_eq!(gather_member(&slab, 4, 1), vec![1.0, 5.0]);
        let mut slab = slab;
        scatter_member(&mut slab, 4, 2, &[-1.0, -2.0]);
        assert_eq!(slab[2], -1.0);
        assert_eq!(slab[6], -2.0);
    }

    #[test]
    fn test_step_views_rejects_step_zero() {
        let mut s = store();
        assert!(s.step_views(0).is_err());
        assert!(s.step_views(3).is_err());
        assert!(s.step_views(1).is_ok());
    }

    #[test]
    fn test_commit_carries_pars_when_model_returns_none() {
        let mut s = store();
        let d = dims();
        let states: Vec<f64> = (0..d.n_state_rows() * d.n_members).map(|i| i as f64).collect();
        s.write_initial(
            &states,
            Some(&[0.1, 0.2, 0.3, 0.4]),
            vec![PhysicalState::with_lake_depth(2.0); 4],
        )
        .unwrap();

        let inputs = s.member_inputs(1, |m| ForcingSelection {
            weather_member: m,
            inflow_member: m,
        });
        assert_eq!(inputs[1].states.len(), d.n_state_rows());
        assert_eq!(inputs[1].states[0], 1.0);
        assert_eq!(inputs[1].pars, vec![0.2]);

        let outputs = inputs.iter().map(MemberOutput::persist).collect();
        s.commit_propagated(1, outputs).unwrap();
        assert_eq!(s.par(1, 0, 3), Some(0.4));
        assert_eq!(s.state(1, 1, 2, 3), s.state(0, 1, 2, 3));
        assert_eq!(s.lake_depth(1, 0), 2.0);
    }

    #[test]
    fn test_commit_rejects_wrong_state_length() {
        let mut s = store();
        let outputs = (0..4)
            .map(|_| MemberOutput {
                states: vec![0.0; 5],
                physics: PhysicalState::default(),
                diagnostics: vec![0.0; 3],
                pars: None,
            })
            .collect();
        assert!(matches!(
            s.commit_propagated(1, outputs),
            Err(DaError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_resample_members_is_joint() {
        let mut s = store();
        let d = dims();
        let states: Vec<f64> = (0..d.n_state_rows() * d.n_members).map(|i| i as f64).collect();
        let physics = (0..4).map(|m| PhysicalState::with_lake_depth(m as f64)).collect();
        s.write_initial(&states, Some(&[10.0, 11.0, 12.0, 13.0]), physics).unwrap();

        s.resample_members(0, &[3, 3, 0, 1]).unwrap();
        assert_eq!(s.state(0, 0, 0, 0), 3.0);
        assert_eq!(s.state(0, 1, 2, 2), states[d.state_offset(1, 2, 0)]);
        assert_eq!(s.par(0, 0, 1), Some(13.0));
        assert_eq!(s.lake_depth(0, 3), 1.0);
    }

    #[test]
    fn test_member_stats_ignore_missing() {
        let values = [1.0, 3.0, MISSING, MISSING];
        assert_eq!(member_mean(&values), 2.0);
        assert!((member_sd(&values) - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(member_sd(&[4.0, MISSING]), 0.0);
        assert!(member_mean(&[MISSING; 3]).is_nan());
        assert!(member_sd(&[MISSING; 3]).is_nan());
    }
}
