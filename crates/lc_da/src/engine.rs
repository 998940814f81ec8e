// crates/lc_da/src/engine.rs

//! 同化引擎（时间循环）
//!
//! # 单步流程
//!
//! ```text
//! 传播 (并行) ──屏障──> 过程噪声 ──> 观测算子 ──┬─ 直通
//!                                              ├─ EnKF
//!                                              └─ PF
//!                                  ──> 质量控制 ──> 标志
//! ```
//!
//! 第 `t` 步的同化与质量控制提交之后才开始 `t+1` 步的传播。
//!
//! # 状态机
//!
//! - 直通：无可用观测、同化关闭或不使用观测约束。预报期也走直通。
//!   历史/预报分界步且关闭初始条件不确定性时，各成员收缩到集合均值。
//! - EnKF：扰动观测 + 卡尔曼增益校正，参数按拟合策略更新。
//! - PF：似然加权重采样，整体替换粒子。

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;
use tracing::{debug, info};

use lc_config::{DaConfig, DaMethod, MemberFailurePolicy, StateSpace, UncertaintyConfig};
use lc_foundation::{is_missing, require, stream_rng, Array3, Array4, StreamKind, MISSING};

use crate::enkf::{self, EnkfSettings};
use crate::error::{DaError, DaResult};
use crate::flags::{FlagRecorder, StepKind};
use crate::init::{InitialEnsemble, Initializer};
use crate::localization::{localizer_for, CovarianceLocalizer};
use crate::model::{ForcingSelection, PhysicalState, ProcessModel};
use crate::noise::{clip_nonprimary, ProcessNoise};
use crate::obs_operator::{ObsOperator, ObsOperatorBuilder};
use crate::observations::ObservationSet;
use crate::par_fit::ParFitStrategy;
use crate::particle;
use crate::propagate::propagate_members;
use crate::qc::QcGate;
use crate::store::{member_mean, member_sd, EnsembleDims, EnsembleStore};

/// 单步报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// 时间步
    pub step: usize,
    /// 步类别
    pub kind: StepKind,
    /// 使用的观测数
    pub n_obs: usize,
    /// 增益求解是否退化
    pub degenerate_solve: bool,
    /// 被隔离的失败成员
    pub failed_members: Vec<usize>,
    /// 质量控制截断次数（含噪声后的截断）
    pub qc_clipped: usize,
    /// 粒子滤波有效样本数
    pub effective_sample_size: Option<f64>,
}

impl StepReport {
    fn new(step: usize, kind: StepKind) -> Self {
        Self {
            step,
            kind,
            n_obs: 0,
            degenerate_solve: false,
            failed_members: Vec::new(),
            qc_clipped: 0,
            effective_sample_size: None,
        }
    }
}

/// 运行结果
#[derive(Debug, Clone, Serialize)]
pub struct DaOutput {
    /// 集合维度
    pub dims: EnsembleDims,
    /// 模型深度坐标
    pub modeled_depths: Vec<f64>,
    /// 状态 `[t][s][d][m]`
    pub states: Array4,
    /// 参数 `[t][p][m]`
    pub pars: Option<Array3>,
    /// 诊断量 `[t][k][d][m]`
    pub diagnostics: Array4,
    /// 湖深 `[t][m]`
    pub lake_depth: Vec<Vec<f64>>,
    /// 最后一步物理辅助状态
    pub final_physics: Vec<PhysicalState>,
    /// 各步标志
    pub flags: Vec<StepKind>,
    /// 各步报告
    pub reports: Vec<StepReport>,
}

impl DaOutput {
    /// 由存储和记录组装
    pub fn from_store(
        store: &EnsembleStore,
        flags: Vec<StepKind>,
        reports: Vec<StepReport>,
    ) -> Self {
        let dims = store.dims();
        Self {
            dims,
            modeled_depths: store.modeled_depths().to_vec(),
            states: store.states().clone(),
            pars: store.pars().cloned(),
            diagnostics: store.diagnostics().clone(),
            lake_depth: (0..dims.n_steps)
                .map(|t| (0..dims.n_members).map(|m| store.lake_depth(t, m)).collect())
                .collect(),
            final_physics: store.physics(dims.n_steps - 1).to_vec(),
            flags,
            reports,
        }
    }

    /// 第 `t` 步 `(s, d)` 集合均值（忽略缺测）
    pub fn mean(&self, t: usize, s: usize, d: usize) -> f64 {
        member_mean(&self.member_values(t, s, d))
    }

    /// 第 `t` 步 `(s, d)` 集合样本标准差（忽略缺测）
    pub fn sd(&self, t: usize, s: usize, d: usize) -> f64 {
        member_sd(&self.member_values(t, s, d))
    }

    fn member_values(&self, t: usize, s: usize, d: usize) -> Vec<f64> {
        (0..self.dims.n_members)
            .map(|m| self.states.get(t, s, d, m))
            .collect()
    }
}

/// 同化器
pub struct Assimilator {
    method: DaMethod,
    par_fit: ParFitStrategy,
    inflation: f64,
    localization: Option<(Box<dyn CovarianceLocalizer>, f64)>,
    noise: ProcessNoise,
    builder: ObsOperatorBuilder,
    qc: QcGate,
    initializer: Initializer,
    uncertainty: UncertaintyConfig,
    forecast_start_index: usize,
    use_obs_constraint: bool,
    state_space: StateSpace,
    failure_policy: MemberFailurePolicy,
    seed: u64,
    assimilate_depth: bool,
    depth_obs_sd: f64,
    modeled_depths: Vec<f64>,
    n_members: usize,
    n_states: usize,
    n_pars: usize,
}

impl Assimilator {
    /// 由配置构造
    ///
    /// 配置校验与方法名解析在此完成，任何时间步运行前即报告配置错误。
    pub fn new(config: &DaConfig) -> DaResult<Self> {
        config.validate()?;
        let localization = config
            .localization_distance
            .map(|distance| (localizer_for(config.localization_kind), distance));
        Ok(Self {
            method: config.da_method()?,
            par_fit: ParFitStrategy::from_config(config)?,
            inflation: config.inflation(),
            localization,
            noise: ProcessNoise::from_config(config),
            builder: ObsOperatorBuilder::from_config(config),
            qc: QcGate::from_config(config),
            initializer: Initializer::from_config(config),
            uncertainty: config.uncertainty,
            forecast_start_index: config.forecast_start_index,
            use_obs_constraint: config.use_obs_constraint,
            state_space: config.state_space,
            failure_policy: config.ensemble.member_failure,
            seed: config.ensemble.seed,
            assimilate_depth: config.observations.assimilate_depth,
            depth_obs_sd: config.observations.depth_obs_sd,
            modeled_depths: config.modeled_depths.clone(),
            n_members: config.ensemble.members,
            n_states: config.n_states(),
            n_pars: config.n_pars(),
        })
    }

    /// 替换局地化实现（需已配置局地化距离）
    pub fn with_localizer(mut self, localizer: Box<dyn CovarianceLocalizer>) -> Self {
        if let Some((current, _)) = self.localization.as_mut() {
            *current = localizer;
        }
        self
    }

    /// 同化方法
    pub fn method(&self) -> DaMethod {
        self.method
    }

    /// 集合维度
    pub fn dims(&self, n_steps: usize, n_diag: usize) -> EnsembleDims {
        EnsembleDims {
            n_steps,
            n_states: self.n_states,
            n_depths: self.modeled_depths.len(),
            n_members: self.n_members,
            n_pars: self.n_pars,
            n_diag,
        }
    }

    /// 按完整时间域分配存储
    pub fn create_store(&self, n_steps: usize, n_diag: usize) -> DaResult<EnsembleStore> {
        EnsembleStore::new(self.dims(n_steps, n_diag), self.modeled_depths.clone())
    }

    /// 驱动选择
    pub fn forcing(&self, member: usize) -> ForcingSelection {
        ForcingSelection {
            weather_member: if self.uncertainty.weather { member } else { 0 },
            inflow_member: if self.uncertainty.inflow { member } else { 0 },
        }
    }

    fn is_historical(&self, t: usize) -> bool {
        t <= self.forecast_start_index
    }

    /// 初始化步 0
    pub fn initialize(
        &self,
        store: &mut EnsembleStore,
        initial: InitialEnsemble,
        flags: &mut FlagRecorder,
    ) -> DaResult<StepReport> {
        self.initializer.initialize(store, initial)?;
        let dims = store.dims();
        let mut cur = store.step_mut(0)?;
        if self.forecast_start_index == 0 && !self.uncertainty.initial_condition {
            collapse_to_mean(cur.states, dims.n_members);
        }
        let kind = StepKind::uncorrected(0, self.forecast_start_index);
        let mut report = StepReport::new(0, kind);
        report.qc_clipped = self.qc.apply(&mut cur, &dims, &self.modeled_depths);
        flags.record(0, kind)?;
        Ok(report)
    }

    /// 推进并同化第 `t` 步（`t ≥ 1`）
    pub fn step<M: ProcessModel + ?Sized>(
        &self,
        model: &M,
        store: &mut EnsembleStore,
        obs: &ObservationSet,
        t: usize,
        flags: &mut FlagRecorder,
    ) -> DaResult<StepReport> {
        let dims = store.dims();
        let historical = self.is_historical(t);

        let inputs = store.member_inputs(t, |m| self.forcing(m));
        let propagation = propagate_members(model, &inputs, self.failure_policy, t)?;
        let failed = propagation.failed;
        store.commit_propagated(t, propagation.outputs)?;

        let mut clipped = 0;
        {
            let cur = store.step_mut(t)?;
            if historical || self.uncertainty.process {
                self.noise.inject(cur.states, &dims, t, &failed);
            }
            clipped += clip_nonprimary(cur.states, &dims, self.state_space);
        }

        let op = if self.method != DaMethod::None && self.use_obs_constraint && historical {
            let op = self.builder.build(obs, t)?;
            debug!(
                "第 {t} 步观测算子 {}x{} (aux = {})",
                op.h.nrows(),
                op.h.ncols(),
                op.aux_active
            );
            Some(op).filter(|op| !op.is_empty())
        } else {
            None
        };

        let mut report = match op {
            None => self.passthrough(store, t)?,
            Some(op) => {
                let depth_obs = obs.depth_at(t).filter(|_| self.assimilate_depth);
                match self.method {
                    DaMethod::Enkf => self.enkf_step(store, &op, depth_obs, t)?,
                    DaMethod::ParticleFilter => self.pf_step(store, &op, depth_obs, t)?,
                    DaMethod::None => self.passthrough(store, t)?,
                }
            }
        };

        let mut cur = store.step_mut(t)?;
        clipped += self.qc.apply(&mut cur, &dims, &self.modeled_depths);
        report.qc_clipped = clipped;
        report.failed_members = failed;
        flags.record(t, report.kind)?;
        Ok(report)
    }

    fn passthrough(&self, store: &mut EnsembleStore, t: usize) -> DaResult<StepReport> {
        let n_members = store.dims().n_members;
        if t == self.forecast_start_index && !self.uncertainty.initial_condition {
            collapse_to_mean(store.step_mut(t)?.states, n_members);
        }
        Ok(StepReport::new(t, StepKind::uncorrected(t, self.forecast_start_index)))
    }

    fn enkf_step(
        &self,
        store: &mut EnsembleStore,
        op: &ObsOperator,
        depth_obs: Option<f64>,
        t: usize,
    ) -> DaResult<StepReport> {
        let dims = store.dims();
        let cur = store.step_mut(t)?;
        let x = ensemble_matrix(cur.states, &dims, &self.modeled_depths, cur.physics, op.aux_active)?;

        let update_pars = self.par_fit.updates_parameters();
        let pars = match cur.pars.as_deref() {
            Some(slab) if update_pars => {
                let raw = DMatrix::from_row_slice(dims.n_pars, dims.n_members, slab);
                Some(self.par_fit.prepare(&raw, self.seed, t))
            }
            _ => None,
        };

        let y = enkf::perturbed_observations(
            op,
            dims.n_members,
            self.uncertainty.observation,
            self.seed,
            t,
        );
        let settings = EnkfSettings {
            inflation: self.inflation,
            localization: self
                .localization
                .as_ref()
                .map(|(localizer, distance)| (localizer.as_ref(), *distance)),
            depths: &self.modeled_depths,
            n_states: dims.n_states,
        };
        let update = enkf::analysis(&x, pars.as_ref(), op, &y, &settings)?;

        if let Some(depth) = depth_obs {
            self.resample_lake_depth(cur.physics, depth, t);
        }
        write_back(cur.states, &update.states, &dims, &self.modeled_depths, cur.physics);
        if let (Some(slab), Some(updated)) = (cur.pars, update.pars.as_ref()) {
            for p in 0..dims.n_pars {
                for m in 0..dims.n_members {
                    slab[p * dims.n_members + m] = updated[(p, m)];
                }
            }
        }

        info!("第 {t} 步 EnKF 同化 {} 个观测", op.n_obs());
        let mut report = StepReport::new(t, StepKind::Assimilated);
        report.n_obs = op.n_obs();
        report.degenerate_solve = update.degenerate;
        Ok(report)
    }

    fn pf_step(
        &self,
        store: &mut EnsembleStore,
        op: &ObsOperator,
        depth_obs: Option<f64>,
        t: usize,
    ) -> DaResult<StepReport> {
        let dims = store.dims();
        let resampling = {
            let cur = store.step_mut(t)?;
            let x = ensemble_matrix(cur.states, &dims, &self.modeled_depths, cur.physics, op.aux_active)?;
            particle::resample(op, &x, self.seed, t)?
        };
        store.resample_members(t, &resampling.indices)?;
        if let Some(depth) = depth_obs {
            self.resample_lake_depth(store.step_mut(t)?.physics, depth, t);
        }

        info!(
            "第 {t} 步 PF 同化 {} 个观测, ESS = {:.2}",
            op.n_obs(),
            resampling.effective_sample_size
        );
        let mut report = StepReport::new(t, StepKind::Assimilated);
        report.n_obs = op.n_obs();
        report.effective_sample_size = Some(resampling.effective_sample_size);
        Ok(report)
    }

    /// 按湖深观测重采样各成员湖深，并截断内部网格
    fn resample_lake_depth(&self, physics: &mut [PhysicalState], observed: f64, t: usize) {
        for (m, phys) in physics.iter_mut().enumerate() {
            let mut rng = stream_rng(self.seed, t, m, StreamKind::DepthObservation);
            let w: f64 = rng.sample(StandardNormal);
            phys.lake_depth = (observed + self.depth_obs_sd * w).max(0.0);
            phys.truncate_internal_grid();
        }
    }

    /// 完整运行：初始化 + 逐步传播同化
    ///
    /// 时间步数取观测数据集的步数。
    pub fn run<M: ProcessModel + ?Sized>(
        &self,
        model: &M,
        initial: InitialEnsemble,
        obs: &ObservationSet,
        n_diag: usize,
    ) -> DaResult<DaOutput> {
        let n_steps = obs.n_steps();
        obs.check_dims(self.builder.n_vars(), n_steps, self.modeled_depths.len())?;
        let mut store = self.create_store(n_steps, n_diag)?;
        let mut flags = FlagRecorder::new(n_steps);

        info!(
            "开始同化运行: 模型 {}, 方法 {}, {} 成员, {} 步",
            model.name(),
            self.method,
            self.n_members,
            n_steps
        );
        if let Some((localizer, distance)) = &self.localization {
            info!("协方差局地化: {}, 距离 {distance} m", localizer.name());
        }

        let mut reports = Vec::with_capacity(n_steps);
        reports.push(self.initialize(&mut store, initial, &mut flags)?);
        for t in 1..n_steps {
            reports.push(self.step(model, &mut store, obs, t, &mut flags)?);
        }

        let flags = flags.finalize()?;
        let n_assimilated = flags.iter().filter(|k| **k == StepKind::Assimilated).count();
        info!("同化运行结束: {n_assimilated}/{n_steps} 步已同化");
        Ok(DaOutput::from_store(&store, flags, reports))
    }
}

/// 构建集合矩阵 `(n_states·n_depths [+1], n_members)`
///
/// 湖底以下或缺测的值以同一成员同一状态更浅处最近的有效值填充；
/// 表层即缺测视为无效状态。辅助列取各成员的 `aux_observable`。
pub fn ensemble_matrix(
    slab: &[f64],
    dims: &EnsembleDims,
    depths: &[f64],
    physics: &[PhysicalState],
    aux_active: bool,
) -> DaResult<DMatrix<f64>> {
    let nd = dims.n_depths;
    let rows = dims.n_state_rows() + usize::from(aux_active);
    let mut x = DMatrix::<f64>::zeros(rows, dims.n_members);

    for m in 0..dims.n_members {
        let floor = physics[m].lake_depth;
        for s in 0..dims.n_states {
            let mut last_valid = None;
            for d in 0..nd {
                let value = slab[dims.state_offset(s, d, m)];
                let below = !is_missing(floor) && depths[d] > floor;
                let filled = if !is_missing(value) && !below {
                    last_valid = Some(value);
                    value
                } else {
                    require!(
                        last_valid,
                        DaError::InvalidState(format!(
                            "成员 {m} 状态 {s} 在深度 {} 处无有效值可用于填充",
                            depths[d]
                        ))
                    )
                };
                x[(s * nd + d, m)] = filled;
            }
        }
        if aux_active {
            let aux = physics[m].aux_observable;
            if is_missing(aux) {
                return Err(DaError::InvalidState(format!("成员 {m} 缺少辅助观测量的模型估计")));
            }
            x[(rows - 1, m)] = aux;
        }
    }
    Ok(x)
}

/// 将校正结果写回状态切片，湖底以下置为缺测
pub fn write_back(
    slab: &mut [f64],
    x: &DMatrix<f64>,
    dims: &EnsembleDims,
    depths: &[f64],
    physics: &[PhysicalState],
) {
    let nd = dims.n_depths;
    for m in 0..dims.n_members {
        let floor = physics[m].lake_depth;
        for s in 0..dims.n_states {
            for d in 0..nd {
                let below = !is_missing(floor) && depths[d] > floor;
                slab[dims.state_offset(s, d, m)] = if below { MISSING } else { x[(s * nd + d, m)] };
            }
        }
    }
}

/// 各行收缩到集合均值（缺测保持缺测）
fn collapse_to_mean(slab: &mut [f64], n_members: usize) {
    for row in slab.chunks_mut(n_members) {
        let mean = member_mean(row);
        if is_missing(mean) {
            continue;
        }
        row.iter_mut().filter(|v| !is_missing(**v)).for_each(|v| *v = mean);
    }
}
