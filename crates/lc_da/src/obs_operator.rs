// crates/lc_da/src/obs_operator.rs

//! 观测算子构建
//!
//! 每个时间步重新构建线性观测算子 `H`，将展平的状态向量
//! （`s·n_depths + d` 行，若本步有辅助标量观测则追加 1 列）
//! 映射到本步实际有观测的量。
//!
//! 候选行按 `v·n_depths + d` 编号，辅助观测占最后一行；只有观测非缺测且
//! 映射系数非零的行才被保留。保留行的候选编号即 `z_index`，用于从候选
//! 观测值和方差中切片。即便只剩一行，`H` 也保持为 1×n 矩阵。

use nalgebra::{DMatrix, DVector};

use lc_config::{DaConfig, StateObsLink};
use lc_foundation::is_missing;

use crate::error::{DaError, DaResult};
use crate::observations::ObservationSet;

/// 观测行来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObsRow {
    /// 按深度观测
    Depth {
        /// 观测变量
        var: usize,
        /// 深度索引
        depth: usize,
    },
    /// 辅助标量观测
    Aux,
}

impl ObsRow {
    /// 是否为主变量（变量 0）的观测
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Depth { var: 0, .. })
    }
}

/// 单步观测算子
#[derive(Debug, Clone)]
pub struct ObsOperator {
    /// 观测算子 `(n_obs, n_cols)`
    pub h: DMatrix<f64>,
    /// 观测值
    pub z: DVector<f64>,
    /// 观测误差方差
    pub r: DVector<f64>,
    /// 保留行在候选观测向量中的编号
    pub z_index: Vec<usize>,
    /// 保留行的来源
    pub rows: Vec<ObsRow>,
    /// 本步是否包含辅助标量观测列
    pub aux_active: bool,
}

impl ObsOperator {
    /// 没有可用观测
    pub fn is_empty(&self) -> bool {
        self.z_index.is_empty()
    }

    /// 观测数
    pub fn n_obs(&self) -> usize {
        self.z_index.len()
    }

    /// 状态列数
    pub fn n_cols(&self) -> usize {
        self.h.ncols()
    }
}

/// 观测算子构建器
#[derive(Debug, Clone)]
pub struct ObsOperatorBuilder {
    n_states: usize,
    n_depths: usize,
    links: Vec<StateObsLink>,
    obs_sd: Vec<f64>,
    aux_sd: Option<f64>,
}

impl ObsOperatorBuilder {
    /// 直接构造
    pub fn new(
        n_states: usize,
        n_depths: usize,
        links: Vec<StateObsLink>,
        obs_sd: Vec<f64>,
        aux_sd: Option<f64>,
    ) -> Self {
        Self {
            n_states,
            n_depths,
            links,
            obs_sd,
            aux_sd,
        }
    }

    /// 由配置构造
    pub fn from_config(config: &DaConfig) -> Self {
        Self::new(
            config.n_states(),
            config.n_depths(),
            config.observations.states_to_obs.clone(),
            config.observations.variables.iter().map(|v| v.obs_sd).collect(),
            config.observations.aux.as_ref().map(|a| a.obs_sd),
        )
    }

    /// 按深度观测的变量数
    pub fn n_vars(&self) -> usize {
        self.obs_sd.len()
    }

    /// 构建第 `t` 步观测算子
    pub fn build(&self, obs: &ObservationSet, t: usize) -> DaResult<ObsOperator> {
        let nd = self.n_depths;
        DaError::check_dim("observation depths", nd, obs.n_depths())?;
        DaError::check_dim("observation variables", self.n_vars(), obs.n_vars())?;

        let aux_value = match self.aux_sd {
            Some(_) => obs.aux_at(t),
            None => None,
        };
        let aux_active = aux_value.is_some();

        let n_state_rows = self.n_states * nd;
        let n_cols = n_state_rows + usize::from(aux_active);
        let n_candidates = self.n_vars() * nd + usize::from(aux_active);

        let mut full = DMatrix::<f64>::zeros(n_candidates, n_cols);
        let mut values = vec![f64::NAN; n_candidates];
        let mut variances = vec![f64::NAN; n_candidates];
        let mut sources = Vec::with_capacity(n_candidates);

        for v in 0..self.n_vars() {
            for d in 0..nd {
                let row = v * nd + d;
                values[row] = obs.get(v, t, d);
                variances[row] = self.obs_sd[v].powi(2);
                sources.push(ObsRow::Depth { var: v, depth: d });
            }
        }

        for link in &self.links {
            if link.state >= self.n_states || link.obs_var >= self.n_vars() {
                return Err(DaError::InvalidObservation(format!(
                    "映射 state={} obs_var={} 越界",
                    link.state, link.obs_var
                )));
            }
            for d in 0..nd {
                let row = link.obs_var * nd + d;
                if !is_missing(values[row]) {
                    full[(row, link.state * nd + d)] += link.coefficient;
                }
            }
        }

        if let (Some(value), Some(sd)) = (aux_value, self.aux_sd) {
            let row = n_candidates - 1;
            full[(row, n_cols - 1)] = 1.0;
            values[row] = value;
            variances[row] = sd * sd;
            sources.push(ObsRow::Aux);
        }

        let z_index: Vec<usize> = (0..n_candidates)
            .filter(|&i| full.row(i).iter().any(|&h| h != 0.0))
            .collect();

        let k = z_index.len();
        let h = DMatrix::from_fn(k, n_cols, |i, j| full[(z_index[i], j)]);
        let z = DVector::from_iterator(k, z_index.iter().map(|&i| values[i]));
        let r = DVector::from_iterator(k, z_index.iter().map(|&i| variances[i]));
        let rows = z_index.iter().map(|&i| sources[i]).collect();

        Ok(ObsOperator {
            h,
            z,
            r,
            z_index,
            rows,
            aux_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(state: usize, obs_var: usize, coefficient: f64) -> StateObsLink {
        StateObsLink {
            state,
            obs_var,
            coefficient,
        }
    }

    #[test]
    fn test_single_observation_gives_one_row() {
        // 2 状态 × 3 深度，仅状态 1 在深度 2 有观测
        let builder = ObsOperatorBuilder::new(
            2,
            3,
            vec![link(0, 0, 1.0), link(1, 1, 0.8)],
            vec![0.5, 0.2],
            None,
        );
        let mut obs = ObservationSet::empty(2, 2, 3);
        obs.set(1, 1, 2, 3.3);

        let op = builder.build(&obs, 1).unwrap();
        assert_eq!(op.h.shape(), (1, 6));
        assert_eq!(op.z_index, vec![5]);
        assert_eq!(op.h[(0, 5)], 0.8);
        assert_eq!(op.h.row(0).iter().filter(|&&x| x != 0.0).count(), 1);
        assert_eq!(op.z[0], 3.3);
        assert!((op.r[0] - 0.04).abs() < 1e-15);
        assert_eq!(op.rows[0], ObsRow::Depth { var: 1, depth: 2 });
    }

    #[test]
    fn test_no_observations_is_empty() {
        let builder = ObsOperatorBuilder::new(1, 2, vec![link(0, 0, 1.0)], vec![0.5], None);
        let obs = ObservationSet::empty(1, 3, 2);
        let op = builder.build(&obs, 2).unwrap();
        assert!(op.is_empty());
        assert_eq!(op.h.nrows(), 0);
    }

    #[test]
    fn test_unmapped_variable_rows_dropped() {
        // 变量 1 有观测但没有任何状态映射到它
        let builder = ObsOperatorBuilder::new(1, 2, vec![link(0, 0, 1.0)], vec![0.5, 0.5], None);
        let mut obs = ObservationSet::empty(2, 1, 2);
        obs.set(1, 0, 0, 9.0);
        obs.set(0, 0, 1, 4.0);
        let op = builder.build(&obs, 0).unwrap();
        assert_eq!(op.z_index, vec![1]);
    }

    #[test]
    fn test_aux_row_appended() {
        let builder = ObsOperatorBuilder::new(1, 2, vec![link(0, 0, 1.0)], vec![0.5], Some(0.3));
        let mut obs = ObservationSet::empty(1, 2, 2)
            .with_aux(vec![f64::NAN, 2.0])
            .unwrap();
        obs.set(0, 1, 0, 10.0);

        let op = builder.build(&obs, 1).unwrap();
        assert!(op.aux_active);
        assert_eq!(op.h.shape(), (2, 3));
        assert_eq!(op.h[(1, 2)], 1.0);
        assert_eq!(op.rows[1], ObsRow::Aux);
        assert_eq!(op.z[1], 2.0);

        let op = builder.build(&obs, 0).unwrap();
        assert!(!op.aux_active);
        assert_eq!(op.n_cols(), 2);
        assert!(op.is_empty());
    }

    #[test]
    fn test_zero_coefficient_row_dropped() {
        let builder = ObsOperatorBuilder::new(1, 1, vec![link(0, 0, 0.0)], vec![0.5], None);
        let mut obs = ObservationSet::empty(1, 1, 1);
        obs.set(0, 0, 0, 1.0);
        assert!(builder.build(&obs, 0).unwrap().is_empty());
    }
}
