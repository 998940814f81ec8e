// crates/lc_da/src/observations.rs

//! 观测数据集
//!
//! 按深度观测存储为 `obs[v, t, d]`，缺测为 `NaN`；可选的辅助标量观测
//! （如透明度）和湖深观测按时间步存储。

use serde::{Deserialize, Serialize};

use lc_foundation::{ensure, is_missing, Array3};

use crate::error::{DaError, DaResult};

/// 观测数据集
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSet {
    /// 按深度观测 `[v][t][d]`
    values: Array3,
    /// 辅助标量观测，每步一个值
    #[serde(default)]
    aux: Option<Vec<f64>>,
    /// 湖深观测，每步一个值
    #[serde(default)]
    depth: Option<Vec<f64>>,
}

impl ObservationSet {
    /// 创建只含按深度观测的数据集
    pub fn new(values: Array3) -> Self {
        Self {
            values,
            aux: None,
            depth: None,
        }
    }

    /// 创建全缺测数据集
    pub fn empty(n_vars: usize, n_steps: usize, n_depths: usize) -> Self {
        Self::new(Array3::missing([n_vars, n_steps, n_depths]))
    }

    /// 附加辅助标量观测序列
    pub fn with_aux(mut self, aux: Vec<f64>) -> DaResult<Self> {
        DaError::check_dim("aux observations", self.n_steps(), aux.len())?;
        self.aux = Some(aux);
        Ok(self)
    }

    /// 附加湖深观测序列
    pub fn with_depth(mut self, depth: Vec<f64>) -> DaResult<Self> {
        DaError::check_dim("depth observations", self.n_steps(), depth.len())?;
        self.depth = Some(depth);
        Ok(self)
    }

    /// 观测变量数
    pub fn n_vars(&self) -> usize {
        self.values.dims()[0]
    }

    /// 时间步数
    pub fn n_steps(&self) -> usize {
        self.values.dims()[1]
    }

    /// 深度数
    pub fn n_depths(&self) -> usize {
        self.values.dims()[2]
    }

    /// 读取观测
    pub fn get(&self, v: usize, t: usize, d: usize) -> f64 {
        self.values.get(v, t, d)
    }

    /// 写入观测
    pub fn set(&mut self, v: usize, t: usize, d: usize, value: f64) {
        self.values.set(v, t, d, value);
    }

    /// 第 `t` 步辅助标量观测（缺测返回 `None`）
    pub fn aux_at(&self, t: usize) -> Option<f64> {
        self.aux
            .as_ref()
            .and_then(|a| a.get(t).copied())
            .filter(|v| !is_missing(*v))
    }

    /// 第 `t` 步湖深观测（缺测返回 `None`）
    pub fn depth_at(&self, t: usize) -> Option<f64> {
        self.depth
            .as_ref()
            .and_then(|a| a.get(t).copied())
            .filter(|v| !is_missing(*v))
    }

    /// 检查与集合维度一致
    pub fn check_dims(&self, n_vars: usize, n_steps: usize, n_depths: usize) -> DaResult<()> {
        DaError::check_dim("observation variables", n_vars, self.n_vars())?;
        DaError::check_dim("observation depths", n_depths, self.n_depths())?;
        ensure!(
            self.n_steps() >= n_steps,
            DaError::dimension("observation steps", n_steps, self.n_steps())
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_observation() {
        let mut obs = ObservationSet::empty(2, 4, 3);
        assert!(is_missing(obs.get(1, 1, 2)));
        obs.set(1, 1, 2, 4.2);
        assert_eq!(obs.get(1, 1, 2), 4.2);
        assert!(is_missing(obs.get(0, 1, 2)));
    }

    #[test]
    fn test_scalar_series_skip_missing() {
        let obs = ObservationSet::empty(1, 3, 2)
            .with_aux(vec![f64::NAN, 1.5, f64::NAN])
            .unwrap()
            .with_depth(vec![4.0, f64::NAN, 3.5])
            .unwrap();
        assert_eq!(obs.aux_at(0), None);
        assert_eq!(obs.aux_at(1), Some(1.5));
        assert_eq!(obs.depth_at(1), None);
        assert_eq!(obs.depth_at(2), Some(3.5));
    }

    #[test]
    fn test_aux_length_checked() {
        assert!(ObservationSet::empty(1, 3, 2).with_aux(vec![1.0]).is_err());
    }
}
