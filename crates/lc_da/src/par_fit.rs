// crates/lc_da/src/par_fit.rs

//! 参数拟合策略
//!
//! 每步在计算交叉协方差前处理一次参数集合，同化核心的更新逻辑与
//! 具体策略无关。

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;

use lc_config::{DaConfig, ParFitMethod};
use lc_foundation::{stream_rng, StreamKind};

use crate::error::DaResult;

/// 参数拟合策略
#[derive(Debug, Clone, PartialEq)]
pub enum ParFitStrategy {
    /// 围绕集合均值放大离散度 `factor·(p - p̄) + p̄`
    Inflate {
        /// 放大系数
        factor: f64,
    },
    /// 相对扰动 `p + N(0, sd_p·|p̄|)`
    Perturb {
        /// 各参数相对标准差
        sd: Vec<f64>,
    },
    /// 绝对扰动 `p + N(0, sd_p)`
    PerturbConst {
        /// 各参数标准差
        sd: Vec<f64>,
    },
    /// 仅在初始化时扰动，之后参数不被增益更新
    PerturbInit,
}

impl ParFitStrategy {
    /// 由配置构造（方法名在此解析）
    pub fn from_config(config: &DaConfig) -> DaResult<Self> {
        let sd = || config.parameters.iter().map(|p| p.perturb_sd).collect();
        Ok(match config.par_fit_method()? {
            ParFitMethod::Inflate => Self::Inflate {
                factor: config.par_inflation,
            },
            ParFitMethod::Perturb => Self::Perturb { sd: sd() },
            ParFitMethod::PerturbConst => Self::PerturbConst { sd: sd() },
            ParFitMethod::PerturbInit => Self::PerturbInit,
        })
    }

    /// 参数是否每步被增益更新
    pub fn updates_parameters(&self) -> bool {
        !matches!(self, Self::PerturbInit)
    }

    /// 处理参数集合 `(n_pars, n_members)`，返回用于交叉协方差的参数
    pub fn prepare(&self, pars: &DMatrix<f64>, seed: u64, step: usize) -> DMatrix<f64> {
        let n = pars.ncols();
        let mut out = pars.clone();
        match self {
            Self::Inflate { factor } => {
                for mut row in out.row_iter_mut() {
                    let mean = row.sum() / n.max(1) as f64;
                    for v in row.iter_mut() {
                        *v = factor * (*v - mean) + mean;
                    }
                }
            }
            Self::Perturb { sd } | Self::PerturbConst { sd } => {
                let relative = matches!(self, Self::Perturb { .. });
                let scales: Vec<f64> = out
                    .row_iter()
                    .zip(sd)
                    .map(|(row, &s)| {
                        if relative {
                            s * (row.sum() / n.max(1) as f64).abs()
                        } else {
                            s
                        }
                    })
                    .collect();
                for m in 0..n {
                    let mut rng = stream_rng(seed, step, m, StreamKind::ParameterPerturbation);
                    for (p, &scale) in scales.iter().enumerate() {
                        let w: f64 = rng.sample(StandardNormal);
                        out[(p, m)] += scale * w;
                    }
                }
            }
            Self::PerturbInit => {}
        }
        out
    }
}
