// crates/lc_foundation/src/array.rs

//! 稠密多维集合缓冲区
//!
//! 以行主序（最后一维连续）存储的 3 维 / 4 维 `f64` 数组。整个运行时域在
//! 初始化时一次性分配，之后只按时间片读写。
//!
//! 缺测值统一用 `NaN` 表示，见 [`MISSING`] 与 [`is_missing`]。
//!
//! ```
//! use lc_foundation::array::{Array4, is_missing};
//!
//! let mut x = Array4::missing([3, 2, 4, 5]);
//! x.set(1, 0, 2, 4, 7.5);
//! assert_eq!(x.get(1, 0, 2, 4), 7.5);
//! assert!(is_missing(x.get(0, 0, 0, 0)));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{LcError, LcResult};

/// 缺测值
pub const MISSING: f64 = f64::NAN;

/// 是否为缺测值
#[inline]
pub fn is_missing(value: f64) -> bool {
    value.is_nan()
}

/// 3 维稠密数组 `[n0, n1, n2]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array3 {
    dims: [usize; 3],
    data: Vec<f64>,
}

impl Array3 {
    /// 以给定值填充创建
    pub fn filled(dims: [usize; 3], value: f64) -> Self {
        Self {
            dims,
            data: vec![value; dims.iter().product()],
        }
    }

    /// 创建全缺测数组
    pub fn missing(dims: [usize; 3]) -> Self {
        Self::filled(dims, MISSING)
    }

    /// 从已有数据创建
    pub fn from_vec(dims: [usize; 3], data: Vec<f64>) -> LcResult<Self> {
        LcError::check_size("Array3", dims.iter().product(), data.len())?;
        Ok(Self { dims, data })
    }

    /// 维度
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.dims[0] && j < self.dims[1] && k < self.dims[2]);
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    /// 读取元素
    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.offset(i, j, k)]
    }

    /// 写入元素
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.offset(i, j, k);
        self.data[idx] = value;
    }

    /// 第一维第 `i` 片（连续内存）
    pub fn slab(&self, i: usize) -> &[f64] {
        let len = self.dims[1] * self.dims[2];
        &self.data[i * len..(i + 1) * len]
    }

    /// 第一维第 `i` 片（可变）
    pub fn slab_mut(&mut self, i: usize) -> &mut [f64] {
        let len = self.dims[1] * self.dims[2];
        &mut self.data[i * len..(i + 1) * len]
    }

    /// 同时取得第 `i-1` 片（只读）与第 `i` 片（可变）
    pub fn slab_pair_mut(&mut self, i: usize) -> (&[f64], &mut [f64]) {
        split_pair(&mut self.data, self.dims[1] * self.dims[2], i)
    }

    /// 原始数据
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// 4 维稠密数组 `[n0, n1, n2, n3]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array4 {
    dims: [usize; 4],
    data: Vec<f64>,
}

impl Array4 {
    /// 以给定值填充创建
    pub fn filled(dims: [usize; 4], value: f64) -> Self {
        Self {
            dims,
            data: vec![value; dims.iter().product()],
        }
    }

    /// 创建全缺测数组
    pub fn missing(dims: [usize; 4]) -> Self {
        Self::filled(dims, MISSING)
    }

    /// 维度
    #[inline]
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    #[inline]
    fn offset(&self, i: usize, j: usize, k: usize, l: usize) -> usize {
        debug_assert!(
            i < self.dims[0] && j < self.dims[1] && k < self.dims[2] && l < self.dims[3]
        );
        ((i * self.dims[1] + j) * self.dims[2] + k) * self.dims[3] + l
    }

    /// 读取元素
    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        self.data[self.offset(i, j, k, l)]
    }

    /// 写入元素
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, l: usize, value: f64) {
        let idx = self.offset(i, j, k, l);
        self.data[idx] = value;
    }

    /// 单片长度（后三维乘积）
    #[inline]
    pub fn slab_len(&self) -> usize {
        self.dims[1] * self.dims[2] * self.dims[3]
    }

    /// 第一维第 `i` 片（连续内存）
    pub fn slab(&self, i: usize) -> &[f64] {
        let len = self.slab_len();
        &self.data[i * len..(i + 1) * len]
    }

    /// 第一维第 `i` 片（可变）
    pub fn slab_mut(&mut self, i: usize) -> &mut [f64] {
        let len = self.slab_len();
        &mut self.data[i * len..(i + 1) * len]
    }

    /// 同时取得第 `i-1` 片（只读）与第 `i` 片（可变）
    pub fn slab_pair_mut(&mut self, i: usize) -> (&[f64], &mut [f64]) {
        let len = self.slab_len();
        split_pair(&mut self.data, len, i)
    }

    /// 原始数据
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

fn split_pair(data: &mut [f64], len: usize, i: usize) -> (&[f64], &mut [f64]) {
    assert!(i >= 1, "slab_pair_mut 需要 i >= 1");
    let (head, tail) = data.split_at_mut(i * len);
    (&head[(i - 1) * len..], &mut tail[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array4_layout_is_row_major() {
        let mut a = Array4::filled([2, 2, 3, 4], 0.0);
        a.set(1, 1, 2, 3, 9.0);
        assert_eq!(*a.as_slice().last().unwrap(), 9.0);
        a.set(0, 0, 0, 1, 1.0);
        assert_eq!(a.as_slice()[1], 1.0);
    }

    #[test]
    fn test_slab_pair_is_disjoint() {
        let mut a = Array4::filled([3, 1, 2, 2], 1.0);
        {
            let (prev, cur) = a.slab_pair_mut(2);
            assert_eq!(prev.len(), 4);
            for (c, p) in cur.iter_mut().zip(prev) {
                *c = p + 1.0;
            }
        }
        assert_eq!(a.get(2, 0, 1, 1), 2.0);
        assert_eq!(a.get(1, 0, 1, 1), 1.0);
    }

    #[test]
    fn test_array3_from_vec_checks_size() {
        assert!(Array3::from_vec([2, 2, 2], vec![0.0; 8]).is_ok());
        assert!(Array3::from_vec([2, 2, 2], vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_missing_helpers() {
        assert!(is_missing(MISSING));
        assert!(!is_missing(1.5));
    }
}
