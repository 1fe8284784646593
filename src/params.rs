//! 聚类数 `k` 的校验。
//!
//! `k` 必须是严格为正的整数，且能放进引擎的 `int` 参数。
//! 所有带 `k` 的操作都在申请引擎内存之前完成校验。

use std::num::NonZeroU32;

use crate::error::ClusteringError;

/// 引擎以有符号 32 位整数接收 `k`。
const MAX_CLUSTER_COUNT: i128 = i32::MAX as i128;

/// 已校验的聚类数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterCount(NonZeroU32);

impl ClusterCount {
    fn checked(value: i128) -> Result<Self, ClusteringError> {
        if value <= 0 {
            return Err(ClusteringError::Validation(format!("k 必须大于 0，实际为 {}", value)));
        }
        if value > MAX_CLUSTER_COUNT {
            return Err(ClusteringError::Validation(format!(
                "k 过大：{}（上限 {}）",
                value, MAX_CLUSTER_COUNT
            )));
        }

        NonZeroU32::new(value as u32)
            .map(Self)
            .ok_or_else(|| ClusteringError::Validation("k 必须大于 0".to_string()))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// 引擎参数形式。
    pub fn as_i32(self) -> i32 {
        self.0.get() as i32
    }
}

/// 可转换为 `ClusterCount` 的调用方参数。
pub trait ToClusterCount {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError>;
}

impl ToClusterCount for ClusterCount {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
        Ok(self)
    }
}

macro_rules! impl_integer_cluster_count {
    ($($ty:ty),*) => {
        $(
            impl ToClusterCount for $ty {
                fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
                    ClusterCount::checked(self as i128)
                }
            }
        )*
    };
}

impl_integer_cluster_count!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl ToClusterCount for f64 {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
        if !self.is_finite() || self.fract() != 0.0 {
            return Err(ClusteringError::Validation(format!("k 必须是整数，实际为 {}", self)));
        }
        if self > MAX_CLUSTER_COUNT as f64 {
            return Err(ClusteringError::Validation(format!("k 过大：{}", self)));
        }
        ClusterCount::checked(self as i128)
    }
}

impl ToClusterCount for f32 {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
        f64::from(self).to_cluster_count()
    }
}

impl ToClusterCount for &serde_json::Value {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
        let serde_json::Value::Number(number) = self else {
            return Err(ClusteringError::Validation(format!("k 必须是整数，实际为 {}", self)));
        };

        if let Some(value) = number.as_i64() {
            return value.to_cluster_count();
        }
        if let Some(value) = number.as_u64() {
            return value.to_cluster_count();
        }
        match number.as_f64() {
            Some(value) => value.to_cluster_count(),
            None => Err(ClusteringError::Validation(format!("k 无法解析：{}", number))),
        }
    }
}

impl ToClusterCount for serde_json::Value {
    fn to_cluster_count(self) -> Result<ClusterCount, ClusteringError> {
        (&self).to_cluster_count()
    }
}

/// 校验 `k`，成功时返回 `ClusterCount`。
///
/// # 示例
/// ```rust
/// use color_clustering::validate_k;
///
/// assert_eq!(validate_k(8)?.get(), 8);
/// assert!(validate_k(0).is_err());
/// assert!(validate_k(1.5).is_err());
/// # Ok::<(), color_clustering::ClusteringError>(())
/// ```
pub fn validate_k(k: impl ToClusterCount) -> Result<ClusterCount, ClusteringError> {
    k.to_cluster_count()
}
