//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 整个宿主层只有一个错误枚举 `ClusteringError`，调用方按分支匹配即可区分：
//! - 参数校验失败（尚未申请任何引擎内存）
//! - 引擎分配器无法满足请求
//! - 引擎对合法调用报告失败（trap、空指针、越界长度头等）
//! - 引擎实例化失败
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - `code()` / `stage()` 提供稳定的机器可读标识，便于日志与上层诊断。
//! - 实现 `Serialize`，将错误序列化为字符串。

use serde::Serialize;

/// 宿主层统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ClusteringError {
    /// 图片描述或 `k` 不合法，在任何引擎内存申请之前抛出
    #[error("参数校验失败：{0}")]
    Validation(String),

    /// 引擎分配器返回空指针
    #[error("内存分配失败：{0}")]
    Allocation(String),

    /// 引擎调用失败（原样透传，不做解释）
    #[error("引擎调用失败：{0}")]
    EngineInvocation(String),

    /// 引擎模块加载或实例化失败
    #[error("引擎加载失败：{0}")]
    EngineLoad(String),
}

impl ClusteringError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Allocation(_) => "E_ALLOCATION",
            Self::EngineInvocation(_) => "E_ENGINE_INVOCATION",
            Self::EngineLoad(_) => "E_ENGINE_LOAD",
        }
    }

    /// 出错所在阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validate",
            Self::Allocation(_) => "allocate",
            Self::EngineInvocation(_) => "invoke",
            Self::EngineLoad(_) => "load",
        }
    }
}

impl From<ClusteringError> for String {
    fn from(error: ClusteringError) -> Self {
        error.to_string()
    }
}

impl Serialize for ClusteringError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
