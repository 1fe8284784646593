//! # 引擎配置模块
//!
//! ## 设计思路
//!
//! 将“如何找到并实例化引擎”集中到 `EngineConfig`：模块文件、导出名、
//! 未知导入的处理方式以及线性内存上限。操作语义本身不可配置。
//!
//! ## 实现思路
//!
//! - `Default` 对应 emscripten 独立 wasm 构建的默认导出名。
//! - `#[serde(default)]` 允许只覆盖部分字段。
//! - `validate` 在实例化之前拒绝明显无效的配置。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ClusteringError;

/// 引擎内存与分配器相关的导出名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    /// 线性内存导出名。
    pub memory: String,
    /// 分配函数导出名（`size -> ptr`）。
    pub allocate: String,
    /// 释放函数导出名（`ptr -> ()`）。
    pub free: String,
    /// reactor 初始化函数导出名，存在时在实例化后调用一次。
    pub initialize: Option<String>,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            allocate: "malloc".to_string(),
            free: "free".to_string(),
            initialize: Some("_initialize".to_string()),
        }
    }
}

/// 引擎实例化配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 编译后的引擎模块路径（`.wasm`）。
    pub module_path: PathBuf,
    /// 导出名。
    pub exports: ExportNames,
    /// 是否把模块声明但宿主未提供的导入定义为调用即 trap 的桩函数。
    ///
    /// 关闭后，存在未满足导入的模块会在实例化阶段失败。
    pub trap_unknown_imports: bool,
    /// 线性内存增长上限（字节），`None` 表示不限制。
    pub max_memory_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_path: PathBuf::from("dist/clustering.wasm"),
            exports: ExportNames::default(),
            trap_unknown_imports: true,
            max_memory_bytes: Some(512 * 1024 * 1024),
        }
    }
}

impl EngineConfig {
    pub fn with_module_path(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            ..Self::default()
        }
    }

    /// 校验配置。
    pub fn validate(&self) -> Result<(), ClusteringError> {
        let required = [
            ("exports.memory", &self.exports.memory),
            ("exports.allocate", &self.exports.allocate),
            ("exports.free", &self.exports.free),
        ];
        for (field, name) in required {
            if name.trim().is_empty() {
                return Err(ClusteringError::Validation(format!("{} 不能为空", field)));
            }
        }

        if matches!(&self.exports.initialize, Some(name) if name.trim().is_empty()) {
            return Err(ClusteringError::Validation(
                "exports.initialize 不能为空字符串（不需要时请设为 null）".to_string(),
            ));
        }

        if self.max_memory_bytes == Some(0) {
            return Err(ClusteringError::Validation("max_memory_bytes 不能为 0".to_string()));
        }

        Ok(())
    }
}
