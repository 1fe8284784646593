//! # 引擎边界模块（engine）
//!
//! ## 设计思路
//!
//! 聚类/量化算法位于一个不透明的编译产物中，宿主只能通过一组导出函数
//! 和一对分配器（按大小分配、按指针释放）在共享线性内存上与之交互。
//! 本模块把这条窄边界抽象为 `Engine` trait，其余模块只面向 trait 编程：
//!
//! - `config`：wasm 模块路径、导出名、内存上限等配置
//! - `wasm`：基于 `wasmtime` 的真实引擎实现
//! - `handle`：`EngineHandle`（串行化访问）与 `EngineContext`（惰性单次实例化）
//!
//! ## 实现思路
//!
//! 指针与长度在 wasm32 上都是 32 位；`EngineCall` 把六个导出操作的参数列表
//! 固定为强类型枚举，避免调用点手写参数顺序。

mod config;
mod handle;
mod wasm;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{EngineConfig, ExportNames};
pub use handle::{EngineContext, EngineHandle, EngineLoader, WasmLoader};
pub use wasm::WasmEngine;

use crate::descriptor::ColorFormatCode;
use crate::error::ClusteringError;

/// 引擎线性内存中的一段已写入数据：起始指针 + 字节数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignSlice {
    pub ptr: u32,
    pub len: u32,
}

/// 六个导出操作及其参数。
///
/// 每个操作都返回指向 EncodedBuffer 的指针，所有权转移给调用方。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCall {
    GetClustering {
        image: ForeignSlice,
        format: ColorFormatCode,
    },
    GetPalette {
        image: ForeignSlice,
        format: ColorFormatCode,
        k: i32,
    },
    GetPaletteFromClustering {
        clustering: ForeignSlice,
        k: i32,
    },
    Quantize {
        image: ForeignSlice,
        format: ColorFormatCode,
        k: i32,
    },
    QuantizeWithClustering {
        image: ForeignSlice,
        format: ColorFormatCode,
        clustering: ForeignSlice,
        k: i32,
    },
    QuantizeWithPalette {
        image: ForeignSlice,
        format: ColorFormatCode,
        palette: ForeignSlice,
    },
}

impl EngineCall {
    /// 对应的引擎导出函数名。
    pub fn export_name(&self) -> &'static str {
        match self {
            Self::GetClustering { .. } => "get_clustering",
            Self::GetPalette { .. } => "get_palette",
            Self::GetPaletteFromClustering { .. } => "get_palette_from_clustering",
            Self::Quantize { .. } => "quantize",
            Self::QuantizeWithClustering { .. } => "quantize_with_clustering",
            Self::QuantizeWithPalette { .. } => "quantize_with_palette",
        }
    }
}

/// 不透明引擎的导出面。
///
/// 实现者只需忠实转发：分配器失败时返回空指针（0），
/// 由上层 `TransferSession` 统一转换为 `ClusteringError::Allocation`。
pub trait Engine: Send {
    /// 向引擎分配器申请 `size` 字节，失败时返回 0。
    fn allocate(&mut self, size: u32) -> Result<u32, ClusteringError>;

    /// 释放由 `allocate` 或 `invoke` 得到的指针。
    fn free(&mut self, ptr: u32) -> Result<(), ClusteringError>;

    /// 将 `bytes` 复制到线性内存 `ptr` 处。
    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), ClusteringError>;

    /// 从线性内存 `ptr` 处读取 `buffer.len()` 字节。
    fn read(&self, ptr: u32, buffer: &mut [u8]) -> Result<(), ClusteringError>;

    /// 当前线性内存大小（字节）。
    fn memory_size(&self) -> usize;

    /// 调用一个导出操作，返回结果 EncodedBuffer 指针。
    fn invoke(&mut self, call: EngineCall) -> Result<u32, ClusteringError>;
}
