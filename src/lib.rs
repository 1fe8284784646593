//! # 颜色聚类宿主层：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        调用方                             │
//! │      ClusteringService（异步）/ EngineHandle（同步）       │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ ① 校验（零分配）
//! ┌───────┼──────────────────────────────────────────────────┐
//! │  descriptor ── normalize：裸字节 / 描述 / JSON → 描述     │
//! │  params ────── validate_k：k 为正整数                     │
//! │  operations ── Operation：六个操作的已校验请求            │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ ② 分配写入 ③ 调用 ④ 解码 ⑤ 释放
//! ┌───────┼──────────────────────────────────────────────────┐
//! │  transfer ──── TransferSession（RAII，确保逐一释放）      │
//! │  codec ─────── 4 字节小端长度头 + 负载                    │
//! │  engine ────── Engine trait / WasmEngine / EngineContext  │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ 导出函数 + 线性内存
//! ┌───────┴──────────────────────────────────────────────────┐
//! │              不透明的聚类/量化引擎（wasm）                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `ClusteringError` |
//! | [`descriptor`] | 颜色格式、图片描述与输入归一化 |
//! | [`params`] | 聚类数 `k` 的校验 |
//! | [`codec`] | EncodedBuffer 长度前缀编解码 |
//! | [`engine`] | 引擎边界、wasm 实现、惰性实例化与串行化句柄 |
//! | [`transfer`] | 单次操作内的分配/写入/调用/解码/释放 |
//! | [`operations`] | 六个操作的同步门面 |
//! | [`service`] | 六个操作的异步门面 |

pub mod codec;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod operations;
pub mod params;
pub mod service;
pub mod transfer;

pub use descriptor::{ColorFormat, ColorFormatCode, ImageDescriptor, ImageInput, normalize};
pub use engine::{
    Engine, EngineCall, EngineConfig, EngineContext, EngineHandle, EngineLoader, ExportNames, ForeignSlice,
    WasmEngine, WasmLoader,
};
pub use error::ClusteringError;
pub use operations::{ClusteringResult, Operation, Palette};
pub use params::{ClusterCount, ToClusterCount, validate_k};
pub use service::ClusteringService;
pub use transfer::TransferSession;
