//! # wasm 引擎实现
//!
//! ## 设计思路
//!
//! 使用 `wasmtime` 承载编译好的聚类引擎。实例化阶段一次性解析
//! 线性内存、分配器以及六个操作导出，缺失任意一项都直接判定加载失败，
//! 避免在第一次调用时才发现导出不全。
//!
//! ## 实现思路
//!
//! - 编译用的 `wasmtime::Engine` 进程内共享（`once_cell::sync::Lazy`），
//!   每个 `WasmEngine` 持有独立的 `Store` 与实例。
//! - `StoreLimits` 限制线性内存增长，超限时分配器返回空指针。
//! - 引擎 trap 一律转换为 `ClusteringError`，不在宿主侧 panic。

use std::time::Instant;

use once_cell::sync::Lazy;
use wasmtime::{
    Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, TypedFunc, WasmParams,
    WasmResults,
};

use super::{Engine, EngineCall, EngineConfig};
use crate::error::ClusteringError;

/// 进程内共享的编译运行时。
static RUNTIME: Lazy<wasmtime::Engine> = Lazy::new(wasmtime::Engine::default);

struct OperationExports {
    get_clustering: TypedFunc<(i32, i32, i32), i32>,
    get_palette: TypedFunc<(i32, i32, i32, i32), i32>,
    get_palette_from_clustering: TypedFunc<(i32, i32, i32), i32>,
    quantize: TypedFunc<(i32, i32, i32, i32), i32>,
    quantize_with_clustering: TypedFunc<(i32, i32, i32, i32, i32, i32), i32>,
    quantize_with_palette: TypedFunc<(i32, i32, i32, i32, i32), i32>,
}

/// 基于 `wasmtime` 的引擎实例。
pub struct WasmEngine {
    store: Store<StoreLimits>,
    memory: Memory,
    allocate: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    operations: OperationExports,
}

impl WasmEngine {
    /// 从 `config.module_path` 加载并实例化引擎。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use color_clustering::{EngineConfig, WasmEngine};
    ///
    /// let engine = WasmEngine::load(&EngineConfig::with_module_path("dist/clustering.wasm"))?;
    /// # Ok::<(), color_clustering::ClusteringError>(())
    /// ```
    pub fn load(config: &EngineConfig) -> Result<Self, ClusteringError> {
        config
            .validate()
            .map_err(|e| ClusteringError::EngineLoad(e.to_string()))?;

        let started = Instant::now();
        let module = Module::from_file(&RUNTIME, &config.module_path).map_err(|e| {
            ClusteringError::EngineLoad(format!("无法编译模块 {}：{:#}", config.module_path.display(), e))
        })?;
        let engine = Self::instantiate(&module, config)?;

        log::info!(
            "✅ 引擎模块已加载 - 路径: {} 内存: {}KB 耗时: {}ms",
            config.module_path.display(),
            engine.memory_size() / 1024,
            started.elapsed().as_millis()
        );

        Ok(engine)
    }

    /// 从内存中的模块字节（二进制或文本格式）实例化引擎。
    pub fn from_bytes(bytes: impl AsRef<[u8]>, config: &EngineConfig) -> Result<Self, ClusteringError> {
        config
            .validate()
            .map_err(|e| ClusteringError::EngineLoad(e.to_string()))?;

        let module = Module::new(&RUNTIME, bytes.as_ref())
            .map_err(|e| ClusteringError::EngineLoad(format!("无法编译模块：{:#}", e)))?;
        Self::instantiate(&module, config)
    }

    fn instantiate(module: &Module, config: &EngineConfig) -> Result<Self, ClusteringError> {
        let mut limits = StoreLimitsBuilder::new();
        if let Some(max) = config.max_memory_bytes {
            limits = limits.memory_size(max);
        }

        let mut store = Store::new(&RUNTIME, limits.build());
        store.limiter(|limits| limits);

        let mut linker: Linker<StoreLimits> = Linker::new(&RUNTIME);
        if config.trap_unknown_imports {
            linker
                .define_unknown_imports_as_traps(module)
                .map_err(|e| ClusteringError::EngineLoad(format!("无法定义导入桩：{:#}", e)))?;
        }

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| ClusteringError::EngineLoad(format!("实例化失败：{:#}", e)))?;

        let exports = &config.exports;
        let memory = instance.get_memory(&mut store, &exports.memory).ok_or_else(|| {
            ClusteringError::EngineLoad(format!("模块未导出线性内存 {}", exports.memory))
        })?;

        let allocate = typed_export::<i32, i32>(&instance, &mut store, &exports.allocate)?;
        let free = typed_export::<i32, ()>(&instance, &mut store, &exports.free)?;

        let operations = OperationExports {
            get_clustering: typed_export(&instance, &mut store, "get_clustering")?,
            get_palette: typed_export(&instance, &mut store, "get_palette")?,
            get_palette_from_clustering: typed_export(&instance, &mut store, "get_palette_from_clustering")?,
            quantize: typed_export(&instance, &mut store, "quantize")?,
            quantize_with_clustering: typed_export(&instance, &mut store, "quantize_with_clustering")?,
            quantize_with_palette: typed_export(&instance, &mut store, "quantize_with_palette")?,
        };

        if let Some(name) = &exports.initialize {
            if let Some(func) = instance.get_func(&mut store, name) {
                let initialize = func
                    .typed::<(), ()>(&store)
                    .map_err(|e| ClusteringError::EngineLoad(format!("初始化函数 {} 签名不符：{:#}", name, e)))?;
                initialize
                    .call(&mut store, ())
                    .map_err(|e| ClusteringError::EngineLoad(format!("初始化函数 {} 执行失败：{:#}", name, e)))?;
                log::debug!("引擎初始化函数 {} 已执行", name);
            }
        }

        Ok(Self {
            store,
            memory,
            allocate,
            free,
            operations,
        })
    }
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<StoreLimits>,
    name: &str,
) -> Result<TypedFunc<P, R>, ClusteringError>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| ClusteringError::EngineLoad(format!("导出函数 {} 不可用：{:#}", name, e)))
}

/// 长度参数按 C `int` 传入引擎。
fn length_arg(len: u32) -> Result<i32, ClusteringError> {
    i32::try_from(len)
        .map_err(|_| ClusteringError::EngineInvocation(format!("长度 {} 超出引擎 int 参数范围", len)))
}

/// 指针按位原样传递。
fn ptr_arg(ptr: u32) -> i32 {
    ptr as i32
}

impl Engine for WasmEngine {
    fn allocate(&mut self, size: u32) -> Result<u32, ClusteringError> {
        let size = i32::try_from(size)
            .map_err(|_| ClusteringError::Allocation(format!("申请 {} 字节超出 32 位引擎上限", size)))?;
        let ptr = self
            .allocate
            .call(&mut self.store, size)
            .map_err(|e| ClusteringError::Allocation(format!("分配器执行失败：{:#}", e)))?;
        Ok(ptr as u32)
    }

    fn free(&mut self, ptr: u32) -> Result<(), ClusteringError> {
        self.free
            .call(&mut self.store, ptr_arg(ptr))
            .map_err(|e| ClusteringError::EngineInvocation(format!("释放指针 {} 失败：{:#}", ptr, e)))
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), ClusteringError> {
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|e| {
                ClusteringError::EngineInvocation(format!("写入线性内存失败：ptr={} len={}：{}", ptr, bytes.len(), e))
            })
    }

    fn read(&self, ptr: u32, buffer: &mut [u8]) -> Result<(), ClusteringError> {
        self.memory
            .read(&self.store, ptr as usize, buffer)
            .map_err(|e| {
                ClusteringError::EngineInvocation(format!("读取线性内存失败：ptr={} len={}：{}", ptr, buffer.len(), e))
            })
    }

    fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn invoke(&mut self, call: EngineCall) -> Result<u32, ClusteringError> {
        let name = call.export_name();
        let ops = &self.operations;
        let store = &mut self.store;

        let result = match call {
            EngineCall::GetClustering { image, format } => ops.get_clustering.call(
                store,
                (ptr_arg(image.ptr), length_arg(image.len)?, format.as_i32()),
            ),
            EngineCall::GetPalette { image, format, k } => ops.get_palette.call(
                store,
                (ptr_arg(image.ptr), length_arg(image.len)?, format.as_i32(), k),
            ),
            EngineCall::GetPaletteFromClustering { clustering, k } => ops.get_palette_from_clustering.call(
                store,
                (ptr_arg(clustering.ptr), length_arg(clustering.len)?, k),
            ),
            EngineCall::Quantize { image, format, k } => ops.quantize.call(
                store,
                (ptr_arg(image.ptr), length_arg(image.len)?, format.as_i32(), k),
            ),
            EngineCall::QuantizeWithClustering {
                image,
                format,
                clustering,
                k,
            } => ops.quantize_with_clustering.call(
                store,
                (
                    ptr_arg(image.ptr),
                    length_arg(image.len)?,
                    format.as_i32(),
                    ptr_arg(clustering.ptr),
                    length_arg(clustering.len)?,
                    k,
                ),
            ),
            EngineCall::QuantizeWithPalette { image, format, palette } => ops.quantize_with_palette.call(
                store,
                (
                    ptr_arg(image.ptr),
                    length_arg(image.len)?,
                    format.as_i32(),
                    ptr_arg(palette.ptr),
                    length_arg(palette.len)?,
                ),
            ),
        };

        result
            .map(|ptr| ptr as u32)
            .map_err(|e| ClusteringError::EngineInvocation(format!("{} 执行失败：{:#}", name, e)))
    }
}
