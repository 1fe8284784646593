//! # 引擎句柄与惰性实例化
//!
//! ## 设计思路
//!
//! 用显式的上下文值 `EngineContext` 取代全局可变单例：
//! - 调用方自行持有上下文，测试可创建相互隔离的实例
//! - 首次 `acquire` 时才实例化引擎，之后始终返回同一个 `Arc<EngineHandle>`
//! - 并发的首次调用共享同一个“初始化进行中”的 future，只会实例化一次
//!
//! ## 实现思路
//!
//! - `tokio::sync::OnceCell::get_or_try_init` 负责单飞初始化；
//!   初始化失败时单元格保持为空，下一次 `acquire` 会重新尝试。
//! - 实例化（编译 wasm）是阻塞操作，放到 `spawn_blocking` 执行。
//! - 线性内存中的指针是瞬时的，分配器还会复用已释放区域，
//!   因此 `EngineHandle` 用互斥锁把“分配 → 释放”整个窗口串行化。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::OnceCell;

use super::{Engine, EngineConfig, WasmEngine};
use crate::error::ClusteringError;

/// 引擎实例化策略。
///
/// `load` 是阻塞调用，会在 tokio 的阻塞线程池中执行。
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Engine>, ClusteringError>;
}

impl<F> EngineLoader for F
where
    F: Fn() -> Result<Box<dyn Engine>, ClusteringError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn Engine>, ClusteringError> {
        self()
    }
}

/// 按 `EngineConfig` 加载 wasm 引擎。
#[derive(Debug, Clone)]
pub struct WasmLoader {
    config: EngineConfig,
}

impl WasmLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl EngineLoader for WasmLoader {
    fn load(&self) -> Result<Box<dyn Engine>, ClusteringError> {
        Ok(Box::new(WasmEngine::load(&self.config)?))
    }
}

/// 已实例化的引擎，所有操作经由它串行访问线性内存。
pub struct EngineHandle {
    engine: Mutex<Box<dyn Engine>>,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine: Mutex::new(engine),
        }
    }

    /// 独占引擎，持锁期间其他操作无法开始分配。
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Engine>>, ClusteringError> {
        self.engine
            .lock()
            .map_err(|_| ClusteringError::EngineInvocation("引擎互斥锁已中毒".to_string()))
    }
}

/// 持有引擎句柄的上下文，每个上下文至多实例化一次引擎。
pub struct EngineContext {
    loader: Arc<dyn EngineLoader>,
    handle: OnceCell<Arc<EngineHandle>>,
}

impl EngineContext {
    /// 使用自定义实例化策略创建上下文。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use color_clustering::{EngineConfig, EngineContext, WasmLoader};
    ///
    /// # async fn demo() -> Result<(), color_clustering::ClusteringError> {
    /// let context = EngineContext::new(WasmLoader::new(EngineConfig::default()));
    /// let handle = context.acquire().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            handle: OnceCell::new(),
        }
    }

    /// 使用 wasm 引擎配置创建上下文。
    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(WasmLoader::new(config))
    }

    /// 是否已完成实例化。
    pub fn is_initialized(&self) -> bool {
        self.handle.initialized()
    }

    /// 获取共享引擎句柄，必要时触发唯一一次实例化。
    pub async fn acquire(&self) -> Result<Arc<EngineHandle>, ClusteringError> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let started = Instant::now();
                let engine = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| ClusteringError::EngineLoad(format!("实例化任务异常终止：{}", e)))??;

                log::info!("✅ 引擎实例化完成 - 耗时: {}ms", started.elapsed().as_millis());
                Ok::<_, ClusteringError>(Arc::new(EngineHandle::new(engine)))
            })
            .await?;

        Ok(Arc::clone(handle))
    }
}
