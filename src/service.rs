//! # 服务层（异步门面）
//!
//! ## 设计思路
//!
//! `ClusteringService` 是面向应用的入口，持有一个 `EngineContext`：
//! 1. 校验并收敛输入（失败时连引擎都不会实例化）
//! 2. `acquire` 共享引擎句柄（首次调用时实例化）
//! 3. 在阻塞线程池中执行同步的五步纪律
//!
//! ## 实现思路
//!
//! 引擎调用是同步阻塞的，`spawn_blocking` 避免占用异步工作线程；
//! 串行化由 `EngineHandle` 内部的互斥锁保证，多个并发请求排队执行。

use std::sync::Arc;

use crate::descriptor::{ImageDescriptor, ImageInput};
use crate::engine::{EngineConfig, EngineContext, EngineHandle, EngineLoader};
use crate::error::ClusteringError;
use crate::operations::{ClusteringResult, Operation, Palette};
use crate::params::ToClusterCount;

/// 聚类/量化服务。
pub struct ClusteringService {
    context: EngineContext,
}

impl Default for ClusteringService {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusteringService {
    /// 使用默认 wasm 引擎配置创建服务，引擎在第一次调用时才加载。
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// 使用自定义配置创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use color_clustering::{ClusteringService, EngineConfig};
    ///
    /// # async fn demo() -> Result<(), color_clustering::ClusteringError> {
    /// let service = ClusteringService::with_config(EngineConfig::with_module_path("dist/clustering.wasm"));
    /// let palette = service.get_palette(vec![10u8, 20, 30, 255], 1).await?;
    /// assert_eq!(palette.as_bytes(), &[10, 20, 30]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            context: EngineContext::with_config(config),
        }
    }

    /// 使用自定义实例化策略创建服务（主要用于测试或嵌入其他引擎）。
    pub fn with_loader(loader: impl EngineLoader + 'static) -> Self {
        Self {
            context: EngineContext::new(loader),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub async fn get_clustering(&self, image: impl Into<ImageInput>) -> Result<ClusteringResult, ClusteringError> {
        let operation = Operation::get_clustering(image)?;
        self.run(operation, |handle, op| handle.execute(op).map(ClusteringResult::from))
            .await
    }

    pub async fn get_palette(
        &self,
        image: impl Into<ImageInput>,
        k: impl ToClusterCount,
    ) -> Result<Palette, ClusteringError> {
        let operation = Operation::get_palette(image, k)?;
        self.run(operation, |handle, op| handle.execute(op).map(Palette::from))
            .await
    }

    pub async fn get_palette_from_clustering(
        &self,
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<Palette, ClusteringError> {
        let operation = Operation::get_palette_from_clustering(clustering, k)?;
        self.run(operation, |handle, op| handle.execute(op).map(Palette::from))
            .await
    }

    pub async fn quantize(
        &self,
        image: impl Into<ImageInput>,
        k: impl ToClusterCount,
    ) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize(image, k)?;
        self.run(operation, |handle, op| handle.execute_recolor(op)).await
    }

    pub async fn quantize_with_clustering(
        &self,
        image: impl Into<ImageInput>,
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize_with_clustering(image, clustering, k)?;
        self.run(operation, |handle, op| handle.execute_recolor(op)).await
    }

    pub async fn quantize_with_palette(
        &self,
        image: impl Into<ImageInput>,
        palette: &Palette,
    ) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize_with_palette(image, palette)?;
        self.run(operation, |handle, op| handle.execute_recolor(op)).await
    }

    async fn run<T, F>(&self, operation: Operation, f: F) -> Result<T, ClusteringError>
    where
        T: Send + 'static,
        F: FnOnce(&EngineHandle, &Operation) -> Result<T, ClusteringError> + Send + 'static,
    {
        let handle: Arc<EngineHandle> = self.context.acquire().await?;
        let name = operation.name();

        tokio::task::spawn_blocking(move || f(&handle, &operation))
            .await
            .map_err(|e| ClusteringError::EngineInvocation(format!("{} 任务异常终止：{}", name, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ColorFormat;
    use crate::engine::Engine;
    use crate::engine::fake::{FakeEngine, FakeStats};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fake_service() -> (ClusteringService, Arc<Mutex<Option<Arc<FakeStats>>>>, Arc<AtomicUsize>) {
        let stats_slot = Arc::new(Mutex::new(None));
        let loads = Arc::new(AtomicUsize::new(0));

        let slot = Arc::clone(&stats_slot);
        let counter = Arc::clone(&loads);
        let service = ClusteringService::with_loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let (engine, stats) = FakeEngine::new();
            *slot.lock().expect("stats slot poisoned") = Some(stats);
            Ok::<_, ClusteringError>(Box::new(engine) as Box<dyn Engine>)
        });

        (service, stats_slot, loads)
    }

    fn stats_of(slot: &Mutex<Option<Arc<FakeStats>>>) -> Arc<FakeStats> {
        slot.lock()
            .expect("stats slot poisoned")
            .clone()
            .expect("engine should be loaded")
    }

    #[tokio::test]
    async fn validation_failure_does_not_instantiate_engine() {
        let (service, _stats, loads) = fake_service();

        let result = service.get_palette(vec![1u8, 2, 3, 4], 0).await;
        assert!(matches!(result, Err(ClusteringError::Validation(_))));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(!service.context().is_initialized());
    }

    #[tokio::test]
    async fn full_pipeline_on_single_color_image() {
        let (service, stats_slot, loads) = fake_service();
        let image = ImageDescriptor::rgba([10, 20, 30, 255].repeat(4));

        let clustering = service.get_clustering(image.clone()).await.expect("clustering should succeed");
        let from_clustering = service
            .get_palette_from_clustering(&clustering, 1)
            .await
            .expect("palette from clustering should succeed");
        let palette = service.get_palette(image.clone(), 1).await.expect("palette should succeed");
        let quantized = service.quantize(image.clone(), 1).await.expect("quantize should succeed");
        let reused = service
            .quantize_with_clustering(image.clone(), &clustering, 1)
            .await
            .expect("quantize with clustering should succeed");
        let painted = service
            .quantize_with_palette(image.clone(), &palette)
            .await
            .expect("quantize with palette should succeed");

        assert_eq!(from_clustering, palette);
        assert_eq!(palette.as_bytes(), &[10, 20, 30]);
        for output in [&quantized, &reused, &painted] {
            assert_eq!(output.format, ColorFormat::Rgba);
            assert_eq!(output, &image);
        }

        let stats = stats_of(&stats_slot);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(stats.invocations(), 6);
        assert_eq!(stats.allocations(), stats.frees());
        assert_eq!(stats.live(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_engine() {
        let (service, stats_slot, loads) = fake_service();
        let service = Arc::new(service);

        let mut tasks = Vec::new();
        for i in 0..24u8 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                let image = ImageDescriptor::rgb([i, i, i].repeat(5));
                let quantized = service.quantize(image.clone(), 2).await?;
                assert_eq!(quantized, image);
                Ok::<_, ClusteringError>(())
            }));
        }

        for task in tasks {
            task.await
                .expect("task should not panic")
                .expect("quantize should succeed");
        }

        let stats = stats_of(&stats_slot);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(stats.invocations(), 24);
        assert_eq!(stats.live(), 0);
    }
}
