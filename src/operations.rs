//! # 操作门面（同步版本）
//!
//! ## 设计思路
//!
//! 六个操作共享同一条五步纪律，差别只在于“需要暂存哪些输入”和“调用哪个导出”。
//! 因此先把请求校验并收敛为 `Operation`（此时零分配），
//! 再由 `EngineHandle::execute` 统一完成 分配 → 调用 → 解码 → 释放。
//!
//! ## 实现思路
//!
//! - `Operation` 的构造函数负责全部校验，失败时调用方拿到 `Validation`，引擎不受影响。
//! - `Operation` 拥有输入字节的副本，可以安全地移动到阻塞线程中执行。
//! - 结果以独立的本地字节返回，与引擎线性内存再无关联。

use std::time::Instant;

use crate::descriptor::{ColorFormat, ImageDescriptor, ImageInput, normalize};
use crate::engine::{EngineCall, EngineHandle};
use crate::error::ClusteringError;
use crate::params::{ClusterCount, ToClusterCount, validate_k};
use crate::transfer::TransferSession;

/// 引擎生成的逐像素聚类结果，本层视为不透明字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringResult(Vec<u8>);

/// `k` 个代表色组成的调色板，本层视为不透明字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(Vec<u8>);

macro_rules! opaque_bytes {
    ($name:ident) => {
        impl $name {
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

opaque_bytes!(ClusteringResult);
opaque_bytes!(Palette);

/// 已校验的单次操作请求。
#[derive(Debug, Clone)]
pub enum Operation {
    GetClustering {
        image: ImageDescriptor,
    },
    GetPalette {
        image: ImageDescriptor,
        k: ClusterCount,
    },
    GetPaletteFromClustering {
        clustering: ClusteringResult,
        k: ClusterCount,
    },
    Quantize {
        image: ImageDescriptor,
        k: ClusterCount,
    },
    QuantizeWithClustering {
        image: ImageDescriptor,
        clustering: ClusteringResult,
        k: ClusterCount,
    },
    QuantizeWithPalette {
        image: ImageDescriptor,
        palette: Palette,
    },
}

impl Operation {
    pub fn get_clustering(image: impl Into<ImageInput>) -> Result<Self, ClusteringError> {
        Ok(Self::GetClustering {
            image: normalize(image)?,
        })
    }

    pub fn get_palette(image: impl Into<ImageInput>, k: impl ToClusterCount) -> Result<Self, ClusteringError> {
        let image = normalize(image)?;
        let k = validate_k(k)?;
        Ok(Self::GetPalette { image, k })
    }

    /// 仅凭已有聚类结果推导调色板，不重新聚类，也不需要图片。
    pub fn get_palette_from_clustering(
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<Self, ClusteringError> {
        let k = validate_k(k)?;
        Ok(Self::GetPaletteFromClustering {
            clustering: clustering.clone(),
            k,
        })
    }

    pub fn quantize(image: impl Into<ImageInput>, k: impl ToClusterCount) -> Result<Self, ClusteringError> {
        let image = normalize(image)?;
        let k = validate_k(k)?;
        Ok(Self::Quantize { image, k })
    }

    pub fn quantize_with_clustering(
        image: impl Into<ImageInput>,
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<Self, ClusteringError> {
        let image = normalize(image)?;
        let k = validate_k(k)?;
        Ok(Self::QuantizeWithClustering {
            image,
            clustering: clustering.clone(),
            k,
        })
    }

    /// 颜色数量由调色板本身决定，不接收 `k`。
    pub fn quantize_with_palette(image: impl Into<ImageInput>, palette: &Palette) -> Result<Self, ClusteringError> {
        Ok(Self::QuantizeWithPalette {
            image: normalize(image)?,
            palette: palette.clone(),
        })
    }

    /// 对应的引擎导出名。
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetClustering { .. } => "get_clustering",
            Self::GetPalette { .. } => "get_palette",
            Self::GetPaletteFromClustering { .. } => "get_palette_from_clustering",
            Self::Quantize { .. } => "quantize",
            Self::QuantizeWithClustering { .. } => "quantize_with_clustering",
            Self::QuantizeWithPalette { .. } => "quantize_with_palette",
        }
    }

    /// 操作携带的图片，`get_palette_from_clustering` 没有图片。
    pub fn image(&self) -> Option<&ImageDescriptor> {
        match self {
            Self::GetClustering { image }
            | Self::GetPalette { image, .. }
            | Self::Quantize { image, .. }
            | Self::QuantizeWithClustering { image, .. }
            | Self::QuantizeWithPalette { image, .. } => Some(image),
            Self::GetPaletteFromClustering { .. } => None,
        }
    }

    /// 重新着色类操作的输出格式（与输入图片一致）。
    pub(crate) fn output_format(&self) -> Option<ColorFormat> {
        match self {
            Self::Quantize { image, .. }
            | Self::QuantizeWithClustering { image, .. }
            | Self::QuantizeWithPalette { image, .. } => Some(image.format),
            _ => None,
        }
    }

    /// 第 2 步：分配并写入所有输入，返回待调用的引擎操作。
    fn stage(&self, session: &mut TransferSession<'_>) -> Result<EngineCall, ClusteringError> {
        let call = match self {
            Self::GetClustering { image } => EngineCall::GetClustering {
                image: session.stage(image.as_bytes())?,
                format: image.format.code(),
            },
            Self::GetPalette { image, k } => EngineCall::GetPalette {
                image: session.stage(image.as_bytes())?,
                format: image.format.code(),
                k: k.as_i32(),
            },
            Self::GetPaletteFromClustering { clustering, k } => EngineCall::GetPaletteFromClustering {
                clustering: session.stage(clustering.as_bytes())?,
                k: k.as_i32(),
            },
            Self::Quantize { image, k } => EngineCall::Quantize {
                image: session.stage(image.as_bytes())?,
                format: image.format.code(),
                k: k.as_i32(),
            },
            Self::QuantizeWithClustering { image, clustering, k } => EngineCall::QuantizeWithClustering {
                image: session.stage(image.as_bytes())?,
                format: image.format.code(),
                clustering: session.stage(clustering.as_bytes())?,
                k: k.as_i32(),
            },
            Self::QuantizeWithPalette { image, palette } => EngineCall::QuantizeWithPalette {
                image: session.stage(image.as_bytes())?,
                format: image.format.code(),
                palette: session.stage(palette.as_bytes())?,
            },
        };
        Ok(call)
    }
}

impl EngineHandle {
    /// 执行一个已校验的操作，返回解码后的本地负载。
    ///
    /// 整个 分配 → 释放 窗口都在引擎锁内完成，任何出错路径都会释放已获取的指针。
    pub fn execute(&self, operation: &Operation) -> Result<Vec<u8>, ClusteringError> {
        let started = Instant::now();
        if let Some(image) = operation.image() {
            log::debug!(
                "{}：输入 {} 像素（{}，{} 字节）",
                operation.name(),
                image.pixel_count(),
                image.format.as_str(),
                image.len()
            );
        }

        let result = self.transfer(operation);
        match &result {
            Ok(payload) => log::debug!(
                "{} 完成 - 输出 {} 字节 耗时 {}ms",
                operation.name(),
                payload.len(),
                started.elapsed().as_millis()
            ),
            Err(e) => log::warn!("❌ {} 失败 [{} @ {}]：{}", operation.name(), e.code(), e.stage(), e),
        }
        result
    }

    fn transfer(&self, operation: &Operation) -> Result<Vec<u8>, ClusteringError> {
        let mut engine = self.lock()?;
        let mut session = TransferSession::new(&mut **engine);

        let call = operation.stage(&mut session)?;
        log::debug!("{}：已暂存 {} 个输入缓冲区", operation.name(), session.held());

        let result = session.invoke(call)?;
        let payload = session.decode(result)?;
        session.close()?;
        Ok(payload)
    }

    /// 计算逐像素聚类结果。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use color_clustering::{EngineConfig, EngineHandle, WasmEngine};
    ///
    /// let engine = WasmEngine::load(&EngineConfig::default())?;
    /// let handle = EngineHandle::new(Box::new(engine));
    /// let clustering = handle.get_clustering(vec![10u8, 20, 30, 255])?;
    /// let palette = handle.get_palette_from_clustering(&clustering, 1)?;
    /// # Ok::<(), color_clustering::ClusteringError>(())
    /// ```
    pub fn get_clustering(&self, image: impl Into<ImageInput>) -> Result<ClusteringResult, ClusteringError> {
        let operation = Operation::get_clustering(image)?;
        self.execute(&operation).map(ClusteringResult::from)
    }

    pub fn get_palette(&self, image: impl Into<ImageInput>, k: impl ToClusterCount) -> Result<Palette, ClusteringError> {
        let operation = Operation::get_palette(image, k)?;
        self.execute(&operation).map(Palette::from)
    }

    pub fn get_palette_from_clustering(
        &self,
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<Palette, ClusteringError> {
        let operation = Operation::get_palette_from_clustering(clustering, k)?;
        self.execute(&operation).map(Palette::from)
    }

    /// 量化为至多 `k` 种颜色，输出与输入同格式。
    pub fn quantize(&self, image: impl Into<ImageInput>, k: impl ToClusterCount) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize(image, k)?;
        self.execute_recolor(&operation)
    }

    pub fn quantize_with_clustering(
        &self,
        image: impl Into<ImageInput>,
        clustering: &ClusteringResult,
        k: impl ToClusterCount,
    ) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize_with_clustering(image, clustering, k)?;
        self.execute_recolor(&operation)
    }

    pub fn quantize_with_palette(
        &self,
        image: impl Into<ImageInput>,
        palette: &Palette,
    ) -> Result<ImageDescriptor, ClusteringError> {
        let operation = Operation::quantize_with_palette(image, palette)?;
        self.execute_recolor(&operation)
    }

    pub(crate) fn execute_recolor(&self, operation: &Operation) -> Result<ImageDescriptor, ClusteringError> {
        let format = operation.output_format().ok_or_else(|| {
            ClusteringError::Validation(format!("{} 不是重新着色操作", operation.name()))
        })?;
        let data = self.execute(operation)?;
        Ok(ImageDescriptor::new(data, format))
    }
}
