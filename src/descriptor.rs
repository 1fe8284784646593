//! # 图片描述与归一化
//!
//! ## 设计思路
//!
//! 调用方可以传入三种形态的图片：
//! - 裸字节：隐式视为 RGBA
//! - 已构造好的 `ImageDescriptor`
//! - 结构化值（`serde_json::Value`），需包含 `data` 与 `format`
//!
//! `normalize` 统一收敛为 `ImageDescriptor`，纯函数、不申请任何引擎资源。
//!
//! ## 实现思路
//!
//! 本层只决定每像素字节数（RGB=3，RGBA=4）交给引擎解释，
//! 不校验 `data.len()` 与宽高是否一致，那是引擎的职责。

use image::{DynamicImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::ClusteringError;

/// 像素颜色格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    Rgb,
    Rgba,
}

impl ColorFormat {
    /// 每像素字节数。
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    /// 发送给引擎的格式编码。
    pub fn code(self) -> ColorFormatCode {
        match self {
            Self::Rgba => ColorFormatCode::Rgba,
            Self::Rgb => ColorFormatCode::Rgb,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Rgba => "rgba",
        }
    }
}

/// 引擎侧格式编码，取值固定，未与引擎协商前不得扩展。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ColorFormatCode {
    Rgba = 0,
    Rgb = 1,
}

impl ColorFormatCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// 归一化后的图片：像素字节 + 颜色格式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub data: Vec<u8>,
    pub format: ColorFormat,
}

impl ImageDescriptor {
    pub fn new(data: Vec<u8>, format: ColorFormat) -> Self {
        Self { data, format }
    }

    pub fn rgba(data: Vec<u8>) -> Self {
        Self::new(data, ColorFormat::Rgba)
    }

    pub fn rgb(data: Vec<u8>) -> Self {
        Self::new(data, ColorFormat::Rgb)
    }

    /// 从 `image` 解码结果构造描述。
    ///
    /// 带透明通道的图片转为 RGBA，其余转为 RGB。
    ///
    /// # 示例
    /// ```rust
    /// use color_clustering::{ColorFormat, ImageDescriptor};
    /// use image::{DynamicImage, RgbImage};
    ///
    /// let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
    /// let descriptor = ImageDescriptor::from_dynamic_image(&img);
    /// assert_eq!(descriptor.format, ColorFormat::Rgb);
    /// assert_eq!(descriptor.data.len(), 12);
    /// ```
    pub fn from_dynamic_image(image: &DynamicImage) -> Self {
        if image.color().has_alpha() {
            Self::rgba(image.to_rgba8().into_raw())
        } else {
            Self::rgb(image.to_rgb8().into_raw())
        }
    }

    /// 按格式推算的完整像素数，末尾不足一个像素的字节不计入。
    pub fn pixel_count(&self) -> usize {
        self.data.len() / self.format.bytes_per_pixel()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 调用方可传入的图片形态。
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// 未声明格式的裸字节，按 RGBA 处理。
    Raw(Vec<u8>),
    /// 已构造好的描述。
    Descriptor(ImageDescriptor),
    /// 结构化值，需包含 `data`（0..=255 整数数组）与 `format`（`"rgb"` / `"rgba"`）。
    Structured(serde_json::Value),
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<&[u8]> for ImageInput {
    fn from(bytes: &[u8]) -> Self {
        Self::Raw(bytes.to_vec())
    }
}

impl From<ImageDescriptor> for ImageInput {
    fn from(descriptor: ImageDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl From<serde_json::Value> for ImageInput {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl From<RgbaImage> for ImageInput {
    fn from(image: RgbaImage) -> Self {
        Self::Descriptor(ImageDescriptor::rgba(image.into_raw()))
    }
}

impl From<RgbImage> for ImageInput {
    fn from(image: RgbImage) -> Self {
        Self::Descriptor(ImageDescriptor::rgb(image.into_raw()))
    }
}

/// 将任意图片输入归一化为 `ImageDescriptor`。
///
/// # 示例
/// ```rust
/// use color_clustering::{normalize, ColorFormat};
///
/// let descriptor = normalize(vec![10u8, 20, 30, 255])?;
/// assert_eq!(descriptor.format, ColorFormat::Rgba);
///
/// let structured = normalize(serde_json::json!({ "data": [1, 2, 3], "format": "rgb" }))?;
/// assert_eq!(structured.format, ColorFormat::Rgb);
/// # Ok::<(), color_clustering::ClusteringError>(())
/// ```
pub fn normalize(input: impl Into<ImageInput>) -> Result<ImageDescriptor, ClusteringError> {
    match input.into() {
        ImageInput::Raw(data) => Ok(ImageDescriptor::rgba(data)),
        ImageInput::Descriptor(descriptor) => Ok(descriptor),
        ImageInput::Structured(value) => from_structured(value),
    }
}

fn from_structured(value: serde_json::Value) -> Result<ImageDescriptor, ClusteringError> {
    let object = value.as_object().ok_or_else(|| {
        ClusteringError::Validation(format!("图片描述必须是对象，实际为：{}", json_kind(&value)))
    })?;

    if !object.contains_key("data") {
        return Err(ClusteringError::Validation("图片描述缺少 data 字段".to_string()));
    }
    if !object.contains_key("format") {
        return Err(ClusteringError::Validation("图片描述缺少 format 字段".to_string()));
    }

    serde_json::from_value::<ImageDescriptor>(value)
        .map_err(|e| ClusteringError::Validation(format!("图片描述不合法（format 可选：rgb / rgba）：{}", e)))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
