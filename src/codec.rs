//! 长度前缀编码（EncodedBuffer）
//!
//! 引擎所有变长返回值的统一线格式：4 字节小端无符号长度头，紧跟同等长度的负载。
//! 解码时先由 `payload_span` 校验范围，再读取负载。

use std::ops::Range;

use crate::error::ClusteringError;

/// 长度头字节数。
pub const LENGTH_HEADER_SIZE: usize = 4;

/// 解析 4 字节小端长度头。
pub fn read_length_header(header: [u8; LENGTH_HEADER_SIZE]) -> u32 {
    u32::from_le_bytes(header)
}

/// 按 EncodedBuffer 格式编码负载。
///
/// 负载超过 `u32::MAX` 字节时无法表示，返回校验错误。
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Vec<u8>, ClusteringError> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        ClusteringError::Validation(format!("负载过大：{} 字节无法写入 4 字节长度头", payload.len()))
    })?;

    let mut encoded = Vec::with_capacity(LENGTH_HEADER_SIZE + payload.len());
    encoded.extend_from_slice(&len.to_le_bytes());
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

/// 计算负载在线性内存中的字节范围。
///
/// `ptr` 为结果缓冲区起点，`limit` 为线性内存总字节数。
/// 长度头声明的负载超出 `limit` 时报错，调用方据此决定是否读取负载。
pub fn payload_span(ptr: u32, header: [u8; LENGTH_HEADER_SIZE], limit: usize) -> Result<Range<usize>, ClusteringError> {
    let len = read_length_header(header) as usize;
    let start = (ptr as usize)
        .checked_add(LENGTH_HEADER_SIZE)
        .ok_or_else(|| ClusteringError::EngineInvocation(format!("结果指针 {} 溢出", ptr)))?;
    let end = start
        .checked_add(len)
        .ok_or_else(|| ClusteringError::EngineInvocation("结果长度头溢出".to_string()))?;

    if end > limit {
        return Err(ClusteringError::EngineInvocation(format!(
            "结果长度头越界：ptr={} len={} 线性内存={} 字节",
            ptr, len, limit
        )));
    }

    Ok(start..end)
}
