//! 测试用内存内引擎。
//!
//! 在普通 `Vec<u8>` 上模拟线性内存与分配器，记录每次分配/释放，
//! 并可注入分配失败、调用失败与损坏的长度头。操作语义是一个朴素的
//! 参考实现：聚类结果为“最终颜色 + 每次合并 9 字节”，调色板从合并记录回放。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Engine, EngineCall, ForeignSlice};
use crate::codec::encode_length_prefixed;
use crate::error::ClusteringError;

const MEMORY_SIZE: usize = 1 << 20;
const HEAP_START: u32 = 64;

/// 调用统计，测试方持有同一个 `Arc` 观察引擎内部计数。
#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    pub(crate) allocations: AtomicUsize,
    pub(crate) frees: AtomicUsize,
    pub(crate) invocations: AtomicUsize,
    pub(crate) live: AtomicUsize,
    pub(crate) invalid_frees: AtomicUsize,
}

impl FakeStats {
    pub(crate) fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub(crate) fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn invalid_frees(&self) -> usize {
        self.invalid_frees.load(Ordering::SeqCst)
    }
}

/// 故障注入开关。
#[derive(Debug, Clone, Default)]
pub(crate) struct Faults {
    /// 第 n 次（从 1 开始）分配返回空指针。
    pub(crate) fail_allocation_at: Option<usize>,
    /// 调用直接报错。
    pub(crate) fail_invoke: bool,
    /// 调用返回空指针。
    pub(crate) null_result: bool,
    /// 结果长度头声明超出线性内存的长度。
    pub(crate) corrupt_header: bool,
}

pub(crate) struct FakeEngine {
    memory: Vec<u8>,
    next: u32,
    blocks: HashMap<u32, u32>,
    stats: Arc<FakeStats>,
    faults: Faults,
}

impl FakeEngine {
    pub(crate) fn new() -> (Self, Arc<FakeStats>) {
        Self::with_faults(Faults::default())
    }

    pub(crate) fn with_faults(faults: Faults) -> (Self, Arc<FakeStats>) {
        let stats = Arc::new(FakeStats::default());
        let engine = Self {
            memory: vec![0; MEMORY_SIZE],
            next: HEAP_START,
            blocks: HashMap::new(),
            stats: Arc::clone(&stats),
            faults,
        };
        (engine, stats)
    }

    fn slice(&self, slice: ForeignSlice) -> Vec<u8> {
        let start = slice.ptr as usize;
        self.memory[start..start + slice.len as usize].to_vec()
    }

    fn emit(&mut self, payload: &[u8]) -> Result<u32, ClusteringError> {
        let encoded = encode_length_prefixed(payload)?;
        let ptr = self.allocate(encoded.len() as u32)?;
        if ptr == 0 {
            return Ok(0);
        }
        self.write(ptr, &encoded)?;
        if self.faults.corrupt_header {
            let bogus = (MEMORY_SIZE as u32).to_le_bytes();
            self.write(ptr, &bogus)?;
        }
        Ok(ptr)
    }
}

impl Engine for FakeEngine {
    fn allocate(&mut self, size: u32) -> Result<u32, ClusteringError> {
        let attempt = self.stats.allocations.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.fail_allocation_at == Some(attempt) {
            self.stats.allocations.fetch_sub(1, Ordering::SeqCst);
            return Ok(0);
        }

        let size = size.max(1);
        let end = self.next as usize + size as usize;
        if end > MEMORY_SIZE {
            self.stats.allocations.fetch_sub(1, Ordering::SeqCst);
            return Ok(0);
        }

        let ptr = self.next;
        self.next = (end as u32 + 7) & !7;
        self.blocks.insert(ptr, size);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> Result<(), ClusteringError> {
        if self.blocks.remove(&ptr).is_none() {
            self.stats.invalid_frees.fetch_add(1, Ordering::SeqCst);
            return Err(ClusteringError::EngineInvocation(format!("重复或非法释放：{}", ptr)));
        }
        self.stats.frees.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), ClusteringError> {
        let start = ptr as usize;
        let target = self
            .memory
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| ClusteringError::EngineInvocation("写入越界".to_string()))?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, ptr: u32, buffer: &mut [u8]) -> Result<(), ClusteringError> {
        let start = ptr as usize;
        let source = self
            .memory
            .get(start..start + buffer.len())
            .ok_or_else(|| ClusteringError::EngineInvocation("读取越界".to_string()))?;
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn memory_size(&self) -> usize {
        self.memory.len()
    }

    fn invoke(&mut self, call: EngineCall) -> Result<u32, ClusteringError> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_invoke {
            return Err(ClusteringError::EngineInvocation(format!("{}: unreachable", call.export_name())));
        }
        if self.faults.null_result {
            return Ok(0);
        }

        let payload = match call {
            EngineCall::GetClustering { image, format } => cluster(&self.slice(image), stride(format.as_i32())),
            EngineCall::GetPalette { image, format, k } => {
                palette(&cluster(&self.slice(image), stride(format.as_i32())), k)
            }
            EngineCall::GetPaletteFromClustering { clustering, k } => palette(&self.slice(clustering), k),
            EngineCall::Quantize { image, format, k } => {
                let pixels = self.slice(image);
                let colors = palette(&cluster(&pixels, stride(format.as_i32())), k);
                recolor(&pixels, stride(format.as_i32()), &colors)?
            }
            EngineCall::QuantizeWithClustering {
                image,
                format,
                clustering,
                k,
            } => {
                let colors = palette(&self.slice(clustering), k);
                recolor(&self.slice(image), stride(format.as_i32()), &colors)?
            }
            EngineCall::QuantizeWithPalette { image, format, palette } => {
                recolor(&self.slice(image), stride(format.as_i32()), &self.slice(palette))?
            }
        };

        self.emit(&payload)
    }
}

fn stride(format: i32) -> usize {
    if format == 1 { 3 } else { 4 }
}

fn distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x.abs_diff(y) as u32;
            d * d
        })
        .sum()
}

fn cluster(pixels: &[u8], stride: usize) -> Vec<u8> {
    let mut histogram: Vec<([u8; 3], u32)> = Vec::new();
    for px in pixels.chunks_exact(stride) {
        let color = [px[0], px[1], px[2]];
        match histogram.iter_mut().find(|(c, _)| *c == color) {
            Some(entry) => entry.1 += 1,
            None => histogram.push((color, 1)),
        }
    }
    if histogram.is_empty() {
        return Vec::new();
    }

    let merges = histogram.len() - 1;
    let mut out = vec![0u8; 3 + 9 * merges];
    for i in (0..merges).rev() {
        let mut best = (0, 1, u32::MAX);
        for a in 0..histogram.len() {
            for b in a + 1..histogram.len() {
                let d = distance(histogram[a].0, histogram[b].0);
                if d < best.2 {
                    best = (a, b, d);
                }
            }
        }

        let (b_color, b_count) = histogram.remove(best.1);
        let (a_color, a_count) = histogram.remove(best.0);
        let total = a_count + b_count;
        let merged = [0usize, 1, 2].map(|c| ((a_color[c] as u32 * a_count + b_color[c] as u32 * b_count) / total) as u8);
        histogram.push((merged, total));

        let offset = 3 + 9 * i;
        out[offset..offset + 3].copy_from_slice(&merged);
        out[offset + 3..offset + 6].copy_from_slice(&a_color);
        out[offset + 6..offset + 9].copy_from_slice(&b_color);
    }

    out[..3].copy_from_slice(&histogram[0].0);
    out
}

fn palette(clustering: &[u8], k: i32) -> Vec<u8> {
    if clustering.len() < 3 || k < 1 {
        return Vec::new();
    }

    let merges = (clustering.len() - 3) / 9;
    let steps = (k as usize - 1).min(merges);
    let mut colors: Vec<[u8; 3]> = vec![[clustering[0], clustering[1], clustering[2]]];

    for i in 0..steps {
        let base = 3 + 9 * i;
        let record = &clustering[base..base + 9];
        colors.retain(|c| c[..] != record[0..3]);
        for part in [&record[3..6], &record[6..9]] {
            let color = [part[0], part[1], part[2]];
            if !colors.contains(&color) {
                colors.push(color);
            }
        }
    }

    colors.concat()
}

fn recolor(pixels: &[u8], stride: usize, palette: &[u8]) -> Result<Vec<u8>, ClusteringError> {
    let colors: Vec<[u8; 3]> = palette.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    if colors.is_empty() {
        return Err(ClusteringError::EngineInvocation("调色板为空".to_string()));
    }

    let mut out = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(stride) {
        let color = [px[0], px[1], px[2]];
        let nearest = colors
            .iter()
            .min_by_key(|candidate| distance(**candidate, color))
            .copied()
            .unwrap_or(color);
        out.extend_from_slice(&nearest);
        if stride == 4 {
            out.push(px[3]);
        }
    }
    Ok(out)
}
