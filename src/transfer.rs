//! # 跨边界缓冲区传输（TransferSession）
//!
//! ## 设计思路
//!
//! 宿主与引擎之间的每一次操作都遵循同一纪律：
//! 1. 校验输入（此时零分配）
//! 2. 分配并写入所有输入缓冲区
//! 3. 调用唯一一个引擎操作
//! 4. 在结果指针仍然有效时解码
//! 5. 无条件释放所有已获取的指针
//!
//! 手写的分配/释放配对在提前返回或出错时极易泄漏，
//! 因此 `TransferSession` 采用 RAII：登记会话内获取的每个指针，
//! 正常路径由 `close` 显式释放，任何错误路径由 `Drop` 兜底释放。
//!
//! ## 实现思路
//!
//! - 指针在写入之前就登记，写入失败同样会被释放。
//! - `close` 会清空登记表，`Drop` 不会重复释放，保证每个指针恰好释放一次。
//! - 解码先校验 `ptr + 4 + len` 不超出线性内存，再按长度头精确拷贝到本地 `Vec`。

use crate::codec::{LENGTH_HEADER_SIZE, payload_span};
use crate::engine::{Engine, EngineCall, ForeignSlice};
use crate::error::ClusteringError;

/// 单次操作的资源作用域。
///
/// # 示例
/// ```rust,ignore
/// let mut session = TransferSession::new(&mut *engine);
/// let image = session.stage(&pixels)?;
/// let result = session.invoke(EngineCall::GetClustering { image, format })?;
/// let payload = session.decode(result)?;
/// session.close()?;
/// ```
pub struct TransferSession<'e> {
    engine: &'e mut dyn Engine,
    held: Vec<u32>,
}

impl<'e> TransferSession<'e> {
    pub fn new(engine: &'e mut dyn Engine) -> Self {
        Self {
            engine,
            held: Vec::new(),
        }
    }

    /// 当前仍由会话持有、尚未释放的指针数量。
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// 申请 `len` 字节引擎内存。
    ///
    /// 零长度请求按 1 字节申请，保证空指针只表示分配失败。
    pub fn allocate(&mut self, len: usize) -> Result<u32, ClusteringError> {
        let size = u32::try_from(len.max(1))
            .map_err(|_| ClusteringError::Allocation(format!("申请 {} 字节超出 32 位引擎上限", len)))?;

        let ptr = self.engine.allocate(size)?;
        if ptr == 0 {
            return Err(ClusteringError::Allocation(format!("引擎无法分配 {} 字节", size)));
        }

        self.held.push(ptr);
        log::trace!("分配引擎内存 ptr={} size={}", ptr, size);
        Ok(ptr)
    }

    /// 分配并写入一段输入字节。
    pub fn stage(&mut self, bytes: &[u8]) -> Result<ForeignSlice, ClusteringError> {
        let ptr = self.allocate(bytes.len())?;
        self.engine.write(ptr, bytes)?;

        // allocate 已保证长度可放入 u32
        Ok(ForeignSlice {
            ptr,
            len: bytes.len() as u32,
        })
    }

    /// 调用引擎操作，结果指针由会话接管。
    pub fn invoke(&mut self, call: EngineCall) -> Result<u32, ClusteringError> {
        let name = call.export_name();
        let ptr = self.engine.invoke(call)?;
        if ptr == 0 {
            return Err(ClusteringError::EngineInvocation(format!("{} 返回空结果指针", name)));
        }

        self.held.push(ptr);
        Ok(ptr)
    }

    /// 解码结果指针处的 EncodedBuffer，返回与引擎内存无关的本地副本。
    pub fn decode(&self, ptr: u32) -> Result<Vec<u8>, ClusteringError> {
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        self.engine.read(ptr, &mut header)?;
        let span = payload_span(ptr, header, self.engine.memory_size())?;

        let mut payload = vec![0u8; span.len()];
        // payload_span 已保证 span.start 不超过线性内存
        self.engine.read(span.start as u32, &mut payload)?;
        Ok(payload)
    }

    /// 释放会话持有的全部指针。
    ///
    /// 每个指针都会尝试释放，返回遇到的第一个释放错误。
    pub fn close(mut self) -> Result<(), ClusteringError> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<(), ClusteringError> {
        let mut first_error = None;
        while let Some(ptr) = self.held.pop() {
            if let Err(e) = self.engine.free(ptr) {
                log::warn!("释放引擎内存失败 ptr={}：{}", ptr, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TransferSession<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }

        log::debug!("操作提前结束，释放 {} 个引擎指针", self.held.len());
        // 错误路径上原始错误优先，释放失败只记录日志
        let _ = self.release_all();
    }
}
