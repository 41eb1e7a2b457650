use std::sync::Arc;

use crate::{
    GfxResult,
    foundation::{backend::GfxBackend, handles::RawFence},
};

/// 单调递增的 64 位计数器
///
/// # Destroy
/// 实现了 Drop，持有 backend 的引用计数
pub struct GfxFence {
    backend: Arc<dyn GfxBackend>,
    raw: RawFence,
    debug_name: String,
}

// 创建与销毁
impl GfxFence {
    pub fn new(backend: Arc<dyn GfxBackend>, initial_value: u64, debug_name: impl Into<String>) -> GfxResult<Self> {
        let debug_name = debug_name.into();
        let raw = backend.create_fence(initial_value, &debug_name)?;
        Ok(Self {
            backend,
            raw,
            debug_name,
        })
    }
}
impl Drop for GfxFence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.raw);
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn raw(&self) -> RawFence {
        self.raw
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

// tools
impl GfxFence {
    /// 向驱动查询 GPU 已经完成的值
    #[inline]
    pub fn completed_value(&self) -> GfxResult<u64> {
        self.backend.fence_completed_value(self.raw)
    }

    /// 阻塞等待 fence 到达 value，没有超时
    #[inline]
    pub fn wait(&self, value: u64) -> GfxResult<()> {
        self.backend.wait_fence(self.raw, value)
    }
}
