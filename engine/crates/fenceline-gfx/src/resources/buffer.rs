use bitflags::bitflags;

use crate::{
    GfxResult,
    foundation::{
        backend::GfxBackend,
        handles::{MappedPtr, RawBuffer},
    },
    resources::GfxMemoryLocation,
};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GfxBufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const VERTEX = 1 << 4;
        const INDEX = 1 << 5;
    }
}

#[derive(Clone, Debug)]
pub struct GfxBufferDesc {
    pub size: u64,
    pub usage: GfxBufferUsage,
    pub memory: GfxMemoryLocation,
    pub debug_name: String,
}

impl GfxBufferDesc {
    /// upload 用的 buffer：CPU 写入，作为 copy 的源
    #[inline]
    pub fn upload(size: u64, debug_name: impl Into<String>) -> Self {
        Self {
            size,
            usage: GfxBufferUsage::TRANSFER_SRC,
            memory: GfxMemoryLocation::CpuToGpu,
            debug_name: debug_name.into(),
        }
    }

    #[inline]
    pub fn device_local(size: u64, usage: GfxBufferUsage, debug_name: impl Into<String>) -> Self {
        Self {
            size,
            usage: usage | GfxBufferUsage::TRANSFER_DST,
            memory: GfxMemoryLocation::GpuOnly,
            debug_name: debug_name.into(),
        }
    }
}

/// 后端创建 buffer 的结果
#[derive(Copy, Clone, Debug)]
pub struct GfxBufferAllocation {
    pub raw: RawBuffer,
    /// 只有 host visible 的 buffer 才会被映射
    pub mapped: Option<MappedPtr>,
}

/// 一个原生 buffer
///
/// # Destroy
/// 不实现 Drop：GPU 可能还在使用，需要交给 `GpuMemoryManager` 做延迟释放，
/// 或者在确认 GPU 空闲后调用 [`GfxBuffer::destroy`]。
#[derive(Debug)]
pub struct GfxBuffer {
    raw: RawBuffer,
    size: u64,
    mapped: Option<MappedPtr>,
    debug_name: String,
}
// init & destroy
impl GfxBuffer {
    pub fn new(backend: &dyn GfxBackend, desc: &GfxBufferDesc) -> GfxResult<Self> {
        let allocation = backend.create_buffer(desc)?;
        debug_assert!(
            !desc.memory.is_host_visible() || allocation.mapped.is_some(),
            "host visible buffer {} is not mapped",
            desc.debug_name
        );
        Ok(Self {
            raw: allocation.raw,
            size: desc.size,
            mapped: allocation.mapped,
            debug_name: desc.debug_name.clone(),
        })
    }

    /// 立即销毁
    ///
    /// 调用者需要确保 GPU 不再使用这个 buffer
    #[inline]
    pub fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_buffer(self.raw);
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.mapped
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
