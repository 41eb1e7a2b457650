use crate::{
    GfxResult,
    foundation::{backend::GfxBackend, handles::RawHeap},
    resources::GfxMemoryLocation,
};

#[derive(Clone, Debug)]
pub struct GfxHeapDesc {
    pub size: u64,
    pub memory: GfxMemoryLocation,
    pub debug_name: String,
}

/// 一块不透明的显存，用于 placed resource
///
/// # Destroy
/// 不实现 Drop，需要走延迟释放
#[derive(Debug)]
pub struct GfxHeap {
    raw: RawHeap,
    size: u64,
}

impl GfxHeap {
    pub fn new(backend: &dyn GfxBackend, desc: &GfxHeapDesc) -> GfxResult<Self> {
        let raw = backend.create_heap(desc)?;
        Ok(Self { raw, size: desc.size })
    }

    #[inline]
    pub fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_heap(self.raw);
    }

    #[inline]
    pub fn raw(&self) -> RawHeap {
        self.raw
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
}
