use fenceline_gfx::{
    foundation::{
        backend::GfxBackend,
        queue_kind::{GfxQueueKind, GfxQueueMask},
    },
    resources::{buffer::GfxBuffer, heap::GfxHeap, texture::GfxTexture},
};
use offset_allocator::Allocation;

/// 等待 GPU 用完之后才能释放的东西
pub(crate) enum PendingResource {
    /// arena 中的区间：只是 CPU 端的簿记，在 recycle 中立即释放
    ArenaRange(Allocation),
    /// 单独创建的 upload buffer：在 recycle 中同步销毁
    UploadBuffer(GfxBuffer),
    /// 其他原生资源交给后台线程销毁
    Buffer(GfxBuffer),
    Texture(GfxTexture),
    Heap(GfxHeap),
}

impl PendingResource {
    /// 销毁原生资源；arena 区间没有原生资源，由调用者处理
    pub(crate) fn destroy_native(self, backend: &dyn GfxBackend) -> Option<Allocation> {
        match self {
            PendingResource::ArenaRange(allocation) => return Some(allocation),
            PendingResource::UploadBuffer(buffer) | PendingResource::Buffer(buffer) => buffer.destroy(backend),
            PendingResource::Texture(texture) => texture.destroy(backend),
            PendingResource::Heap(heap) => heap.destroy(backend),
        }
        None
    }
}

pub(crate) struct PendingRelease {
    /// 释放时 manager 的追踪计数器
    pub fence_value: u64,
    /// 可能还在读取这个资源的 queue
    pub queues: GfxQueueMask,
    pub resource: PendingResource,
}

impl PendingRelease {
    /// `completed` 按照 [`GfxQueueKind::index`] 排列；没有被追踪的 queue 为 `u64::MAX`
    #[inline]
    pub fn is_complete(&self, completed: &[u64; 2]) -> bool {
        GfxQueueKind::ALL
            .iter()
            .filter(|kind| self.queues.contains_queue(**kind))
            .all(|kind| completed[kind.index()] >= self.fence_value)
    }
}
