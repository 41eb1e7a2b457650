//! 共享的 upload arena
//!
//! 一个持久映射的 buffer，用 offset allocator 切分成不相交的区间。
//! 多个线程可以同时写各自的区间，只有分配器的元数据需要加锁。

use std::sync::Arc;

use fenceline_gfx::{
    GfxError, GfxResult,
    foundation::{
        backend::GfxBackend,
        handles::{MappedPtr, RawBuffer},
    },
    resources::buffer::{GfxBuffer, GfxBufferDesc},
};
use offset_allocator::{Allocation, Allocator};
use parking_lot::Mutex;

/// upload 内存背后的资源
pub(crate) enum UploadBacking {
    /// 共享 arena 中的一段
    Arena(Allocation),
    /// arena 无法满足时单独创建的 buffer
    Dedicated(GfxBuffer),
}

/// 一段 CPU 可写的 upload 内存
///
/// # Destroy
/// 不实现 Drop，需要交给 `GpuMemoryManager::release_upload` 或者 upload batch
pub struct UploadAllocation {
    buffer: RawBuffer,
    /// 已经偏移到 `offset` 处
    mapped: MappedPtr,
    offset: u64,
    size: u64,
    backing: UploadBacking,
}

// init
impl UploadAllocation {
    pub(crate) fn dedicated(backend: &dyn GfxBackend, size: u64) -> GfxResult<Self> {
        let buffer = GfxBuffer::new(backend, &GfxBufferDesc::upload(size, "dedicated-upload"))?;
        let Some(mapped) = buffer.mapped_ptr() else {
            buffer.destroy(backend);
            return Err(GfxError::Backend("dedicated upload buffer is not mapped".to_string()));
        };
        Ok(Self {
            buffer: buffer.raw(),
            mapped,
            offset: 0,
            size,
            backing: UploadBacking::Dedicated(buffer),
        })
    }

    #[inline]
    pub(crate) fn into_backing(self) -> UploadBacking {
        self.backing
    }
}
// getters
impl UploadAllocation {
    /// 背后的 buffer，多个 arena 分配共享同一个
    #[inline]
    pub fn buffer(&self) -> RawBuffer {
        self.buffer
    }

    /// 在 `buffer` 中的偏移
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn mapped_ptr(&self) -> MappedPtr {
        self.mapped
    }

    #[inline]
    pub fn is_dedicated(&self) -> bool {
        matches!(self.backing, UploadBacking::Dedicated(_))
    }
}
// tools
impl UploadAllocation {
    /// 写入 `[offset, offset + data.len())`，相对于这段分配的起点
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        assert!(
            offset + data.len() as u64 <= self.size,
            "upload write out of range: {}..{} > {}",
            offset,
            offset + data.len() as u64,
            self.size
        );
        // SAFETY: 区间已经检查过；offset allocator 保证不同分配之间不相交
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.as_ptr().add(offset as usize), data.len());
        }
    }
}

pub struct UploadArena {
    backend: Arc<dyn GfxBackend>,
    buffer: RawBuffer,
    mapped: MappedPtr,
    size: u32,
    allocator: Mutex<Allocator>,
}

// init & destroy
impl UploadArena {
    pub fn new(backend: Arc<dyn GfxBackend>, size: u32, max_allocations: u32) -> GfxResult<Self> {
        let buffer = GfxBuffer::new(&*backend, &GfxBufferDesc::upload(size as u64, "upload-arena"))?;
        let Some(mapped) = buffer.mapped_ptr() else {
            buffer.destroy(&*backend);
            return Err(GfxError::Backend("upload arena is not mapped".to_string()));
        };
        log::info!("create upload arena: {} bytes, {} allocations at most", size, max_allocations);

        Ok(Self {
            buffer: buffer.raw(),
            backend,
            mapped,
            size,
            allocator: Mutex::new(Allocator::with_max_allocs(size, max_allocations)),
        })
    }
}
impl Drop for UploadArena {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.buffer);
    }
}
// getters
impl UploadArena {
    #[inline]
    pub fn buffer(&self) -> RawBuffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// `(总的空闲字节数, 最大的连续空闲区间)`
    pub fn free_space(&self) -> (u64, u64) {
        let report = self.allocator.lock().storage_report();
        (report.total_free_space as u64, report.largest_free_region as u64)
    }
}
// allocate & free
impl UploadArena {
    /// arena 无法满足（太大或者碎片太多）时返回 None
    ///
    /// 对齐通过多分配 `alignment - 1` 字节实现
    pub fn try_allocate(&self, size: u64, alignment: u64) -> Option<UploadAllocation> {
        debug_assert!(alignment.is_power_of_two());
        let request = size + alignment - 1;
        if request > self.size as u64 {
            return None;
        }

        let allocation = self.allocator.lock().allocate(request as u32)?;
        let offset = (allocation.offset as u64 + alignment - 1) & !(alignment - 1);
        debug_assert!(offset + size <= allocation.offset as u64 + request);

        Some(UploadAllocation {
            buffer: self.buffer,
            // SAFETY: offset + size 不超过 arena 的大小
            mapped: unsafe { self.mapped.add(offset as usize) },
            offset,
            size,
            backing: UploadBacking::Arena(allocation),
        })
    }

    #[inline]
    pub(crate) fn free(&self, allocation: Allocation) {
        self.allocator.lock().free(allocation);
    }
}
