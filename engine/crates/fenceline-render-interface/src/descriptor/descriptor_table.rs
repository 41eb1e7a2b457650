use std::sync::Arc;

use crate::descriptor::{descriptor_allocator::DescriptorHeapShared, free_list::INVALID_NODE};

/// 一段连续的 descriptor slot
///
/// 唯一的所有者；drop 时 slot 进入待回收状态，等 fence 完成之后才会被再次分配。
/// [`DescriptorTable::take`] 之后原来的 table 变为空（count = 0）。
pub struct DescriptorTable {
    heap: Option<Arc<DescriptorHeapShared>>,

    offset: u32,
    /// 请求的数量
    count: u32,
    /// 实际占用的数量：向上取整到 2 的幂，从更大的 class 借用时会更大
    granted: u32,
    /// 分配时弹出的空闲链表节点，回收时复用
    node: u32,

    cpu_base_handle: u64,
    gpu_base_handle: Option<u64>,
    increment: u32,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self {
            heap: None,
            offset: 0,
            count: 0,
            granted: 0,
            node: INVALID_NODE,
            cpu_base_handle: 0,
            gpu_base_handle: None,
            increment: 0,
        }
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        if let Some(heap) = self.heap.take() {
            heap.release_table(self.cpu_base_handle, self.granted, self.node);
        }
    }
}

impl std::fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("granted", &self.granted)
            .finish()
    }
}

// init
impl DescriptorTable {
    pub(crate) fn new(heap: Arc<DescriptorHeapShared>, offset: u32, count: u32, granted: u32, node: u32) -> Self {
        let info = *heap.heap_info();
        let increment = info.increment;
        Self {
            cpu_base_handle: info.cpu_base + offset as u64 * increment as u64,
            gpu_base_handle: info.gpu_base.map(|base| base + offset as u64 * increment as u64),
            increment,
            heap: Some(heap),
            offset,
            count,
            granted,
            node,
        }
    }

    /// 转移所有权，自身变为空 table
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    #[inline]
    pub(crate) fn heap(&self) -> Option<&Arc<DescriptorHeapShared>> {
        self.heap.as_ref()
    }
}
// getters
impl DescriptorTable {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 第一个 slot 在 heap 中的下标
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn granted_count(&self) -> u32 {
        self.granted
    }

    /// 第 `index` 个 slot 的 CPU 地址
    #[inline]
    pub fn cpu_handle(&self, index: u32) -> u64 {
        assert!(index < self.count, "descriptor index {} out of table of {}", index, self.count);
        self.cpu_base_handle + index as u64 * self.increment as u64
    }

    /// 第 `index` 个 slot 的 GPU 地址，只有 shader visible 的 heap 才有
    #[inline]
    pub fn gpu_handle(&self, index: u32) -> Option<u64> {
        assert!(index < self.count, "descriptor index {} out of table of {}", index, self.count);
        self.gpu_base_handle.map(|base| base + index as u64 * self.increment as u64)
    }
}
