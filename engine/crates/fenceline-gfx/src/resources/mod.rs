pub mod buffer;
pub mod descriptor_heap;
pub mod heap;
pub mod texture;

/// 资源所在的内存位置
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxMemoryLocation {
    /// 只有 GPU 能访问
    GpuOnly,
    /// CPU 写、GPU 读，持久映射（upload）
    CpuToGpu,
    /// GPU 写、CPU 读，持久映射（readback）
    GpuToCpu,
}

impl GfxMemoryLocation {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, GfxMemoryLocation::GpuOnly)
    }
}
