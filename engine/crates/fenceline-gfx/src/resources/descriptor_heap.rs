use crate::foundation::handles::RawDescriptorHeap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorKind {
    SampledImage,
    StorageImage,
    StorageBuffer,
    Sampler,
}

#[derive(Clone, Debug)]
pub struct GfxDescriptorHeapDesc {
    pub kind: GfxDescriptorKind,
    pub capacity: u32,
    /// shader visible 的 heap 在回收时需要等待 GPU；CPU-only 的 heap 不需要
    pub shader_visible: bool,
    pub debug_name: String,
}

/// 后端创建 descriptor heap 的结果
///
/// slot `i` 的 CPU 地址为 `cpu_base + i * increment`，GPU 地址同理。
/// 对于以数组下标寻址的后端（Vulkan bindless），base 为 0，increment 为 1。
#[derive(Copy, Clone, Debug)]
pub struct GfxDescriptorHeapInfo {
    pub raw: RawDescriptorHeap,
    pub cpu_base: u64,
    /// 只有 shader visible 的 heap 才有 GPU 地址
    pub gpu_base: Option<u64>,
    pub increment: u32,
}
