use std::ptr::NonNull;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn as_raw(self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }
    };
}

raw_handle!(
    /// 单调递增的 64 位计数器（timeline semaphore / ID3D12Fence）
    RawFence
);
raw_handle!(
    /// command list 背后的内存池（vk::CommandPool / ID3D12CommandAllocator）
    RawCommandAllocator
);
raw_handle!(
    /// 可以反复录制的命令对象
    RawCommandList
);
raw_handle!(RawBuffer);
raw_handle!(RawTexture);
raw_handle!(
    /// 不透明的显存块，用于 placed resource
    RawHeap
);
raw_handle!(RawDescriptorHeap);

/// 持久映射的 host 指针
///
/// 多个线程会通过 *不相交* 的区间同时写入同一块映射内存，
/// 区间的不相交由分配器保证，这里本身不做任何同步。
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// SAFETY: 只是一个地址，写入区间由分配器保证不相交
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    #[inline]
    pub fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// # Safety
    /// `offset` 必须位于同一块映射内存之内
    #[inline]
    pub unsafe fn add(self, offset: usize) -> Self {
        unsafe { Self(self.0.add(offset)) }
    }
}
