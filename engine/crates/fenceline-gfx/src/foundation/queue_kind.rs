use bitflags::bitflags;

/// 硬件队列的种类
///
/// 至少有一个 graphics（direct）队列；compute 队列是可选的。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxQueueKind {
    Graphics,
    Compute,
}

impl GfxQueueKind {
    pub const ALL: [GfxQueueKind; 2] = [GfxQueueKind::Graphics, GfxQueueKind::Compute];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            GfxQueueKind::Graphics => 0,
            GfxQueueKind::Compute => 1,
        }
    }

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            GfxQueueKind::Graphics => "graphics",
            GfxQueueKind::Compute => "compute",
        }
    }

    #[inline]
    pub const fn mask(self) -> GfxQueueMask {
        match self {
            GfxQueueKind::Graphics => GfxQueueMask::GRAPHICS,
            GfxQueueKind::Compute => GfxQueueMask::COMPUTE,
        }
    }
}

impl std::fmt::Display for GfxQueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// 哪些队列上的 GPU 工作可能还在读取某个资源
    ///
    /// 延迟释放时只需要等待 mask 中包含的队列的 fence。
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct GfxQueueMask: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
    }
}

impl GfxQueueMask {
    #[inline]
    pub fn contains_queue(self, kind: GfxQueueKind) -> bool {
        self.contains(kind.mask())
    }
}

impl From<GfxQueueKind> for GfxQueueMask {
    fn from(kind: GfxQueueKind) -> Self {
        kind.mask()
    }
}
