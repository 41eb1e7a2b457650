use bitflags::bitflags;

use crate::{
    GfxResult,
    foundation::{backend::GfxBackend, handles::RawTexture},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    D32Float,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GfxTextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxTextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: GfxFormat,
    pub usage: GfxTextureUsage,
    pub debug_name: String,
}

impl GfxTextureDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: GfxFormat, usage: GfxTextureUsage, name: impl Into<String>) -> Self {
        Self {
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format,
            usage,
            debug_name: name.into(),
        }
    }
}

/// # Destroy
/// 和 [`crate::resources::buffer::GfxBuffer`] 一样，不实现 Drop
#[derive(Debug)]
pub struct GfxTexture {
    raw: RawTexture,
    desc: GfxTextureDesc,
}
// init & destroy
impl GfxTexture {
    pub fn new(backend: &dyn GfxBackend, desc: &GfxTextureDesc) -> GfxResult<Self> {
        let raw = backend.create_texture(desc)?;
        Ok(Self { raw, desc: desc.clone() })
    }

    #[inline]
    pub fn destroy(self, backend: &dyn GfxBackend) {
        backend.destroy_texture(self.raw);
    }
}
// getters
impl GfxTexture {
    #[inline]
    pub fn raw(&self) -> RawTexture {
        self.raw
    }

    #[inline]
    pub fn desc(&self) -> &GfxTextureDesc {
        &self.desc
    }
}
