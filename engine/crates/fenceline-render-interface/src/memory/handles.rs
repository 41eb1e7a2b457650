use slotmap::new_key_type;

// 持久资源的句柄，按名字查找之后可以长期持有
new_key_type! { pub struct GfxBufferHandle; }
new_key_type! { pub struct GfxTextureHandle; }
