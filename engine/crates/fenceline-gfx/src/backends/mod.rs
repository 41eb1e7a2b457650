pub mod null;
#[cfg(feature = "vulkan")]
pub mod vulkan;
