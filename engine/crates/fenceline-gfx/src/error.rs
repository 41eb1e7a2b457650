use thiserror::Error;

/// 原生 API 调用失败
///
/// 这一层不做任何重试：所有错误都直接向上传递，由调用者决定是否终止进程。
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("device lost")]
    DeviceLost,

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[cfg(feature = "vulkan")]
    #[error("vulkan error: {0}")]
    Vulkan(ash::vk::Result),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for GfxError {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GfxError::OutOfDeviceMemory,
            ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => GfxError::OutOfHostMemory,
            other => GfxError::Vulkan(other),
        }
    }
}
