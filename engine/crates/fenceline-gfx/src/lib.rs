//! GPU 抽象层
//!
//! 以 "execution queue + fence + 不透明的 GPU 资源句柄" 的模型描述 GPU，
//! 具体的图形 API 由 [`foundation::backend::GfxBackend`] 的实现提供：
//! - [`backends::null::NullBackend`]：纯软件实现，用于测试和 headless 工具
//! - `backends::vulkan::VulkanBackend`：基于 ash + vk-mem（feature `vulkan`）
//!
//! 在此之上提供 [`commands::execution_queue::GfxExecutionQueue`]，它是整个资源生命周期系统的时钟：
//! 其他模块的回收决策都是 "这个 queue 的 fence 是否已经到达 V"。

pub mod backends;
pub mod commands;
pub mod error;
pub mod foundation;
pub mod resources;

pub use error::{GfxError, GfxResult};
