//! GPU 资源生命周期的边界层
//!
//! 以 [`fenceline_gfx::commands::execution_queue::GfxExecutionQueue`] 的 fence 作为时钟：
//! - [`descriptor`]：分段空闲链表的 descriptor 分配器，释放的 slot 等待 fence 之后才复用
//! - [`memory`]：共享的 upload arena、每个 worker 的 upload batch、GPU 资源的延迟销毁
//! - [`gpu_context`]：持有上面所有组件的显式上下文，对外提供 `begin_frame` / `recycle`

pub mod config;
pub mod descriptor;
pub mod frame_counter;
pub mod gpu_context;
pub mod memory;
pub mod task_scheduler;
