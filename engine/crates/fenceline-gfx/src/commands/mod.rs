pub mod command_allocator;
pub mod command_context;
pub mod execution_queue;
pub mod fence;
