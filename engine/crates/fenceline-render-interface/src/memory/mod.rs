pub mod gpu_memory_manager;
pub mod handles;
pub mod pending_release;
pub mod upload_arena;
pub mod upload_batch;
