pub mod backend;
pub mod handles;
pub mod queue_kind;
