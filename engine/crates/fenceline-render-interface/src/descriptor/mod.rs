pub mod descriptor_allocator;
pub mod descriptor_table;
pub mod free_list;
