pub mod cloud;
pub mod memory_adapter;
pub mod resource_trait;
pub mod transfer;
