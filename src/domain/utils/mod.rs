pub mod id;
pub mod records;
