pub mod in_memory;
pub mod notification_queue;
pub mod plugins;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
