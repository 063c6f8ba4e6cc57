mod memory;
mod rocksdb;

pub use memory::InMemoryCounterStore;
pub use rocksdb::RocksDbCounterStore;
