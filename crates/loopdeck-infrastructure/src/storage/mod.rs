pub mod atomic_json;
pub mod key_store;

pub use atomic_json::AtomicJsonFile;
pub use key_store::{FileKeyStore, KeyValueStore, MemoryKeyStore};
