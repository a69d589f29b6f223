pub mod duckdb;
pub mod memory;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use memory::MemoryStorage;
pub use traits::{ClaimOutcome, Storage, StorageError};
