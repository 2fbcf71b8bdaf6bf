//! ScanLink Store
//!
//! The append-only record store contract and its implementations.
//! Nothing here carries business rules: the trait exists so the rest of the
//! system never cares which persistence technology sits behind it.

mod error;
mod memory;
mod pool;
mod postgres;
mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryScanStore;
pub use pool::{PgPool, PoolConfig};
pub use postgres::PgScanStore;
pub use store::{ScanStore, DEFAULT_AFTER_LIMIT};
