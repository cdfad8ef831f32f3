//! SQLite persistence for the cairn sync core.
//!
//! Every mutation runs on the single writer thread behind [`db::WriteHandle`]
//! inside an immediate transaction. Pending-record reads go through the same
//! thread; the r2d2 pool backs it and serves ad hoc reads.

pub mod cache;
pub mod db;
pub mod errors;
pub mod pending;
pub mod schema;

pub use cache::CacheRepository;
pub use db::{create_pool, get_connection, init, open, run_migrations, DbPool, WriteHandle};
pub use errors::StorageError;
pub use pending::PendingRecordRepository;
