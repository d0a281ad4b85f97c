//! Tessera Database Layer
//!
//! Repositories for bulletins, media, sources and import journals. Each
//! repository is a trait with a Postgres implementation and an in-memory
//! implementation ([`memory::MemoryDatabase`]) used by tests.

pub mod db;
pub mod memory;
pub mod repository;

pub use db::transaction::TransactionGuard;
pub use db::{
    check_connection, PgBulletinRepository, PgImportRepository, PgMediaRepository,
    PgSourceRepository,
};
pub use memory::MemoryDatabase;
pub use repository::{
    BulletinRepository, ImportRepository, MediaRepository, Repositories, SourceRepository,
};
