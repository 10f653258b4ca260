//! Relational store for the Tessera result ledger.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! `open_ledger` for migrate-on-open, and the embedded SQL migrations that create the `results`, `tags` and
//! `tagged_results` tables.
//!
//! Uniqueness of `(object_id, client_id)`, `(tag_name, project_id)` and
//! `(tag_id, result_id)` is declared in the schema. The ledger relies on
//! those constraints to arbitrate between concurrent writers, so they must
//! never be dropped by a later migration.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, open_ledger, DbPool, DbRuntimeSettings, PoolError};
