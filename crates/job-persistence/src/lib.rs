//! Persistencia Diesel para los traits de `job-domain`.
//! Expone el módulo `schema` y reexporta el store que implementa `JobStore`
//! sobre SQLite (por defecto) o Postgres (feature `pg`). La implementación
//! detallada está en `job_persistence.rs`.

mod job_persistence;
pub mod schema;

#[cfg(not(feature = "pg"))]
pub use job_persistence::new_sqlite_for_test;
pub use job_persistence::{new_from_env, DieselJobStore, MIGRATIONS};
