//! Crate `job-domain` — tipos y contratos para el seguimiento de jobs
//!
//! Define el registro de job (estado actual autoritativo), los registros del
//! historial de estados (append-only), el álgebra de consultas sobre los
//! campos del registro y los contratos de persistencia (`JobRecordStore`,
//! `JobLoggingStore`, `JobStore`). Incluye un store en memoria útil para
//! pruebas (`InMemoryJobStore`).
//!
//! Diseño resumido:
//! - Historial con "sin cambio" explícito (`StatusValue::Unchanged`) que se
//!   resuelve al leer contra el registro anterior.
//! - Campos de escritura única (`StartExecTime`, `EndExecTime`) que fallan con
//!   `JobError::Conflict` al segundo intento.
//! - Estado actual e historial se escriben en la misma transacción.
//!
//! Ejemplo rápido:
//! ```rust
//! use job_domain::{InMemoryJobStore, JobRecordStore, JobStore, NewJob};
//! let store = InMemoryJobStore::new();
//! let job = store.transaction(|tx| {
//!                  tx.create(&NewJob { description: "Executable = \"echo\";".into(),
//!                                      owner: "alice".into(),
//!                                      owner_group: "lhcb_user".into(),
//!                                      vo: "lhcb".into(),
//!                                      initial_status: "Received".into(),
//!                                      initial_minor_status: "Job accepted".into() })
//!                })
//!                .unwrap();
//! assert_eq!(job.job_id, 1);
//! ```
pub mod errors;
pub mod job;
pub mod logging;
pub mod query;
pub mod repository;
pub mod status;
pub mod stubs;

pub use errors::*;
pub use job::*;
pub use logging::{HistoryEntry, LoggingRecord, NewLoggingRecord};
pub use query::{CompiledSearch, GroupCount, Grouping, JobFilter, JobSort, Projection, SearchRequest, SearchRow,
                SearchSpec, SortSpec, SummaryRequest};
pub use repository::*;
pub use status::*;
pub use stubs::InMemoryJobStore;
