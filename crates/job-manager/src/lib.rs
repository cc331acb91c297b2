//! Crate `job-manager` — motor de transiciones y servicio de jobs
//!
//! Construye sobre los contratos de `job-domain`:
//! - `state_machine`: tabla de transiciones entre estados mayores
//!   (configurable vía JSON).
//! - `engine`: aplica actualizaciones de estado a un job dentro de una
//!   transacción (validación, descarte de reportes atrasados, tiempos de
//!   escritura única, heartbeat e historial).
//! - `policy` / `operation`: identidad del llamador, políticas de acceso
//!   intercambiables y el token `Authorized` que exige cada operación.
//! - `service`: `JobManager`, la superficie de operaciones para los
//!   llamadores.
//!
//! Ejemplo rápido:
//! ```rust
//! use job_domain::InMemoryJobStore;
//! use job_manager::{JobManager, ManagerConfig, UserInfo, NORMAL_USER};
//! use std::sync::Arc;
//!
//! let manager = JobManager::new(Arc::new(InMemoryJobStore::new()), ManagerConfig::default()).unwrap();
//! let alice = UserInfo::new("alice", "lhcb", "lhcb_user", [NORMAL_USER]);
//! let created = manager.submit_jobs(&alice, &["Executable = \"echo\";".to_string()]).unwrap();
//! let job = created[0].as_ref().unwrap();
//! assert_eq!(manager.get_job_status(&alice, job.job_id).unwrap().status, "Received");
//! ```
pub mod config;
pub mod engine;
pub mod operation;
pub mod policy;
pub mod service;
pub mod state_machine;

pub use config::{ManagerConfig, DEFAULT_POLICY};
pub use engine::{StatusChange, StatusEngine, StatusUpdateOutcome, TimedStatusChange, EXECUTION_AGENT_PREFIX};
pub use operation::{AccessGate, Authorized, Operation};
pub use policy::{AccessPolicy, ActionType, PolicyRegistry, QueryScope, UserInfo, WmsAccessPolicy, JOB_ADMINISTRATOR,
                 NORMAL_USER};
pub use service::{ItemError, ItemResult, JobManager, MANAGER_SOURCE};
pub use state_machine::TransitionTable;
