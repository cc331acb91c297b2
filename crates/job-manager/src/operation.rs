// Archivo: operation.rs
// Propósito: catálogo de operaciones expuestas y el token `Authorized`.
//
// Cada operación declara su `ActionType` en un `match` exhaustivo, así que
// añadir una variante sin decidir su acción no compila. El servicio no
// puede tocar el store sin un `Authorized` emitido por `AccessGate` para
// esa operación.
use crate::policy::{AccessPolicy, ActionType, QueryScope, UserInfo};
use job_domain::{JobError, JobId, JobTransaction, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
  SubmitJobs,
  GetJobStatus,
  GetBulkJobStatus,
  SetJobStatus,
  SetJobStatusBulk,
  SetStatusMany,
  Search,
  Summary,
  GetJobHistory,
  GetTransitionTimestamps,
  DeleteJobHistory,
  GetJobDescription,
}

impl Operation {
  pub const ALL: [Operation; 12] = [Operation::SubmitJobs,
                                    Operation::GetJobStatus,
                                    Operation::GetBulkJobStatus,
                                    Operation::SetJobStatus,
                                    Operation::SetJobStatusBulk,
                                    Operation::SetStatusMany,
                                    Operation::Search,
                                    Operation::Summary,
                                    Operation::GetJobHistory,
                                    Operation::GetTransitionTimestamps,
                                    Operation::DeleteJobHistory,
                                    Operation::GetJobDescription];

  pub fn action(&self) -> ActionType {
    match self {
      Operation::SubmitJobs => ActionType::Create,
      Operation::GetJobStatus
      | Operation::GetBulkJobStatus
      | Operation::GetJobHistory
      | Operation::GetTransitionTimestamps
      | Operation::GetJobDescription => ActionType::Read,
      Operation::SetJobStatus
      | Operation::SetJobStatusBulk
      | Operation::SetStatusMany
      | Operation::DeleteJobHistory => ActionType::Manage,
      Operation::Search | Operation::Summary => ActionType::Query,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Operation::SubmitJobs => "submit_jobs",
      Operation::GetJobStatus => "get_job_status",
      Operation::GetBulkJobStatus => "get_bulk_job_status",
      Operation::SetJobStatus => "set_job_status",
      Operation::SetJobStatusBulk => "set_job_status_bulk",
      Operation::SetStatusMany => "set_status_many",
      Operation::Search => "search",
      Operation::Summary => "summary",
      Operation::GetJobHistory => "get_job_history",
      Operation::GetTransitionTimestamps => "get_transition_timestamps",
      Operation::DeleteJobHistory => "delete_job_history",
      Operation::GetJobDescription => "get_job_description",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

/// Decisión de acceso inmutable, producida una vez por `AccessGate` y
/// pasada hacia abajo. No se puede construir fuera de este crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
  operation: Operation,
  scope: QueryScope,
  job_ids: Option<BTreeSet<JobId>>,
}

impl Authorized {
  pub fn operation(&self) -> Operation {
    self.operation
  }

  pub fn scope(&self) -> &QueryScope {
    &self.scope
  }

  /// Falla si el token se emitió para otra operación.
  pub fn require(&self, operation: Operation) -> Result<()> {
    if self.operation == operation {
      Ok(())
    } else {
      Err(JobError::Authorization(format!("token emitido para {} usado en {}", self.operation, operation)))
    }
  }

  /// Falla si el token se emitió para otra acción.
  pub fn require_action(&self, action: ActionType) -> Result<()> {
    if self.operation.action() == action {
      Ok(())
    } else {
      Err(JobError::Authorization(format!("{} no autoriza acciones {:?}", self.operation, action)))
    }
  }

  /// Falla si `job_id` no estaba entre los ids autorizados.
  pub fn covers(&self, job_id: JobId) -> Result<()> {
    match &self.job_ids {
      Some(ids) if ids.contains(&job_id) => Ok(()),
      _ => Err(JobError::Authorization(format!("el job {} no está cubierto por la autorización", job_id))),
    }
  }
}

/// Puerta de acceso: evalúa la política y emite el token.
#[derive(Clone)]
pub struct AccessGate {
  policy_name: String,
  policy: Arc<dyn AccessPolicy>,
}

impl AccessGate {
  pub fn new(policy_name: impl Into<String>, policy: Arc<dyn AccessPolicy>) -> Self {
    Self { policy_name: policy_name.into(), policy }
  }

  pub fn policy_name(&self) -> &str {
    &self.policy_name
  }

  pub fn authorize(&self,
                   tx: &mut dyn JobTransaction,
                   user: &UserInfo,
                   operation: Operation,
                   job_ids: Option<&[JobId]>)
                   -> Result<Authorized> {
    match self.policy.check(tx, user, operation.action(), job_ids) {
      Ok(scope) => {
        log::debug!("{}: {} autorizado para {}/{}", self.policy_name, operation, user.sub, user.vo);
        Ok(Authorized { operation, scope, job_ids: job_ids.map(|ids| ids.iter().copied().collect()) })
      }
      Err(e) => {
        log::warn!("{}: {} denegado para {}/{}: {}", self.policy_name, operation, user.sub, user.vo, e);
        Err(e)
      }
    }
  }
}

impl fmt::Debug for AccessGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AccessGate").field("policy_name", &self.policy_name).finish()
  }
}
