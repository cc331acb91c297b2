// Archivo: service.rs
// Propósito: `JobManager`, la superficie de operaciones de alto nivel.
// Cada método autoriza primero (una sola decisión, todo o nada) y después
// ejecuta su trabajo dentro de una transacción del store. Las operaciones
// bulk se descomponen en una unidad de trabajo por job.
use crate::config::ManagerConfig;
use crate::engine::{StatusChange, StatusEngine, StatusUpdateOutcome, TimedStatusChange};
use crate::operation::{AccessGate, Authorized, Operation};
use crate::policy::{PolicyRegistry, UserInfo};
use chrono::{DateTime, Utc};
use job_domain::{GroupCount, HistoryEntry, InsertedJob, JobError, JobErrorKind, JobId, JobLoggingStore, JobRecordStore,
                 JobStatus, JobStatusTriple, JobStore, JobTransaction, NewJob, NewLoggingRecord, Result, SearchRequest,
                 SearchRow, SummaryRequest};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fuente de los registros de historial escritos por el propio gestor.
pub const MANAGER_SOURCE: &str = "JobManager";

/// Error de un item dentro de una operación bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
  pub kind: JobErrorKind,
  pub message: String,
}

impl From<JobError> for ItemError {
  fn from(e: JobError) -> Self {
    Self { kind: e.kind(), message: e.to_string() }
  }
}

/// Resultado por item de una operación bulk.
pub type ItemResult<T> = std::result::Result<T, ItemError>;

/// Servicio de alto nivel sobre el seguimiento de jobs.
pub struct JobManager<S> where S: JobStore
{
  store: Arc<S>,
  gate: AccessGate,
  engine: StatusEngine,
}

impl<S> JobManager<S> where S: JobStore
{
  /// Construye el servicio con el registro de políticas por defecto.
  pub fn new(store: Arc<S>, config: ManagerConfig) -> Result<Self> {
    let registry = PolicyRegistry::with_defaults(&config);
    Self::with_registry(store, config, &registry)
  }

  /// Construye el servicio resolviendo `config.policy_name` en `registry`.
  pub fn with_registry(store: Arc<S>, config: ManagerConfig, registry: &PolicyRegistry) -> Result<Self> {
    let policy = registry.resolve(&config.policy_name)?;
    log::info!("JobManager con política {} (global_jobs_info={})", config.policy_name, config.global_jobs_info);
    Ok(Self { store, gate: AccessGate::new(config.policy_name, policy), engine: StatusEngine::new(config.transitions) })
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn engine(&self) -> &StatusEngine {
    &self.engine
  }

  /// Autoriza `operation` y ejecuta `body` en la misma transacción.
  fn authorized<T, F>(&self, user: &UserInfo, operation: Operation, job_ids: Option<&[JobId]>, body: F) -> Result<T>
    where F: FnOnce(&mut dyn JobTransaction, &Authorized) -> Result<T>
  {
    self.store.transaction(|tx| {
                let auth = self.gate.authorize(tx, user, operation, job_ids)?;
                body(tx, &auth)
              })
  }

  /// Sólo la decisión, en su propia transacción (para operaciones que luego
  /// abren una unidad de trabajo por job).
  fn authorize_only(&self, user: &UserInfo, operation: Operation, job_ids: Option<&[JobId]>) -> Result<Authorized> {
    self.store.transaction(|tx| self.gate.authorize(tx, user, operation, job_ids))
  }

  /// Crea un job por descripción. Una sola descripción entra como
  /// `Received`; varias forman un envío bulk y entran como `Submitting`.
  pub fn submit_jobs(&self, user: &UserInfo, descriptions: &[String]) -> Result<Vec<ItemResult<InsertedJob>>> {
    let auth = self.authorize_only(user, Operation::SubmitJobs, None)?;
    let (status, minor_status) = if descriptions.len() > 1 {
      (JobStatus::Submitting, "Bulk transaction confirmation")
    } else {
      (JobStatus::Received, "Job accepted")
    };
    Ok(descriptions.iter()
                   .map(|description| {
                     let new_job = NewJob { description: description.clone(),
                                            owner: user.sub.clone(),
                                            owner_group: user.group.clone(),
                                            vo: user.vo.clone(),
                                            initial_status: status.to_string(),
                                            initial_minor_status: minor_status.to_string() };
                     self.store
                         .transaction(|tx| insert_job(tx, &auth, &new_job))
                         .map_err(ItemError::from)
                   })
                   .collect())
  }

  pub fn get_job_status(&self, user: &UserInfo, job_id: JobId) -> Result<JobStatusTriple> {
    self.authorized(user, Operation::GetJobStatus, Some(&[job_id]), |tx, auth| {
          auth.covers(job_id)?;
          tx.get_status(job_id)
        })
  }

  pub fn get_bulk_job_status(&self, user: &UserInfo, job_ids: &[JobId]) -> Result<BTreeMap<JobId, JobStatusTriple>> {
    self.authorized(user, Operation::GetBulkJobStatus, Some(job_ids), |tx, auth| {
          job_ids.iter()
                 .map(|id| -> Result<(JobId, JobStatusTriple)> {
                   auth.covers(*id)?;
                   Ok((*id, tx.get_status(*id)?))
                 })
                 .collect()
        })
  }

  /// Una actualización; sin `update_time` se usa la hora actual.
  pub fn set_job_status(&self,
                        user: &UserInfo,
                        job_id: JobId,
                        change: StatusChange,
                        update_time: Option<DateTime<Utc>>,
                        force: bool)
                        -> Result<StatusUpdateOutcome> {
    let update = TimedStatusChange::new(update_time.unwrap_or_else(Utc::now), change);
    self.authorized(user, Operation::SetJobStatus, Some(&[job_id]), |tx, auth| {
          self.engine.apply(tx, auth, job_id, vec![update], force)
        })
  }

  /// Varias actualizaciones de un mismo job en una sola unidad de trabajo.
  pub fn set_job_status_bulk(&self,
                             user: &UserInfo,
                             job_id: JobId,
                             updates: Vec<TimedStatusChange>,
                             force: bool)
                             -> Result<StatusUpdateOutcome> {
    self.authorized(user, Operation::SetJobStatusBulk, Some(&[job_id]), |tx, auth| {
          self.engine.apply(tx, auth, job_id, updates, force)
        })
  }

  /// Actualizaciones para varios jobs. La autorización cubre el conjunto
  /// completo; después cada job es una unidad de trabajo independiente y su
  /// fallo no afecta a los demás.
  pub fn set_status_many(&self,
                         user: &UserInfo,
                         updates: BTreeMap<JobId, Vec<TimedStatusChange>>,
                         force: bool)
                         -> Result<BTreeMap<JobId, ItemResult<StatusUpdateOutcome>>> {
    if updates.is_empty() {
      return Ok(BTreeMap::new());
    }
    let ids: Vec<JobId> = updates.keys().copied().collect();
    let auth = self.authorize_only(user, Operation::SetStatusMany, Some(&ids))?;
    Ok(updates.into_par_iter()
              .map(|(job_id, batch)| {
                let res = self.store.transaction(|tx| self.engine.apply(tx, &auth, job_id, batch, force));
                (job_id, res.map_err(ItemError::from))
              })
              .collect())
  }

  /// Búsqueda paginada (sólo `page` 0 o ausente).
  pub fn search(&self,
                user: &UserInfo,
                request: &SearchRequest,
                page: Option<usize>,
                per_page: usize)
                -> Result<Vec<SearchRow>> {
    self.authorized(user, Operation::Search, None, |tx, auth| {
          let mut filters = request.search.clone();
          filters.extend(auth.scope().filters());
          tx.search(request.parameters.as_deref(), &filters, &request.sort, page, per_page)
        })
  }

  pub fn summary(&self, user: &UserInfo, request: &SummaryRequest) -> Result<Vec<GroupCount>> {
    self.authorized(user, Operation::Summary, None, |tx, auth| {
          let mut filters = request.search.clone();
          filters.extend(auth.scope().filters());
          tx.summary(&request.grouping, &filters)
        })
  }

  pub fn get_job_history(&self, user: &UserInfo, job_id: JobId) -> Result<Vec<HistoryEntry>> {
    self.authorized(user, Operation::GetJobHistory, Some(&[job_id]), |tx, auth| {
          auth.covers(job_id)?;
          tx.get_history(job_id)
        })
  }

  pub fn get_transition_timestamps(&self, user: &UserInfo, job_id: JobId) -> Result<BTreeMap<String, DateTime<Utc>>> {
    self.authorized(user, Operation::GetTransitionTimestamps, Some(&[job_id]), |tx, auth| {
          auth.covers(job_id)?;
          tx.get_transition_timestamps(job_id)
        })
  }

  pub fn delete_job_history(&self, user: &UserInfo, job_ids: &[JobId]) -> Result<()> {
    self.authorized(user, Operation::DeleteJobHistory, Some(job_ids), |tx, auth| {
          auth.require(Operation::DeleteJobHistory)?;
          tx.delete_history(job_ids)?;
          log::info!("historial borrado para {} jobs por {}", job_ids.len(), user.sub);
          Ok(())
        })
  }

  pub fn get_job_description(&self, user: &UserInfo, job_id: JobId) -> Result<String> {
    self.authorized(user, Operation::GetJobDescription, Some(&[job_id]), |tx, auth| {
          auth.covers(job_id)?;
          tx.get_job_description(job_id)
        })
  }
}

/// Crea el job y su primer registro de historial.
fn insert_job(tx: &mut dyn JobTransaction, auth: &Authorized, new_job: &NewJob) -> Result<InsertedJob> {
  auth.require(Operation::SubmitJobs)?;
  let inserted = tx.create(new_job)?;
  tx.append(&NewLoggingRecord::new(inserted.job_id, MANAGER_SOURCE).status(inserted.status.as_str())
                                                                   .minor_status(inserted.minor_status.as_str())
                                                                   .at(inserted.time_stamp))?;
  log::info!("job {} creado para {}/{} en {}", inserted.job_id, new_job.owner, new_job.vo, inserted.status);
  Ok(inserted)
}
