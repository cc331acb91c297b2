// Archivo: engine.rs
// Propósito: motor de transiciones de estado. Valida cada cambio contra la
// tabla de transiciones, descarta los reportes atrasados, mantiene los
// tiempos de escritura única y escribe estado + historial dentro de la
// transacción que recibe.
use crate::operation::Authorized;
use crate::policy::ActionType;
use crate::state_machine::TransitionTable;
use chrono::{DateTime, Duration, DurationRound, Utc};
use job_domain::logging::UNKNOWN_SOURCE;
use job_domain::{FieldValue, JobAttributes, JobError, JobField, JobId, JobLoggingStore, JobRecordStore,
                 JobStatusTriple, JobTransaction, NewLoggingRecord, Result, StatusValue};
use serde::{Deserialize, Serialize};

/// Los reportes cuya fuente empieza así vienen del propio job y renuevan
/// el `HeartBeatTime`.
pub const EXECUTION_AGENT_PREFIX: &str = "Job";

/// Cambio de estado pedido. Los campos no informados quedan sin cambio y se
/// resuelven contra el estado vigente.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
  #[serde(default)]
  pub status: StatusValue,
  #[serde(default)]
  pub minor_status: StatusValue,
  #[serde(default)]
  pub application_status: StatusValue,
  #[serde(default)]
  pub source: Option<String>,
}

impl StatusChange {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn status(mut self, v: impl Into<StatusValue>) -> Self {
    self.status = v.into();
    self
  }

  pub fn minor_status(mut self, v: impl Into<StatusValue>) -> Self {
    self.minor_status = v.into();
    self
  }

  pub fn application_status(mut self, v: impl Into<StatusValue>) -> Self {
    self.application_status = v.into();
    self
  }

  pub fn source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }

  /// Triple completo tras aplicar el cambio sobre `previous`.
  pub fn resolve(&self, previous: &JobStatusTriple) -> JobStatusTriple {
    JobStatusTriple { status: self.status.resolve(&previous.status),
                      minor_status: self.minor_status.resolve(&previous.minor_status),
                      application_status: self.application_status.resolve(&previous.application_status) }
  }
}

/// Cambio con su instante de reporte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedStatusChange {
  pub time: DateTime<Utc>,
  #[serde(flatten)]
  pub change: StatusChange,
}

impl TimedStatusChange {
  pub fn new(time: DateTime<Utc>, change: StatusChange) -> Self {
    Self { time, change }
  }
}

/// Resultado de aplicar una o varias actualizaciones a un job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateOutcome {
  pub job_id: JobId,
  /// Actualizaciones escritas en el historial.
  pub applied: usize,
  /// Actualizaciones descartadas por atrasadas.
  pub discarded: usize,
  /// Estado autoritativo tras la operación.
  pub status: Option<JobStatusTriple>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusEngine {
  transitions: TransitionTable,
}

impl StatusEngine {
  pub fn new(transitions: TransitionTable) -> Self {
    Self { transitions }
  }

  /// Aplica una lista de actualizaciones de un mismo job.
  ///
  /// - Se ordenan por instante; las anteriores al último registro del
  ///   historial se descartan sin error.
  /// - Cada cambio de estado mayor se valida (salvo `force`) contra el
  ///   estado vigente, que avanza con cada actualización aceptada. Una
  ///   transición ilegal rechaza la petición entera.
  /// - La fila de `jobs` recibe sólo el estado final; el historial recibe
  ///   todas las actualizaciones aceptadas.
  pub fn apply(&self,
               tx: &mut dyn JobTransaction,
               auth: &Authorized,
               job_id: JobId,
               mut updates: Vec<TimedStatusChange>,
               force: bool)
               -> Result<StatusUpdateOutcome> {
    auth.require_action(ActionType::Manage)?;
    auth.covers(job_id)?;

    // Los stores SQL guardan microsegundos: se compara y se escribe con esa
    // misma precisión para que ambos stores decidan igual.
    for u in updates.iter_mut() {
      u.time = u.time
                .duration_trunc(Duration::microseconds(1))
                .map_err(|e| JobError::Validation(format!("instante no representable {}: {}", u.time, e)))?;
    }
    updates.sort_by_key(|u| u.time);
    let record = tx.get_job(job_id)?;
    let latest = match tx.get_latest_timestamp(job_id) {
      Ok(t) => Some(t),
      Err(JobError::NotFound(_)) => None,
      Err(e) => return Err(e),
    };

    let total = updates.len();
    log::debug!("{}: job {} con {} actualizaciones", auth.operation(), job_id, total);
    let fresh: Vec<TimedStatusChange> =
      updates.into_iter()
             .filter(|u| match latest {
               Some(l) if u.time < l => {
                 log::info!("stale status update discarded: job {} reportado en {} (último registro {})",
                            job_id,
                            u.time,
                            l);
                 false
               }
               _ => true,
             })
             .collect();
    let discarded = total - fresh.len();
    let current = record.status_triple();
    if fresh.is_empty() {
      return Ok(StatusUpdateOutcome { job_id, applied: 0, discarded, status: Some(current) });
    }

    let mut state = current.clone();
    let mut resolved = Vec::with_capacity(fresh.len());
    for update in &fresh {
      let next = update.change.resolve(&state);
      if !force && next.status != state.status {
        if let Err(e) = self.transitions.check(job_id, &state.status, &next.status) {
          log::warn!("{}", e);
          return Err(e);
        }
      }
      state = next.clone();
      resolved.push(next);
    }

    let attrs =
      JobAttributes::new().with(JobField::Status, FieldValue::Text(state.status.clone()))
                          .with(JobField::MinorStatus, FieldValue::Text(state.minor_status.clone()))
                          .with(JobField::ApplicationStatus, FieldValue::Text(state.application_status.clone()));
    tx.set_attributes(job_id, &attrs)?;
    if state.status != current.status {
      log::info!("job {}: {} -> {}{}", job_id, current.status, state.status, if force { " (forzado)" } else { "" });
    }

    let mut start_set = record.start_exec_time.is_some();
    let mut end_set = record.end_exec_time.is_some();
    let mut heartbeat = None;
    for (update, triple) in fresh.iter().zip(&resolved) {
      if !start_set && self.transitions.is_running(&triple.status) {
        tx.set_start_exec_time(job_id, update.time)?;
        start_set = true;
      }
      if !end_set && self.transitions.is_final(&triple.status) {
        tx.set_end_exec_time(job_id, update.time)?;
        end_set = true;
      }
      let source = update.change.source.as_deref().unwrap_or(UNKNOWN_SOURCE);
      tx.append(&NewLoggingRecord::new(job_id, source).status(triple.status.as_str())
                                                      .minor_status(triple.minor_status.as_str())
                                                      .application_status(triple.application_status.as_str())
                                                      .at(update.time))?;
      if source.starts_with(EXECUTION_AGENT_PREFIX) {
        heartbeat = Some(update.time);
      }
    }
    if let Some(t) = heartbeat {
      tx.set_heartbeat_time(job_id, t)?;
    }

    Ok(StatusUpdateOutcome { job_id, applied: fresh.len(), discarded, status: Some(state) })
  }
}
