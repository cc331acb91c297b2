// Archivo: stubs.rs
// Propósito: implementación en memoria de `JobStore` para pruebas y
// wiring rápido. No es durable.
//
// Cada transacción trabaja sobre una copia del estado y la publica sólo si
// el closure termina con `Ok`; mientras tanto el mutex serializa al resto
// de transacciones.
use crate::errors::{JobError, Result};
use crate::job::{InsertedJob, JobAttributes, JobId, JobRecord, NewJob};
use crate::logging::{sort_records, LoggingRecord, NewLoggingRecord};
use crate::query::{CompiledSearch, GroupCount, Grouping, JobFilter, SearchRow};
use crate::repository::{JobLoggingStore, JobRecordStore, JobStore, JobTransaction};
use crate::status::JobStatusTriple;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Tablas en memoria: `jobs`, descripciones y `logging_info`.
#[derive(Debug, Clone, Default)]
struct MemoryTables {
  last_job_id: JobId,
  jobs: BTreeMap<JobId, JobRecord>,
  descriptions: BTreeMap<JobId, String>,
  logging: BTreeMap<JobId, Vec<LoggingRecord>>,
}

/// "Ahora" en microsegundos, la misma precisión que guardan los stores SQL.
fn now_micros() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

impl MemoryTables {
  fn job_mut(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
    self.jobs.get_mut(&job_id)
  }
}

impl JobRecordStore for MemoryTables {
  fn create(&mut self, new_job: &NewJob) -> Result<InsertedJob> {
    let now = now_micros();
    self.last_job_id += 1;
    let job_id = self.last_job_id;
    let record = JobRecord { job_id,
                             status: new_job.initial_status.clone(),
                             minor_status: new_job.initial_minor_status.clone(),
                             application_status: String::new(),
                             owner: new_job.owner.clone(),
                             owner_group: new_job.owner_group.clone(),
                             vo: new_job.vo.clone(),
                             submission_time: now,
                             last_update_time: now,
                             start_exec_time: None,
                             end_exec_time: None,
                             heart_beat_time: None };
    self.jobs.insert(job_id, record);
    self.descriptions.insert(job_id, new_job.description.clone());
    log::debug!("job {} creado en memoria para {}/{}", job_id, new_job.owner, new_job.vo);
    Ok(InsertedJob { job_id,
                     status: new_job.initial_status.clone(),
                     minor_status: new_job.initial_minor_status.clone(),
                     time_stamp: now })
  }

  fn get_job(&mut self, job_id: JobId) -> Result<JobRecord> {
    self.jobs
        .get(&job_id)
        .cloned()
        .ok_or_else(|| JobError::NotFound(format!("job {}", job_id)))
  }

  fn get_job_description(&mut self, job_id: JobId) -> Result<String> {
    self.descriptions
        .get(&job_id)
        .cloned()
        .ok_or_else(|| JobError::NotFound(format!("descripción del job {}", job_id)))
  }

  fn set_attributes(&mut self, job_id: JobId, attributes: &JobAttributes) -> Result<()> {
    let patch = attributes.to_patch(now_micros())?;
    let record = self.job_mut(job_id).ok_or_else(|| JobError::NotFound(format!("job {}", job_id)))?;
    patch.apply_to(record);
    Ok(())
  }

  fn set_status(&mut self, job_id: JobId, status: &JobStatusTriple) -> Result<()> {
    let record = self.job_mut(job_id)
                     .ok_or_else(|| JobError::NotFound(format!("ninguna fila actualizada para el job {}", job_id)))?;
    record.status = status.status.clone();
    record.minor_status = status.minor_status.clone();
    record.application_status = status.application_status.clone();
    Ok(())
  }

  fn set_start_exec_time(&mut self, job_id: JobId, start_time: DateTime<Utc>) -> Result<()> {
    match self.job_mut(job_id) {
      Some(record) if record.start_exec_time.is_none() => {
        record.start_exec_time = Some(start_time);
        record.heart_beat_time = Some(start_time);
        Ok(())
      }
      _ => Err(JobError::Conflict(format!("ninguna fila actualizada para el job {}", job_id))),
    }
  }

  fn set_end_exec_time(&mut self, job_id: JobId, end_time: DateTime<Utc>) -> Result<()> {
    match self.job_mut(job_id) {
      Some(record) if record.end_exec_time.is_none() => {
        record.end_exec_time = Some(end_time);
        Ok(())
      }
      _ => Err(JobError::Conflict(format!("ninguna fila actualizada para el job {}", job_id))),
    }
  }

  fn set_heartbeat_time(&mut self, job_id: JobId, time: DateTime<Utc>) -> Result<()> {
    let record = self.job_mut(job_id)
                     .ok_or_else(|| JobError::NotFound(format!("ninguna fila actualizada para el job {}", job_id)))?;
    record.heart_beat_time = Some(time);
    Ok(())
  }

  fn run_search(&mut self, search: &CompiledSearch) -> Result<Vec<SearchRow>> {
    let mut matching: Vec<JobRecord> = self.jobs.values().filter(|r| search.filter.matches(r)).cloned().collect();
    search.sort.sort(&mut matching);
    Ok(matching.iter().take(search.per_page).map(|r| search.projection.project(r)).collect())
  }

  fn run_summary(&mut self, grouping: &Grouping, filter: &JobFilter) -> Result<Vec<GroupCount>> {
    Ok(grouping.count(self.jobs.values().filter(|r| filter.matches(r))))
  }
}

impl JobLoggingStore for MemoryTables {
  fn append(&mut self, record: &NewLoggingRecord) -> Result<LoggingRecord> {
    let rows = self.logging.entry(record.job_id).or_default();
    let seq_num = rows.iter().map(|r| r.seq_num).max().unwrap_or(0) + 1;
    let stored = record.prepare(seq_num, now_micros());
    rows.push(stored.clone());
    Ok(stored)
  }

  fn logging_records(&mut self, job_id: JobId) -> Result<Vec<LoggingRecord>> {
    let mut rows = self.logging.get(&job_id).cloned().unwrap_or_default();
    sort_records(&mut rows);
    Ok(rows)
  }

  fn delete_history(&mut self, job_ids: &[JobId]) -> Result<()> {
    for id in job_ids {
      self.logging.remove(id);
    }
    Ok(())
  }
}

/// Store en memoria (no durable).
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
  tables: Mutex<MemoryTables>,
}

impl InMemoryJobStore {
  /// Crea un store vacío.
  pub fn new() -> Self {
    Self::default()
  }

  /// Helper para mapear `Mutex::lock()` en un `Result` con
  /// `JobError::Storage`.
  fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>> {
    self.tables.lock().map_err(|e| JobError::Storage(format!("mutex poisoned: {:?}", e)))
  }

  /// Número de registros de historial guardados para un job.
  pub fn logging_len(&self, job_id: JobId) -> Result<usize> {
    Ok(self.lock()?.logging.get(&job_id).map(Vec::len).unwrap_or(0))
  }
}

impl JobStore for InMemoryJobStore {
  fn transaction<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut dyn JobTransaction) -> Result<T>
  {
    let mut guard = self.lock()?;
    let mut staged = guard.clone();
    let out = f(&mut staged)?;
    *guard = staged;
    Ok(out)
  }
}
