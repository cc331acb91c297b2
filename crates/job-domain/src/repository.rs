// Archivo: repository.rs
// Propósito: contratos de persistencia. `JobRecordStore` guarda el estado
// actual de cada job, `JobLoggingStore` su historial append-only y
// `JobStore` provee la frontera transaccional que los une: ambos se
// escriben dentro de la misma unidad de trabajo o no se escribe ninguno.
use crate::errors::{JobError, Result};
use crate::job::{InsertedJob, JobAttributes, JobId, JobRecord, NewJob};
use crate::logging::{resolve_history, transition_timestamps, HistoryEntry, LoggingRecord, NewLoggingRecord};
use crate::query::{CompiledSearch, GroupCount, Grouping, JobFilter, SearchRow, SearchSpec, SortSpec};
use crate::status::JobStatusTriple;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Estado actual autoritativo de los jobs.
///
/// Los métodos reciben `&mut self` porque se ejecutan sobre una transacción
/// abierta (conexión Diesel o copia en memoria).
pub trait JobRecordStore {
  /// Asigna un nuevo `JobID`, fija `SubmissionTime = LastUpdateTime = ahora`
  /// y guarda el estado inicial y la descripción.
  fn create(&mut self, new_job: &NewJob) -> Result<InsertedJob>;

  /// Fila completa del job. `NotFound` si no existe.
  fn get_job(&mut self, job_id: JobId) -> Result<JobRecord>;

  /// Descripción original del job. `NotFound` si no existe.
  fn get_job_description(&mut self, job_id: JobId) -> Result<String>;

  /// Parche genérico. Si incluye `Status`, `LastUpdateTime` pasa a "ahora".
  fn set_attributes(&mut self, job_id: JobId, attributes: &JobAttributes) -> Result<()>;

  fn get_status(&mut self, job_id: JobId) -> Result<JobStatusTriple> {
    Ok(self.get_job(job_id)?.status_triple())
  }

  /// Sobrescribe el triple de estado sin validar la transición.
  /// `NotFound` si ninguna fila fue actualizada.
  fn set_status(&mut self, job_id: JobId, status: &JobStatusTriple) -> Result<()>;

  fn get_start_exec_time(&mut self, job_id: JobId) -> Result<Option<DateTime<Utc>>> {
    Ok(self.get_job(job_id)?.start_exec_time)
  }

  /// Escritura única: sólo si el campo está vacío. También fija
  /// `HeartBeatTime`. `Conflict` si ninguna fila fue actualizada (job
  /// inexistente o ya iniciado).
  fn set_start_exec_time(&mut self, job_id: JobId, start_time: DateTime<Utc>) -> Result<()>;

  fn get_end_exec_time(&mut self, job_id: JobId) -> Result<Option<DateTime<Utc>>> {
    Ok(self.get_job(job_id)?.end_exec_time)
  }

  /// Escritura única. `Conflict` si ninguna fila fue actualizada.
  fn set_end_exec_time(&mut self, job_id: JobId, end_time: DateTime<Utc>) -> Result<()>;

  fn get_heartbeat_time(&mut self, job_id: JobId) -> Result<Option<DateTime<Utc>>> {
    Ok(self.get_job(job_id)?.heart_beat_time)
  }

  /// Sobrescritura libre. `NotFound` si el job no existe.
  fn set_heartbeat_time(&mut self, job_id: JobId, time: DateTime<Utc>) -> Result<()>;

  /// Ejecuta una búsqueda ya validada.
  fn run_search(&mut self, search: &CompiledSearch) -> Result<Vec<SearchRow>>;

  /// Conteos agrupados de los jobs que cumplen `filter`.
  fn run_summary(&mut self, grouping: &Grouping, filter: &JobFilter) -> Result<Vec<GroupCount>>;

  /// Búsqueda con la petición sin validar del llamador.
  fn search(&mut self,
            parameters: Option<&[String]>,
            search: &[SearchSpec],
            sorts: &[SortSpec],
            page: Option<usize>,
            per_page: usize)
            -> Result<Vec<SearchRow>> {
    let compiled = CompiledSearch::compile(parameters, search, sorts, page, per_page)?;
    self.run_search(&compiled)
  }

  /// Resumen agrupado con la petición sin validar del llamador.
  fn summary(&mut self, group_by: &[String], search: &[SearchSpec]) -> Result<Vec<GroupCount>> {
    let grouping = Grouping::compile(group_by)?;
    let filter = JobFilter::compile(search)?;
    self.run_summary(&grouping, &filter)
  }
}

/// Historial append-only de cambios de estado.
pub trait JobLoggingStore {
  /// Añade un registro. El `SeqNum` (máximo + 1, o 1) se calcula y reserva
  /// dentro de la misma inserción. Nunca rechaza por contenido.
  fn append(&mut self, record: &NewLoggingRecord) -> Result<LoggingRecord>;

  /// Registros crudos del job en orden `(StatusTimeOrder, StatusTime)`.
  fn logging_records(&mut self, job_id: JobId) -> Result<Vec<LoggingRecord>>;

  /// Borra todo el historial de los jobs dados. Ids inexistentes: no-op.
  fn delete_history(&mut self, job_ids: &[JobId]) -> Result<()>;

  /// Historial resuelto. Un job sin registros devuelve una lista vacía.
  fn get_history(&mut self, job_id: JobId) -> Result<Vec<HistoryEntry>> {
    Ok(resolve_history(&self.logging_records(job_id)?))
  }

  /// Estado mayor -> primer instante en que se alcanzó.
  fn get_transition_timestamps(&mut self, job_id: JobId) -> Result<BTreeMap<String, DateTime<Utc>>> {
    Ok(transition_timestamps(&self.logging_records(job_id)?))
  }

  /// Instante del último registro. `NotFound` si el job no tiene historial.
  fn get_latest_timestamp(&mut self, job_id: JobId) -> Result<DateTime<Utc>> {
    self.logging_records(job_id)?
        .last()
        .map(|r| r.status_time)
        .ok_or_else(|| JobError::NotFound(format!("sin historial para el job {}", job_id)))
  }
}

/// Vista de una transacción abierta sobre ambos stores.
pub trait JobTransaction: JobRecordStore + JobLoggingStore {}

impl<T: JobRecordStore + JobLoggingStore + ?Sized> JobTransaction for T {}

/// Sustrato transaccional.
///
/// `transaction` confirma si el closure devuelve `Ok` y deshace todo si
/// devuelve `Err`. Las implementaciones serializan las unidades de trabajo
/// que tocan el mismo job y asignan `SeqNum` de forma atómica.
pub trait JobStore: Send + Sync {
  fn transaction<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut dyn JobTransaction) -> Result<T>;
}
