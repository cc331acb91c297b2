// Archivo: errors.rs
// Propósito: taxonomía de errores del seguimiento de jobs y el alias
// `Result<T>` usado por todas las APIs de los stores y del motor.
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errores del dominio de jobs.
///
/// Todos son terminales para la petición que los provoca: ni los stores ni
/// el motor reintentan internamente. Sólo `Storage` se considera
/// reintentable por el llamador.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
  /// Petición de filtro/orden/agrupación/proyección mal formada.
  #[error("Consulta inválida: {0}")]
  Query(String),
  /// El job (o su historial) no existe.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Campo de escritura única ya fijado, o ninguna fila actualizada.
  #[error("Conflicto: {0}")]
  Conflict(String),
  /// Cambio de estado mayor ilegal según la tabla de transiciones.
  #[error("Transición inválida para el job {job_id}: {current} -> {requested}")]
  Transition { job_id: JobId, current: String, requested: String },
  /// El llamador no tiene permisos para la acción o para los jobs pedidos.
  #[error("No autorizado: {0}")]
  Authorization(String),
  /// Uso estructuralmente incorrecto de una operación.
  #[error("Error de validación: {0}")]
  Validation(String),
  /// Funcionalidad pedida que aún no existe (p.ej. paginación).
  #[error("No implementado: {0}")]
  NotImplemented(String),
  /// Fallo del sustrato de persistencia (timeouts, deadlocks, pool...).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
}

/// Clase de error serializable, usada en los resultados por item de las
/// operaciones bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
  Query,
  NotFound,
  Conflict,
  Transition,
  Authorization,
  Validation,
  NotImplemented,
  Storage,
}

impl JobError {
  pub fn kind(&self) -> JobErrorKind {
    match self {
      JobError::Query(_) => JobErrorKind::Query,
      JobError::NotFound(_) => JobErrorKind::NotFound,
      JobError::Conflict(_) => JobErrorKind::Conflict,
      JobError::Transition { .. } => JobErrorKind::Transition,
      JobError::Authorization(_) => JobErrorKind::Authorization,
      JobError::Validation(_) => JobErrorKind::Validation,
      JobError::NotImplemented(_) => JobErrorKind::NotImplemented,
      JobError::Storage(_) => JobErrorKind::Storage,
    }
  }

  /// Sólo los fallos del sustrato pueden reintentarse con sentido.
  pub fn is_retryable(&self) -> bool {
    matches!(self, JobError::Storage(_))
  }
}

impl From<serde_json::Error> for JobError {
  fn from(e: serde_json::Error) -> Self {
    Self::Validation(e.to_string())
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, JobError>;
