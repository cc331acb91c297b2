// Archivo: job.rs
// Propósito: el registro de job (estado actual autoritativo), los campos
// reconocidos por el álgebra de consultas y el parche genérico de atributos.
use crate::errors::{JobError, Result};
use crate::status::JobStatusTriple;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identificador entero de un job, asignado de forma monótona.
pub type JobId = i64;

/// Tipo de valor de un campo: decide qué operadores tienen sentido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  Int,
  Text,
  Time,
}

/// Atributos reconocidos del registro de job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobField {
  #[serde(rename = "JobID")]
  JobId,
  Status,
  MinorStatus,
  ApplicationStatus,
  Owner,
  OwnerGroup,
  #[serde(rename = "VO")]
  Vo,
  SubmissionTime,
  LastUpdateTime,
  StartExecTime,
  EndExecTime,
  HeartBeatTime,
}

impl JobField {
  /// Orden canónico de columnas (el de la tabla `jobs`).
  pub const ALL: [JobField; 12] = [JobField::JobId,
                                   JobField::Status,
                                   JobField::MinorStatus,
                                   JobField::ApplicationStatus,
                                   JobField::Owner,
                                   JobField::OwnerGroup,
                                   JobField::Vo,
                                   JobField::SubmissionTime,
                                   JobField::LastUpdateTime,
                                   JobField::StartExecTime,
                                   JobField::EndExecTime,
                                   JobField::HeartBeatTime];

  pub fn name(&self) -> &'static str {
    match self {
      JobField::JobId => "JobID",
      JobField::Status => "Status",
      JobField::MinorStatus => "MinorStatus",
      JobField::ApplicationStatus => "ApplicationStatus",
      JobField::Owner => "Owner",
      JobField::OwnerGroup => "OwnerGroup",
      JobField::Vo => "VO",
      JobField::SubmissionTime => "SubmissionTime",
      JobField::LastUpdateTime => "LastUpdateTime",
      JobField::StartExecTime => "StartExecTime",
      JobField::EndExecTime => "EndExecTime",
      JobField::HeartBeatTime => "HeartBeatTime",
    }
  }

  pub fn kind(&self) -> FieldKind {
    match self {
      JobField::JobId => FieldKind::Int,
      JobField::Status
      | JobField::MinorStatus
      | JobField::ApplicationStatus
      | JobField::Owner
      | JobField::OwnerGroup
      | JobField::Vo => FieldKind::Text,
      JobField::SubmissionTime
      | JobField::LastUpdateTime
      | JobField::StartExecTime
      | JobField::EndExecTime
      | JobField::HeartBeatTime => FieldKind::Time,
    }
  }

  /// Campos que el parche genérico de atributos puede tocar. Identidad,
  /// tiempos de creación y los campos de escritura única quedan fuera.
  pub fn is_patchable(&self) -> bool {
    matches!(self,
             JobField::Status | JobField::MinorStatus | JobField::ApplicationStatus | JobField::HeartBeatTime)
  }
}

impl fmt::Display for JobField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for JobField {
  type Err = JobError;

  fn from_str(s: &str) -> Result<Self> {
    JobField::ALL.iter()
                 .find(|f| f.name() == s)
                 .copied()
                 .ok_or_else(|| JobError::Query(format!("campo desconocido: {}", s)))
  }
}

/// Valor de un campo del registro de job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Int(i64),
  Time(DateTime<Utc>),
  Text(String),
  Null,
}

impl FieldValue {
  pub fn is_null(&self) -> bool {
    matches!(self, FieldValue::Null)
  }

  /// Comparación entre valores del mismo tipo. `None` si alguno es nulo o
  /// los tipos no coinciden (semántica SQL: la comparación es desconocida).
  pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
    match (self, other) {
      (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
      (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
      (FieldValue::Time(a), FieldValue::Time(b)) => Some(a.cmp(b)),
      _ => None,
    }
  }

  /// Orden total usado al ordenar resultados: los nulos van primero.
  pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
    match (self.is_null(), other.is_null()) {
      (true, true) => Ordering::Equal,
      (true, false) => Ordering::Less,
      (false, true) => Ordering::Greater,
      (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
    }
  }
}

impl From<Option<DateTime<Utc>>> for FieldValue {
  fn from(v: Option<DateTime<Utc>>) -> Self {
    v.map(FieldValue::Time).unwrap_or(FieldValue::Null)
  }
}

/// Estado actual autoritativo de un job (una fila por job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
  pub job_id: JobId,
  pub status: String,
  pub minor_status: String,
  pub application_status: String,
  pub owner: String,
  pub owner_group: String,
  pub vo: String,
  pub submission_time: DateTime<Utc>,
  pub last_update_time: DateTime<Utc>,
  pub start_exec_time: Option<DateTime<Utc>>,
  pub end_exec_time: Option<DateTime<Utc>>,
  pub heart_beat_time: Option<DateTime<Utc>>,
}

impl JobRecord {
  pub fn get(&self, field: JobField) -> FieldValue {
    match field {
      JobField::JobId => FieldValue::Int(self.job_id),
      JobField::Status => FieldValue::Text(self.status.clone()),
      JobField::MinorStatus => FieldValue::Text(self.minor_status.clone()),
      JobField::ApplicationStatus => FieldValue::Text(self.application_status.clone()),
      JobField::Owner => FieldValue::Text(self.owner.clone()),
      JobField::OwnerGroup => FieldValue::Text(self.owner_group.clone()),
      JobField::Vo => FieldValue::Text(self.vo.clone()),
      JobField::SubmissionTime => FieldValue::Time(self.submission_time),
      JobField::LastUpdateTime => FieldValue::Time(self.last_update_time),
      JobField::StartExecTime => self.start_exec_time.into(),
      JobField::EndExecTime => self.end_exec_time.into(),
      JobField::HeartBeatTime => self.heart_beat_time.into(),
    }
  }

  pub fn status_triple(&self) -> JobStatusTriple {
    JobStatusTriple::new(self.status.clone(), self.minor_status.clone(), self.application_status.clone())
  }
}

/// Datos de entrada para crear un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
  /// Descripción del job (JDL) tal cual la envió el usuario; no se interpreta.
  pub description: String,
  pub owner: String,
  pub owner_group: String,
  pub vo: String,
  pub initial_status: String,
  pub initial_minor_status: String,
}

/// Resumen devuelto al crear un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertedJob {
  pub job_id: JobId,
  pub status: String,
  pub minor_status: String,
  pub time_stamp: DateTime<Utc>,
}

/// Parche genérico de atributos: mapa campo -> valor.
///
/// Sólo admite campos parcheables (`JobField::is_patchable`). `LastUpdateTime`
/// nunca lo fija el llamador: se fuerza a "ahora" cuando el parche incluye
/// `Status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobAttributes {
  values: BTreeMap<JobField, FieldValue>,
}

impl JobAttributes {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, field: JobField, value: FieldValue) -> Self {
    self.values.insert(field, value);
    self
  }

  /// Valida el mapa y lo convierte en un parche tipado.
  pub fn to_patch(&self, now: DateTime<Utc>) -> Result<JobPatch> {
    let mut patch = JobPatch::default();
    for (field, value) in &self.values {
      if !field.is_patchable() {
        return Err(JobError::Validation(format!("el atributo {} no se puede modificar", field)));
      }
      match (field, value) {
        (JobField::Status, FieldValue::Text(v)) => patch.status = Some(v.clone()),
        (JobField::MinorStatus, FieldValue::Text(v)) => patch.minor_status = Some(v.clone()),
        (JobField::ApplicationStatus, FieldValue::Text(v)) => patch.application_status = Some(v.clone()),
        (JobField::HeartBeatTime, FieldValue::Time(t)) => patch.heart_beat_time = Some(*t),
        (f, v) => {
          return Err(JobError::Validation(format!("valor {:?} no válido para el atributo {}", v, f)));
        }
      }
    }
    if patch.status.is_some() {
      patch.last_update_time = Some(now);
    }
    Ok(patch)
  }
}

/// Cambios tipados a aplicar sobre una fila de `jobs`. `None` = sin cambio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
  pub status: Option<String>,
  pub minor_status: Option<String>,
  pub application_status: Option<String>,
  pub heart_beat_time: Option<DateTime<Utc>>,
  pub last_update_time: Option<DateTime<Utc>>,
}

impl JobPatch {
  pub fn is_empty(&self) -> bool {
    *self == JobPatch::default()
  }

  pub fn apply_to(&self, record: &mut JobRecord) {
    if let Some(v) = &self.status {
      record.status = v.clone();
    }
    if let Some(v) = &self.minor_status {
      record.minor_status = v.clone();
    }
    if let Some(v) = &self.application_status {
      record.application_status = v.clone();
    }
    if let Some(t) = self.heart_beat_time {
      record.heart_beat_time = Some(t);
    }
    if let Some(t) = self.last_update_time {
      record.last_update_time = t;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_patch_forces_last_update_time() {
    let now = Utc::now();
    let patch = JobAttributes::new().with(JobField::Status, FieldValue::Text("Running".into()))
                                    .to_patch(now)
                                    .unwrap();
    assert_eq!(patch.last_update_time, Some(now));

    let patch = JobAttributes::new().with(JobField::MinorStatus, FieldValue::Text("x".into()))
                                    .to_patch(now)
                                    .unwrap();
    assert_eq!(patch.last_update_time, None);
  }

  #[test]
  fn identity_and_write_once_fields_are_not_patchable() {
    let now = Utc::now();
    for field in [JobField::Owner, JobField::Vo, JobField::StartExecTime, JobField::LastUpdateTime] {
      let res = JobAttributes::new().with(field, FieldValue::Null).to_patch(now);
      assert!(matches!(res, Err(JobError::Validation(_))), "{} debería rechazarse", field);
    }
  }
}
