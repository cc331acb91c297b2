// Archivo: status.rs
// Propósito: estados mayores de un job, el valor "sin cambio" de los
// registros de logging y el triple de estado compuesto.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Valor con el que se resuelve un campo que nunca fue informado.
pub const UNKNOWN: &str = "Unknown";

/// Estado mayor (fase del ciclo de vida) de un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobStatus {
  Submitting,
  Received,
  Checking,
  Staging,
  Waiting,
  Matched,
  Rescheduled,
  Running,
  Stalled,
  Completing,
  Completed,
  Done,
  Failed,
  Killed,
  Deleted,
}

impl JobStatus {
  pub const ALL: [JobStatus; 15] = [JobStatus::Submitting,
                                    JobStatus::Received,
                                    JobStatus::Checking,
                                    JobStatus::Staging,
                                    JobStatus::Waiting,
                                    JobStatus::Matched,
                                    JobStatus::Rescheduled,
                                    JobStatus::Running,
                                    JobStatus::Stalled,
                                    JobStatus::Completing,
                                    JobStatus::Completed,
                                    JobStatus::Done,
                                    JobStatus::Failed,
                                    JobStatus::Killed,
                                    JobStatus::Deleted];

  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Submitting => "Submitting",
      JobStatus::Received => "Received",
      JobStatus::Checking => "Checking",
      JobStatus::Staging => "Staging",
      JobStatus::Waiting => "Waiting",
      JobStatus::Matched => "Matched",
      JobStatus::Rescheduled => "Rescheduled",
      JobStatus::Running => "Running",
      JobStatus::Stalled => "Stalled",
      JobStatus::Completing => "Completing",
      JobStatus::Completed => "Completed",
      JobStatus::Done => "Done",
      JobStatus::Failed => "Failed",
      JobStatus::Killed => "Killed",
      JobStatus::Deleted => "Deleted",
    }
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = String;

  /// Acepta el nombre canónico sin distinguir mayúsculas.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    JobStatus::ALL.iter()
                  .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
                  .copied()
                  .ok_or_else(|| format!("estado de job desconocido: {}", s))
  }
}

/// Valor de un campo de estado en un registro de logging.
///
/// `Unchanged` significa "igual que el registro anterior de este job" y se
/// resuelve al leer el historial. Al ser una variante explícita no se
/// confunde con un estado reportado literalmente como "idem".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusValue {
  #[default]
  Unchanged,
  Value(String),
}

impl StatusValue {
  pub fn value(s: impl Into<String>) -> Self {
    StatusValue::Value(s.into())
  }

  pub fn as_option(&self) -> Option<&str> {
    match self {
      StatusValue::Unchanged => None,
      StatusValue::Value(v) => Some(v.as_str()),
    }
  }

  /// Resuelve contra el valor anterior (forward-substitution).
  pub fn resolve(&self, previous: &str) -> String {
    match self {
      StatusValue::Unchanged => previous.to_string(),
      StatusValue::Value(v) => v.clone(),
    }
  }
}

impl From<Option<String>> for StatusValue {
  fn from(v: Option<String>) -> Self {
    match v {
      Some(v) => StatusValue::Value(v),
      None => StatusValue::Unchanged,
    }
  }
}

impl From<&str> for StatusValue {
  fn from(v: &str) -> Self {
    StatusValue::Value(v.to_string())
  }
}

impl From<String> for StatusValue {
  fn from(v: String) -> Self {
    StatusValue::Value(v)
  }
}

/// Estado compuesto de un job: estado mayor, menor y de aplicación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusTriple {
  pub status: String,
  pub minor_status: String,
  pub application_status: String,
}

impl JobStatusTriple {
  pub fn new(status: impl Into<String>, minor_status: impl Into<String>, application_status: impl Into<String>) -> Self {
    Self { status: status.into(), minor_status: minor_status.into(), application_status: application_status.into() }
  }
}

impl fmt::Display for JobStatusTriple {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {}, {})", self.status, self.minor_status, self.application_status)
  }
}
