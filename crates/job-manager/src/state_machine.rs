// Archivo: state_machine.rs
// Propósito: tabla de transiciones entre estados mayores. Es configuración:
// la tabla por defecto puede reemplazarse por un JSON con la misma forma.
use job_domain::{JobError, JobId, JobStatus, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

static DEFAULT_TABLE: Lazy<TransitionTable> = Lazy::new(|| {
  use JobStatus::*;
  let edges: &[(JobStatus, &[JobStatus])] =
    &[(Submitting, &[Received, Checking, Deleted]),
      (Received, &[Checking, Waiting, Running, Failed, Killed, Deleted]),
      (Checking, &[Staging, Waiting, Rescheduled, Failed, Deleted]),
      (Staging, &[Checking, Waiting, Failed, Killed]),
      (Waiting, &[Matched, Rescheduled, Deleted, Killed]),
      (Matched, &[Running, Failed, Rescheduled, Killed]),
      (Rescheduled, &[Waiting, Received, Deleted, Failed, Killed]),
      (Running, &[Stalled, Done, Failed, Rescheduled, Completing, Killed, Received]),
      (Stalled, &[Running, Failed, Killed]),
      (Completing, &[Done, Failed, Completed, Stalled, Killed]),
      (Completed, &[Done, Failed]),
      (Done, &[Deleted]),
      (Failed, &[Rescheduled, Deleted]),
      (Killed, &[Deleted]),
      (Deleted, &[])];
  TransitionTable { transitions: edges.iter()
                                      .map(|(from, to)| {
                                        (from.to_string(), to.iter().map(|s| s.to_string()).collect())
                                      })
                                      .collect(),
                    final_states: [Done, Completed, Failed, Killed].iter().map(|s| s.to_string()).collect(),
                    running_states: [Running].iter().map(|s| s.to_string()).collect(),
                    aliases: [(Stalled.to_string(), Running.to_string())].into_iter().collect() }
});

/// Grafo dirigido de estados mayores.
///
/// - `transitions`: estado -> sucesores legales.
/// - `final_states`: fijan `EndExecTime` la primera vez que se alcanzan.
/// - `running_states`: fijan `StartExecTime` la primera vez.
/// - `aliases`: estado actual que se valida como si fuera otro (un job
///   `Stalled` que vuelve a reportar se trata como `Running`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTable {
  transitions: BTreeMap<String, BTreeSet<String>>,
  final_states: BTreeSet<String>,
  running_states: BTreeSet<String>,
  #[serde(default)]
  aliases: BTreeMap<String, String>,
}

impl Default for TransitionTable {
  fn default() -> Self {
    DEFAULT_TABLE.clone()
  }
}

impl TransitionTable {
  /// Carga una tabla desde JSON.
  pub fn from_json_str(raw: &str) -> Result<Self> {
    let table: TransitionTable = serde_json::from_str(raw)?;
    table.validate()?;
    Ok(table)
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let raw = std::fs::read_to_string(path)
      .map_err(|e| JobError::Validation(format!("no se pudo leer {}: {}", path.display(), e)))?;
    Self::from_json_str(&raw)
  }

  /// Todo sucesor tiene que ser a su vez un estado conocido.
  fn validate(&self) -> Result<()> {
    for (from, to) in &self.transitions {
      if let Some(unknown) = to.iter().find(|s| !self.transitions.contains_key(*s)) {
        return Err(JobError::Validation(format!("transición {} -> {}: estado destino desconocido", from, unknown)));
      }
    }
    Ok(())
  }

  pub fn is_final(&self, status: &str) -> bool {
    self.final_states.contains(status)
  }

  pub fn is_running(&self, status: &str) -> bool {
    self.running_states.contains(status)
  }

  /// Estado con el que se valida una transición desde `current`.
  pub fn effective<'a>(&'a self, current: &'a str) -> &'a str {
    self.aliases.get(current).map(String::as_str).unwrap_or(current)
  }

  /// Quedarse en el mismo estado mayor siempre es legal.
  pub fn is_allowed(&self, current: &str, requested: &str) -> bool {
    if current == requested {
      return true;
    }
    let from = self.effective(current);
    from == requested || self.transitions.get(from).is_some_and(|next| next.contains(requested))
  }

  pub fn check(&self, job_id: JobId, current: &str, requested: &str) -> Result<()> {
    if self.is_allowed(current, requested) {
      Ok(())
    } else {
      Err(JobError::Transition { job_id, current: current.to_string(), requested: requested.to_string() })
    }
  }

  pub fn successors(&self, status: &str) -> Vec<&str> {
    self.transitions
        .get(self.effective(status))
        .map(|next| next.iter().map(String::as_str).collect())
        .unwrap_or_default()
  }
}
