// Archivo: config.rs
// Propósito: configuración del gestor de jobs leída del entorno (con
// soporte de `.env` vía dotenvy).
use crate::state_machine::TransitionTable;
use job_domain::{JobError, Result};
use std::path::Path;

/// Nombre de la política de acceso por defecto.
pub const DEFAULT_POLICY: &str = "WMSAccessPolicy";

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
  /// Tabla de transiciones de estados mayores.
  pub transitions: TransitionTable,
  /// Interruptor de sitio "mostrar todos los jobs": si es `false`, las
  /// consultas de un usuario normal sólo ven sus propios jobs.
  pub global_jobs_info: bool,
  /// Política de acceso a resolver en el registro al arrancar.
  pub policy_name: String,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self { transitions: TransitionTable::default(), global_jobs_info: true, policy_name: DEFAULT_POLICY.to_string() }
  }
}

impl ManagerConfig {
  /// Lee `JOB_TRANSITIONS_FILE`, `JOB_GLOBAL_JOBS_INFO` y
  /// `JOB_ACCESS_POLICY`. Las variables ausentes toman el valor por defecto.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let mut config = ManagerConfig::default();
    if let Ok(path) = std::env::var("JOB_TRANSITIONS_FILE") {
      config.transitions = TransitionTable::from_file(Path::new(&path))?;
      log::info!("tabla de transiciones cargada desde {}", path);
    }
    if let Ok(raw) = std::env::var("JOB_GLOBAL_JOBS_INFO") {
      config.global_jobs_info = parse_bool(&raw)
        .ok_or_else(|| JobError::Validation(format!("JOB_GLOBAL_JOBS_INFO inválido: {}", raw)))?;
    }
    if let Ok(name) = std::env::var("JOB_ACCESS_POLICY") {
      if !name.trim().is_empty() {
        config.policy_name = name.trim().to_string();
      }
    }
    Ok(config)
  }
}

fn parse_bool(raw: &str) -> Option<bool> {
  match raw.trim().to_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}
