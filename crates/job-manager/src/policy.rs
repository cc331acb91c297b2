// Archivo: policy.rs
// Propósito: identidad del llamador, políticas de acceso y el registro que
// las resuelve por nombre al arrancar.
use crate::config::{ManagerConfig, DEFAULT_POLICY};
use job_domain::{FieldValue, JobError, JobId, JobRecordStore, JobTransaction, Result, SearchSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Capacidad de usuario normal: puede crear jobs y gestionar los suyos.
pub const NORMAL_USER: &str = "NormalUser";
/// Capacidad de administrador: acceso total.
pub const JOB_ADMINISTRATOR: &str = "JobAdministrator";

/// Clase de acción que se está autorizando.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
  /// Crear jobs. No admite ids.
  Create,
  /// Leer jobs concretos.
  Read,
  /// Modificar jobs concretos.
  Manage,
  /// Búsquedas y resúmenes amplios.
  Query,
}

/// Identidad ya autenticada del llamador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
  pub sub: String,
  pub vo: String,
  pub group: String,
  pub properties: BTreeSet<String>,
}

impl UserInfo {
  pub fn new<I, S>(sub: impl Into<String>, vo: impl Into<String>, group: impl Into<String>, properties: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    Self { sub: sub.into(),
           vo: vo.into(),
           group: group.into(),
           properties: properties.into_iter().map(Into::into).collect() }
  }

  pub fn has_property(&self, property: &str) -> bool {
    self.properties.contains(property)
  }

  pub fn is_admin(&self) -> bool {
    self.has_property(JOB_ADMINISTRATOR)
  }

  pub fn is_normal_user(&self) -> bool {
    self.has_property(NORMAL_USER)
  }
}

/// Alcance concedido a una acción `Query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryScope {
  /// Sin restricción.
  All,
  /// Sólo los jobs de `owner` en `vo`.
  OwnedBy { owner: String, vo: String },
}

impl QueryScope {
  /// Filtros extra que la búsqueda debe añadir para respetar el alcance.
  pub fn filters(&self) -> Vec<SearchSpec> {
    match self {
      QueryScope::All => Vec::new(),
      QueryScope::OwnedBy { owner, vo } => {
        vec![SearchSpec::scalar("Owner", "eq", owner.as_str()), SearchSpec::scalar("VO", "eq", vo.as_str())]
      }
    }
  }
}

/// Decisión de acceso intercambiable.
///
/// Devuelve el alcance concedido o `JobError::Authorization`. Recibe la
/// transacción abierta porque las reglas de propiedad consultan el store.
pub trait AccessPolicy: Send + Sync {
  fn check(&self,
           tx: &mut dyn JobTransaction,
           user: &UserInfo,
           action: ActionType,
           job_ids: Option<&[JobId]>)
           -> Result<QueryScope>;
}

/// Política de referencia del sistema de gestión de carga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmsAccessPolicy {
  global_jobs_info: bool,
}

impl WmsAccessPolicy {
  pub fn new(global_jobs_info: bool) -> Self {
    Self { global_jobs_info }
  }
}

fn denied(msg: impl Into<String>) -> JobError {
  JobError::Authorization(msg.into())
}

impl AccessPolicy for WmsAccessPolicy {
  fn check(&self,
           tx: &mut dyn JobTransaction,
           user: &UserInfo,
           action: ActionType,
           job_ids: Option<&[JobId]>)
           -> Result<QueryScope> {
    if action == ActionType::Create {
      if job_ids.is_some() {
        return Err(JobError::Validation("una acción Create no admite ids de job".into()));
      }
      if !user.is_normal_user() {
        return Err(denied(format!("{} no puede crear jobs", user.sub)));
      }
      return Ok(QueryScope::All);
    }
    if user.is_admin() {
      return Ok(QueryScope::All);
    }
    if !user.is_normal_user() {
      return Err(denied(format!("{} no tiene ninguna capacidad sobre jobs", user.sub)));
    }
    if action == ActionType::Query {
      return Ok(if self.global_jobs_info {
                  QueryScope::All
                } else {
                  QueryScope::OwnedBy { owner: user.sub.clone(), vo: user.vo.clone() }
                });
    }

    // Read / Manage: todos los jobs pedidos tienen que ser del llamador.
    let ids = job_ids.ok_or_else(|| JobError::Validation(format!("{:?} necesita ids de job", action)))?;
    let distinct: BTreeSet<JobId> = ids.iter().copied().collect();
    let groups = tx.summary(&["Owner".to_string(), "VO".to_string()],
                            &[SearchSpec::vector("JobID", "in", distinct.iter().map(|id| id.to_string()))])?;
    let owned = match groups.as_slice() {
      [only] => {
        only.keys.get("Owner") == Some(&FieldValue::Text(user.sub.clone()))
        && only.keys.get("VO") == Some(&FieldValue::Text(user.vo.clone()))
        && only.count == distinct.len() as u64
      }
      _ => false,
    };
    if owned {
      Ok(QueryScope::All)
    } else {
      Err(denied(format!("{} no es dueño de todos los jobs {:?}", user.sub, distinct)))
    }
  }
}

/// Registro nombre -> política, resuelto una sola vez al arrancar.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
  policies: BTreeMap<String, Arc<dyn AccessPolicy>>,
}

impl PolicyRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registro con la política por defecto ya dada de alta.
  pub fn with_defaults(config: &ManagerConfig) -> Self {
    let mut registry = Self::new();
    registry.register(DEFAULT_POLICY, Arc::new(WmsAccessPolicy::new(config.global_jobs_info)));
    registry
  }

  /// Da de alta (o reemplaza) una política.
  pub fn register(&mut self, name: impl Into<String>, policy: Arc<dyn AccessPolicy>) {
    self.policies.insert(name.into(), policy);
  }

  pub fn names(&self) -> Vec<&str> {
    self.policies.keys().map(String::as_str).collect()
  }

  pub fn resolve(&self, name: &str) -> Result<Arc<dyn AccessPolicy>> {
    self.policies
        .get(name)
        .cloned()
        .ok_or_else(|| JobError::Validation(format!("política de acceso desconocida: {}", name)))
  }
}

impl std::fmt::Debug for PolicyRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PolicyRegistry").field("policies", &self.names()).finish()
  }
}
