// Archivo: logging.rs
// Propósito: registros del historial de estados (append-only) y su
// resolución al leer: orden, "sin cambio" y marcas de transición.
use crate::job::JobId;
use crate::status::{StatusValue, UNKNOWN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desplazamiento restado al epoch al calcular `StatusTimeOrder`.
pub const STATUS_TIME_ORDER_EPOCH: f64 = 1_270_000_000.0;
/// Longitud máxima de `StatusSource`.
pub const MAX_SOURCE_LEN: usize = 32;
/// Longitud máxima de `ApplicationStatus` en el historial.
pub const MAX_APPLICATION_STATUS_LEN: usize = 255;
/// Fuente usada cuando el reporte no identifica a nadie.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Codificación numérica monótona de un instante, usada para ordenar.
pub fn status_time_order(t: &DateTime<Utc>) -> f64 {
  t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / 1_000_000.0 - STATUS_TIME_ORDER_EPOCH
}

/// Inversa de `status_time_order` (con precisión de microsegundos).
pub fn time_from_order(order: f64) -> DateTime<Utc> {
  let micros = ((order + STATUS_TIME_ORDER_EPOCH) * 1_000_000.0).round() as i64;
  DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Corta `s` a `max` caracteres sin partir un carácter UTF-8.
pub fn truncate_chars(s: &str, max: usize) -> String {
  s.chars().take(max).collect()
}

/// Registro a añadir al historial. Los campos no informados van como
/// `StatusValue::Unchanged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoggingRecord {
  pub job_id: JobId,
  pub status: StatusValue,
  pub minor_status: StatusValue,
  pub application_status: StatusValue,
  /// Instante del reporte; `None` = hora UTC actual.
  pub status_time: Option<DateTime<Utc>>,
  pub source: String,
}

impl NewLoggingRecord {
  pub fn new(job_id: JobId, source: impl Into<String>) -> Self {
    Self { job_id,
           status: StatusValue::Unchanged,
           minor_status: StatusValue::Unchanged,
           application_status: StatusValue::Unchanged,
           status_time: None,
           source: source.into() }
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

  pub fn at(mut self, t: DateTime<Utc>) -> Self {
    self.status_time = Some(t);
    self
  }

  /// Completa los campos derivados: tiempo por defecto, orden y límites de
  /// longitud. El `seq_num` lo asigna el store dentro de la inserción.
  pub fn prepare(&self, seq_num: i64, now: DateTime<Utc>) -> LoggingRecord {
    let status_time = self.status_time.unwrap_or(now);
    let application_status = match &self.application_status {
      StatusValue::Value(v) => StatusValue::Value(truncate_chars(v, MAX_APPLICATION_STATUS_LEN)),
      StatusValue::Unchanged => StatusValue::Unchanged,
    };
    LoggingRecord { job_id: self.job_id,
                    seq_num,
                    status: self.status.clone(),
                    minor_status: self.minor_status.clone(),
                    application_status,
                    status_time,
                    status_time_order: status_time_order(&status_time),
                    status_source: truncate_chars(&self.source, MAX_SOURCE_LEN) }
  }
}

/// Registro persistido. Inmutable una vez escrito.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingRecord {
  pub job_id: JobId,
  pub seq_num: i64,
  pub status: StatusValue,
  pub minor_status: StatusValue,
  pub application_status: StatusValue,
  pub status_time: DateTime<Utc>,
  pub status_time_order: f64,
  pub status_source: String,
}

/// Entrada del historial con los "sin cambio" ya resueltos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub status: String,
  pub minor_status: String,
  pub application_status: String,
  pub status_time: DateTime<Utc>,
  pub status_source: String,
}

/// Orden canónico del historial: `(StatusTimeOrder, StatusTime)` ascendente.
/// A igualdad se conserva el orden de inserción (sort estable).
pub fn sort_records(records: &mut [LoggingRecord]) {
  records.sort_by(|a, b| {
           a.status_time_order
            .total_cmp(&b.status_time_order)
            .then_with(|| a.status_time.cmp(&b.status_time))
         });
}

/// Resuelve los campos `Unchanged` contra el registro anterior. En el primer
/// registro no hay anterior y se resuelven a `"Unknown"`.
pub fn resolve_history(records: &[LoggingRecord]) -> Vec<HistoryEntry> {
  let mut out: Vec<HistoryEntry> = Vec::with_capacity(records.len());
  for rec in records {
    let (status, minor, application) = match out.last() {
      Some(prev) => (rec.status.resolve(&prev.status),
                     rec.minor_status.resolve(&prev.minor_status),
                     rec.application_status.resolve(&prev.application_status)),
      None => (rec.status.resolve(UNKNOWN), rec.minor_status.resolve(UNKNOWN), rec.application_status.resolve(UNKNOWN)),
    };
    out.push(HistoryEntry { status,
                            minor_status: minor,
                            application_status: application,
                            status_time: rec.status_time,
                            status_source: rec.status_source.clone() });
  }
  out
}

/// Primer instante (en orden ascendente) en que se vio cada estado mayor.
pub fn transition_timestamps(records: &[LoggingRecord]) -> BTreeMap<String, DateTime<Utc>> {
  let resolved = resolve_history(records);
  let mut out = BTreeMap::new();
  for (entry, rec) in resolved.iter().zip(records) {
    out.entry(entry.status.clone()).or_insert_with(|| time_from_order(rec.status_time_order));
  }
  out
}
