// Archivo: query.rs
// Propósito: álgebra de consultas. Traduce las especificaciones
// declarativas (filtros, orden, agrupación, proyección) a predicados
// tipados sobre los campos de `JobRecord`. Es pura y sin estado: los stores
// la interpretan en memoria o la traducen a SQL.
use crate::errors::{JobError, Result};
use crate::job::{FieldKind, FieldValue, JobField, JobRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Filtro declarativo tal como lo envía el llamador.
///
/// Los operadores escalares (`eq`, `neq`, `gt`, `lt`, `like`) usan `value`;
/// los vectoriales (`in`, `not in`) usan `values`. El operador se guarda como
/// texto para que uno desconocido sea un `JobError::Query` y no un error de
/// deserialización.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
  pub parameter: String,
  pub operator: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub values: Option<Vec<String>>,
}

impl SearchSpec {
  pub fn scalar(parameter: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
    Self { parameter: parameter.into(), operator: operator.into(), value: Some(value.into()), values: None }
  }

  pub fn vector<I, S>(parameter: impl Into<String>, operator: impl Into<String>, values: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    Self { parameter: parameter.into(),
           operator: operator.into(),
           value: None,
           values: Some(values.into_iter().map(Into::into).collect()) }
  }
}

/// Orden declarativo: `direction` es `asc` o `desc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
  pub parameter: String,
  pub direction: String,
}

impl SortSpec {
  pub fn new(parameter: impl Into<String>, direction: impl Into<String>) -> Self {
    Self { parameter: parameter.into(), direction: direction.into() }
  }
}

/// Cuerpo de una búsqueda.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
  #[serde(default)]
  pub parameters: Option<Vec<String>>,
  #[serde(default)]
  pub search: Vec<SearchSpec>,
  #[serde(default)]
  pub sort: Vec<SortSpec>,
}

/// Cuerpo de un resumen agrupado.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
  pub grouping: Vec<String>,
  #[serde(default)]
  pub search: Vec<SearchSpec>,
}

/// Predicado sobre un único campo, con el valor ya tipado.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  Eq(FieldValue),
  Neq(FieldValue),
  Gt(FieldValue),
  Lt(FieldValue),
  /// Patrón estilo SQL: `%` = cualquier secuencia, `_` = un carácter.
  Like(String),
  In(Vec<FieldValue>),
  NotIn(Vec<FieldValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
  pub field: JobField,
  pub predicate: Predicate,
}

impl FieldPredicate {
  /// Un campo nulo no satisface ningún predicado (lógica de tres valores).
  pub fn matches(&self, record: &JobRecord) -> bool {
    let actual = record.get(self.field);
    if actual.is_null() {
      return false;
    }
    match &self.predicate {
      Predicate::Eq(v) => actual.compare(v) == Some(Ordering::Equal),
      Predicate::Neq(v) => matches!(actual.compare(v), Some(o) if o != Ordering::Equal),
      Predicate::Gt(v) => actual.compare(v) == Some(Ordering::Greater),
      Predicate::Lt(v) => actual.compare(v) == Some(Ordering::Less),
      Predicate::Like(pattern) => match &actual {
        FieldValue::Text(s) => like_match(pattern, s),
        _ => false,
      },
      Predicate::In(vs) => vs.iter().any(|v| actual.compare(v) == Some(Ordering::Equal)),
      Predicate::NotIn(vs) => vs.iter().all(|v| matches!(actual.compare(v), Some(o) if o != Ordering::Equal)),
    }
  }
}

/// Conjunción (AND) de predicados por campo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
  predicates: Vec<FieldPredicate>,
}

impl JobFilter {
  pub fn compile(specs: &[SearchSpec]) -> Result<Self> {
    let predicates = specs.iter().map(compile_spec).collect::<Result<Vec<_>>>()?;
    Ok(Self { predicates })
  }

  pub fn predicates(&self) -> &[FieldPredicate] {
    &self.predicates
  }

  pub fn and(mut self, other: JobFilter) -> Self {
    self.predicates.extend(other.predicates);
    self
  }

  pub fn matches(&self, record: &JobRecord) -> bool {
    self.predicates.iter().all(|p| p.matches(record))
  }
}

fn compile_spec(spec: &SearchSpec) -> Result<FieldPredicate> {
  let field: JobField = spec.parameter
                            .parse()
                            .map_err(|_| JobError::Query(format!("parámetro desconocido en el filtro {:?}", spec)))?;
  let kind = field.kind();
  let scalar = || -> Result<FieldValue> {
    let raw = spec.value
                  .as_deref()
                  .ok_or_else(|| JobError::Query(format!("el filtro {:?} necesita 'value'", spec)))?;
    parse_value(kind, raw).map_err(|e| JobError::Query(format!("{} en el filtro {:?}", e, spec)))
  };
  let vector = || -> Result<Vec<FieldValue>> {
    let raw = spec.values
                  .as_ref()
                  .ok_or_else(|| JobError::Query(format!("el filtro {:?} necesita 'values'", spec)))?;
    raw.iter()
       .map(|v| parse_value(kind, v).map_err(|e| JobError::Query(format!("{} en el filtro {:?}", e, spec))))
       .collect()
  };
  let predicate = match spec.operator.as_str() {
    "eq" => Predicate::Eq(scalar()?),
    "neq" => Predicate::Neq(scalar()?),
    "gt" | "lt" => {
      if kind == FieldKind::Text {
        return Err(JobError::Query(format!("'{}' sólo aplica a campos ordenables: {:?}", spec.operator, spec)));
      }
      if spec.operator == "gt" {
        Predicate::Gt(scalar()?)
      } else {
        Predicate::Lt(scalar()?)
      }
    }
    "like" => {
      if kind != FieldKind::Text {
        return Err(JobError::Query(format!("'like' sólo aplica a campos de texto: {:?}", spec)));
      }
      match scalar()? {
        FieldValue::Text(p) => Predicate::Like(p),
        _ => return Err(JobError::Query(format!("patrón inválido: {:?}", spec))),
      }
    }
    "in" => Predicate::In(vector()?),
    "not in" => Predicate::NotIn(vector()?),
    _ => return Err(JobError::Query(format!("operador desconocido en el filtro {:?}", spec))),
  };
  Ok(FieldPredicate { field, predicate })
}

/// Convierte el texto del llamador al tipo del campo.
pub fn parse_value(kind: FieldKind, raw: &str) -> std::result::Result<FieldValue, String> {
  match kind {
    FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
    FieldKind::Int => raw.trim()
                         .parse::<i64>()
                         .map(FieldValue::Int)
                         .map_err(|_| format!("'{}' no es un entero", raw)),
    FieldKind::Time => parse_time(raw).map(FieldValue::Time)
                                      .ok_or_else(|| format!("'{}' no es una fecha válida", raw)),
  }
}

/// Acepta RFC 3339 o `YYYY-MM-DD HH:MM:SS[.f]` (interpretado como UTC).
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
    return Some(t.with_timezone(&Utc));
  }
  ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"].iter()
                                                  .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                                                  .map(|n| n.and_utc())
}

/// Coincidencia estilo SQL LIKE (sensible a mayúsculas).
pub fn like_match(pattern: &str, text: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let t: Vec<char> = text.chars().collect();
  // Algoritmo voraz con retroceso al último '%'.
  let (mut pi, mut ti) = (0usize, 0usize);
  let mut star: Option<(usize, usize)> = None;
  while ti < t.len() {
    if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == t[ti])) {
      pi += 1;
      ti += 1;
    } else if pi < p.len() && p[pi] == '%' {
      star = Some((pi, ti));
      pi += 1;
    } else if let Some((sp, st)) = star {
      pi = sp + 1;
      ti = st + 1;
      star = Some((sp, st + 1));
    } else {
      return false;
    }
  }
  p[pi..].iter().all(|c| *c == '%')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
  Asc,
  Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
  pub field: JobField,
  pub direction: SortDirection,
}

/// Orden multi-clave estable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSort {
  keys: Vec<SortKey>,
}

impl JobSort {
  pub fn compile(specs: &[SortSpec]) -> Result<Self> {
    let mut keys = Vec::with_capacity(specs.len());
    for spec in specs {
      let field: JobField = spec.parameter
                                .parse()
                                .map_err(|_| JobError::Query(format!("parámetro desconocido en el orden {:?}", spec)))?;
      let direction = match spec.direction.as_str() {
        "asc" => SortDirection::Asc,
        "desc" => SortDirection::Desc,
        other => return Err(JobError::Query(format!("dirección de orden desconocida: {}", other))),
      };
      keys.push(SortKey { field, direction });
    }
    Ok(Self { keys })
  }

  pub fn keys(&self) -> &[SortKey] {
    &self.keys
  }

  pub fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
    for key in &self.keys {
      let ord = a.get(key.field).sort_cmp(&b.get(key.field));
      let ord = match key.direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
      };
      if ord != Ordering::Equal {
        return ord;
      }
    }
    Ordering::Equal
  }

  pub fn sort(&self, records: &mut [JobRecord]) {
    records.sort_by(|a, b| self.compare(a, b));
  }
}

/// Fila de resultado de una búsqueda: columnas proyectadas en orden canónico.
pub type SearchRow = IndexMap<String, FieldValue>;

/// Columnas a devolver en una búsqueda.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
  fields: Vec<JobField>,
}

impl Projection {
  /// `None` (o lista vacía) = todos los campos reconocidos.
  pub fn compile(parameters: Option<&[String]>) -> Result<Self> {
    let requested = match parameters {
      Some(p) if !p.is_empty() => p,
      _ => return Ok(Self { fields: JobField::ALL.to_vec() }),
    };
    let unknown: Vec<&String> = requested.iter().filter(|p| p.parse::<JobField>().is_err()).collect();
    if !unknown.is_empty() {
      return Err(JobError::Query(format!("parámetros no reconocidos: {:?}", unknown)));
    }
    let fields = JobField::ALL.iter()
                              .filter(|f| requested.iter().any(|p| p == f.name()))
                              .copied()
                              .collect();
    Ok(Self { fields })
  }

  pub fn fields(&self) -> &[JobField] {
    &self.fields
  }

  pub fn project(&self, record: &JobRecord) -> SearchRow {
    self.fields.iter().map(|f| (f.name().to_string(), record.get(*f))).collect()
  }
}

/// Búsqueda validada, lista para que un store la ejecute.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSearch {
  pub projection: Projection,
  pub filter: JobFilter,
  pub sort: JobSort,
  pub per_page: usize,
}

impl CompiledSearch {
  /// Valida toda la petición antes de tocar el store. La paginación aún no
  /// existe: cualquier página distinta de 0 es un error explícito.
  pub fn compile(parameters: Option<&[String]>,
                 search: &[SearchSpec],
                 sorts: &[SortSpec],
                 page: Option<usize>,
                 per_page: usize)
                 -> Result<Self> {
    if let Some(p) = page {
      if p != 0 {
        return Err(JobError::NotImplemented(format!("paginación (page={})", p)));
      }
    }
    Ok(Self { projection: Projection::compile(parameters)?,
              filter: JobFilter::compile(search)?,
              sort: JobSort::compile(sorts)?,
              per_page })
  }
}

/// Conteo de un grupo: columnas de agrupación + `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
  #[serde(flatten)]
  pub keys: IndexMap<String, FieldValue>,
  pub count: u64,
}

/// Campos de agrupación, en el orden pedido.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
  fields: Vec<JobField>,
}

impl Grouping {
  pub fn compile(group_by: &[String]) -> Result<Self> {
    let fields = group_by.iter()
                         .map(|p| {
                           p.parse::<JobField>()
                            .map_err(|_| JobError::Query(format!("parámetro de agrupación desconocido: {}", p)))
                         })
                         .collect::<Result<Vec<_>>>()?;
    Ok(Self { fields })
  }

  pub fn fields(&self) -> &[JobField] {
    &self.fields
  }

  /// Agrupa los registros ya filtrados. Sólo aparecen combinaciones con
  /// al menos un job; el orden es el de primera aparición.
  pub fn count<'a, I>(&self, records: I) -> Vec<GroupCount>
    where I: IntoIterator<Item = &'a JobRecord>
  {
    let mut groups: Vec<GroupCount> = Vec::new();
    for record in records {
      let keys: IndexMap<String, FieldValue> =
        self.fields.iter().map(|f| (f.name().to_string(), record.get(*f))).collect();
      match groups.iter_mut().find(|g| g.keys == keys) {
        Some(g) => g.count += 1,
        None => groups.push(GroupCount { keys, count: 1 }),
      }
    }
    groups
  }
}
