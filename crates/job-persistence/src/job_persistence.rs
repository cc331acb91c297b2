// Archivo: job_persistence.rs
// Propósito: implementación Diesel de `JobStore`. Cada unidad de trabajo
// corre sobre una conexión del pool dentro de una transacción (IMMEDIATE en
// SQLite, SERIALIZABLE en Postgres), de modo que la escritura del estado y
// el registro del historial se confirman o se deshacen juntos.
use crate::schema::{job_jdls, jobs, logging_info};
use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use job_domain::query::{Predicate, SortDirection};
use job_domain::{CompiledSearch, FieldKind, FieldValue, GroupCount, Grouping, InsertedJob, JobAttributes, JobError, JobField,
                 JobFilter, JobId, JobLoggingStore, JobRecord, JobRecordStore, JobSort, JobStatusTriple, JobStore,
                 JobTransaction, LoggingRecord, NewJob, NewLoggingRecord, Result, SearchRow, StatusValue};
use std::sync::Arc;

#[cfg(feature = "pg")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/postgres");
#[cfg(not(feature = "pg"))]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/sqlite");

#[cfg(feature = "pg")]
type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
type DbConn = SqliteConnection;
#[cfg(feature = "pg")]
type DbBackend = diesel::pg::Pg;
#[cfg(not(feature = "pg"))]
type DbBackend = diesel::sqlite::Sqlite;
type DbPool = Pool<ConnectionManager<DbConn>>;
type BoxedJobs<'a> = jobs::BoxedQuery<'a, DbBackend>;

const DEFAULT_POOL_SIZE: u32 = 4;

/// PRAGMAs aplicados a cada conexión SQLite al salir del pool.
#[cfg(not(feature = "pg"))]
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    // LIKE sensible a mayúsculas, igual que en Postgres y en memoria.
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA case_sensitive_like = ON;")
        .map_err(diesel::r2d2::Error::QueryError)?;
    // WAL no está disponible en bases en memoria; no es fatal.
    if let Err(e) = conn.batch_execute("PRAGMA journal_mode = WAL;") {
      log::debug!("journal_mode WAL no aplicado: {}", e);
    }
    Ok(())
  }
}

/// Repo Diesel que implementa `JobStore`.
#[derive(Clone)]
pub struct DieselJobStore {
  pool: Arc<DbPool>,
}

impl DieselJobStore {
  /// Crea el pool y aplica las migraciones pendientes.
  pub fn new(database_url: &str, pool_size: u32) -> Result<Self> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let builder = Pool::builder().max_size(pool_size);
    #[cfg(not(feature = "pg"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager)
                      .map_err(|e| JobError::Storage(format!("no se pudo crear el pool de conexiones: {}", e)))?;
    let store = DieselJobStore { pool: Arc::new(pool) };
    let mut conn = store.conn()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| JobError::Storage(format!("migraciones: {}", e)))?;
    log::info!("job store listo (pool de {} conexiones)", pool_size);
    Ok(store)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>> {
    self.pool.get().map_err(|e| JobError::Storage(format!("pool: {}", e)))
  }
}

impl std::fmt::Debug for DieselJobStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DieselJobStore").field("pool_size", &self.pool.max_size()).finish()
  }
}

/// Error interno de la transacción: Diesel necesita `From<DieselError>`.
#[derive(Debug)]
enum TxError {
  Db(DieselError),
  Domain(JobError),
}

impl From<DieselError> for TxError {
  fn from(e: DieselError) -> Self {
    TxError::Db(e)
  }
}

impl From<TxError> for JobError {
  fn from(e: TxError) -> Self {
    match e {
      TxError::Db(e) => db_err(e),
      TxError::Domain(e) => e,
    }
  }
}

#[cfg(not(feature = "pg"))]
fn run_in_transaction<T, F>(conn: &mut DbConn, f: F) -> std::result::Result<T, TxError>
  where F: FnOnce(&mut DbConn) -> std::result::Result<T, TxError>
{
  conn.immediate_transaction(f)
}

#[cfg(feature = "pg")]
fn run_in_transaction<T, F>(conn: &mut DbConn, f: F) -> std::result::Result<T, TxError>
  where F: FnOnce(&mut DbConn) -> std::result::Result<T, TxError>
{
  conn.build_transaction().serializable().run(f)
}

impl JobStore for DieselJobStore {
  fn transaction<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut dyn JobTransaction) -> Result<T>
  {
    let mut conn = self.conn()?;
    let out = run_in_transaction(&mut conn, |c| {
      let mut tx = DieselTx { conn: c };
      f(&mut tx).map_err(TxError::Domain)
    })?;
    Ok(out)
  }
}

// Filas Diesel
#[derive(Debug, Queryable)]
struct JobRow {
  job_id: i64,
  status: String,
  minor_status: String,
  application_status: String,
  owner: String,
  owner_group: String,
  vo: String,
  submission_time_us: i64,
  last_update_time_us: i64,
  start_exec_time_us: Option<i64>,
  end_exec_time_us: Option<i64>,
  heart_beat_time_us: Option<i64>,
}

impl JobRow {
  fn into_record(self) -> Result<JobRecord> {
    Ok(JobRecord { job_id: self.job_id,
                   status: self.status,
                   minor_status: self.minor_status,
                   application_status: self.application_status,
                   owner: self.owner,
                   owner_group: self.owner_group,
                   vo: self.vo,
                   submission_time: from_micros(self.submission_time_us)?,
                   last_update_time: from_micros(self.last_update_time_us)?,
                   start_exec_time: self.start_exec_time_us.map(from_micros).transpose()?,
                   end_exec_time: self.end_exec_time_us.map(from_micros).transpose()?,
                   heart_beat_time: self.heart_beat_time_us.map(from_micros).transpose()? })
  }
}

/// Fila nueva de `jobs`: el `job_id` lo genera la base.
#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
struct NewJobRow<'a> {
  status: &'a str,
  minor_status: &'a str,
  application_status: &'a str,
  owner: &'a str,
  owner_group: &'a str,
  vo: &'a str,
  submission_time_us: i64,
  last_update_time_us: i64,
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = job_jdls)]
struct JdlRow {
  job_id: i64,
  jdl: String,
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = logging_info)]
struct LoggingRow {
  job_id: i64,
  seq_num: i64,
  status: Option<String>,
  minor_status: Option<String>,
  application_status: Option<String>,
  status_time_us: i64,
  status_time_order: f64,
  status_source: String,
}

impl LoggingRow {
  fn from_record(r: &LoggingRecord) -> Self {
    LoggingRow { job_id: r.job_id,
                 seq_num: r.seq_num,
                 status: r.status.as_option().map(str::to_string),
                 minor_status: r.minor_status.as_option().map(str::to_string),
                 application_status: r.application_status.as_option().map(str::to_string),
                 status_time_us: r.status_time.timestamp_micros(),
                 status_time_order: r.status_time_order,
                 status_source: r.status_source.clone() }
  }

  fn into_record(self) -> Result<LoggingRecord> {
    Ok(LoggingRecord { job_id: self.job_id,
                       seq_num: self.seq_num,
                       status: StatusValue::from(self.status),
                       minor_status: StatusValue::from(self.minor_status),
                       application_status: StatusValue::from(self.application_status),
                       status_time: from_micros(self.status_time_us)?,
                       status_time_order: self.status_time_order,
                       status_source: self.status_source })
  }
}

/// Parche parcial sobre `jobs`; `None` = columna sin tocar.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = jobs)]
struct JobChangeset {
  status: Option<String>,
  minor_status: Option<String>,
  application_status: Option<String>,
  heart_beat_time_us: Option<i64>,
  last_update_time_us: Option<i64>,
}

fn db_err(e: DieselError) -> JobError {
  JobError::Storage(format!("db: {}", e))
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(db_err)
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_micros(us).ok_or_else(|| JobError::Storage(format!("instante fuera de rango: {}", us)))
}

/// "Ahora" con la precisión que guarda la base (microsegundos).
fn now_micros() -> Result<DateTime<Utc>> {
  from_micros(Utc::now().timestamp_micros())
}

fn int_value(v: &FieldValue) -> Result<i64> {
  match v {
    FieldValue::Int(i) => Ok(*i),
    other => Err(JobError::Query(format!("se esperaba un entero: {:?}", other))),
  }
}

fn text_value(v: &FieldValue) -> Result<String> {
  match v {
    FieldValue::Text(s) => Ok(s.clone()),
    other => Err(JobError::Query(format!("se esperaba texto: {:?}", other))),
  }
}

fn time_value(v: &FieldValue) -> Result<i64> {
  match v {
    FieldValue::Time(t) => Ok(t.timestamp_micros()),
    other => Err(JobError::Query(format!("se esperaba una fecha: {:?}", other))),
  }
}

// Traduce un predicado a un `.filter(...)` sobre una columna concreta. La
// variante `like` sólo existe para columnas de texto.
macro_rules! filter_column {
  ($query:expr, $col:expr, $pred:expr, $conv:expr, like) => {
    match $pred {
      Predicate::Eq(v) => $query.filter($col.eq($conv(v)?)),
      Predicate::Neq(v) => $query.filter($col.ne($conv(v)?)),
      Predicate::Gt(v) => $query.filter($col.gt($conv(v)?)),
      Predicate::Lt(v) => $query.filter($col.lt($conv(v)?)),
      Predicate::Like(p) => $query.filter($col.like(p.clone())),
      Predicate::In(vs) => $query.filter($col.eq_any(vs.iter().map($conv).collect::<Result<Vec<_>>>()?)),
      Predicate::NotIn(vs) => $query.filter($col.ne_all(vs.iter().map($conv).collect::<Result<Vec<_>>>()?)),
    }
  };
  ($query:expr, $col:expr, $pred:expr, $conv:expr) => {
    match $pred {
      Predicate::Eq(v) => $query.filter($col.eq($conv(v)?)),
      Predicate::Neq(v) => $query.filter($col.ne($conv(v)?)),
      Predicate::Gt(v) => $query.filter($col.gt($conv(v)?)),
      Predicate::Lt(v) => $query.filter($col.lt($conv(v)?)),
      Predicate::Like(_) => return Err(JobError::Query("'like' sólo aplica a campos de texto".into())),
      Predicate::In(vs) => $query.filter($col.eq_any(vs.iter().map($conv).collect::<Result<Vec<_>>>()?)),
      Predicate::NotIn(vs) => $query.filter($col.ne_all(vs.iter().map($conv).collect::<Result<Vec<_>>>()?)),
    }
  };
}

fn apply_filter<'a>(mut query: BoxedJobs<'a>, filter: &JobFilter) -> Result<BoxedJobs<'a>> {
  for p in filter.predicates() {
    let pred = &p.predicate;
    query = match p.field {
      JobField::JobId => filter_column!(query, jobs::job_id, pred, int_value),
      JobField::Status => filter_column!(query, jobs::status, pred, text_value, like),
      JobField::MinorStatus => filter_column!(query, jobs::minor_status, pred, text_value, like),
      JobField::ApplicationStatus => filter_column!(query, jobs::application_status, pred, text_value, like),
      JobField::Owner => filter_column!(query, jobs::owner, pred, text_value, like),
      JobField::OwnerGroup => filter_column!(query, jobs::owner_group, pred, text_value, like),
      JobField::Vo => filter_column!(query, jobs::vo, pred, text_value, like),
      JobField::SubmissionTime => filter_column!(query, jobs::submission_time_us, pred, time_value),
      JobField::LastUpdateTime => filter_column!(query, jobs::last_update_time_us, pred, time_value),
      JobField::StartExecTime => filter_column!(query, jobs::start_exec_time_us, pred, time_value),
      JobField::EndExecTime => filter_column!(query, jobs::end_exec_time_us, pred, time_value),
      JobField::HeartBeatTime => filter_column!(query, jobs::heart_beat_time_us, pred, time_value),
    };
  }
  Ok(query)
}

macro_rules! order_column {
  ($query:expr, $col:expr, $dir:expr) => {
    match $dir {
      SortDirection::Asc => $query.then_order_by($col.asc()),
      SortDirection::Desc => $query.then_order_by($col.desc()),
    }
  };
}

fn apply_sort<'a>(mut query: BoxedJobs<'a>, sort: &JobSort) -> BoxedJobs<'a> {
  for key in sort.keys() {
    let dir = key.direction;
    query = match key.field {
      JobField::JobId => order_column!(query, jobs::job_id, dir),
      JobField::Status => order_column!(query, jobs::status, dir),
      JobField::MinorStatus => order_column!(query, jobs::minor_status, dir),
      JobField::ApplicationStatus => order_column!(query, jobs::application_status, dir),
      JobField::Owner => order_column!(query, jobs::owner, dir),
      JobField::OwnerGroup => order_column!(query, jobs::owner_group, dir),
      JobField::Vo => order_column!(query, jobs::vo, dir),
      JobField::SubmissionTime => order_column!(query, jobs::submission_time_us, dir),
      JobField::LastUpdateTime => order_column!(query, jobs::last_update_time_us, dir),
      JobField::StartExecTime => order_column!(query, jobs::start_exec_time_us, dir),
      JobField::EndExecTime => order_column!(query, jobs::end_exec_time_us, dir),
      JobField::HeartBeatTime => order_column!(query, jobs::heart_beat_time_us, dir),
    };
  }
  // desempate por id: mismo resultado que un sort estable sobre la tabla
  query.then_order_by(jobs::job_id.asc())
}

/// Columna de `jobs` que guarda cada campo. Es lo único que se interpola en
/// el SQL de los resúmenes; los valores viajan siempre como parámetros.
fn column_name(field: JobField) -> &'static str {
  match field {
    JobField::JobId => "job_id",
    JobField::Status => "status",
    JobField::MinorStatus => "minor_status",
    JobField::ApplicationStatus => "application_status",
    JobField::Owner => "owner",
    JobField::OwnerGroup => "owner_group",
    JobField::Vo => "vo",
    JobField::SubmissionTime => "submission_time_us",
    JobField::LastUpdateTime => "last_update_time_us",
    JobField::StartExecTime => "start_exec_time_us",
    JobField::EndExecTime => "end_exec_time_us",
    JobField::HeartBeatTime => "heart_beat_time_us",
  }
}

/// Parámetro de una consulta SQL construida a mano.
#[derive(Debug, Clone, PartialEq)]
enum SqlBind {
  Int(i64),
  Text(String),
}

fn sql_bind(field: JobField, v: &FieldValue) -> Result<SqlBind> {
  match field.kind() {
    FieldKind::Int => int_value(v).map(SqlBind::Int),
    FieldKind::Text => text_value(v).map(SqlBind::Text),
    FieldKind::Time => time_value(v).map(SqlBind::Int),
  }
}

/// Cláusula WHERE en SQL plano con sus parámetros, en orden.
#[derive(Debug, Default)]
struct SqlWhere {
  clauses: Vec<String>,
  binds: Vec<SqlBind>,
}

impl SqlWhere {
  #[cfg(feature = "pg")]
  fn placeholder(&mut self, bind: SqlBind) -> String {
    self.binds.push(bind);
    format!("${}", self.binds.len())
  }

  #[cfg(not(feature = "pg"))]
  fn placeholder(&mut self, bind: SqlBind) -> String {
    self.binds.push(bind);
    "?".to_string()
  }

  fn compile(filter: &JobFilter) -> Result<Self> {
    let mut out = SqlWhere::default();
    for p in filter.predicates() {
      let col = column_name(p.field);
      let clause = match &p.predicate {
        Predicate::Eq(v) => format!("{} = {}", col, out.placeholder(sql_bind(p.field, v)?)),
        Predicate::Neq(v) => format!("{} <> {}", col, out.placeholder(sql_bind(p.field, v)?)),
        Predicate::Gt(v) => format!("{} > {}", col, out.placeholder(sql_bind(p.field, v)?)),
        Predicate::Lt(v) => format!("{} < {}", col, out.placeholder(sql_bind(p.field, v)?)),
        Predicate::Like(pattern) if p.field.kind() == FieldKind::Text => {
          format!("{} LIKE {}", col, out.placeholder(SqlBind::Text(pattern.clone())))
        }
        Predicate::Like(_) => return Err(JobError::Query("'like' sólo aplica a campos de texto".into())),
        Predicate::In(vs) if vs.is_empty() => "1 = 0".to_string(),
        Predicate::NotIn(vs) if vs.is_empty() => format!("{} IS NOT NULL", col),
        Predicate::In(vs) | Predicate::NotIn(vs) => {
          let marks = vs.iter()
                        .map(|v| Ok(out.placeholder(sql_bind(p.field, v)?)))
                        .collect::<Result<Vec<_>>>()?
                        .join(", ");
          let op = if matches!(p.predicate, Predicate::In(_)) { "IN" } else { "NOT IN" };
          format!("{} {} ({})", col, op, marks)
        }
      };
      out.clauses.push(clause);
    }
    Ok(out)
  }
}

/// SELECT agrupado para `run_summary`. Las columnas no agrupadas salen como
/// NULL para que todas las filas tengan la forma de `SummaryRow`.
fn summary_sql(grouping: &Grouping, filter: &SqlWhere) -> String {
  let grouped: Vec<&str> = grouping.fields().iter().map(|f| column_name(*f)).collect();
  let select: Vec<String> =
    JobField::ALL.iter()
                 .map(|f| {
                   let col = column_name(*f);
                   if grouping.fields().contains(f) {
                     col.to_string()
                   } else if f.kind() == FieldKind::Text {
                     format!("CAST(NULL AS TEXT) AS {}", col)
                   } else {
                     format!("CAST(NULL AS BIGINT) AS {}", col)
                   }
                 })
                 .collect();
  let mut sql = format!("SELECT {}, COUNT(*) AS group_count FROM jobs", select.join(", "));
  if !filter.clauses.is_empty() {
    sql.push_str(&format!(" WHERE {}", filter.clauses.join(" AND ")));
  }
  if !grouped.is_empty() {
    sql.push_str(&format!(" GROUP BY {}", grouped.join(", ")));
  }
  // mismo orden que el agrupado en memoria: primera aparición por JobID
  sql.push_str(" ORDER BY MIN(job_id)");
  sql
}

#[derive(Debug, QueryableByName)]
struct SummaryRow {
  #[diesel(sql_type = Nullable<BigInt>)]
  job_id: Option<i64>,
  #[diesel(sql_type = Nullable<Text>)]
  status: Option<String>,
  #[diesel(sql_type = Nullable<Text>)]
  minor_status: Option<String>,
  #[diesel(sql_type = Nullable<Text>)]
  application_status: Option<String>,
  #[diesel(sql_type = Nullable<Text>)]
  owner: Option<String>,
  #[diesel(sql_type = Nullable<Text>)]
  owner_group: Option<String>,
  #[diesel(sql_type = Nullable<Text>)]
  vo: Option<String>,
  #[diesel(sql_type = Nullable<BigInt>)]
  submission_time_us: Option<i64>,
  #[diesel(sql_type = Nullable<BigInt>)]
  last_update_time_us: Option<i64>,
  #[diesel(sql_type = Nullable<BigInt>)]
  start_exec_time_us: Option<i64>,
  #[diesel(sql_type = Nullable<BigInt>)]
  end_exec_time_us: Option<i64>,
  #[diesel(sql_type = Nullable<BigInt>)]
  heart_beat_time_us: Option<i64>,
  #[diesel(sql_type = BigInt)]
  group_count: i64,
}

impl SummaryRow {
  fn value(&self, field: JobField) -> Result<FieldValue> {
    let text = |v: &Option<String>| v.clone().map(FieldValue::Text).unwrap_or(FieldValue::Null);
    let time = |v: Option<i64>| -> Result<FieldValue> { Ok(FieldValue::from(v.map(from_micros).transpose()?)) };
    Ok(match field {
      JobField::JobId => self.job_id.map(FieldValue::Int).unwrap_or(FieldValue::Null),
      JobField::Status => text(&self.status),
      JobField::MinorStatus => text(&self.minor_status),
      JobField::ApplicationStatus => text(&self.application_status),
      JobField::Owner => text(&self.owner),
      JobField::OwnerGroup => text(&self.owner_group),
      JobField::Vo => text(&self.vo),
      JobField::SubmissionTime => time(self.submission_time_us)?,
      JobField::LastUpdateTime => time(self.last_update_time_us)?,
      JobField::StartExecTime => time(self.start_exec_time_us)?,
      JobField::EndExecTime => time(self.end_exec_time_us)?,
      JobField::HeartBeatTime => time(self.heart_beat_time_us)?,
    })
  }

  fn into_group(self, grouping: &Grouping) -> Result<GroupCount> {
    let keys = grouping.fields()
                       .iter()
                       .map(|f| Ok((f.name().to_string(), self.value(*f)?)))
                       .collect::<Result<_>>()?;
    Ok(GroupCount { keys, count: u64::try_from(self.group_count).unwrap_or(0) })
  }
}

/// Vista de una transacción abierta sobre una conexión.
struct DieselTx<'c> {
  conn: &'c mut DbConn,
}

impl JobRecordStore for DieselTx<'_> {
  fn create(&mut self, new_job: &NewJob) -> Result<InsertedJob> {
    let conn = &mut *self.conn;
    let now = now_micros()?;
    let row = NewJobRow { status: &new_job.initial_status,
                          minor_status: &new_job.initial_minor_status,
                          application_status: "",
                          owner: &new_job.owner,
                          owner_group: &new_job.owner_group,
                          vo: &new_job.vo,
                          submission_time_us: now.timestamp_micros(),
                          last_update_time_us: now.timestamp_micros() };
    let job_id: i64 = map_db_err(diesel::insert_into(jobs::table).values(&row)
                                                                 .returning(jobs::job_id)
                                                                 .get_result(conn))?;
    let jdl = JdlRow { job_id, jdl: new_job.description.clone() };
    map_db_err(diesel::insert_into(job_jdls::table).values(&jdl).execute(conn))?;
    log::debug!("job {} insertado para {}/{}", job_id, new_job.owner, new_job.vo);
    Ok(InsertedJob { job_id,
                     status: new_job.initial_status.clone(),
                     minor_status: new_job.initial_minor_status.clone(),
                     time_stamp: now })
  }

  fn get_job(&mut self, job_id: JobId) -> Result<JobRecord> {
    let row = map_db_err(jobs::table.find(job_id).first::<JobRow>(&mut *self.conn).optional())?;
    row.ok_or_else(|| JobError::NotFound(format!("job {}", job_id)))?.into_record()
  }

  fn get_job_description(&mut self, job_id: JobId) -> Result<String> {
    let jdl = map_db_err(job_jdls::table.find(job_id)
                                        .select(job_jdls::jdl)
                                        .first::<String>(&mut *self.conn)
                                        .optional())?;
    jdl.ok_or_else(|| JobError::NotFound(format!("descripción del job {}", job_id)))
  }

  fn set_attributes(&mut self, job_id: JobId, attributes: &JobAttributes) -> Result<()> {
    let patch = attributes.to_patch(now_micros()?)?;
    if patch.is_empty() {
      // nada que escribir, pero el job tiene que existir
      return self.get_job(job_id).map(|_| ());
    }
    let changes = JobChangeset { status: patch.status,
                                 minor_status: patch.minor_status,
                                 application_status: patch.application_status,
                                 heart_beat_time_us: patch.heart_beat_time.map(|t| t.timestamp_micros()),
                                 last_update_time_us: patch.last_update_time.map(|t| t.timestamp_micros()) };
    let n = map_db_err(diesel::update(jobs::table.find(job_id)).set(&changes).execute(&mut *self.conn))?;
    if n == 0 {
      return Err(JobError::NotFound(format!("job {}", job_id)));
    }
    log::debug!("atributos actualizados para el job {}", job_id);
    Ok(())
  }

  fn set_status(&mut self, job_id: JobId, status: &JobStatusTriple) -> Result<()> {
    let n = map_db_err(diesel::update(jobs::table.find(job_id)).set((jobs::status.eq(&status.status),
                                                                     jobs::minor_status.eq(&status.minor_status),
                                                                     jobs::application_status
                                                                       .eq(&status.application_status)))
                                                                .execute(&mut *self.conn))?;
    if n == 0 {
      return Err(JobError::NotFound(format!("ninguna fila actualizada para el job {}", job_id)));
    }
    log::debug!("job {} -> {}", job_id, status);
    Ok(())
  }

  fn set_start_exec_time(&mut self, job_id: JobId, start_time: DateTime<Utc>) -> Result<()> {
    let us = start_time.timestamp_micros();
    let target = jobs::table.filter(jobs::job_id.eq(job_id)).filter(jobs::start_exec_time_us.is_null());
    let n = map_db_err(diesel::update(target).set((jobs::start_exec_time_us.eq(Some(us)),
                                                   jobs::heart_beat_time_us.eq(Some(us))))
                                             .execute(&mut *self.conn))?;
    if n == 0 {
      return Err(JobError::Conflict(format!("ninguna fila actualizada para el job {}", job_id)));
    }
    log::debug!("StartExecTime fijado para el job {}", job_id);
    Ok(())
  }

  fn set_end_exec_time(&mut self, job_id: JobId, end_time: DateTime<Utc>) -> Result<()> {
    let target = jobs::table.filter(jobs::job_id.eq(job_id)).filter(jobs::end_exec_time_us.is_null());
    let n = map_db_err(diesel::update(target).set(jobs::end_exec_time_us.eq(Some(end_time.timestamp_micros())))
                                             .execute(&mut *self.conn))?;
    if n == 0 {
      return Err(JobError::Conflict(format!("ninguna fila actualizada para el job {}", job_id)));
    }
    log::debug!("EndExecTime fijado para el job {}", job_id);
    Ok(())
  }

  fn set_heartbeat_time(&mut self, job_id: JobId, time: DateTime<Utc>) -> Result<()> {
    let n = map_db_err(diesel::update(jobs::table.find(job_id)).set(jobs::heart_beat_time_us
                                                                      .eq(Some(time.timestamp_micros())))
                                                                .execute(&mut *self.conn))?;
    if n == 0 {
      return Err(JobError::NotFound(format!("ninguna fila actualizada para el job {}", job_id)));
    }
    Ok(())
  }

  fn run_search(&mut self, search: &CompiledSearch) -> Result<Vec<SearchRow>> {
    let query = apply_filter(jobs::table.into_boxed(), &search.filter)?;
    let query = apply_sort(query, &search.sort);
    let limit = i64::try_from(search.per_page).unwrap_or(i64::MAX);
    let rows = map_db_err(query.limit(limit).load::<JobRow>(&mut *self.conn))?;
    rows.into_iter()
        .map(|r| Ok(search.projection.project(&r.into_record()?)))
        .collect()
  }

  fn run_summary(&mut self, grouping: &Grouping, filter: &JobFilter) -> Result<Vec<GroupCount>> {
    let conditions = SqlWhere::compile(filter)?;
    let sql = summary_sql(grouping, &conditions);
    log::debug!("resumen agrupado: {}", sql);
    let mut query = diesel::sql_query(sql).into_boxed::<DbBackend>();
    for bind in conditions.binds {
      query = match bind {
        SqlBind::Int(v) => query.bind::<BigInt, _>(v),
        SqlBind::Text(v) => query.bind::<Text, _>(v),
      };
    }
    let rows = map_db_err(query.load::<SummaryRow>(&mut *self.conn))?;
    rows.into_iter()
        // sin GROUP BY, una tabla vacía devuelve una fila con count 0
        .filter(|r| r.group_count > 0)
        .map(|r| r.into_group(grouping))
        .collect()
  }
}

impl JobLoggingStore for DieselTx<'_> {
  fn append(&mut self, record: &NewLoggingRecord) -> Result<LoggingRecord> {
    let conn = &mut *self.conn;
    let last: Option<i64> = map_db_err(logging_info::table.filter(logging_info::job_id.eq(record.job_id))
                                                          .select(max(logging_info::seq_num))
                                                          .first(conn))?;
    let mut stored = record.prepare(last.unwrap_or(0) + 1, now_micros()?);
    stored.status_time = from_micros(stored.status_time.timestamp_micros())?;
    map_db_err(diesel::insert_into(logging_info::table).values(&LoggingRow::from_record(&stored))
                                                       .execute(conn))?;
    log::debug!("historial del job {}: registro {} desde {}", stored.job_id, stored.seq_num, stored.status_source);
    Ok(stored)
  }

  fn logging_records(&mut self, job_id: JobId) -> Result<Vec<LoggingRecord>> {
    let rows = map_db_err(logging_info::table.filter(logging_info::job_id.eq(job_id))
                                             .order((logging_info::status_time_order.asc(),
                                                     logging_info::status_time_us.asc(),
                                                     logging_info::seq_num.asc()))
                                             .load::<LoggingRow>(&mut *self.conn))?;
    rows.into_iter().map(LoggingRow::into_record).collect()
  }

  fn delete_history(&mut self, job_ids: &[JobId]) -> Result<()> {
    if job_ids.is_empty() {
      return Ok(());
    }
    let n = map_db_err(diesel::delete(logging_info::table.filter(logging_info::job_id.eq_any(job_ids.to_vec())))
                         .execute(&mut *self.conn))?;
    log::debug!("{} registros de historial borrados para {} jobs", n, job_ids.len());
    Ok(())
  }
}

fn pool_size_from_env() -> Result<u32> {
  match std::env::var("JOBDB_POOL_SIZE") {
    Ok(v) => v.trim()
              .parse::<u32>()
              .ok()
              .filter(|n| *n > 0)
              .ok_or_else(|| JobError::Validation(format!("JOBDB_POOL_SIZE inválido: {}", v))),
    Err(_) => Ok(DEFAULT_POOL_SIZE),
  }
}

/// Crear el store desde las variables de entorno (`JOBDB_URL`, con
/// `DATABASE_URL` como alternativa, y `JOBDB_POOL_SIZE`).
pub fn new_from_env() -> Result<DieselJobStore> {
  dotenvy::dotenv().ok();
  let url = std::env::var("JOBDB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                      .map_err(|_| JobError::Validation("JOBDB_URL / DATABASE_URL not set".into()))?;
  let pool_size = pool_size_from_env()?;
  let l = url.to_lowercase();
  if cfg!(feature = "pg") {
    if !(l.starts_with("postgres") || url.contains('@')) {
      return Err(JobError::Validation("JOBDB_URL / DATABASE_URL does not look like Postgres URL".into()));
    }
  } else if !(l.starts_with("file:") || l.contains("mode=memory") || l.contains("sqlite") || l.ends_with(".db")) {
    return Err(JobError::Validation("job-persistence was compiled without 'pg' feature; enable the 'pg' feature to \
                                     use Postgres in production"
                                                                .into()));
  }
  DieselJobStore::new(&url, pool_size)
}

// Helper de pruebas: store SQLite explícito, sin leer el entorno.
#[cfg(not(feature = "pg"))]
pub fn new_sqlite_for_test(database_url: &str) -> Result<DieselJobStore> {
  DieselJobStore::new(database_url, DEFAULT_POOL_SIZE)
}
