use chrono::{Duration, Utc};
use job_domain::{FieldValue, InMemoryJobStore, JobError, JobId, JobStore, SearchRequest, SummaryRequest};
use job_manager::{AccessPolicy, ActionType, JobManager, ManagerConfig, PolicyRegistry, QueryScope, StatusChange,
                  TimedStatusChange, UserInfo, WmsAccessPolicy, JOB_ADMINISTRATOR, NORMAL_USER};
use std::collections::BTreeMap;
use std::sync::Arc;

fn user(name: &str) -> UserInfo {
  UserInfo::new(name, "lhcb", "lhcb_user", [NORMAL_USER])
}

fn admin() -> UserInfo {
  UserInfo::new("root", "lhcb", "lhcb_admin", [JOB_ADMINISTRATOR])
}

fn nobody() -> UserInfo {
  UserInfo::new("guest", "lhcb", "lhcb_guest", Vec::<String>::new())
}

/// alice es dueña de 1 y 3, bob de 2.
fn seeded(global_jobs_info: bool) -> JobManager<InMemoryJobStore> {
  let config = ManagerConfig { global_jobs_info, ..ManagerConfig::default() };
  let m = JobManager::new(Arc::new(InMemoryJobStore::new()), config).expect("manager");
  for owner in ["alice", "bob", "alice"] {
    let created = m.submit_jobs(&user(owner), &[format!("owner = {}", owner)]).expect("submit");
    assert!(created[0].is_ok());
  }
  m
}

fn running_update() -> Vec<TimedStatusChange> {
  vec![TimedStatusChange::new(Utc::now() + Duration::minutes(1), StatusChange::new().status("Running"))]
}

#[test]
fn owner_can_read_and_manage_own_jobs() {
  let m = seeded(true);
  let statuses = m.get_bulk_job_status(&user("alice"), &[1, 3]).unwrap();
  assert_eq!(statuses.keys().copied().collect::<Vec<JobId>>(), vec![1, 3]);
  // Ids repetidos cuentan una sola vez.
  assert!(m.get_bulk_job_status(&user("alice"), &[1, 1, 3]).is_ok());
  assert!(m.set_job_status(&user("alice"), 3, StatusChange::new().status("Running"), None, false).is_ok());
}

#[test]
fn batch_with_a_foreign_job_is_denied_as_a_whole() {
  let m = seeded(true);
  assert!(matches!(m.get_bulk_job_status(&user("alice"), &[1, 2, 3]), Err(JobError::Authorization(_))));

  let updates: BTreeMap<JobId, Vec<TimedStatusChange>> = [1, 2, 3].into_iter().map(|id| (id, running_update())).collect();
  assert!(matches!(m.set_status_many(&user("alice"), updates, false), Err(JobError::Authorization(_))));
  for id in [1, 2, 3] {
    assert_eq!(m.get_job_status(&admin(), id).unwrap().status, "Received");
    assert_eq!(m.store().logging_len(id).unwrap(), 1);
  }
}

#[test]
fn unknown_job_is_denied_for_normal_users() {
  let m = seeded(true);
  assert!(matches!(m.get_job_status(&user("alice"), 99), Err(JobError::Authorization(_))));
  // El administrador pasa la puerta y recibe el error del store.
  assert!(matches!(m.get_job_status(&admin(), 99), Err(JobError::NotFound(_))));
}

#[test]
fn administrator_reaches_every_job() {
  let m = seeded(false);
  assert_eq!(m.get_bulk_job_status(&admin(), &[1, 2, 3]).unwrap().len(), 3);
  m.delete_job_history(&admin(), &[2]).unwrap();
  assert!(m.get_job_history(&admin(), 2).unwrap().is_empty());
  let rows = m.search(&admin(), &SearchRequest::default(), None, 100).unwrap();
  assert_eq!(rows.len(), 3);
}

#[test]
fn caller_without_capabilities_is_denied() {
  let m = seeded(true);
  assert!(matches!(m.submit_jobs(&nobody(), &["x".to_string()]), Err(JobError::Authorization(_))));
  assert!(matches!(m.get_job_status(&nobody(), 1), Err(JobError::Authorization(_))));
  assert!(matches!(m.search(&nobody(), &SearchRequest::default(), None, 10), Err(JobError::Authorization(_))));
  // El administrador sin NormalUser tampoco crea jobs.
  assert!(matches!(m.submit_jobs(&admin(), &["x".to_string()]), Err(JobError::Authorization(_))));
}

#[test]
fn create_with_job_ids_is_a_validation_error() {
  let store = InMemoryJobStore::new();
  let policy = WmsAccessPolicy::new(true);
  let res = store.transaction(|tx| policy.check(tx, &user("alice"), ActionType::Create, Some(&[1])));
  assert!(matches!(res, Err(JobError::Validation(_))));
  let res = store.transaction(|tx| policy.check(tx, &user("alice"), ActionType::Read, None));
  assert!(matches!(res, Err(JobError::Validation(_))));
}

#[test]
fn site_toggle_scopes_queries_to_the_caller() {
  let open = seeded(true);
  assert_eq!(open.search(&user("alice"), &SearchRequest::default(), None, 100).unwrap().len(), 3);

  let closed = seeded(false);
  let rows = closed.search(&user("alice"), &SearchRequest::default(), None, 100).unwrap();
  let ids: Vec<FieldValue> = rows.iter().map(|r| r["JobID"].clone()).collect();
  assert_eq!(ids, vec![FieldValue::Int(1), FieldValue::Int(3)]);

  let summary = closed.summary(&user("bob"), &SummaryRequest { grouping: vec!["Owner".into()], search: vec![] })
                      .unwrap();
  assert_eq!(summary.len(), 1);
  assert_eq!(summary[0].keys["Owner"], FieldValue::Text("bob".into()));
  assert_eq!(summary[0].count, 1);

  let store = InMemoryJobStore::new();
  let scope = store.transaction(|tx| WmsAccessPolicy::new(false).check(tx, &user("bob"), ActionType::Query, None))
                   .unwrap();
  assert_eq!(scope, QueryScope::OwnedBy { owner: "bob".into(), vo: "lhcb".into() });
}

struct DenyAll;

impl AccessPolicy for DenyAll {
  fn check(&self,
           _tx: &mut dyn job_domain::JobTransaction,
           user: &UserInfo,
           _action: ActionType,
           _job_ids: Option<&[JobId]>)
           -> job_domain::Result<QueryScope> {
    Err(JobError::Authorization(format!("{} denegado", user.sub)))
  }
}

#[test]
fn registry_resolves_policies_by_name() {
  let mut registry = PolicyRegistry::with_defaults(&ManagerConfig::default());
  registry.register("DenyAll", Arc::new(DenyAll));
  assert_eq!(registry.names(), vec!["DenyAll", "WMSAccessPolicy"]);

  let config = ManagerConfig { policy_name: "DenyAll".into(), ..ManagerConfig::default() };
  let m = JobManager::with_registry(Arc::new(InMemoryJobStore::new()), config, &registry).unwrap();
  assert!(matches!(m.submit_jobs(&user("alice"), &["x".to_string()]), Err(JobError::Authorization(_))));

  let config = ManagerConfig { policy_name: "Nope".into(), ..ManagerConfig::default() };
  assert!(matches!(JobManager::new(Arc::new(InMemoryJobStore::new()), config), Err(JobError::Validation(_))));
}
