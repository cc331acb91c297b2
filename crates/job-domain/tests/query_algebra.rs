use job_domain::{FieldValue, InMemoryJobStore, JobError, JobRecordStore, JobStatusTriple, JobStore, NewJob, SearchSpec,
                 SortSpec};

fn new_job(owner: &str, vo: &str) -> NewJob {
  NewJob { description: format!("JobName = \"{}\";", owner),
           owner: owner.into(),
           owner_group: format!("{}_user", vo),
           vo: vo.into(),
           initial_status: "Received".into(),
           initial_minor_status: "Job accepted".into() }
}

/// Tres jobs de alice (uno en Running) y dos de bob.
fn seeded_store() -> InMemoryJobStore {
  let store = InMemoryJobStore::new();
  store.transaction(|tx| {
         for owner in ["alice", "alice", "alice", "bob", "bob"] {
           tx.create(&new_job(owner, "lhcb"))?;
         }
         tx.set_status(2, &JobStatusTriple::new("Running", "", ""))?;
         tx.set_status(4, &JobStatusTriple::new("Running", "", ""))?;
         Ok(())
       })
       .unwrap();
  store
}

#[test]
fn eq_filter_returns_exactly_the_matching_subset() {
  let store = seeded_store();
  let rows = store.transaction(|tx| {
                    tx.search(Some(&["JobID".to_string()]),
                              &[SearchSpec::scalar("Status", "eq", "Running")],
                              &[SortSpec::new("JobID", "asc")],
                              None,
                              100)
                  })
                  .unwrap();
  let ids: Vec<FieldValue> = rows.iter().map(|r| r["JobID"].clone()).collect();
  assert_eq!(ids, vec![FieldValue::Int(2), FieldValue::Int(4)]);
  assert_eq!(rows[0].len(), 1);
}

#[test]
fn filters_are_a_conjunction() {
  let store = seeded_store();
  let rows = store.transaction(|tx| {
                    tx.search(None,
                              &[SearchSpec::scalar("Status", "eq", "Running"),
                                SearchSpec::scalar("Owner", "neq", "bob")],
                              &[],
                              None,
                              100)
                  })
                  .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0]["JobID"], FieldValue::Int(2));
  // sin proyección: todos los campos reconocidos
  assert_eq!(rows[0].len(), 12);
}

#[test]
fn vector_and_ordered_operators() {
  let store = seeded_store();
  let rows = store.transaction(|tx| {
                    tx.search(Some(&["JobID".to_string()]),
                              &[SearchSpec::vector("JobID", "not in", ["1", "5"]), SearchSpec::scalar("JobID", "gt", "2")],
                              &[SortSpec::new("JobID", "desc")],
                              None,
                              100)
                  })
                  .unwrap();
  let ids: Vec<FieldValue> = rows.iter().map(|r| r["JobID"].clone()).collect();
  assert_eq!(ids, vec![FieldValue::Int(4), FieldValue::Int(3)]);

  let rows = store.transaction(|tx| tx.search(None, &[SearchSpec::scalar("Owner", "like", "al%")], &[], None, 100))
                  .unwrap();
  assert_eq!(rows.len(), 3);
}

#[test]
fn sort_is_stable_across_keys() {
  let store = seeded_store();
  let rows = store.transaction(|tx| {
                    tx.search(Some(&["JobID".to_string(), "Owner".to_string()]),
                              &[],
                              &[SortSpec::new("Owner", "desc"), SortSpec::new("JobID", "asc")],
                              None,
                              100)
                  })
                  .unwrap();
  let ids: Vec<FieldValue> = rows.iter().map(|r| r["JobID"].clone()).collect();
  assert_eq!(ids,
             vec![FieldValue::Int(4), FieldValue::Int(5), FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)]);
}

#[test]
fn malformed_requests_fail_with_query_error() {
  let store = seeded_store();
  let cases: Vec<(Option<Vec<String>>, Vec<SearchSpec>, Vec<SortSpec>)> =
    vec![(None, vec![SearchSpec::scalar("Colour", "eq", "red")], vec![]),
         (None, vec![SearchSpec::scalar("Status", "approx", "Running")], vec![]),
         (None, vec![SearchSpec::scalar("Status", "gt", "Running")], vec![]),
         (None, vec![SearchSpec::scalar("JobID", "like", "1%")], vec![]),
         (None, vec![SearchSpec::scalar("JobID", "eq", "uno")], vec![]),
         (None, vec![], vec![SortSpec::new("JobID", "dsc")]),
         (Some(vec!["JobID".into(), "Colour".into()]), vec![], vec![])];
  for (params, search, sort) in cases {
    let res = store.transaction(|tx| tx.search(params.as_deref(), &search, &sort, None, 100));
    assert!(matches!(res, Err(JobError::Query(_))), "esperaba Query para {:?} {:?} {:?}", params, search, sort);
  }
}

#[test]
fn non_zero_page_fails_loudly() {
  let store = seeded_store();
  let res = store.transaction(|tx| tx.search(None, &[], &[], Some(1), 100));
  assert!(matches!(res, Err(JobError::NotImplemented(_))));
}

#[test]
fn group_by_owner_counts_only_matching_jobs() {
  let store = seeded_store();
  let groups = store.transaction(|tx| tx.summary(&["Owner".to_string()], &[])).unwrap();
  assert_eq!(groups.len(), 2);
  let alice = groups.iter().find(|g| g.keys["Owner"] == FieldValue::Text("alice".into())).unwrap();
  assert_eq!(alice.count, 3);

  // sólo el job 5 (bob, Received) cumple el filtro
  let groups = store.transaction(|tx| {
                      tx.summary(&["Owner".to_string(), "Status".to_string()],
                                 &[SearchSpec::scalar("JobID", "gt", "4")])
                    })
                    .unwrap();
  assert_eq!(groups.len(), 1);
  assert_eq!(groups[0].keys["Owner"], FieldValue::Text("bob".into()));
  assert_eq!(groups[0].count, 1);

  let json = serde_json::to_value(&groups[0]).unwrap();
  assert_eq!(json["count"], 1);
  assert_eq!(json["Status"], "Received");
}
