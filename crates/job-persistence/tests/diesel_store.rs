use chrono::{Duration, TimeZone, Utc};
use job_domain::{FieldValue, InMemoryJobStore, JobError, JobLoggingStore, JobRecordStore, JobStatusTriple, JobStore, NewJob,
                 NewLoggingRecord, SearchSpec, SortSpec, StatusValue};
use uuid::Uuid;

fn new_job(owner: &str) -> NewJob {
  NewJob { description: format!("Executable = \"{}.sh\";", owner),
           owner: owner.into(),
           owner_group: "lhcb_user".into(),
           vo: "lhcb".into(),
           initial_status: "Received".into(),
           initial_minor_status: "Job accepted".into() }
}

/// Lanza `body` contra un store SQLite en un fichero temporal.
fn with_sqlite_store(body: impl FnOnce(&job_persistence::DieselJobStore)) {
  // If crate was built with the `pg` feature, skip these sqlite-only tests.
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return;
  }
  #[cfg(not(feature = "pg"))]
  {
    let tmp_path = std::env::temp_dir().join(format!("jobdb_test_{}.db", Uuid::new_v4()));
    let store = job_persistence::new_sqlite_for_test(tmp_path.to_str().unwrap()).expect("failed to create store");
    body(&store);
    drop(store);
    let _ = std::fs::remove_file(&tmp_path);
  }
  #[cfg(feature = "pg")]
  {
    let _ = (body, Uuid::new_v4());
  }
}

#[test]
fn create_and_read_back_a_job() {
  with_sqlite_store(|store| {
    let created = store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
    assert_eq!(created.job_id, 1);
    let second = store.transaction(|tx| tx.create(&new_job("bob"))).expect("create");
    assert_eq!(second.job_id, 2);

    let job = store.transaction(|tx| tx.get_job(1)).expect("get");
    assert_eq!(job.owner, "alice");
    assert_eq!(job.status_triple(), JobStatusTriple::new("Received", "Job accepted", ""));
    assert_eq!(job.submission_time, created.time_stamp);
    assert_eq!(job.start_exec_time, None);
    let jdl = store.transaction(|tx| tx.get_job_description(2)).expect("jdl");
    assert_eq!(jdl, "Executable = \"bob.sh\";");

    match store.transaction(|tx| tx.get_job(42)) {
      Err(JobError::NotFound(_)) => {}
      other => panic!("expected NotFound, got: {:?}", other),
    }
  });
}

#[test]
fn write_once_times_and_heartbeat() {
  with_sqlite_store(|store| {
    store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let t2 = t1 + Duration::minutes(3);

    store.transaction(|tx| tx.set_start_exec_time(1, t1)).expect("first start");
    match store.transaction(|tx| tx.set_start_exec_time(1, t2)) {
      Err(JobError::Conflict(_)) => {}
      other => panic!("expected Conflict, got: {:?}", other),
    }
    assert_eq!(store.transaction(|tx| tx.get_start_exec_time(1)).unwrap(), Some(t1));
    assert_eq!(store.transaction(|tx| tx.get_heartbeat_time(1)).unwrap(), Some(t1));

    store.transaction(|tx| tx.set_heartbeat_time(1, t2)).expect("heartbeat");
    assert_eq!(store.transaction(|tx| tx.get_heartbeat_time(1)).unwrap(), Some(t2));
    assert!(matches!(store.transaction(|tx| tx.set_heartbeat_time(7, t2)), Err(JobError::NotFound(_))));
    assert!(matches!(store.transaction(|tx| tx.set_end_exec_time(7, t2)), Err(JobError::Conflict(_))));
  });
}

#[test]
fn logging_sequence_and_unchanged_fields_survive_the_database() {
  with_sqlite_store(|store| {
    store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let seqs = store.transaction(|tx| {
                      let a = tx.append(&NewLoggingRecord::new(1, "JobManager").status("Received")
                                                                                .minor_status("Job accepted")
                                                                                .at(t0))?;
                      let b = tx.append(&NewLoggingRecord::new(1, "JobWrapper").minor_status("Downloading")
                                                                                .at(t0 + Duration::seconds(1)))?;
                      Ok(vec![a.seq_num, b.seq_num])
                    })
                    .expect("append");
    assert_eq!(seqs, vec![1, 2]);

    let raw = store.transaction(|tx| tx.logging_records(1)).unwrap();
    assert_eq!(raw[1].status, StatusValue::Unchanged);

    let history = store.transaction(|tx| tx.get_history(1)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, "Received");
    assert_eq!(history[1].minor_status, "Downloading");
    assert_eq!(history[1].application_status, "Unknown");
    assert_eq!(store.transaction(|tx| tx.get_latest_timestamp(1)).unwrap(), t0 + Duration::seconds(1));

    store.transaction(|tx| tx.delete_history(&[1, 99])).unwrap();
    assert!(store.transaction(|tx| tx.get_history(1)).unwrap().is_empty());
    assert!(matches!(store.transaction(|tx| tx.get_latest_timestamp(1)), Err(JobError::NotFound(_))));
  });
}

#[test]
fn failed_unit_of_work_is_rolled_back() {
  with_sqlite_store(|store| {
    store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
    let res = store.transaction(|tx| {
                     tx.set_status(1, &JobStatusTriple::new("Running", "Application", ""))?;
                     tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running"))?;
                     tx.set_status(2, &JobStatusTriple::new("Running", "", ""))
                   });
    assert!(matches!(res, Err(JobError::NotFound(_))));
    assert_eq!(store.transaction(|tx| tx.get_status(1)).unwrap().status, "Received");
    assert!(store.transaction(|tx| tx.logging_records(1)).unwrap().is_empty());
  });
}

#[test]
fn search_and_summary_are_translated_to_sql() {
  with_sqlite_store(|store| {
    store.transaction(|tx| {
           for owner in ["alice", "alice", "bob"] {
             tx.create(&new_job(owner))?;
           }
           tx.set_status(2, &JobStatusTriple::new("Running", "", ""))
         })
         .expect("seed");

    let rows = store.transaction(|tx| {
                      tx.search(Some(&["JobID".to_string(), "Owner".to_string()]),
                                &[SearchSpec::scalar("Status", "eq", "Running")],
                                &[],
                                None,
                                100)
                    })
                    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["JobID"], FieldValue::Int(2));
    assert_eq!(rows[0].keys().cloned().collect::<Vec<_>>(), vec!["JobID".to_string(), "Owner".to_string()]);

    let rows = store.transaction(|tx| {
                      tx.search(Some(&["JobID".to_string()]),
                                &[SearchSpec::vector("Owner", "in", ["alice", "bob"]),
                                  SearchSpec::scalar("StartExecTime", "lt", "2030-01-01 00:00:00")],
                                &[],
                                None,
                                100)
                    })
                    .unwrap();
    // StartExecTime es NULL en todos: ningún predicado sobre un nulo se cumple
    assert!(rows.is_empty());

    let rows = store.transaction(|tx| tx.search(None, &[], &[SortSpec::new("Owner", "desc")], None, 2))
                    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Owner"], FieldValue::Text("bob".into()));

    let groups = store.transaction(|tx| tx.summary(&["Owner".to_string()], &[])).unwrap();
    assert_eq!(groups.len(), 2);
    let alice = groups.iter().find(|g| g.keys["Owner"] == FieldValue::Text("alice".into())).unwrap();
    assert_eq!(alice.count, 2);

    match store.transaction(|tx| tx.search(None, &[SearchSpec::scalar("Colour", "eq", "red")], &[], None, 10)) {
      Err(JobError::Query(_)) => {}
      other => panic!("expected Query error, got: {:?}", other),
    }
  });
}

/// Mismos jobs en ambos stores: alice (1, 3), bob (2), carol (4); 2 y 3 en Running.
fn seed<S: JobStore>(store: &S) {
  store.transaction(|tx| {
         for owner in ["alice", "bob", "alice", "carol"] {
           tx.create(&new_job(owner))?;
         }
         tx.set_status(2, &JobStatusTriple::new("Running", "", ""))?;
         tx.set_status(3, &JobStatusTriple::new("Running", "", ""))
       })
       .expect("seed");
}

#[test]
fn summary_matches_the_in_memory_grouping() {
  with_sqlite_store(|store| {
    let memory = InMemoryJobStore::new();
    let empty_sql = store.transaction(|tx| tx.summary(&[], &[])).unwrap();
    let empty_mem = memory.transaction(|tx| tx.summary(&[], &[])).unwrap();
    assert!(empty_sql.is_empty());
    assert_eq!(empty_sql, empty_mem);

    seed(store);
    seed(&memory);
    let cases: Vec<(Vec<String>, Vec<SearchSpec>)> =
      vec![(vec![], vec![]),
           (vec!["Status".into()], vec![]),
           (vec!["Owner".into(), "Status".into()], vec![]),
           (vec!["Status".into()], vec![SearchSpec::vector("Owner", "not in", ["carol"])]),
           (vec!["Owner".into()], vec![SearchSpec::scalar("Owner", "like", "%li%")]),
           (vec!["Owner".into()], vec![SearchSpec::vector("JobID", "in", ["2", "4"])]),
           (vec!["Owner".into()], vec![SearchSpec::vector("Owner", "in", Vec::<String>::new())]),
           (vec!["StartExecTime".into()], vec![SearchSpec::scalar("Status", "neq", "Received")])];
    for (grouping, search) in cases {
      let sql = store.transaction(|tx| tx.summary(&grouping, &search)).unwrap();
      let mem = memory.transaction(|tx| tx.summary(&grouping, &search)).unwrap();
      assert_eq!(sql, mem, "agrupando por {:?} con {:?}", grouping, search);
    }

    let groups = store.transaction(|tx| tx.summary(&["Owner".to_string(), "Status".to_string()], &[])).unwrap();
    let keys: Vec<(FieldValue, FieldValue, u64)> =
      groups.iter().map(|g| (g.keys["Owner"].clone(), g.keys["Status"].clone(), g.count)).collect();
    assert_eq!(keys,
               vec![(FieldValue::Text("alice".into()), FieldValue::Text("Received".into()), 1),
                    (FieldValue::Text("bob".into()), FieldValue::Text("Running".into()), 1),
                    (FieldValue::Text("alice".into()), FieldValue::Text("Running".into()), 1),
                    (FieldValue::Text("carol".into()), FieldValue::Text("Received".into()), 1)]);
    assert_eq!(groups[0].keys.keys().collect::<Vec<_>>(), vec!["Owner", "Status"]);

    let all = store.transaction(|tx| tx.summary(&[], &[])).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].keys.is_empty());
    assert_eq!(all[0].count, 4);

    match store.transaction(|tx| tx.summary(&["Owner".to_string()], &[SearchSpec::scalar("JobID", "like", "1%")])) {
      Err(JobError::Query(_)) => {}
      other => panic!("expected Query error, got: {:?}", other),
    }
  });
}

#[test]
fn concurrent_creates_get_distinct_ids() {
  with_sqlite_store(|store| {
    let ids: Vec<i64> = std::thread::scope(|s| {
      let handles: Vec<_> = (0..8).map(|_| s.spawn(move || store.transaction(|tx| tx.create(&new_job("alice"))))).collect();
      handles.into_iter().map(|h| h.join().unwrap().expect("create").job_id).collect()
    });
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=8).collect::<Vec<i64>>());
    let next = store.transaction(|tx| tx.create(&new_job("bob"))).expect("create");
    assert_eq!(next.job_id, 9);
  });
}

#[test]
fn concurrent_appends_get_gap_free_seq_nums() {
  with_sqlite_store(|store| {
    store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
    let mut seqs: Vec<i64> = std::thread::scope(|s| {
      let handles: Vec<_> =
        (0..8).map(|i| {
                s.spawn(move || {
                  let rec = NewLoggingRecord::new(1, "JobWrapper").application_status(format!("step {}", i));
                  store.transaction(|tx| tx.append(&rec))
                })
              })
              .collect();
      handles.into_iter().map(|h| h.join().unwrap().expect("append").seq_num).collect()
    });
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=8).collect::<Vec<i64>>());
    assert_eq!(store.transaction(|tx| tx.logging_records(1)).unwrap().len(), 8);
  });
}

#[test]
fn in_memory_database_opens_without_wal() {
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return;
  }
  // Una sola conexión: cada conexión `:memory:` es una base distinta.
  let store = job_persistence::DieselJobStore::new(":memory:", 1).expect("in-memory store");
  let created = store.transaction(|tx| tx.create(&new_job("alice"))).expect("create");
  assert_eq!(created.job_id, 1);
  assert_eq!(store.transaction(|tx| tx.get_status(1)).unwrap().status, "Received");
}
