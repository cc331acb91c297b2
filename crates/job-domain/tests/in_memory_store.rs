use chrono::{Duration, TimeZone, Utc};
use job_domain::{FieldValue, InMemoryJobStore, JobAttributes, JobError, JobField, JobLoggingStore, JobRecordStore,
                 JobStatusTriple, JobStore, NewJob, NewLoggingRecord, StatusValue};

fn new_job() -> NewJob {
  NewJob { description: "Executable = \"/bin/echo\";".into(),
           owner: "alice".into(),
           owner_group: "lhcb_user".into(),
           vo: "lhcb".into(),
           initial_status: "Received".into(),
           initial_minor_status: "Job accepted".into() }
}

fn store_with_job() -> InMemoryJobStore {
  let store = InMemoryJobStore::new();
  store.transaction(|tx| tx.create(&new_job())).unwrap();
  store
}

#[test]
fn job_ids_are_monotonic_and_description_is_kept() {
  let store = InMemoryJobStore::new();
  let (a, b) = store.transaction(|tx| Ok((tx.create(&new_job())?, tx.create(&new_job())?)))
                    .unwrap();
  assert!(b.job_id > a.job_id);
  assert_eq!(a.status, "Received");

  let (job, jdl) = store.transaction(|tx| Ok((tx.get_job(a.job_id)?, tx.get_job_description(a.job_id)?)))
                        .unwrap();
  assert_eq!(job.submission_time, job.last_update_time);
  assert_eq!(job.start_exec_time, None);
  assert_eq!(jdl, "Executable = \"/bin/echo\";");
}

#[test]
fn seq_num_grows_per_job() {
  let store = store_with_job();
  let seqs = store.transaction(|tx| {
                    let mut out = Vec::new();
                    for _ in 0..3 {
                      out.push(tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running"))?.seq_num);
                    }
                    out.push(tx.append(&NewLoggingRecord::new(2, "JobWrapper"))?.seq_num);
                    Ok(out)
                  })
                  .unwrap();
  assert_eq!(seqs, vec![1, 2, 3, 1]);
}

#[test]
fn unchanged_fields_resolve_against_previous_record() {
  let store = store_with_job();
  let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
  let history = store.transaction(|tx| {
                       tx.append(&NewLoggingRecord::new(1, "JobManager").status("Received")
                                                                         .minor_status("Job accepted")
                                                                         .at(t0))?;
                       tx.append(&NewLoggingRecord::new(1, "JobWrapper").minor_status("Downloading")
                                                                         .at(t0 + Duration::seconds(5)))?;
                       tx.get_history(1)
                     })
                     .unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].application_status, "Unknown");
  assert_eq!(history[1].status, "Received");
  assert_eq!(history[1].minor_status, "Downloading");
  assert_eq!(history[1].application_status, "Unknown");
  assert_eq!(history[1].status_source, "JobWrapper");
}

#[test]
fn history_is_sorted_by_status_time_not_insertion() {
  let store = store_with_job();
  let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
  let (history, stamps, latest) =
    store.transaction(|tx| {
           tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Done").at(t0 + Duration::seconds(60)))?;
           tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running").at(t0))?;
           tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running").at(t0 + Duration::seconds(30)))?;
           Ok((tx.get_history(1)?, tx.get_transition_timestamps(1)?, tx.get_latest_timestamp(1)?))
         })
         .unwrap();
  let statuses: Vec<&str> = history.iter().map(|h| h.status.as_str()).collect();
  assert_eq!(statuses, vec!["Running", "Running", "Done"]);
  assert_eq!(stamps["Running"], t0);
  assert_eq!(stamps["Done"], t0 + Duration::seconds(60));
  assert_eq!(latest, t0 + Duration::seconds(60));
}

#[test]
fn long_source_and_application_status_are_truncated() {
  let store = store_with_job();
  let stored = store.transaction(|tx| {
                      tx.append(&NewLoggingRecord::new(1, "x".repeat(40)).application_status("y".repeat(300)))
                    })
                    .unwrap();
  assert_eq!(stored.status_source.chars().count(), 32);
  assert_eq!(stored.application_status, StatusValue::Value("y".repeat(255)));
  assert_eq!(stored.status, StatusValue::Unchanged);
}

#[test]
fn start_exec_time_is_write_once() {
  let store = store_with_job();
  let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
  let t2 = t1 + Duration::minutes(5);
  store.transaction(|tx| tx.set_start_exec_time(1, t1)).unwrap();
  let res = store.transaction(|tx| tx.set_start_exec_time(1, t2));
  assert!(matches!(res, Err(JobError::Conflict(_))));

  let job = store.transaction(|tx| tx.get_job(1)).unwrap();
  assert_eq!(job.start_exec_time, Some(t1));
  assert_eq!(job.heart_beat_time, Some(t1));

  store.transaction(|tx| tx.set_end_exec_time(1, t2)).unwrap();
  let res = store.transaction(|tx| tx.set_end_exec_time(1, t1));
  assert!(matches!(res, Err(JobError::Conflict(_))));
  assert_eq!(store.transaction(|tx| tx.get_end_exec_time(1)).unwrap(), Some(t2));
}

#[test]
fn missing_job_errors() {
  let store = store_with_job();
  let res = store.transaction(|tx| tx.set_status(99, &JobStatusTriple::new("Running", "", "")));
  assert!(matches!(res, Err(JobError::NotFound(_))));
  let res = store.transaction(|tx| tx.set_start_exec_time(99, Utc::now()));
  assert!(matches!(res, Err(JobError::Conflict(_))));
  let res = store.transaction(|tx| tx.get_latest_timestamp(1));
  assert!(matches!(res, Err(JobError::NotFound(_))));
  assert!(store.transaction(|tx| tx.get_history(99)).unwrap().is_empty());
}

#[test]
fn status_attribute_patch_bumps_last_update_time() {
  let store = store_with_job();
  let before = store.transaction(|tx| tx.get_job(1)).unwrap();
  std::thread::sleep(std::time::Duration::from_millis(5));

  let attrs = JobAttributes::new().with(JobField::MinorStatus, FieldValue::Text("Input staged".into()));
  store.transaction(|tx| tx.set_attributes(1, &attrs)).unwrap();
  let after_minor = store.transaction(|tx| tx.get_job(1)).unwrap();
  assert_eq!(after_minor.minor_status, "Input staged");
  assert_eq!(after_minor.last_update_time, before.last_update_time);

  let attrs = JobAttributes::new().with(JobField::Status, FieldValue::Text("Waiting".into()));
  store.transaction(|tx| tx.set_attributes(1, &attrs)).unwrap();
  let after_status = store.transaction(|tx| tx.get_job(1)).unwrap();
  assert_eq!(after_status.status, "Waiting");
  assert!(after_status.last_update_time > before.last_update_time);
}

#[test]
fn delete_history_is_idempotent() {
  let store = store_with_job();
  store.transaction(|tx| {
         tx.append(&NewLoggingRecord::new(1, "JobManager").status("Received"))?;
         tx.delete_history(&[1, 42])?;
         tx.delete_history(&[1])
       })
       .unwrap();
  assert_eq!(store.logging_len(1).unwrap(), 0);
}

#[test]
fn failed_transaction_leaves_no_trace() {
  let store = store_with_job();
  let res: Result<(), JobError> = store.transaction(|tx| {
                                         tx.set_status(1, &JobStatusTriple::new("Running", "", ""))?;
                                         tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running"))?;
                                         tx.set_status(99, &JobStatusTriple::new("Running", "", ""))
                                       });
  assert!(res.is_err());
  assert_eq!(store.transaction(|tx| tx.get_status(1)).unwrap().status, "Received");
  assert_eq!(store.logging_len(1).unwrap(), 0);
}

#[test]
fn only_storage_failures_are_retryable() {
  assert!(JobError::Storage("timeout".into()).is_retryable());
  assert!(!JobError::NotFound("job 1".into()).is_retryable());
  assert!(!JobError::Query("op".into()).is_retryable());
}

#[test]
fn stored_times_have_microsecond_precision() {
  let store = store_with_job();
  let job = store.transaction(|tx| tx.get_job(1)).unwrap();
  assert_eq!(job.submission_time.timestamp_subsec_nanos() % 1_000, 0);
  let rec = store.transaction(|tx| tx.append(&NewLoggingRecord::new(1, "JobWrapper").status("Running"))).unwrap();
  assert_eq!(rec.status_time.timestamp_subsec_nanos() % 1_000, 0);
}
