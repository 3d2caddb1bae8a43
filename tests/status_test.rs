//! Wire format of status snapshots served to polling clients.

use std::sync::Arc;

use jobq::{Job, JobFn, JobId, JobStatus};
use serde_json::Value;

fn keys(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value
        .as_object()
        .expect("status serializes as an object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    keys
}

#[test]
fn pending_status_omits_outcome_keys() {
    let job = Job::new(JobId(9), Arc::new(JobFn(|| async { anyhow::Ok(()) })));

    let json = serde_json::to_value(job.status()).unwrap();

    assert_eq!(keys(&json), vec!["Complete", "ID", "Start"]);
    assert_eq!(json["ID"], 9);
    assert_eq!(json["Complete"], false);
    // RFC 3339 timestamp
    let start = json["Start"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(start).is_ok());
}

#[tokio::test]
async fn successful_status_has_success_and_finish_but_no_error() {
    let job = Job::new(JobId(1), Arc::new(JobFn(|| async { anyhow::Ok(()) })));
    job.run().await;

    let json = serde_json::to_value(job.status()).unwrap();

    assert_eq!(keys(&json), vec!["Complete", "Finish", "ID", "Start", "Success"]);
    assert_eq!(json["Complete"], true);
    assert_eq!(json["Success"], true);
}

#[tokio::test]
async fn failed_status_carries_error_text() {
    let job = Job::new(
        JobId(2),
        Arc::new(JobFn(|| async { Err::<(), _>(anyhow::anyhow!("timeout talking to db")) })),
    );
    job.run().await;

    let json = serde_json::to_value(job.status()).unwrap();

    assert_eq!(
        keys(&json),
        vec!["Complete", "Error", "Finish", "ID", "Start", "Success"]
    );
    assert_eq!(json["Success"], false);
    assert_eq!(json["Error"], "timeout talking to db");
}

#[tokio::test]
async fn list_serializes_as_array_of_statuses() {
    let done = Job::new(JobId(1), Arc::new(JobFn(|| async { anyhow::Ok(()) })));
    let pending = Job::new(JobId(2), Arc::new(JobFn(|| async { anyhow::Ok(()) })));
    done.run().await;

    let json = serde_json::to_value(vec![done.status(), pending.status()]).unwrap();

    let array = json.as_array().unwrap();
    assert_eq!(array.len(), 2);
    assert!(array[0].get("Finish").is_some());
    assert!(array[1].get("Finish").is_none());
}

#[test]
fn client_payload_without_optional_keys_parses() {
    let payload = r#"{"ID":5,"Complete":false,"Start":"2024-03-01T12:00:00Z"}"#;

    let status: JobStatus = serde_json::from_str(payload).unwrap();

    assert_eq!(status.id, JobId(5));
    assert!(!status.complete);
    assert_eq!(status.success, None);
    assert_eq!(status.error, None);
    assert_eq!(status.finish, None);
}
