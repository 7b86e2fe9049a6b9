//! File-backed active job pointer.

use assert_matches::assert_matches;
use ispitch_tracker::persistence::ACTIVE_JOB_KEY;
use ispitch_tracker::{FileStore, PersistenceAdapter, PersistenceError};

#[tokio::test]
async fn missing_file_reads_as_no_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("state.json"));

    assert_eq!(store.get_active_job_id().await.unwrap(), None);
    store.clear_active_job_id().await.unwrap();
    assert!(!store.path().exists());
}

#[tokio::test]
async fn pointer_survives_a_new_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/state.json");

    FileStore::new(&path).set_active_job_id("abc").await.unwrap();

    let reopened = FileStore::new(&path);
    assert_eq!(reopened.get_active_job_id().await.unwrap().as_deref(), Some("abc"));

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[ACTIVE_JOB_KEY], "abc");
}

#[tokio::test]
async fn clear_keeps_unrelated_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"theme":"dark","pending_analysis_id":"abc"}"#).unwrap();

    let store = FileStore::new(&path);
    store.clear_active_job_id().await.unwrap();

    assert_eq!(store.get_active_job_id().await.unwrap(), None);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["theme"], "dark");
    assert!(raw.get(ACTIVE_JOB_KEY).is_none());
}

#[tokio::test]
async fn overwrite_replaces_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("state.json"));

    store.set_active_job_id("first").await.unwrap();
    store.set_active_job_id("second").await.unwrap();

    assert_eq!(store.get_active_job_id().await.unwrap().as_deref(), Some("second"));
}

#[tokio::test]
async fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{not json").unwrap();

    let store = FileStore::new(&path);
    assert_matches!(
        store.get_active_job_id().await,
        Err(PersistenceError::Corrupt { .. })
    );
}

#[tokio::test]
async fn empty_file_reads_as_no_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "").unwrap();

    assert_eq!(FileStore::new(&path).get_active_job_id().await.unwrap(), None);
}

#[tokio::test]
async fn conditional_clear_only_removes_matching_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"theme":"dark","pending_analysis_id":"b"}"#).unwrap();
    let store = FileStore::new(&path);

    assert!(!store.clear_active_job_id_if("a").await.unwrap());
    assert_eq!(store.get_active_job_id().await.unwrap().as_deref(), Some("b"));

    assert!(store.clear_active_job_id_if("b").await.unwrap());
    assert_eq!(store.get_active_job_id().await.unwrap(), None);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["theme"], "dark");
}

#[tokio::test]
async fn conditional_clear_on_missing_file_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("state.json"));

    assert!(!store.clear_active_job_id_if("a").await.unwrap());
    assert!(!store.path().exists());
}
