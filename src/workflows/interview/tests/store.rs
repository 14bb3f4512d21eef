use tempfile::tempdir;

use super::common::*;
use crate::workflows::interview::bans::BanBook;
use crate::workflows::interview::domain::{
    BanKind, BanOrigin, BanRecord, CandidateProgress, ChannelRef, PipelineState, SubjectId,
};
use crate::workflows::interview::store::{JsonDocumentStore, StoreError};

#[tokio::test]
async fn missing_file_opens_empty_and_saves_on_demand() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("state.json");

    let store = JsonDocumentStore::<PipelineState>::open(&path)
        .await
        .expect("missing file is not an error");
    assert_eq!(store.snapshot(), PipelineState::default());
    assert!(!path.exists());

    store.save().await.expect("saved");
    assert!(path.exists());
}

#[tokio::test]
async fn saved_state_survives_a_reopen() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("state.json");

    let store = JsonDocumentStore::<PipelineState>::open(&path)
        .await
        .expect("opened");
    let record = CandidateProgress::joined(PRIMARY, CANDIDATE, ChannelRef(55), joined_at());
    let key = record.key();
    store
        .transact(|state| state.insert_candidate(record.clone()))
        .await
        .persisted
        .expect("persisted");

    let reopened = JsonDocumentStore::<PipelineState>::open(&path)
        .await
        .expect("reopened");
    let loaded = reopened.read(|state| state.candidates.get(&key).cloned());
    assert_eq!(loaded, Some(record));
    assert_eq!(
        reopened.read(|state| state.key_for_channel(ChannelRef(55))),
        Some(key)
    );
}

#[tokio::test]
async fn legacy_record_array_is_upgraded_in_place() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        r#"[
            {"date": "2025-02-10T12:00:00.123456+09:00", "interviewer_id": 200, "interviewee_id": 100, "result": "PASS"},
            {"date": "2025-02-11T12:00:00+09:00", "interviewer_id": 200, "result": "manual_set"},
            {"timestamp": "2025-02-12T03:00:00Z", "interviewer_id": 201, "subject_id": 101, "result": "FAIL"}
        ]"#,
    )
    .expect("legacy file written");

    let store = JsonDocumentStore::<PipelineState>::open(&path)
        .await
        .expect("legacy layout accepted");
    let records = store.read(|state| state.interview_records.clone());
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].subject_id, Some(SubjectId(100)));
    assert_eq!(
        records[0].timestamp.to_rfc3339(),
        "2025-02-10T03:00:00.123456+00:00"
    );
    assert_eq!(records[1].subject_id, None);
    assert!(store.read(|state| state.candidates.is_empty()));

    let rewritten: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read back"))
            .expect("json on disk");
    assert!(rewritten.is_object(), "file now uses the object layout");
    assert_eq!(rewritten["interview_records"].as_array().map(Vec::len), Some(3));
    assert_eq!(rewritten["interview_records"][0]["subject_id"], 100);
}

#[tokio::test]
async fn corrupt_document_is_refused() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bans.json");
    std::fs::write(&path, "{ not json").expect("written");

    let err = JsonDocumentStore::<BanBook>::open(&path)
        .await
        .expect_err("corrupt file refused");
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert_eq!(
        std::fs::read_to_string(&path).expect("untouched"),
        "{ not json"
    );
}

#[tokio::test]
async fn saves_leave_no_temporary_files_behind() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bans.json");
    let store = JsonDocumentStore::<BanBook>::open(&path)
        .await
        .expect("opened");

    for subject in 0..5u64 {
        let committed = store
            .transact(|book| {
                book.0.insert(
                    SubjectId(subject),
                    BanRecord {
                        origin: BanOrigin::Primary,
                        kind: BanKind::Permanent,
                        recorded_at: joined_at(),
                    },
                )
            })
            .await;
        committed.persisted.expect("persisted");
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .expect("listing")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("bans.json")]);

    let reopened = JsonDocumentStore::<BanBook>::open(&path)
        .await
        .expect("reopened");
    assert_eq!(reopened.read(|book| book.0.len()), 5);
}

#[tokio::test]
async fn in_memory_store_never_touches_disk() {
    let store = JsonDocumentStore::in_memory(PipelineState::default());
    assert!(store.path().is_none());
    store.save().await.expect("no-op save");
}
