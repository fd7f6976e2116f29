use chrono::{NaiveDate, TimeZone, Utc};
use daily_calculator::error::StoreError;
use daily_calculator::saving::{load_documents, merge_documents};
use daily_calculator::{
    DAYS_COLLECTION, DocumentStore, FileDocumentStore, JsonFileMirror, LoadSource, LocalMirror,
    MONTHS_COLLECTION, MemoryDocumentStore, MemoryMirror, MonthKey, PerStep, Session, StepInput,
    SyncService,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn sample_session() -> Session {
    let mut session = Session::new();
    let today = date("2025-02-10");
    let inputs = |a: u64, b: u64| PerStep::new(StepInput::new(a, 0), StepInput::new(b, 0));
    session
        .save_day_record(date("2025-01-20"), inputs(10, 20), today)
        .unwrap();
    session
        .save_day_record(date("2025-01-21"), inputs(5, 5), today)
        .unwrap();
    session
        .save_day_record(date("2025-02-03"), inputs(7, 1), today)
        .unwrap();
    session.consolidate(
        "2025-01".parse().unwrap(),
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
    );
    session.active_month = Some("2025-02".parse().unwrap());
    session
}

/// Durable store that is never reachable
struct OfflineStore;

impl DocumentStore for OfflineStore {
    fn upsert(&self, _: &str, _: &str, _: &str, _: &Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    fn delete(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    fn list(&self, _: &str, _: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }
}

/// Lets a test keep a handle on the mirror it hands to the service
struct SharedMirror(Arc<MemoryMirror>);

impl LocalMirror for SharedMirror {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.0.set(key, value)
    }
}

#[test]
fn merge_replaces_only_top_level_fields() {
    let mut existing = json!({ "a": 1, "nested": { "x": 1, "y": 2 } });
    merge_documents(&mut existing, &json!({ "nested": { "x": 5 }, "b": true }));
    assert_eq!(existing, json!({ "a": 1, "nested": { "x": 5 }, "b": true }));
}

#[test]
fn file_store_survives_a_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("documents.bin.gz");

    {
        let store = FileDocumentStore::open(&path).unwrap();
        store
            .upsert("acct", "days", "2025-01-01", &json!({ "date": "2025-01-01", "n": 1 }))
            .unwrap();
        store
            .upsert("acct", "days", "2025-01-01", &json!({ "n": 2 }))
            .unwrap();
        store
            .upsert("acct", "days", "2025-01-02", &json!({ "n": 3 }))
            .unwrap();
        store.delete("acct", "days", "2025-01-02").unwrap();
        store
            .upsert("other", "days", "2025-01-05", &json!({ "n": 9 }))
            .unwrap();
    }

    assert!(path.exists());
    assert_eq!(load_documents(&path).unwrap().len(), 2);

    let store = FileDocumentStore::open(&path).unwrap();
    let listed = store.list("acct", "days").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed["2025-01-01"], json!({ "date": "2025-01-01", "n": 2 }));
    assert!(store.list("acct", "months").unwrap().is_empty());
}

#[test]
fn json_mirror_reads_back_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mirror.json");

    let mirror = JsonFileMirror::open(&path);
    assert_eq!(mirror.get("activeMonth"), None);
    mirror.set("activeMonth", "2025-02").unwrap();

    let reopened = JsonFileMirror::open(&path);
    assert_eq!(reopened.get("activeMonth").as_deref(), Some("2025-02"));
}

#[test]
fn sync_round_trips_through_the_durable_store() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("documents.bin.gz");
    let session = sample_session();

    let sync = SyncService::new(
        "daily-calculator",
        Box::new(FileDocumentStore::open(&store_path).unwrap()),
        Box::new(MemoryMirror::new()),
    );
    let status = sync.persist_all(&session);
    assert!(status.is_ok());
    assert_eq!(status.documents_written, 4);

    let reopened = SyncService::new(
        "daily-calculator",
        Box::new(FileDocumentStore::open(&store_path).unwrap()),
        Box::new(MemoryMirror::new()),
    );
    let loaded = reopened.load().unwrap();
    assert_eq!(loaded.source, LoadSource::Durable);
    assert_eq!(loaded.skipped, 0);
    assert_eq!(loaded.days, session.days);
    assert_eq!(loaded.months, session.months);
}

#[test]
fn load_falls_back_to_the_mirror_when_offline() {
    let mirror = Arc::new(MemoryMirror::new());
    let session = sample_session();

    let online = SyncService::new(
        "daily-calculator",
        Box::new(MemoryDocumentStore::new()),
        Box::new(SharedMirror(mirror.clone())),
    );
    assert!(online.persist_all(&session).is_ok());
    assert!(mirror.get(DAYS_COLLECTION).is_some());
    assert!(mirror.get(MONTHS_COLLECTION).is_some());

    let offline = SyncService::new(
        "daily-calculator",
        Box::new(OfflineStore),
        Box::new(SharedMirror(mirror)),
    );
    let loaded = offline.load().unwrap();
    assert_eq!(loaded.source, LoadSource::Mirror);
    assert_eq!(loaded.days, session.days);
    assert_eq!(loaded.months.len(), 1);
    assert_eq!(loaded.active_month, session.active_month);

    let restored = loaded.into_session();
    assert_eq!(restored.active_month, session.active_month);
}

#[test]
fn failed_writes_are_reported_without_losing_totals() {
    let mut session = Session::new();
    let sync = SyncService::new(
        "daily-calculator",
        Box::new(OfflineStore),
        Box::new(MemoryMirror::new()),
    );

    let outcome = session
        .save_day_record(
            date("2025-03-01"),
            PerStep::new(StepInput::new(100, 50), StepInput::new(0, 0)),
            date("2025-03-01"),
        )
        .unwrap();
    let status = sync.persist_days(&session, &outcome.touched);

    assert!(!status.is_ok());
    assert_eq!(status.documents_written, 0);
    assert!(status.durable_error.is_some());
    assert!(status.mirror_error.is_none());
    assert_eq!(outcome.record.step_a.accumulated, 150);
}

#[test]
fn empty_stores_load_an_empty_session() {
    let sync = SyncService::new(
        "daily-calculator",
        Box::new(MemoryDocumentStore::new()),
        Box::new(MemoryMirror::new()),
    );
    let loaded = sync.load().unwrap();
    assert_eq!(loaded.source, LoadSource::Empty);
    assert!(loaded.days.is_empty());
    assert!(loaded.active_month.is_none());
}

#[test]
fn malformed_documents_are_skipped_on_load() {
    let store = MemoryDocumentStore::new();
    store
        .upsert(
            "acct",
            DAYS_COLLECTION,
            "2025-04-01",
            &json!({ "stepA": { "value1": 3 }, "stepB": { "value1": "4" } }),
        )
        .unwrap();
    store
        .upsert("acct", DAYS_COLLECTION, "not-a-date", &json!({ "stepA": {} }))
        .unwrap();

    let sync = SyncService::new("acct", Box::new(store), Box::new(MemoryMirror::new()));
    let loaded = sync.load().unwrap();
    assert_eq!(loaded.days.len(), 1);
    assert_eq!(loaded.skipped, 1);
    assert_eq!(loaded.days[&date("2025-04-01")].step_b.daily_total, 4);
}

#[test]
fn repaired_chains_are_written_back() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("documents.bin.gz");
    {
        let store = FileDocumentStore::open(&store_path).unwrap();
        store
            .upsert(
                "acct",
                DAYS_COLLECTION,
                "2025-01-01",
                &json!({ "stepA": { "value1": 10 }, "stepB": { "value1": 10 } }),
            )
            .unwrap();
        store
            .upsert(
                "acct",
                DAYS_COLLECTION,
                "2025-01-02",
                &json!({
                    "stepA": { "value1": 5, "previousAccumulated": 999 },
                    "stepB": { "value1": 5, "previousAccumulated": 10 }
                }),
            )
            .unwrap();
    }

    let open_sync = || {
        SyncService::new(
            "acct",
            Box::new(FileDocumentStore::open(&store_path).unwrap()),
            Box::new(MemoryMirror::new()),
        )
    };

    let sync = open_sync();
    let mut session = sync.load().unwrap().into_session();
    session.consolidate(
        "2025-01".parse().unwrap(),
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
    );
    let repaired = session.repair_all();
    assert_eq!(repaired, vec![date("2025-01-02")]);

    let status = sync.persist_repairs(&session, &repaired);
    assert!(status.is_ok());
    assert_eq!(status.documents_written, 2);

    let mut reloaded = open_sync().load().unwrap().into_session();
    let day = &reloaded.days[&date("2025-01-02")];
    assert_eq!(day.previous_accumulated(), PerStep::new(10, 10));
    assert_eq!(day.accumulated(), PerStep::new(15, 15));
    let january: MonthKey = "2025-01".parse().unwrap();
    assert_eq!(reloaded.months[&january].final_accumulated, PerStep::new(15, 15));
    assert!(reloaded.repair_all().is_empty());
}

#[test]
fn corrupt_mirror_loads_as_empty() {
    let mirror = MemoryMirror::new();
    mirror.set(DAYS_COLLECTION, "{ not json").unwrap();
    mirror.set(MONTHS_COLLECTION, "{}").unwrap();

    let sync = SyncService::new("acct", Box::new(OfflineStore), Box::new(mirror));
    let loaded = sync.load().unwrap();
    assert_eq!(loaded.source, LoadSource::Empty);
    assert!(loaded.days.is_empty());
    assert!(loaded.months.is_empty());
}
