use chrono::{NaiveDate, TimeZone, Utc};
use daily_calculator::downloader::{ExportDocument, month_report, to_csv, to_json, to_xlsx};
use daily_calculator::loader::{from_json, from_json_file};
use daily_calculator::{CalcError, PerStep, Session, StepInput};
use tempfile::tempdir;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn sample_session() -> Session {
    let mut session = Session::new();
    let today = date("2025-02-10");
    let inputs = |a: u64, b: u64| PerStep::new(StepInput::new(a, 0), StepInput::new(b, 0));
    session
        .save_day_record(date("2025-01-20"), inputs(80, 100), today)
        .unwrap();
    session
        .save_day_record(date("2025-01-21"), inputs(20, 0), today)
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

#[test]
fn json_backup_restores_the_same_data() {
    let session = sample_session();
    let exported_at = Utc.with_ymd_and_hms(2025, 2, 10, 8, 30, 0).unwrap();
    let text = to_json(&session, exported_at).unwrap();

    let document: ExportDocument = serde_json::from_str(&text).unwrap();
    assert_eq!(document.metadata.day_count, 3);
    assert_eq!(document.metadata.month_count, 1);
    assert_eq!(document.metadata.exported_at, exported_at);

    let imported = from_json(&text).unwrap();
    assert_eq!(imported.skipped, 0);

    let mut restored = Session::new();
    restored.active_month = session.active_month;
    let report = restored.apply_import(imported, date("2025-02-10"), exported_at);

    assert_eq!(report.day_count, 3);
    assert_eq!(report.month_count, 1);
    assert!(report.repaired.is_empty());
    assert!(!report.rollover.rollover.rolled_over);
    assert_eq!(restored.days, session.days);
    assert_eq!(restored.months, session.months);
    assert_eq!(restored.active_day.unwrap().date, date("2025-02-10"));
}

#[test]
fn import_reruns_rollover_against_today() {
    let session = sample_session();
    let text = to_json(&session, Utc::now()).unwrap();

    let mut restored = Session::new();
    restored.active_month = session.active_month;
    let now = Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap();
    let report = restored.apply_import(from_json(&text).unwrap(), date("2025-03-02"), now);

    assert!(report.rollover.rollover.rolled_over);
    let summary = report.rollover.summary.unwrap();
    assert_eq!(summary.month.to_string(), "2025-02");
    assert_eq!(summary.day_count, 1);
    assert_eq!(restored.months.len(), 2);
    assert_eq!(restored.active_month.unwrap().to_string(), "2025-03");
}

#[test]
fn import_repairs_broken_chains_and_reads_aliases() {
    let text = r#"{
        "historicalData": {
            "2025-05-01": { "stepA": { "value1": "$ 1.000", "value2": 0 }, "stepB": { "value1": 500 } },
            "2025-05-02": {
                "stepA": { "value1": 10, "previousAccumulated": 3 },
                "stepB": { "value1": 10, "previousAccumulated": 3 }
            },
            "garbage": 42
        }
    }"#;

    let imported = from_json(text).unwrap();
    assert_eq!(imported.days.len(), 2);
    assert_eq!(imported.skipped, 1);

    let mut session = Session::new();
    let report = session.apply_import(
        imported,
        date("2025-05-20"),
        Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap(),
    );
    assert_eq!(report.repaired, vec![date("2025-05-02")]);

    let second = session.record(date("2025-05-02")).unwrap();
    assert_eq!(second.previous_accumulated(), PerStep::new(1000, 500));
    assert_eq!(second.accumulated(), PerStep::new(1010, 510));
}

#[test]
fn import_rejects_unrecognized_documents() {
    assert!(matches!(
        from_json(r#"{"settings": {}}"#),
        Err(CalcError::Import(_))
    ));
    assert!(matches!(from_json("[1, 2, 3]"), Err(CalcError::Import(_))));
    assert!(matches!(
        from_json(r#"{"days": []}"#),
        Err(CalcError::Import(_))
    ));
    assert!(matches!(
        from_json("not json"),
        Err(CalcError::Serialization(_))
    ));
}

#[test]
fn import_reads_backup_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.json");
    std::fs::write(&path, to_json(&sample_session(), Utc::now()).unwrap()).unwrap();

    let imported = from_json_file(&path).unwrap();
    assert_eq!(imported.days.len(), 3);
    assert_eq!(imported.months.len(), 1);

    assert!(matches!(
        from_json_file(dir.path().join("missing.json")),
        Err(CalcError::Import(_))
    ));
}

#[test]
fn csv_has_one_row_per_day() {
    let csv = to_csv(&sample_session()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Date,Step 1 value 1"));
    assert_eq!(lines[0].split(',').count(), 12);
    assert_eq!(lines[1], "2025-01-20,80,0,80,0,80,100,0,100,0,100,80.00");
    assert_eq!(lines[2], "2025-01-21,20,0,20,80,100,0,0,0,100,100,0.00");
}

#[test]
fn xlsx_report_is_a_zip_archive() {
    let bytes = to_xlsx(&sample_session()).unwrap();
    assert!(bytes.len() > 100);
    assert_eq!(&bytes[..2], b"PK");
}

#[test]
fn month_report_lists_totals() {
    let session = sample_session();
    let summary = session.months.values().next().unwrap();
    let report = month_report(summary);

    assert!(report.starts_with("Month 2025-01 consolidated"));
    assert!(report.contains("2 recorded day(s)"));
    assert!(report.contains("Total Step 1: $ 100"));
    assert!(report.contains("Grand total: $ 200"));
    assert!(report.contains("Final percentage: 100.00%"));
}
