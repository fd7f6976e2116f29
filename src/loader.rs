use crate::engine::{RolloverOutcome, Session};
use crate::error::{CalcError, CalcResult};
use crate::record::{DayRecord, MonthKey, MonthSummary};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

const DAY_KEYS: [&str; 2] = ["days", "historicalData"];
const MONTH_KEYS: [&str; 2] = ["months", "monthlyData"];

/// Data read from a JSON backup, already normalized
#[derive(Debug, Clone, Default)]
pub struct ImportedData {
    pub days: BTreeMap<NaiveDate, DayRecord>,
    pub months: BTreeMap<MonthKey, MonthSummary>,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub day_count: usize,
    pub month_count: usize,
    pub skipped: usize,
    pub repaired: Vec<NaiveDate>,
    pub rollover: RolloverOutcome,
}

/// Parse a JSON backup
///
/// The document must be an object with at least one of `days` or
/// `months` (`historicalData` / `monthlyData` are read as aliases).
/// Each record goes through the same normalization as stored documents;
/// unreadable entries are skipped and counted.
///
/// # Examples
/// ```
/// use daily_calculator::loader::from_json;
///
/// let data = from_json(r#"{"days": {"2025-01-02": {"stepA": {"value1": 5}}}}"#).unwrap();
/// assert_eq!(data.days.len(), 1);
/// assert!(from_json(r#"{"unrelated": true}"#).is_err());
/// ```
pub fn from_json(text: &str) -> CalcResult<ImportedData> {
    let root: Value = serde_json::from_str(text)?;
    let Value::Object(root) = root else {
        return Err(CalcError::Import("backup must be a JSON object".to_string()));
    };

    let day_section = section(&root, &DAY_KEYS)?;
    let month_section = section(&root, &MONTH_KEYS)?;
    if day_section.is_none() && month_section.is_none() {
        return Err(CalcError::Import(
            "no recognized section (expected \"days\" or \"months\")".to_string(),
        ));
    }

    let mut imported = ImportedData::default();

    if let Some(entries) = day_section {
        for (id, doc) in entries {
            match DayRecord::from_document(id, doc) {
                Ok(record) => {
                    imported.days.insert(record.date, record);
                }
                Err(e) => {
                    warn!("import: skipping day {}: {}", id, e);
                    imported.skipped += 1;
                }
            }
        }
    }

    if let Some(entries) = month_section {
        for (id, doc) in entries {
            match MonthSummary::from_document(id, doc) {
                Ok(summary) => {
                    imported.months.insert(summary.month, summary);
                }
                Err(e) => {
                    warn!("import: skipping month {}: {}", id, e);
                    imported.skipped += 1;
                }
            }
        }
    }

    Ok(imported)
}

pub fn from_json_file(path: impl AsRef<Path>) -> CalcResult<ImportedData> {
    let text = std::fs::read_to_string(path).map_err(|e| CalcError::Import(e.to_string()))?;
    from_json(&text)
}

fn section<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> CalcResult<Option<&'a Map<String, Value>>> {
    for key in keys {
        match root.get(*key) {
            Some(Value::Object(entries)) => return Ok(Some(entries)),
            Some(Value::Null) | None => continue,
            Some(_) => {
                return Err(CalcError::Import(format!("\"{}\" must be an object", key)));
            }
        }
    }
    Ok(None)
}

impl Session {
    /// Replace the session's data with an import, then repair the
    /// accumulation chains and rerun rollover and active-day detection.
    pub fn apply_import(
        &mut self,
        imported: ImportedData,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> ImportReport {
        let day_count = imported.days.len();
        let month_count = imported.months.len();
        self.replace_data(imported.days, imported.months);

        let repaired = self.repair_all();
        let rollover = self.check_rollover(today, now);
        if self.active_day.is_none() {
            self.start_active_day(today);
        }

        info!(
            "imported {} day(s) and {} month(s), {} repaired",
            day_count,
            month_count,
            repaired.len()
        );
        ImportReport {
            day_count,
            month_count,
            skipped: imported.skipped,
            repaired,
            rollover,
        }
    }
}
