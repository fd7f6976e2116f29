use crate::currency::format_currency;
use crate::engine::Session;
use crate::record::{DayRecord, MonthKey, MonthSummary};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;

pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub day_count: usize,
    pub month_count: usize,
    pub active_month: Option<MonthKey>,
    pub format_version: u32,
}

/// Full backup of a session: every day, every summary and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub days: BTreeMap<NaiveDate, DayRecord>,
    pub months: BTreeMap<MonthKey, MonthSummary>,
    pub metadata: ExportMetadata,
}

impl ExportDocument {
    pub fn from_session(session: &Session, exported_at: DateTime<Utc>) -> Self {
        ExportDocument {
            days: session.days.clone(),
            months: session.months.clone(),
            metadata: ExportMetadata {
                exported_at,
                day_count: session.days.len(),
                month_count: session.months.len(),
                active_month: session.active_month,
                format_version: EXPORT_FORMAT_VERSION,
            },
        }
    }
}

/// Serialize the session as a pretty-printed JSON backup
///
/// The result can be read back with [`crate::loader::from_json`].
///
/// # Arguments
/// * `session` - Session to export
/// * `exported_at` - Timestamp written into the metadata block
pub fn to_json(session: &Session, exported_at: DateTime<Utc>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ExportDocument::from_session(session, exported_at))
}

const DAY_HEADERS: [&str; 12] = [
    "Date",
    "Step 1 value 1",
    "Step 1 value 2",
    "Step 1 daily total",
    "Step 1 previous accumulated",
    "Step 1 accumulated",
    "Step 2 value 1",
    "Step 2 value 2",
    "Step 2 daily total",
    "Step 2 previous accumulated",
    "Step 2 accumulated",
    "Percentage",
];

const MONTH_HEADERS: [&str; 10] = [
    "Month",
    "Days",
    "First day",
    "Last day",
    "Step 1 total",
    "Step 2 total",
    "Grand total",
    "Step 1 final accumulated",
    "Step 2 final accumulated",
    "Final percentage",
];

fn day_numbers(day: &DayRecord) -> [f64; 10] {
    [
        day.step_a.value1 as f64,
        day.step_a.value2 as f64,
        day.step_a.daily_total as f64,
        day.step_a.previous_accumulated as f64,
        day.step_a.accumulated as f64,
        day.step_b.value1 as f64,
        day.step_b.value2 as f64,
        day.step_b.daily_total as f64,
        day.step_b.previous_accumulated as f64,
        day.step_b.accumulated as f64,
    ]
}

/// Convert the day table to CSV
///
/// One header row, then one row per recorded day in date order. Amounts
/// are written as plain integers so the file re-imports into any
/// spreadsheet; the percentage keeps two decimals.
pub fn to_csv(session: &Session) -> Result<String, Box<dyn Error>> {
    let mut csv_content = DAY_HEADERS.join(",");
    csv_content.push('\n');

    for day in session.days.values() {
        csv_content.push_str(&day.document_id());
        for value in day_numbers(day) {
            csv_content.push(',');
            csv_content.push_str(&(value as u64).to_string());
        }
        csv_content.push_str(&format!(",{:.2}\n", day.percentage));
    }

    Ok(csv_content)
}

/// Convert the session to an XLSX report
///
/// Writes a "Days" sheet with every recorded day and a "Months" sheet with
/// every consolidated month, using rust_xlsxwriter. The report is meant
/// for people; nothing reads it back.
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
pub fn to_xlsx(session: &Session) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();

    let mut days_sheet = Worksheet::new();
    days_sheet.set_name("Days")?;
    for (c, header) in DAY_HEADERS.iter().enumerate() {
        days_sheet.write_string(0, c as u16, *header)?;
    }
    for (r, day) in session.days.values().enumerate() {
        let row = (r + 1) as u32;
        days_sheet.write_string(row, 0, &day.document_id())?;
        for (c, value) in day_numbers(day).iter().enumerate() {
            days_sheet.write_number(row, (c + 1) as u16, *value)?;
        }
        days_sheet.write_number(row, 11, day.percentage)?;
    }
    workbook.push_worksheet(days_sheet);

    let mut months_sheet = Worksheet::new();
    months_sheet.set_name("Months")?;
    for (c, header) in MONTH_HEADERS.iter().enumerate() {
        months_sheet.write_string(0, c as u16, *header)?;
    }
    for (r, summary) in session.months.values().enumerate() {
        let row = (r + 1) as u32;
        months_sheet.write_string(row, 0, &summary.document_id())?;
        months_sheet.write_number(row, 1, summary.day_count as f64)?;
        months_sheet.write_string(row, 2, &summary.first_day.to_string())?;
        months_sheet.write_string(row, 3, &summary.last_day.to_string())?;
        months_sheet.write_number(row, 4, summary.totals_by_step.step_a as f64)?;
        months_sheet.write_number(row, 5, summary.totals_by_step.step_b as f64)?;
        months_sheet.write_number(row, 6, summary.grand_total as f64)?;
        months_sheet.write_number(row, 7, summary.final_accumulated.step_a as f64)?;
        months_sheet.write_number(row, 8, summary.final_accumulated.step_b as f64)?;
        months_sheet.write_number(row, 9, summary.final_percentage)?;
    }
    workbook.push_worksheet(months_sheet);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Plain-text summary of one month, as shown after a rollover
pub fn month_report(summary: &MonthSummary) -> String {
    format!(
        "Month {} consolidated\n- {} recorded day(s) ({} to {})\n- Total Step 1: {}\n- Total Step 2: {}\n- Grand total: {}\n- Final percentage: {:.2}%",
        summary.month,
        summary.day_count,
        summary.first_day,
        summary.last_day,
        format_currency(summary.totals_by_step.step_a),
        format_currency(summary.totals_by_step.step_b),
        format_currency(summary.grand_total),
        summary.final_percentage
    )
}
