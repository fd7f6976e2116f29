use crate::currency::parse_amount;
use crate::engine::{compute_day_totals, consolidate_month};
use crate::error::{CalcError, CalcResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One of the two independent numeric tracks entered every day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    A,
    B,
}

impl Step {
    pub const ALL: [Step; 2] = [Step::A, Step::B];

    pub fn label(&self) -> &'static str {
        match self {
            Step::A => "Step 1",
            Step::B => "Step 2",
        }
    }

    pub fn from_strng(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "a" | "1" | "step1" | "step_a" | "stepa" => Some(Step::A),
            "b" | "2" | "step2" | "step_b" | "stepb" => Some(Step::B),
            _ => None,
        }
    }
}

/// A value kept once per step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerStep<T> {
    pub step_a: T,
    pub step_b: T,
}

impl<T> PerStep<T> {
    pub fn new(step_a: T, step_b: T) -> Self {
        PerStep { step_a, step_b }
    }

    pub fn get(&self, step: Step) -> &T {
        match step {
            Step::A => &self.step_a,
            Step::B => &self.step_b,
        }
    }

    pub fn get_mut(&mut self, step: Step) -> &mut T {
        match step {
            Step::A => &mut self.step_a,
            Step::B => &mut self.step_b,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerStep<U> {
        PerStep {
            step_a: f(&self.step_a),
            step_b: f(&self.step_b),
        }
    }
}

/// The two raw amounts typed for one step on one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    pub value1: u64,
    pub value2: u64,
}

impl StepInput {
    pub fn new(value1: u64, value2: u64) -> Self {
        StepInput { value1, value2 }
    }

    /// Build from free-text fields, see [`parse_amount`]
    pub fn parse(value1: &str, value2: &str) -> Self {
        StepInput {
            value1: parse_amount(value1),
            value2: parse_amount(value2),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value1 == 0 && self.value2 == 0
    }

    pub fn total(&self) -> u64 {
        self.value1.saturating_add(self.value2)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTotals {
    pub value1: u64,
    pub value2: u64,
    pub daily_total: u64,
    pub previous_accumulated: u64,
    pub accumulated: u64,
}

impl StepTotals {
    pub fn input(&self) -> StepInput {
        StepInput::new(self.value1, self.value2)
    }
}

/// Everything recorded for a single calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    pub date: NaiveDate,
    pub step_a: StepTotals,
    pub step_b: StepTotals,
    pub percentage: f64,
    #[serde(default)]
    pub revision: u32,
}

impl DayRecord {
    pub fn step(&self, step: Step) -> &StepTotals {
        match step {
            Step::A => &self.step_a,
            Step::B => &self.step_b,
        }
    }

    pub fn inputs(&self) -> PerStep<StepInput> {
        PerStep::new(self.step_a.input(), self.step_b.input())
    }

    pub fn accumulated(&self) -> PerStep<u64> {
        PerStep::new(self.step_a.accumulated, self.step_b.accumulated)
    }

    pub fn previous_accumulated(&self) -> PerStep<u64> {
        PerStep::new(
            self.step_a.previous_accumulated,
            self.step_b.previous_accumulated,
        )
    }

    pub fn daily_totals(&self) -> PerStep<u64> {
        PerStep::new(self.step_a.daily_total, self.step_b.daily_total)
    }

    pub fn month(&self) -> MonthKey {
        MonthKey::from_date(self.date)
    }

    pub fn document_id(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Rebuild a record from a stored or imported JSON document
    ///
    /// Only the inputs, the date and the stored predecessor baseline are
    /// trusted; every derived field is recomputed. Amounts may be numbers
    /// or free text. A missing `date` falls back to `document_id`.
    pub fn from_document(document_id: &str, document: &Value) -> CalcResult<DayRecord> {
        let raw: RawDay = serde_json::from_value(document.clone())?;
        let date_text = raw.date.as_deref().unwrap_or(document_id);
        let date = parse_date(date_text)?;

        let inputs = PerStep::new(raw.step_a.input(), raw.step_b.input());
        let previous = PerStep::new(
            raw.step_a.previous_accumulated.as_ref().map_or(0, lenient_amount),
            raw.step_b.previous_accumulated.as_ref().map_or(0, lenient_amount),
        );

        let mut record = compute_day_totals(date, &inputs, &previous);
        record.revision = raw.revision.unwrap_or(1).max(1);
        Ok(record)
    }
}

/// `100 * min / max` of two totals, 0 unless both are positive
pub fn percentage_of(a: u64, b: u64) -> f64 {
    if a == 0 || b == 0 {
        return 0.0;
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    low as f64 / high as f64 * 100.0
}

pub fn parse_date(text: &str) -> CalcResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| CalcError::InvalidDate(text.to_string()))
}

/// Calendar month, displayed and serialized as `YYYY-MM`
///
/// Stored as the first day of the month so ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey(NaiveDate);

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(MonthKey)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        MonthKey(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.0.year() && date.month() == self.0.month()
    }

    /// Every date of the month in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.0.iter_days().take_while(|d| self.contains(*d))
    }

    pub fn next(&self) -> Option<MonthKey> {
        self.0
            .checked_add_months(chrono::Months::new(1))
            .map(MonthKey)
    }

    pub fn previous(&self) -> Option<MonthKey> {
        self.0
            .checked_sub_months(chrono::Months::new(1))
            .map(MonthKey)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0.year(), self.0.month())
    }
}

impl FromStr for MonthKey {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let bytes = text.as_bytes();
        let well_formed = bytes.len() == 7
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(CalcError::InvalidMonth(s.to_string()));
        }

        let year: i32 = text[..4]
            .parse()
            .map_err(|_| CalcError::InvalidMonth(s.to_string()))?;
        let month: u32 = text[5..]
            .parse()
            .map_err(|_| CalcError::InvalidMonth(s.to_string()))?;
        MonthKey::new(year, month).ok_or_else(|| CalcError::InvalidMonth(s.to_string()))
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Consolidated view of one finished month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub month: MonthKey,
    pub days_included: Vec<DayRecord>,
    pub totals_by_step: PerStep<u64>,
    pub grand_total: u64,
    pub final_accumulated: PerStep<u64>,
    pub final_accumulated_total: u64,
    pub final_percentage: f64,
    pub day_count: usize,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub consolidated_at: DateTime<Utc>,
}

impl MonthSummary {
    pub fn document_id(&self) -> String {
        self.month.to_string()
    }

    /// Rebuild a summary from a stored or imported JSON document
    ///
    /// The aggregates are re-derived from the included days, so a summary
    /// whose totals drifted from its days is repaired on load.
    pub fn from_document(document_id: &str, document: &Value) -> CalcResult<MonthSummary> {
        let raw: RawMonth = serde_json::from_value(document.clone())?;
        let month: MonthKey = raw.month.as_deref().unwrap_or(document_id).parse()?;

        let mut days = std::collections::BTreeMap::new();
        for (i, day) in raw.days_included.iter().enumerate() {
            let record = DayRecord::from_document(&format!("{}#{}", month, i), day)?;
            if month.contains(record.date) {
                days.insert(record.date, record);
            }
        }

        consolidate_month(&days, month, raw.consolidated_at.unwrap_or_default()).ok_or_else(|| {
            CalcError::Import(format!("month summary {} has no days of that month", month))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStep {
    value1: Option<Value>,
    value2: Option<Value>,
    previous_accumulated: Option<Value>,
}

impl RawStep {
    fn input(&self) -> StepInput {
        StepInput::new(
            self.value1.as_ref().map_or(0, lenient_amount),
            self.value2.as_ref().map_or(0, lenient_amount),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawDay {
    date: Option<String>,
    step_a: RawStep,
    step_b: RawStep,
    revision: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawMonth {
    month: Option<String>,
    days_included: Vec<Value>,
    consolidated_at: Option<DateTime<Utc>>,
}

fn lenient_amount(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => parse_amount(s),
        _ => 0,
    }
}
