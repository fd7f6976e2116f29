use crate::error::{CalcError, CalcResult};
use crate::record::{
    DayRecord, MonthKey, MonthSummary, PerStep, Step, StepInput, StepTotals, percentage_of,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Derive a full day record from the typed inputs and the baseline
/// carried over from the previous recorded day of the month.
pub fn compute_day_totals(
    date: NaiveDate,
    inputs: &PerStep<StepInput>,
    previous: &PerStep<u64>,
) -> DayRecord {
    let totals = |step: Step| {
        let input = inputs.get(step);
        let previous_accumulated = *previous.get(step);
        let daily_total = input.total();
        StepTotals {
            value1: input.value1,
            value2: input.value2,
            daily_total,
            previous_accumulated,
            accumulated: previous_accumulated.saturating_add(daily_total),
        }
    };

    let step_a = totals(Step::A);
    let step_b = totals(Step::B);
    let percentage = percentage_of(step_a.daily_total, step_b.daily_total);

    DayRecord {
        date,
        step_a,
        step_b,
        percentage,
        revision: 1,
    }
}

/// Accumulated values of the latest record in the same month strictly
/// before `target`, or zero when `target` opens the month.
pub fn find_previous_accumulated(
    target: NaiveDate,
    records: &BTreeMap<NaiveDate, DayRecord>,
) -> PerStep<u64> {
    let month_start = MonthKey::from_date(target).first_day();
    records
        .range(month_start..target)
        .next_back()
        .map(|(_, record)| record.accumulated())
        .unwrap_or_default()
}

/// Recompute every record after `date` within its month, chaining each
/// one onto its predecessor. Returns the recomputed dates in order.
pub fn cascade_from(records: &mut BTreeMap<NaiveDate, DayRecord>, date: NaiveDate) -> Vec<NaiveDate> {
    let month = MonthKey::from_date(date);
    let later: Vec<NaiveDate> = records
        .range((Excluded(date), Unbounded))
        .map(|(d, _)| *d)
        .take_while(|d| month.contains(*d))
        .collect();

    let mut baseline = match records.get(&date) {
        Some(record) => record.accumulated(),
        None => find_previous_accumulated(date, records),
    };

    let mut touched = Vec::with_capacity(later.len());
    for d in later {
        if let Some(record) = records.get_mut(&d) {
            let mut fresh = compute_day_totals(d, &record.inputs(), &baseline);
            fresh.revision = record.revision;
            baseline = fresh.accumulated();
            *record = fresh;
            touched.push(d);
        }
    }

    if !touched.is_empty() {
        debug!("cascade from {} recomputed {} later day(s)", date, touched.len());
    }
    touched
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollover {
    pub rolled_over: bool,
    pub new_month: MonthKey,
}

pub fn detect_month_rollover(today: NaiveDate, active_month: MonthKey) -> Rollover {
    let new_month = MonthKey::from_date(today);
    Rollover {
        rolled_over: new_month != active_month,
        new_month,
    }
}

/// Summarize all records of `month`; `None` when the month is empty
pub fn consolidate_month(
    records: &BTreeMap<NaiveDate, DayRecord>,
    month: MonthKey,
    consolidated_at: DateTime<Utc>,
) -> Option<MonthSummary> {
    let days_included: Vec<DayRecord> = records
        .range(month.first_day()..)
        .take_while(|(d, _)| month.contains(**d))
        .map(|(_, record)| record.clone())
        .collect();

    let first_day = days_included.first()?.date;
    let last = days_included.last()?;
    let last_day = last.date;
    let final_accumulated = last.accumulated();

    let mut totals_by_step = PerStep::<u64>::default();
    for day in &days_included {
        totals_by_step.step_a = totals_by_step.step_a.saturating_add(day.step_a.daily_total);
        totals_by_step.step_b = totals_by_step.step_b.saturating_add(day.step_b.daily_total);
    }
    let final_percentage =
        round_two(percentage_of(final_accumulated.step_a, final_accumulated.step_b));

    Some(MonthSummary {
        month,
        totals_by_step,
        grand_total: totals_by_step.step_a.saturating_add(totals_by_step.step_b),
        final_accumulated,
        final_accumulated_total: final_accumulated
            .step_a
            .saturating_add(final_accumulated.step_b),
        final_percentage,
        day_count: days_included.len(),
        first_day,
        last_day,
        consolidated_at,
        days_included,
    })
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayState {
    Empty,
    PartiallyEntered,
    Saved,
    Edited,
}

/// The caller's working entry for the current date
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDay {
    pub date: NaiveDate,
    pub entered: PerStep<Option<StepInput>>,
    pub baseline: PerStep<u64>,
}

impl ActiveDay {
    pub fn new(date: NaiveDate, baseline: PerStep<u64>) -> Self {
        ActiveDay {
            date,
            entered: PerStep::default(),
            baseline,
        }
    }

    pub fn inputs(&self) -> PerStep<StepInput> {
        self.entered.map(|input| input.unwrap_or_default())
    }

    pub fn preview(&self) -> DayRecord {
        compute_day_totals(self.date, &self.inputs(), &self.baseline)
    }

    pub fn is_complete(&self) -> bool {
        self.entered.step_a.is_some() && self.entered.step_b.is_some()
    }

    pub fn has_entries(&self) -> bool {
        self.entered.step_a.is_some() || self.entered.step_b.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub record: DayRecord,
    /// Saved date first, then every cascaded date in order
    pub touched: Vec<NaiveDate>,
    /// Refreshed summary when the saved month was already consolidated
    pub summary: Option<MonthSummary>,
}

impl SaveOutcome {
    pub fn touched_count(&self) -> usize {
        self.touched.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverOutcome {
    pub rollover: Rollover,
    pub previous_month: Option<MonthKey>,
    pub summary: Option<MonthSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub day: u32,
    pub date: NaiveDate,
    pub has_data: bool,
    pub is_today: bool,
}

/// Caller-owned state every engine operation runs against
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub days: BTreeMap<NaiveDate, DayRecord>,
    pub months: BTreeMap<MonthKey, MonthSummary>,
    pub active_month: Option<MonthKey>,
    pub active_day: Option<ActiveDay>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn with_data(
        days: BTreeMap<NaiveDate, DayRecord>,
        months: BTreeMap<MonthKey, MonthSummary>,
    ) -> Self {
        Session {
            days,
            months,
            active_month: None,
            active_day: None,
        }
    }

    pub fn record(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&date)
    }

    pub fn month_records(&self, month: MonthKey) -> Vec<&DayRecord> {
        self.days
            .range(month.first_day()..)
            .take_while(|(d, _)| month.contains(**d))
            .map(|(_, record)| record)
            .collect()
    }

    pub fn find_previous_accumulated(&self, target: NaiveDate) -> PerStep<u64> {
        find_previous_accumulated(target, &self.days)
    }

    /// Validate, compute and store the record for `date`, then cascade
    /// the new accumulations through the rest of its month.
    pub fn save_day_record(
        &mut self,
        date: NaiveDate,
        inputs: PerStep<StepInput>,
        today: NaiveDate,
    ) -> CalcResult<SaveOutcome> {
        if date > today {
            return Err(CalcError::FutureDate { date, today });
        }
        if inputs.step_a.is_zero() && inputs.step_b.is_zero() {
            return Err(CalcError::EmptyInputs { date });
        }

        let previous = self.find_previous_accumulated(date);
        let mut record = compute_day_totals(date, &inputs, &previous);
        record.revision = self.days.get(&date).map_or(1, |old| old.revision + 1);
        debug!(
            "computed {}: step A {} -> {}, step B {} -> {}",
            date,
            record.step_a.previous_accumulated,
            record.step_a.accumulated,
            record.step_b.previous_accumulated,
            record.step_b.accumulated
        );
        self.days.insert(date, record.clone());

        let mut touched = vec![date];
        touched.extend(cascade_from(&mut self.days, date));
        self.refresh_active_baseline();
        let summary = self.refresh_summary(record.month());

        info!(
            "saved {} (revision {}, {} record(s) touched)",
            date,
            record.revision,
            touched.len()
        );
        Ok(SaveOutcome {
            record,
            touched,
            summary,
        })
    }

    pub fn day_state(&self, date: NaiveDate) -> DayState {
        if let Some(record) = self.days.get(&date) {
            return if record.revision > 1 {
                DayState::Edited
            } else {
                DayState::Saved
            };
        }
        match &self.active_day {
            Some(active) if active.date == date && active.has_entries() => {
                DayState::PartiallyEntered
            }
            _ => DayState::Empty,
        }
    }

    /// Replace the working entry with a blank one for `date`
    pub fn start_active_day(&mut self, date: NaiveDate) -> &ActiveDay {
        let baseline = self.find_previous_accumulated(date);
        self.active_day.insert(ActiveDay::new(date, baseline))
    }

    /// Record one step of the working entry, starting one for `today`
    /// when there is none.
    pub fn enter_step(&mut self, step: Step, input: StepInput, today: NaiveDate) -> &ActiveDay {
        let date = self.active_day.as_ref().map_or(today, |active| active.date);
        let baseline = self.find_previous_accumulated(date);
        let active = self
            .active_day
            .get_or_insert_with(|| ActiveDay::new(date, baseline));
        active.baseline = baseline;
        *active.entered.get_mut(step) = Some(input);
        active
    }

    /// Save the working entry and move on to the following day
    pub fn save_active_day(&mut self, today: NaiveDate) -> CalcResult<SaveOutcome> {
        let active = match &self.active_day {
            Some(active) => active.clone(),
            None => self.start_active_day(today).clone(),
        };

        let outcome = self.save_day_record(active.date, active.inputs(), today)?;
        match active.date.succ_opt() {
            Some(next) => {
                self.start_active_day(next);
            }
            None => self.active_day = None,
        }
        Ok(outcome)
    }

    /// Consolidate `month` into a stored summary, overwriting an older one
    pub fn consolidate(
        &mut self,
        month: MonthKey,
        consolidated_at: DateTime<Utc>,
    ) -> Option<MonthSummary> {
        let summary = consolidate_month(&self.days, month, consolidated_at)?;
        info!(
            "consolidated {}: {} day(s), totals {} / {}",
            month, summary.day_count, summary.totals_by_step.step_a, summary.totals_by_step.step_b
        );
        self.months.insert(month, summary.clone());
        Some(summary)
    }

    /// Roll the session over to the month of `today` if it is later than
    /// the active month
    ///
    /// A session without an active month adopts the current one without
    /// consolidating anything. Moving back to an earlier month switches
    /// the active month and day but is not a rollover.
    pub fn check_rollover(
        &mut self,
        today: NaiveDate,
        consolidated_at: DateTime<Utc>,
    ) -> RolloverOutcome {
        let current = MonthKey::from_date(today);
        let Some(active) = self.active_month else {
            self.active_month = Some(current);
            if self.active_day.is_none() {
                self.start_active_day(today);
            }
            return RolloverOutcome {
                rollover: Rollover {
                    rolled_over: false,
                    new_month: current,
                },
                previous_month: None,
                summary: None,
            };
        };

        let rollover = detect_month_rollover(today, active);
        if !rollover.rolled_over {
            return RolloverOutcome {
                rollover,
                previous_month: Some(active),
                summary: None,
            };
        }
        if rollover.new_month < active {
            info!("moved back from {} to {}", active, rollover.new_month);
            self.active_month = Some(rollover.new_month);
            self.start_active_day(today);
            return RolloverOutcome {
                rollover: Rollover {
                    rolled_over: false,
                    new_month: rollover.new_month,
                },
                previous_month: Some(active),
                summary: None,
            };
        }

        info!("month rolled over from {} to {}", active, rollover.new_month);
        let summary = self.consolidate(active, consolidated_at);
        self.active_month = Some(rollover.new_month);
        self.start_active_day(today);

        RolloverOutcome {
            rollover,
            previous_month: Some(active),
            summary,
        }
    }

    /// Re-derive every record from its predecessor, month by month.
    /// Returns the dates whose stored values were wrong. Summaries of
    /// consolidated months with repaired days are re-derived too.
    pub fn repair_all(&mut self) -> Vec<NaiveDate> {
        let mut repaired = Vec::new();
        let mut current_month: Option<MonthKey> = None;
        let mut baseline = PerStep::<u64>::default();

        for (date, record) in self.days.iter_mut() {
            let month = MonthKey::from_date(*date);
            if current_month != Some(month) {
                current_month = Some(month);
                baseline = PerStep::default();
            }

            let mut fresh = compute_day_totals(*date, &record.inputs(), &baseline);
            fresh.revision = record.revision.max(1);
            baseline = fresh.accumulated();
            if fresh != *record {
                repaired.push(*date);
                *record = fresh;
            }
        }

        if !repaired.is_empty() {
            info!("repaired {} record(s) with broken accumulations", repaired.len());
            self.refresh_active_baseline();
            let mut months: Vec<MonthKey> =
                repaired.iter().map(|d| MonthKey::from_date(*d)).collect();
            months.dedup();
            for month in months {
                self.refresh_summary(month);
            }
        }
        repaired
    }

    /// Delete every record of `month` and its summary
    ///
    /// `confirmation` must repeat the month key exactly.
    pub fn reset_month(&mut self, month: MonthKey, confirmation: &str) -> CalcResult<Vec<NaiveDate>> {
        if confirmation.trim() != month.to_string() {
            return Err(CalcError::ResetNotConfirmed {
                month: month.to_string(),
            });
        }

        let removed: Vec<NaiveDate> = self
            .month_records(month)
            .iter()
            .map(|record| record.date)
            .collect();
        for date in &removed {
            self.days.remove(date);
        }
        self.months.remove(&month);
        self.refresh_active_baseline();

        info!("reset {}: removed {} record(s)", month, removed.len());
        Ok(removed)
    }

    /// Sunday-first calendar grid for `month`; leading blanks are `None`
    pub fn calendar_month(&self, month: MonthKey, today: NaiveDate) -> Vec<Option<CalendarDay>> {
        let offset = month.first_day().weekday().num_days_from_sunday() as usize;
        let mut cells: Vec<Option<CalendarDay>> = vec![None; offset];

        cells.extend(month.days().map(|date| {
            Some(CalendarDay {
                day: date.day(),
                date,
                has_data: self.days.contains_key(&date),
                is_today: date == today,
            })
        }));
        cells
    }

    /// Swap in a whole new data set, keeping the active month
    pub fn replace_data(
        &mut self,
        days: BTreeMap<NaiveDate, DayRecord>,
        months: BTreeMap<MonthKey, MonthSummary>,
    ) {
        self.days = days;
        self.months = months;
        self.active_day = None;
    }

    /// Re-derive the stored summary of `month`, keeping its timestamp.
    /// Nothing happens for a month that was never consolidated.
    fn refresh_summary(&mut self, month: MonthKey) -> Option<MonthSummary> {
        let consolidated_at = self.months.get(&month)?.consolidated_at;
        let summary = consolidate_month(&self.days, month, consolidated_at)?;
        debug!("refreshed summary of {}", month);
        self.months.insert(month, summary.clone());
        Some(summary)
    }

    fn refresh_active_baseline(&mut self) {
        if let Some(date) = self.active_day.as_ref().map(|a| a.date) {
            let baseline = find_previous_accumulated(date, &self.days);
            if let Some(active) = self.active_day.as_mut() {
                active.baseline = baseline;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn previous_skips_gaps_but_not_months() {
        let mut records = BTreeMap::new();
        let inputs = PerStep::new(StepInput::new(10, 0), StepInput::new(5, 0));
        records.insert(
            date("2025-01-30"),
            compute_day_totals(date("2025-01-30"), &inputs, &PerStep::default()),
        );
        records.insert(
            date("2025-02-03"),
            compute_day_totals(date("2025-02-03"), &inputs, &PerStep::default()),
        );

        let prev = find_previous_accumulated(date("2025-02-10"), &records);
        assert_eq!(prev, PerStep::new(10, 5));

        let prev = find_previous_accumulated(date("2025-02-01"), &records);
        assert_eq!(prev, PerStep::new(0, 0));

        let prev = find_previous_accumulated(date("2025-02-03"), &records);
        assert_eq!(prev, PerStep::new(0, 0));
    }

    #[test]
    fn rollover_compares_month_keys() {
        let jan: MonthKey = "2025-01".parse().unwrap();
        assert!(!detect_month_rollover(date("2025-01-31"), jan).rolled_over);

        let rollover = detect_month_rollover(date("2025-02-01"), jan);
        assert!(rollover.rolled_over);
        assert_eq!(rollover.new_month.to_string(), "2025-02");
    }

    #[test]
    fn calendar_starts_on_sunday() {
        let session = Session::new();
        // June 2025 starts on a Sunday, February 2025 on a Saturday
        let june = session.calendar_month("2025-06".parse().unwrap(), date("2025-06-10"));
        assert!(june[0].is_some());
        assert_eq!(june.len(), 30);

        let feb = session.calendar_month("2025-02".parse().unwrap(), date("2025-06-10"));
        assert_eq!(feb.iter().take_while(|c| c.is_none()).count(), 6);
        assert_eq!(feb.len(), 6 + 28);
    }
}
