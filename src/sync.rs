use crate::engine::Session;
use crate::error::{CalcResult, StoreError};
use crate::record::{DayRecord, MonthKey, MonthSummary};
use crate::saving::{DocumentStore, LocalMirror};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DAYS_COLLECTION: &str = "days";
pub const MONTHS_COLLECTION: &str = "months";
pub const ACTIVE_MONTH_KEY: &str = "activeMonth";

/// Outcome of one persistence round, displayed next to the computed totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub documents_written: usize,
    pub durable_error: Option<String>,
    pub mirror_error: Option<String>,
}

impl SyncStatus {
    pub fn is_ok(&self) -> bool {
        self.durable_error.is_none() && self.mirror_error.is_none()
    }

    /// Fold another round into this one, keeping the first error of each kind
    pub fn merge(&mut self, other: SyncStatus) {
        self.documents_written += other.documents_written;
        self.durable_error = self.durable_error.take().or(other.durable_error);
        self.mirror_error = self.mirror_error.take().or(other.mirror_error);
    }

    fn durable_failed(&mut self, e: StoreError) {
        warn!("durable store write failed: {}", e);
        if self.durable_error.is_none() {
            self.durable_error = Some(e.to_string());
        }
    }

    fn mirror_failed(&mut self, e: StoreError) {
        warn!("local mirror write failed: {}", e);
        self.mirror_error = Some(e.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadSource {
    Durable,
    Mirror,
    Empty,
}

#[derive(Debug, Clone)]
pub struct LoadedData {
    pub days: BTreeMap<NaiveDate, DayRecord>,
    pub months: BTreeMap<MonthKey, MonthSummary>,
    pub active_month: Option<MonthKey>,
    pub source: LoadSource,
    pub skipped: usize,
}

impl LoadedData {
    pub fn into_session(self) -> Session {
        let mut session = Session::with_data(self.days, self.months);
        session.active_month = self.active_month;
        session
    }
}

/// Persists engine results for the single configured account
///
/// Every write goes to the durable store first and then refreshes the
/// whole local mirror from the session. Failures never undo the
/// in-memory computation; they are reported through [`SyncStatus`].
pub struct SyncService {
    account: String,
    durable: Box<dyn DocumentStore>,
    mirror: Box<dyn LocalMirror>,
}

impl SyncService {
    pub fn new(
        account: impl Into<String>,
        durable: Box<dyn DocumentStore>,
        mirror: Box<dyn LocalMirror>,
    ) -> Self {
        SyncService {
            account: account.into(),
            durable,
            mirror,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Upsert the given dates of `session` and refresh the mirror
    pub fn persist_days(&self, session: &Session, dates: &[NaiveDate]) -> SyncStatus {
        let mut status = SyncStatus::default();

        for date in dates {
            let Some(record) = session.record(*date) else {
                continue;
            };
            let written = serde_json::to_value(record)
                .map_err(StoreError::from)
                .and_then(|doc| {
                    self.durable
                        .upsert(&self.account, DAYS_COLLECTION, &record.document_id(), &doc)
                });
            match written {
                Ok(()) => status.documents_written += 1,
                Err(e) => status.durable_failed(e),
            }
        }

        if let Err(e) = self.mirror_days(session) {
            status.mirror_failed(e);
        }
        debug!("persisted {} day document(s)", status.documents_written);
        status
    }

    pub fn persist_summary(&self, session: &Session, summary: &MonthSummary) -> SyncStatus {
        let mut status = SyncStatus::default();

        let written = serde_json::to_value(summary)
            .map_err(StoreError::from)
            .and_then(|doc| {
                self.durable
                    .upsert(&self.account, MONTHS_COLLECTION, &summary.document_id(), &doc)
            });
        match written {
            Ok(()) => status.documents_written += 1,
            Err(e) => status.durable_failed(e),
        }

        if let Err(e) = self.mirror_months(session) {
            status.mirror_failed(e);
        }
        status
    }

    /// Remove day documents, e.g. after a month reset
    pub fn delete_days(&self, session: &Session, dates: &[NaiveDate]) -> SyncStatus {
        let mut status = SyncStatus::default();

        for date in dates {
            let id = date.format("%Y-%m-%d").to_string();
            match self.durable.delete(&self.account, DAYS_COLLECTION, &id) {
                Ok(()) => status.documents_written += 1,
                Err(e) => status.durable_failed(e),
            }
        }

        if let Err(e) = self.mirror_days(session) {
            status.mirror_failed(e);
        }
        status
    }

    pub fn delete_summary(&self, session: &Session, month: MonthKey) -> SyncStatus {
        let mut status = SyncStatus::default();

        match self
            .durable
            .delete(&self.account, MONTHS_COLLECTION, &month.to_string())
        {
            Ok(()) => status.documents_written += 1,
            Err(e) => status.durable_failed(e),
        }

        if let Err(e) = self.mirror_months(session) {
            status.mirror_failed(e);
        }
        status
    }

    /// Write back days fixed by [`Session::repair_all`] and the summaries
    /// of their months
    pub fn persist_repairs(&self, session: &Session, repaired: &[NaiveDate]) -> SyncStatus {
        let mut status = self.persist_days(session, repaired);

        let mut months: Vec<MonthKey> =
            repaired.iter().map(|d| MonthKey::from_date(*d)).collect();
        months.dedup();
        for summary in months.iter().filter_map(|month| session.months.get(month)) {
            status.merge(self.persist_summary(session, summary));
        }
        status
    }

    /// Push every record and summary of the session, e.g. after an import
    pub fn persist_all(&self, session: &Session) -> SyncStatus {
        let dates: Vec<NaiveDate> = session.days.keys().copied().collect();
        let mut status = self.persist_days(session, &dates);

        for summary in session.months.values() {
            status.merge(self.persist_summary(session, summary));
        }
        if let Err(e) = self.persist_active_month(session) {
            status.mirror_failed(e);
        }
        status
    }

    pub fn persist_active_month(&self, session: &Session) -> Result<(), StoreError> {
        match session.active_month {
            Some(month) => self.mirror.set(ACTIVE_MONTH_KEY, &month.to_string()),
            None => Ok(()),
        }
    }

    /// Load both collections, falling back to the mirror when the durable
    /// store cannot be read.
    pub fn load(&self) -> CalcResult<LoadedData> {
        let active_month = self
            .mirror
            .get(ACTIVE_MONTH_KEY)
            .and_then(|text| text.parse::<MonthKey>().ok());

        let durable = self
            .durable
            .list(&self.account, DAYS_COLLECTION)
            .and_then(|days| Ok((days, self.durable.list(&self.account, MONTHS_COLLECTION)?)));

        let (day_docs, month_docs, source) = match durable {
            Ok((days, months)) if !days.is_empty() || !months.is_empty() => {
                (days, months, LoadSource::Durable)
            }
            Ok(_) => match self.mirror_documents() {
                Some((days, months)) => (days, months, LoadSource::Mirror),
                None => (BTreeMap::new(), BTreeMap::new(), LoadSource::Empty),
            },
            Err(e) => {
                warn!("durable store unreachable ({}), reading local mirror", e);
                match self.mirror_documents() {
                    Some((days, months)) => (days, months, LoadSource::Mirror),
                    None => (BTreeMap::new(), BTreeMap::new(), LoadSource::Empty),
                }
            }
        };

        let mut skipped = 0;
        let mut days = BTreeMap::new();
        for (id, doc) in &day_docs {
            match DayRecord::from_document(id, doc) {
                Ok(record) => {
                    days.insert(record.date, record);
                }
                Err(e) => {
                    warn!("skipping day document {}: {}", id, e);
                    skipped += 1;
                }
            }
        }

        let mut months = BTreeMap::new();
        for (id, doc) in &month_docs {
            match MonthSummary::from_document(id, doc) {
                Ok(summary) => {
                    months.insert(summary.month, summary);
                }
                Err(e) => {
                    warn!("skipping month document {}: {}", id, e);
                    skipped += 1;
                }
            }
        }

        info!(
            "loaded {} day(s) and {} month(s) from {:?}",
            days.len(),
            months.len(),
            source
        );
        Ok(LoadedData {
            days,
            months,
            active_month,
            source,
            skipped,
        })
    }

    fn mirror_days(&self, session: &Session) -> Result<(), StoreError> {
        let text = serde_json::to_string(&session.days)?;
        self.mirror.set(DAYS_COLLECTION, &text)
    }

    fn mirror_months(&self, session: &Session) -> Result<(), StoreError> {
        let text = serde_json::to_string(&session.months)?;
        self.mirror.set(MONTHS_COLLECTION, &text)
    }

    /// Both mirrored collections, or `None` when the mirror is empty or
    /// holds unreadable JSON
    #[allow(clippy::type_complexity)]
    fn mirror_documents(&self) -> Option<(BTreeMap<String, Value>, BTreeMap<String, Value>)> {
        let days = self.mirror.get(DAYS_COLLECTION);
        let months = self.mirror.get(MONTHS_COLLECTION);
        if days.is_none() && months.is_none() {
            return None;
        }

        let parse = |key: &str, text: Option<String>| -> Option<BTreeMap<String, Value>> {
            match text {
                Some(text) => match serde_json::from_str(&text) {
                    Ok(documents) => Some(documents),
                    Err(e) => {
                        warn!("ignoring unreadable local mirror '{}': {}", key, e);
                        None
                    }
                },
                None => Some(BTreeMap::new()),
            }
        };
        Some((parse(DAYS_COLLECTION, days)?, parse(MONTHS_COLLECTION, months)?))
    }
}
