use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the accumulation engine and the import/export boundary
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("cannot save {date}: it is after today ({today})")]
    FutureDate { date: NaiveDate, today: NaiveDate },

    #[error("cannot save {date}: both steps are empty or zero")]
    EmptyInputs { date: NaiveDate },

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid month '{0}', expected YYYY-MM")]
    InvalidMonth(String),

    #[error("reset of {month} was not confirmed")]
    ResetNotConfirmed { month: String },

    #[error("import rejected: {0}")]
    Import(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the durable store and local mirror adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data could not be encoded or decoded: {0}")]
    Encoding(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

pub type CalcResult<T> = Result<T, CalcError>;
