/*!
# Daily Calculator

Day-by-day bookkeeping of two numeric "steps" with month-to-date
accumulation, built in Rust.

## Overview

Every day the user types two amounts for each step. The day's total per
step is the sum of its two amounts, and the accumulated value carries on
from the last recorded day of the same month. When the calendar month
changes, the finished month is consolidated into a summary and the
accumulation starts again from zero.

## Architecture

### Accumulation Engine
- **Day totals** - derives daily totals, accumulations and the step ratio
- **Predecessor lookup** - finds the last *recorded* day of the month, so
  gaps and weekends still chain correctly
- **Cascade recompute** - a backfilled or edited day re-derives every
  later day of its month
- **Rollover & consolidation** - detects a new month and summarizes the
  previous one

All engine state lives in a caller-owned [`Session`]; "today" and
timestamps are always passed in.

### Persistence Layer
- Durable document store addressed by account / collection / id
  (gzip-compressed bincode snapshot on disk, or in memory)
- Local mirror of the same collections used when the durable store is
  unreachable
- [`SyncService`] persists touched records and reports a [`SyncStatus`]

### Import / Export
- JSON backup of all days, summaries and metadata, and its import
- XLSX and CSV reports

## Front ends

- `daily-calculator` - interactive command line
- `daily-calc-web` - JSON API over axum (`web` feature)

## Modules

- **record**: DayRecord, MonthSummary, MonthKey and document normalization
- **engine**: the accumulation engine and the Session state
- **currency**: amount parsing and display
- **saving**: store traits and their file / memory implementations
- **sync**: persistence of engine results with mirror fallback
- **downloader**: JSON / XLSX / CSV export
- **loader**: JSON import
- **config**, **logging**: application configuration and log setup
- **app**: HTTP routes (`web` feature)
*/

pub mod config;
pub mod currency;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod loader;
pub mod logging;
pub mod record;
pub mod saving;
pub mod sync;

#[cfg(feature = "web")]
pub mod app;

/// Re-export everything from these modules to make it easier to use
pub use engine::*;
pub use error::*;
pub use record::*;
pub use saving::{DocumentStore, FileDocumentStore, JsonFileMirror, LocalMirror, MemoryDocumentStore, MemoryMirror};
pub use sync::*;
