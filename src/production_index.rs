//! The production index maps each release date (a Friday) to the model run date
//! whose output was published for it. It is stored as append-only, timestamp
//! named CSV snapshots; each update loads the newest snapshot and writes a new one.

use crate::blob_store::BlobEntry;
use crate::task::TaskRecord;
use crate::{PostprocessError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{info, warn};

pub const INDEX_PREFIX: &str = "production_index";
const HEADER: [&str; 2] = ["release_date", "run_date"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ProductionIndexRow {
    pub release_date: NaiveDate,
    pub run_date: NaiveDate,
}

/// Release date to run date, unique on release date
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionIndex {
    rows: BTreeMap<NaiveDate, NaiveDate>,
}

impl ProductionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ProductionIndexRow>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for row in rows {
            if index.insert(row.release_date, row.run_date).is_some() {
                return Err(PostprocessError::Schema(format!(
                    "release_date {} appears more than once",
                    row.release_date
                )));
            }
        }
        Ok(Self { rows: index })
    }

    /// Load from CSV with a header of exactly `release_date,run_date`
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = reader.headers()?.clone();
        if headers.len() != HEADER.len() || headers.iter().zip(HEADER).any(|(got, want)| got.trim() != want) {
            return Err(PostprocessError::Schema(format!(
                "production index columns are {:?}, expected {:?}",
                headers.iter().collect::<Vec<_>>(),
                HEADER
            )));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(ProductionIndexRow {
                release_date: parse_date(record.get(0), "release_date")?,
                run_date: parse_date(record.get(1), "run_date")?,
            });
        }
        Self::from_rows(rows)
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        // Header is written explicitly so an empty index still carries its schema
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(HEADER)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| PostprocessError::Other(format!("flush production index: {}", e)))
    }

    /// Rows ascending by release date
    pub fn rows(&self) -> Vec<ProductionIndexRow> {
        self.rows
            .iter()
            .map(|(&release_date, &run_date)| ProductionIndexRow { release_date, run_date })
            .collect()
    }

    pub fn run_date_for(&self, release_date: NaiveDate) -> Option<NaiveDate> {
        self.rows.get(&release_date).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn parse_date(field: Option<&str>, column: &str) -> Result<NaiveDate> {
    let raw = field.unwrap_or_default().trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PostprocessError::Schema(format!("{} value {:?} is not a date: {}", column, raw, e)))
}

/// Insert or overwrite the run date for `release_date`
pub fn update_production_index(
    index: &ProductionIndex,
    release_date: NaiveDate,
    run_date: NaiveDate,
) -> ProductionIndex {
    let mut updated = index.clone();
    if let Some(previous) = updated.rows.insert(release_date, run_date) {
        if previous != run_date {
            info!(%release_date, %previous, %run_date, "replaced run date in production index");
        }
    }
    updated
}

/// The Friday on or after `date`
pub fn round_up_to_friday(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    date + Duration::days((4 - weekday).rem_euclid(7))
}

/// Run date to publish for the selected tasks.
///
/// Normally every task ran on the same calendar day. When they did not, the
/// date shared by the most tasks is used, earliest first on a tie, and a
/// warning is logged.
pub fn select_run_date(tasks: &[TaskRecord]) -> Option<NaiveDate> {
    let counts = tasks.iter().map(|t| t.run_at.date_naive()).counts();
    let chosen = counts
        .iter()
        .max_by(|(a, n), (b, m)| n.cmp(m).then_with(|| b.cmp(a)))
        .map(|(&date, _)| date)?;
    if counts.len() > 1 {
        let run_dates: BTreeMap<NaiveDate, usize> = counts.into_iter().collect();
        warn!(
            ?run_dates,
            chosen = %chosen,
            "more than one run date among selected tasks, using the most common"
        );
    }
    Some(chosen)
}

/// Newest production index snapshot among listed blobs
pub fn latest_snapshot(entries: &[BlobEntry]) -> Option<&BlobEntry> {
    entries
        .iter()
        .filter(|e| e.name.starts_with(INDEX_PREFIX) && e.name.ends_with(".csv"))
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)))
}

/// Blob name for a snapshot written at `now`
pub fn snapshot_name(now: DateTime<Utc>) -> String {
    format!("{}/{}.csv", INDEX_PREFIX, now.format("%Y-%m-%dT%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Disease;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_round_up_to_friday() {
        let cases = [
            (date(2025, 1, 25), date(2025, 1, 31)),
            (date(2025, 1, 26), date(2025, 1, 31)),
            (date(2025, 1, 27), date(2025, 1, 31)),
            (date(2025, 1, 28), date(2025, 1, 31)),
            (date(2025, 1, 29), date(2025, 1, 31)),
            (date(2025, 1, 30), date(2025, 1, 31)),
            (date(2025, 1, 31), date(2025, 1, 31)),
            (date(2025, 2, 1), date(2025, 2, 7)),
            (date(2025, 2, 2), date(2025, 2, 7)),
            (date(2025, 2, 3), date(2025, 2, 7)),
            (date(2025, 2, 4), date(2025, 2, 7)),
            (date(2025, 2, 5), date(2025, 2, 7)),
            (date(2025, 2, 6), date(2025, 2, 7)),
            (date(2025, 2, 7), date(2025, 2, 7)),
            (date(2025, 2, 8), date(2025, 2, 14)),
        ];
        for (input, want) in cases {
            assert_eq!(round_up_to_friday(input), want, "input {}", input);
        }
    }

    #[test]
    fn test_csv_header_is_validated() {
        let bad = "production_week,production_date\n2025-01-31,2025-01-29\n";
        assert!(matches!(ProductionIndex::from_csv(bad.as_bytes()), Err(PostprocessError::Schema(_))));

        let extra = "release_date,run_date,note\n2025-01-31,2025-01-29,x\n";
        assert!(matches!(ProductionIndex::from_csv(extra.as_bytes()), Err(PostprocessError::Schema(_))));
    }

    #[test]
    fn test_csv_values_must_be_dates() {
        let bad = "release_date,run_date\n2025-01-31,soon\n";
        assert!(matches!(ProductionIndex::from_csv(bad.as_bytes()), Err(PostprocessError::Schema(_))));
    }

    #[test]
    fn test_duplicate_release_dates_are_rejected() {
        let dup = "release_date,run_date\n2025-01-31,2025-01-29\n2025-01-31,2025-01-30\n";
        assert!(matches!(ProductionIndex::from_csv(dup.as_bytes()), Err(PostprocessError::Schema(_))));
    }

    #[test]
    fn test_empty_index_keeps_header() {
        let csv = ProductionIndex::new().to_csv().unwrap();
        assert_eq!(String::from_utf8(csv).unwrap(), "release_date,run_date\n");
    }

    fn task_run_on(day: u32, id: usize) -> TaskRecord {
        TaskRecord {
            disease: Disease::Covid19,
            geo_value: "US".to_string(),
            production_date: date(2025, 1, 29),
            run_at: Utc.with_ymd_and_hms(2025, 1, day, 23, 0, 0).unwrap(),
            job_id: "job".to_string(),
            task_id: format!("t{}-{}", day, id),
        }
    }

    #[test]
    fn test_select_run_date_single_day() {
        assert_eq!(select_run_date(&[]), None);
        assert_eq!(
            select_run_date(&[task_run_on(29, 0), task_run_on(29, 1)]),
            Some(date(2025, 1, 29))
        );
    }

    #[test]
    fn test_select_run_date_uses_most_common_day() {
        let mut tasks = vec![task_run_on(28, 0)];
        tasks.extend((0..50).map(|i| task_run_on(29, i)));
        assert_eq!(select_run_date(&tasks), Some(date(2025, 1, 29)));

        tasks.extend((0..3).map(|i| task_run_on(30, i)));
        assert_eq!(select_run_date(&tasks), Some(date(2025, 1, 29)));
    }

    #[test]
    fn test_select_run_date_tie_goes_to_earliest() {
        let tasks = [task_run_on(30, 0), task_run_on(29, 0), task_run_on(30, 1), task_run_on(29, 1)];
        assert_eq!(select_run_date(&tasks), Some(date(2025, 1, 29)));
    }

    #[test]
    fn test_latest_snapshot_uses_creation_time() {
        let entry = |name: &str, hour: u32| BlobEntry {
            name: name.to_string(),
            created: Utc.with_ymd_and_hms(2025, 1, 31, hour, 0, 0).unwrap(),
            size: 10,
        };
        let entries = vec![
            entry("production_index/2025-01-31T09:00:00.csv", 9),
            entry("production_index/2025-01-31T01:00:00.csv", 12),
            entry("production_index/notes.txt", 23),
            entry("2025-01-31/internal-review/p_growing.csv", 23),
        ];
        let latest = latest_snapshot(&entries).unwrap();
        assert_eq!(latest.name, "production_index/2025-01-31T01:00:00.csv");
        assert!(latest_snapshot(&entries[2..]).is_none());
    }

    #[test]
    fn test_snapshot_name_is_second_resolution() {
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 14, 5, 9).unwrap();
        assert_eq!(snapshot_name(now), "production_index/2025-01-31T14:05:09.csv");
    }
}
