use crate::{PostprocessError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Diseases the Rt model is run for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Disease {
    #[serde(rename = "COVID-19")]
    Covid19,
    #[serde(rename = "Influenza")]
    Influenza,
}

impl Disease {
    pub const ALL: [Disease; 2] = [Disease::Covid19, Disease::Influenza];

    pub fn label(&self) -> &'static str {
        match self {
            Disease::Covid19 => "COVID-19",
            Disease::Influenza => "Influenza",
        }
    }

    /// Short name used in report file names
    pub fn slug(&self) -> &'static str {
        match self {
            Disease::Covid19 => "covid",
            Disease::Influenza => "influenza",
        }
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Disease {
    type Err = PostprocessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COVID-19" => Ok(Disease::Covid19),
            "Influenza" => Ok(Disease::Influenza),
            other => Err(PostprocessError::Schema(format!("unknown disease label {:?}", other))),
        }
    }
}

/// One model task, as described by its `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub disease: Disease,
    pub geo_value: String,
    pub production_date: NaiveDate,
    pub run_at: DateTime<Utc>,
    pub job_id: String,
    pub task_id: String,
}

/// Deduplication key: one winning task per key
pub type TaskKey = (Disease, String, NaiveDate);

impl TaskRecord {
    pub fn key(&self) -> TaskKey {
        (self.disease, self.geo_value.clone(), self.production_date)
    }

    /// Location of this task's samples inside the model output container
    pub fn samples_path(&self) -> String {
        format!("{}/samples/{}.parquet", self.job_id, self.task_id)
    }

    /// Location of this task's summaries inside the model output container
    pub fn summaries_path(&self) -> String {
        format!("{}/summaries/{}.parquet", self.job_id, self.task_id)
    }

    /// Parse a task `metadata.json` document
    pub fn from_metadata_json(bytes: &[u8]) -> Result<Self> {
        let raw: RawTaskMetadata = serde_json::from_slice(bytes)?;
        Ok(Self {
            disease: raw.disease,
            geo_value: raw.geo_value,
            production_date: raw.production_date,
            run_at: parse_run_at(&raw.run_at)?,
            job_id: raw.job_id,
            task_id: raw.task_id,
        })
    }
}

#[derive(Deserialize)]
struct RawTaskMetadata {
    job_id: String,
    task_id: String,
    disease: Disease,
    geo_value: String,
    production_date: NaiveDate,
    run_at: String,
}

/// Parse a task `run_at` stamp. Offsets are honoured; a naive stamp is UTC.
pub fn parse_run_at(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(PostprocessError::Schema(format!("invalid run_at {:?}", raw)))
}

/// Inclusive run-time window used to pick tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    min_runat: DateTime<Utc>,
    max_runat: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(min_runat: DateTime<Utc>, max_runat: DateTime<Utc>) -> Result<Self> {
        if min_runat > max_runat {
            return Err(PostprocessError::Validation(format!(
                "min_runat {} is after max_runat {}",
                min_runat, max_runat
            )));
        }
        Ok(Self { min_runat, max_runat })
    }

    pub fn min_runat(&self) -> DateTime<Utc> {
        self.min_runat
    }

    pub fn max_runat(&self) -> DateTime<Utc> {
        self.max_runat
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.min_runat && at <= self.max_runat
    }
}
