use crate::memory_config::MemoryConfig;
use crate::streaming_merge::{DEFAULT_COMPRESSION_LEVEL, SinkOptions};
use crate::task::RunWindow;
use crate::{PostprocessError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_RT_OUTPUT_CONTAINER: &str = "nssp-rt";
pub const DEFAULT_POST_PROCESS_CONTAINER: &str = "nssp-rt-post-process";

/// Unvalidated merge arguments, as they arrive from a CLI or a JSON body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeArgs {
    pub release_name: Option<String>,
    pub min_runat: Option<String>,
    pub max_runat: Option<String>,
    #[serde(default)]
    pub prod_date: Option<NaiveDate>,
    pub rt_output_container_name: Option<String>,
    pub post_process_container_name: Option<String>,
    #[serde(default)]
    pub overwrite_blobs: bool,
    #[serde(default)]
    pub is_prod_run: bool,
}

/// Validated arguments for one merge invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub release_name: String,
    pub window: RunWindow,
    pub prod_date: Option<NaiveDate>,
    pub rt_output_container: String,
    pub post_process_container: String,
    pub overwrite_blobs: bool,
    pub is_prod_run: bool,
}

impl MergeArgs {
    pub fn validate(self) -> Result<MergeRequest> {
        let (Some(release_name), Some(min_runat), Some(max_runat)) =
            (self.release_name, self.min_runat, self.max_runat)
        else {
            return Err(PostprocessError::Validation(
                "release_name, min_runat, and max_runat are required".to_string(),
            ));
        };

        let release_name = release_name.trim().to_string();
        if release_name.is_empty() || release_name.contains(['/', '\\']) || release_name == ".." || release_name == "." {
            return Err(PostprocessError::Validation(format!(
                "release_name {:?} must be a single path segment",
                release_name
            )));
        }

        let window = RunWindow::new(parse_runat(&min_runat)?, parse_runat(&max_runat)?)?;

        // Production runs replace the release's published artifacts
        if self.is_prod_run && !self.overwrite_blobs {
            return Err(PostprocessError::Validation(
                "overwrite_blobs must be true for a production run".to_string(),
            ));
        }

        Ok(MergeRequest {
            release_name,
            window,
            prod_date: self.prod_date,
            rt_output_container: self
                .rt_output_container_name
                .unwrap_or_else(|| DEFAULT_RT_OUTPUT_CONTAINER.to_string()),
            post_process_container: self
                .post_process_container_name
                .unwrap_or_else(|| DEFAULT_POST_PROCESS_CONTAINER.to_string()),
            overwrite_blobs: self.overwrite_blobs,
            is_prod_run: self.is_prod_run,
        })
    }
}

/// Parse an ISO-8601 window bound and stamp it UTC.
///
/// Any offset in the input is dropped and the wall-clock time kept, so
/// `2024-12-17T19:40:06+02:00` and `2024-12-17T19:40:06` are the same bound.
pub fn parse_runat(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local().and_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    Err(PostprocessError::Validation(format!(
        "min_runat and max_runat must be ISO-formatted strings, got {:?}",
        raw
    )))
}

/// Process-level settings, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Release directories are created under this directory
    pub workdir: PathBuf,
    pub compression_level: i32,
    pub report_template: Option<PathBuf>,
    /// Use a local directory per container instead of object storage
    pub local_blob_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            report_template: None,
            local_blob_root: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let workdir = non_empty_var("RT_WORKDIR").map(PathBuf::from).unwrap_or(defaults.workdir);
        let compression_level = match non_empty_var("RT_COMPRESSION_LEVEL") {
            Some(raw) => raw.parse::<i32>().map_err(|e| {
                PostprocessError::Validation(format!("RT_COMPRESSION_LEVEL {:?}: {}", raw, e))
            })?,
            None => defaults.compression_level,
        };

        let config = Self {
            workdir,
            compression_level,
            report_template: non_empty_var("RT_REPORT_TEMPLATE").map(PathBuf::from),
            local_blob_root: non_empty_var("RT_LOCAL_BLOB_ROOT").map(PathBuf::from),
        };
        config.sink_options(MemoryConfig::default_config())?;
        Ok(config)
    }

    pub fn sink_options(&self, memory: MemoryConfig) -> Result<SinkOptions> {
        SinkOptions::new(self.compression_level, memory)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
