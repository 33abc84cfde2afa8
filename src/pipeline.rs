//! One merge invocation for a release: select the latest tasks, download and
//! merge their outputs, publish the merged artifacts and derived tables, and
//! for production runs record the release in the production index.

use crate::blob_store::{BlobFetcher, BlobStore};
use crate::config::MergeRequest;
use crate::growth_category::{calculate_categories, write_categories_csv, write_categories_parquet};
use crate::metadata_source::MetadataSource;
use crate::production_index::{
    INDEX_PREFIX, ProductionIndex, ProductionIndexRow, latest_snapshot, round_up_to_friday, select_run_date,
    snapshot_name, update_production_index,
};
use crate::report::{ReportInputs, ReportRenderer};
use crate::streaming_merge::{SinkOptions, SinkSummary, merge_parquet_files};
use crate::tables::{tasks_batch, write_parquet};
use crate::task::{Disease, TaskRecord};
use crate::task_selector::select_tasks;
use crate::Result;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const INTERNAL_REVIEW: &str = "internal-review";

/// Local working directories for one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    release_name: String,
    root: PathBuf,
}

impl ReleaseLayout {
    pub fn new(workdir: &Path, release_name: &str) -> Self {
        Self {
            release_name: release_name.to_string(),
            root: workdir.join(release_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a task blob is downloaded to
    pub fn download_path(&self, blob_path: &str) -> PathBuf {
        self.root.join("downloads").join(blob_path)
    }

    pub fn internal_review_dir(&self) -> PathBuf {
        self.root.join(INTERNAL_REVIEW)
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.internal_review_dir().join(name)
    }

    /// Blob name an output is published under
    pub fn blob_path(&self, name: &str) -> String {
        format!("{}/{}/{}", self.release_name, INTERNAL_REVIEW, name)
    }
}

/// What a completed merge produced
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub release_name: String,
    pub tasks: usize,
    pub samples: SinkSummary,
    pub summaries: SinkSummary,
    pub categories: usize,
    pub uploaded: Vec<String>,
    /// Outputs that could not be rendered or uploaded; the run still completes
    pub failed_uploads: Vec<String>,
    pub production_index: Option<ProductionIndexRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// No task metadata fell inside the window
    NothingToMerge,
    Merged(MergeReport),
}

/// Collaborators for a merge invocation
pub struct Pipeline<'a> {
    pub metadata: &'a dyn MetadataSource,
    /// Model output container, source of the per-task parquet files
    pub model_output: &'a dyn BlobFetcher,
    /// Post-processing container, destination of every published artifact
    pub post_process: &'a dyn BlobStore,
    pub renderer: Option<&'a dyn ReportRenderer>,
    pub sink: SinkOptions,
    pub workdir: PathBuf,
}

impl Pipeline<'_> {
    /// Run one merge. `started_at` fixes the release date and the production
    /// index snapshot name. The local release directory is removed on success
    /// and left in place on failure.
    pub fn run(&self, request: &MergeRequest, started_at: DateTime<Utc>) -> Result<MergeOutcome> {
        info!(
            release = %request.release_name,
            min_runat = %request.window.min_runat(),
            max_runat = %request.window.max_runat(),
            prod_date = ?request.prod_date,
            is_prod_run = request.is_prod_run,
            "starting merge"
        );

        let records = self.metadata.list_task_records(&request.window)?;
        let selection = select_tasks(records, &request.window, request.prod_date);
        if selection.is_empty() {
            warn!(release = %request.release_name, "no tasks found in the run window, nothing to merge");
            return Ok(MergeOutcome::NothingToMerge);
        }
        info!(tasks = selection.len(), jobs = ?selection.job_ids(), "selected tasks");

        let layout = ReleaseLayout::new(&self.workdir, &request.release_name);
        fs::create_dir_all(layout.internal_review_dir())?;
        let tasks = selection.tasks();
        let mut report = MergeReport {
            release_name: request.release_name.clone(),
            tasks: tasks.len(),
            samples: self.download_and_merge(&layout, tasks, TaskRecord::samples_path, "samples.parquet")?,
            summaries: self.download_and_merge(&layout, tasks, TaskRecord::summaries_path, "summaries.parquet")?,
            categories: 0,
            uploaded: Vec::new(),
            failed_uploads: Vec::new(),
            production_index: None,
        };
        write_parquet(&tasks_batch(tasks)?, &layout.output("metadata.parquet"))?;

        for name in ["summaries.parquet", "samples.parquet", "metadata.parquet"] {
            self.publish(&mut report, &layout.output(name), &layout.blob_path(name), request.overwrite_blobs);
        }

        if let Some(renderer) = self.renderer {
            self.render_reports(renderer, &layout, &mut report, request.overwrite_blobs);
        }

        let categories = calculate_categories(&layout.output("samples.parquet"), self.sink.memory())?;
        report.categories = categories.len();
        write_categories_parquet(&categories, &layout.output("p_growing.parquet"))?;
        write_categories_csv(&categories, &layout.output("p_growing.csv"))?;
        for name in ["p_growing.parquet", "p_growing.csv"] {
            self.publish(&mut report, &layout.output(name), &layout.blob_path(name), request.overwrite_blobs);
        }

        if request.is_prod_run {
            report.production_index = self.record_release(&mut report, tasks, started_at)?;
        }

        remove_release_dir(layout.root());

        info!(
            release = %report.release_name,
            tasks = report.tasks,
            sample_rows = report.samples.rows,
            summary_rows = report.summaries.rows,
            categories = report.categories,
            failed_uploads = report.failed_uploads.len(),
            "merge complete"
        );
        Ok(MergeOutcome::Merged(report))
    }

    fn download_and_merge(
        &self,
        layout: &ReleaseLayout,
        tasks: &[TaskRecord],
        blob_path: fn(&TaskRecord) -> String,
        output: &str,
    ) -> Result<SinkSummary> {
        let mut local = Vec::with_capacity(tasks.len());
        for task in tasks {
            let path = blob_path(task);
            let dest = layout.download_path(&path);
            self.model_output.download_to(&path, &dest)?;
            local.push(dest);
        }
        info!(files = local.len(), output, "downloaded task outputs");
        merge_parquet_files(&local, &layout.output(output), &self.sink)
    }

    /// Upload one file, recording rather than propagating a failure
    fn publish(&self, report: &mut MergeReport, local: &Path, blob: &str, overwrite: bool) -> bool {
        match self.post_process.upload_file(blob, local, overwrite) {
            Ok(()) => {
                info!(location = %self.post_process.location(blob), "uploaded");
                report.uploaded.push(blob.to_string());
                true
            }
            Err(e) => {
                error!(blob, error = %e, "failed to upload");
                report.failed_uploads.push(blob.to_string());
                false
            }
        }
    }

    fn render_reports(
        &self,
        renderer: &dyn ReportRenderer,
        layout: &ReleaseLayout,
        report: &mut MergeReport,
        overwrite: bool,
    ) {
        let inputs = ReportInputs {
            summaries: layout.output("summaries.parquet"),
            samples: layout.output("samples.parquet"),
            metadata: layout.output("metadata.parquet"),
        };
        for disease in Disease::ALL {
            let name = report_name(disease);
            let output = layout.output(&name);
            if let Err(e) = renderer.render(disease, &inputs, &output) {
                error!(%disease, error = %e, "failed to render anomaly report");
                report.failed_uploads.push(layout.blob_path(&name));
                continue;
            }
            if self.publish(report, &output, &layout.blob_path(&name), overwrite) {
                self.publish(report, &output, &latest_report_name(disease), overwrite);
            }
        }
    }

    /// Add this release to the production index and publish a new snapshot
    fn record_release(
        &self,
        report: &mut MergeReport,
        tasks: &[TaskRecord],
        started_at: DateTime<Utc>,
    ) -> Result<Option<ProductionIndexRow>> {
        let Some(run_date) = select_run_date(tasks) else {
            return Ok(None);
        };
        let release_date = round_up_to_friday(started_at.date_naive());

        let entries = self.post_process.list(INDEX_PREFIX)?;
        let current = match latest_snapshot(&entries) {
            Some(entry) => {
                info!(snapshot = %entry.name, "using most recent production index");
                ProductionIndex::from_csv(self.post_process.fetch(&entry.name)?.as_slice())?
            }
            None => {
                warn!("no production index found, starting a new one");
                ProductionIndex::new()
            }
        };

        let updated = update_production_index(&current, release_date, run_date);
        let name = snapshot_name(started_at);
        match self.post_process.write(&name, &updated.to_csv()?, false) {
            Ok(()) => {
                info!(location = %self.post_process.location(&name), rows = updated.len(), "uploaded production index");
                report.uploaded.push(name);
            }
            Err(e) => {
                error!(blob = %name, error = %e, "failed to upload production index");
                report.failed_uploads.push(name);
            }
        }
        Ok(Some(ProductionIndexRow { release_date, run_date }))
    }
}

/// Everything is published by now; a leftover directory only costs disk
fn remove_release_dir(root: &Path) -> bool {
    info!(root = %root.display(), "cleaning up release directory");
    match fs::remove_dir_all(root) {
        Ok(()) => true,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "failed to remove release directory");
            false
        }
    }
}

fn report_name(disease: Disease) -> String {
    format!("{}_anomaly_report.html", disease.slug())
}

/// Container-root copy of the newest report for a disease
fn latest_report_name(disease: Disease) -> String {
    let short = match disease {
        Disease::Covid19 => "covid",
        Disease::Influenza => "flu",
    };
    format!("latest_anomaly_report_{}.html", short)
}
