use chrono::{NaiveDate, Utc};
use clap::Parser;
use rt_postprocess::blob_store::{BlobFetcher, BlobStore, LocalBlobStore};
use rt_postprocess::config::{MergeArgs, MergeRequest, PipelineConfig};
use rt_postprocess::memory_config::MemoryConfig;
use rt_postprocess::metadata_source::BlobMetadataSource;
use rt_postprocess::report::{QuartoRenderer, ReportRenderer};
use rt_postprocess::streaming_merge::SinkOptions;
use rt_postprocess::{MergeOutcome, Pipeline, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "rt_merge")]
#[command(about = "Merge Rt model outputs for a release and publish derived tables", long_about = None)]
struct Cli {
    /// Release name; outputs go under <release_name>/internal-review/
    #[arg(long)]
    release_name: String,
    /// Earliest task run time to include (ISO-8601)
    #[arg(long)]
    min_runat: String,
    /// Latest task run time to include (ISO-8601)
    #[arg(long)]
    max_runat: String,
    /// Only merge tasks for this production date
    #[arg(long)]
    prod_date: Option<NaiveDate>,
    #[arg(long)]
    rt_output_container_name: Option<String>,
    #[arg(long)]
    post_process_container_name: Option<String>,
    /// Replace existing blobs instead of failing
    #[arg(long)]
    overwrite_blobs: bool,
    /// Record the release in the production index
    #[arg(long)]
    is_prod_run: bool,
    /// Serve containers from <dir>/<container> instead of object storage
    #[arg(long)]
    local_root: Option<PathBuf>,
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Quarto document rendered into the per-disease anomaly reports
    #[arg(long)]
    report_template: Option<PathBuf>,
    #[arg(long)]
    compression_level: Option<i32>,
}

fn main() -> ExitCode {
    #[cfg(feature = "s3")]
    dotenv::dotenv().ok();
    rt_postprocess::init_tracing("rt-merge");
    let cli = Cli::parse();

    match run(cli) {
        Ok(MergeOutcome::NothingToMerge) => {
            println!("No tasks found in the run window; nothing merged.");
            ExitCode::SUCCESS
        }
        Ok(MergeOutcome::Merged(report)) => {
            println!(
                "Merged {} tasks for {}: {} sample rows, {} summary rows, {} growth categories",
                report.tasks, report.release_name, report.samples.rows, report.summaries.rows, report.categories
            );
            if let Some(row) = report.production_index {
                println!("Production index: release {} -> run {}", row.release_date, row.run_date);
            }
            if !report.failed_uploads.is_empty() {
                warn!(failed = ?report.failed_uploads, "some outputs were not published");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "merge failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<MergeOutcome> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(workdir) = cli.workdir {
        config.workdir = workdir;
    }
    if let Some(level) = cli.compression_level {
        config.compression_level = level;
    }
    if cli.report_template.is_some() {
        config.report_template = cli.report_template;
    }
    if cli.local_root.is_some() {
        config.local_blob_root = cli.local_root;
    }

    let request = MergeArgs {
        release_name: Some(cli.release_name),
        min_runat: Some(cli.min_runat),
        max_runat: Some(cli.max_runat),
        prod_date: cli.prod_date,
        rt_output_container_name: cli.rt_output_container_name,
        post_process_container_name: cli.post_process_container_name,
        overwrite_blobs: cli.overwrite_blobs,
        is_prod_run: cli.is_prod_run,
    }
    .validate()?;
    let sink = config.sink_options(MemoryConfig::calculate())?;

    if let Some(root) = &config.local_blob_root {
        let model_output = LocalBlobStore::new(root.join(&request.rt_output_container));
        let post_process = LocalBlobStore::new(root.join(&request.post_process_container));
        return execute(&request, &config, sink, &model_output, &post_process);
    }

    execute_remote(&request, &config, sink)
}

#[cfg(feature = "s3")]
fn execute_remote(request: &MergeRequest, config: &PipelineConfig, sink: SinkOptions) -> Result<MergeOutcome> {
    use rt_postprocess::s3_store::S3BlobStore;
    let model_output = S3BlobStore::from_env(&request.rt_output_container)?;
    let post_process = S3BlobStore::from_env(&request.post_process_container)?;
    execute(request, config, sink, &model_output, &post_process)
}

#[cfg(not(feature = "s3"))]
fn execute_remote(_request: &MergeRequest, _config: &PipelineConfig, _sink: SinkOptions) -> Result<MergeOutcome> {
    Err(rt_postprocess::PostprocessError::Validation(
        "no blob store configured: pass --local-root, set RT_LOCAL_BLOB_ROOT, or build with the s3 feature"
            .to_string(),
    ))
}

fn execute<F: BlobFetcher, S: BlobStore>(
    request: &MergeRequest,
    config: &PipelineConfig,
    sink: SinkOptions,
    model_output: &F,
    post_process: &S,
) -> Result<MergeOutcome> {
    let renderer = config.report_template.as_ref().map(QuartoRenderer::new);
    let metadata = BlobMetadataSource::new(model_output);
    let pipeline = Pipeline {
        metadata: &metadata,
        model_output,
        post_process,
        renderer: renderer.as_ref().map(|r| r as &dyn ReportRenderer),
        sink,
        workdir: config.workdir.clone(),
    };
    pipeline.run(request, Utc::now())
}
