use crate::blob_store::BlobFetcher;
use crate::task::{RunWindow, TaskRecord};
use crate::Result;
use tracing::{debug, info};

/// Where task metadata comes from
pub trait MetadataSource {
    /// Every task record whose metadata was produced inside `window`
    fn list_task_records(&self, window: &RunWindow) -> Result<Vec<TaskRecord>>;
}

/// Reads `metadata.json` blobs from the model output container
pub struct BlobMetadataSource<'a, F: BlobFetcher + ?Sized> {
    fetcher: &'a F,
}

impl<'a, F: BlobFetcher + ?Sized> BlobMetadataSource<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self { fetcher }
    }
}

impl<F: BlobFetcher + ?Sized> MetadataSource for BlobMetadataSource<'_, F> {
    /// Blobs are first narrowed by creation time so only this window's metadata
    /// is downloaded; records are then filtered again on their own `run_at`.
    fn list_task_records(&self, window: &RunWindow) -> Result<Vec<TaskRecord>> {
        let entries: Vec<_> = self
            .fetcher
            .list("")?
            .into_iter()
            .filter(|e| e.name.ends_with("metadata.json") && window.contains(e.created))
            .collect();
        info!(count = entries.len(), "found metadata files");

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let bytes = self.fetcher.fetch(&entry.name)?;
            let record = TaskRecord::from_metadata_json(&bytes)?;
            debug!(blob = %entry.name, task_id = %record.task_id, run_at = %record.run_at, "read task metadata");
            if window.contains(record.run_at) {
                records.push(record);
            }
        }
        Ok(records)
    }
}
