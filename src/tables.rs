//! Small arrow/parquet helpers for the derived tables this crate writes.

use crate::task::TaskRecord;
use crate::Result;
use arrow::array::{ArrayRef, Date32Array, StringArray, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

/// Days since 1970-01-01, the arrow `Date32` encoding
pub fn date32(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days() as i32
}

/// Write one batch to a zstd compressed parquet file, creating parent directories
pub fn write_parquet(batch: &RecordBatch, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let mut writer = ArrowWriter::try_new(File::create(path)?, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Selected task metadata as written to `metadata.parquet`
pub fn tasks_batch(tasks: &[TaskRecord]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("job_id", DataType::Utf8, false),
        Field::new("task_id", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("production_date", DataType::Date32, false),
        Field::new("run_at", DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())), false),
        Field::new("blob_samples_path", DataType::Utf8, false),
        Field::new("blob_summaries_path", DataType::Utf8, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(tasks.iter().map(|t| t.job_id.as_str()))),
        Arc::new(StringArray::from_iter_values(tasks.iter().map(|t| t.task_id.as_str()))),
        Arc::new(StringArray::from_iter_values(tasks.iter().map(|t| t.disease.label()))),
        Arc::new(StringArray::from_iter_values(tasks.iter().map(|t| t.geo_value.as_str()))),
        Arc::new(Date32Array::from_iter_values(tasks.iter().map(|t| date32(t.production_date)))),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(tasks.iter().map(|t| t.run_at.timestamp_micros()))
                .with_timezone("UTC"),
        ),
        Arc::new(StringArray::from_iter_values(tasks.iter().map(TaskRecord::samples_path))),
        Arc::new(StringArray::from_iter_values(tasks.iter().map(TaskRecord::summaries_path))),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
