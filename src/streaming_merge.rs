//! Bounded-memory concatenation of parquet files.
//!
//! Inputs are held as lazy [`ParquetScan`] references and composed into a
//! [`LazyConcat`]. Nothing is decoded until [`LazyConcat::sink_parquet`], which
//! streams one record batch at a time from each input into a single zstd
//! compressed output file.

use crate::memory_config::MemoryConfig;
use crate::{PostprocessError, Result};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// zstd level used for merged outputs; the host disk is small next to the inputs
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    compression_level: i32,
    memory: MemoryConfig,
}

impl SinkOptions {
    /// zstd accepts levels 1 through 22
    pub fn new(compression_level: i32, memory: MemoryConfig) -> Result<Self> {
        if !(1..=22).contains(&compression_level) {
            return Err(PostprocessError::Validation(format!(
                "compression level must be between 1 and 22, got {}",
                compression_level
            )));
        }
        Ok(Self {
            compression_level,
            memory,
        })
    }

    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    pub fn memory(&self) -> &MemoryConfig {
        &self.memory
    }

    pub fn writer_properties(&self) -> Result<WriterProperties> {
        let level = ZstdLevel::try_new(self.compression_level)?;
        Ok(WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(self.memory.max_row_group_size)
            .build())
    }
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            memory: MemoryConfig::default_config(),
        }
    }
}

/// A parquet file that has not been opened yet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParquetScan {
    path: PathBuf,
}

impl ParquetScan {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file and reads its footer only
    fn open(&self) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        let file = File::open(&self.path).map_err(|e| {
            PostprocessError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open {}: {}", self.path.display(), e),
            ))
        })?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
    }
}

/// Rows written by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSummary {
    pub files: usize,
    pub rows: u64,
}

/// Deferred concatenation of parquet scans, ordered by path
#[derive(Debug, Clone, Default)]
pub struct LazyConcat {
    scans: Vec<ParquetScan>,
}

impl LazyConcat {
    pub fn new(scans: impl IntoIterator<Item = ParquetScan>) -> Self {
        let mut scans: Vec<ParquetScan> = scans.into_iter().collect();
        scans.sort();
        Self { scans }
    }

    pub fn scan_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self::new(paths.into_iter().map(|p| ParquetScan::new(p.as_ref())))
    }

    pub fn scans(&self) -> &[ParquetScan] {
        &self.scans
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    /// Output schema of the concatenation, checked against every input footer.
    ///
    /// All inputs must carry the same column names with the same types; column
    /// order follows the first input and a column is nullable if it is nullable
    /// in any input.
    pub fn resolve_schema(&self) -> Result<SchemaRef> {
        let mut scans = self.scans.iter();
        let first = scans
            .next()
            .ok_or_else(|| PostprocessError::Validation("no input files to merge".to_string()))?;
        let mut fields: Vec<Field> = first
            .open()?
            .schema()
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), f.data_type().clone(), f.is_nullable()))
            .collect();
        let expected = sorted_names(fields.iter());
        if let Some(pair) = expected.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(PostprocessError::Schema(format!(
                "{} has duplicate column {:?}",
                first.path().display(),
                pair[0]
            )));
        }

        for scan in scans {
            let builder = scan.open()?;
            let schema = builder.schema();

            if sorted_names(schema.fields().iter().map(|f| f.as_ref())) != expected {
                return Err(column_set_mismatch(&fields, schema, scan.path()));
            }

            for field in fields.iter_mut() {
                let other = schema.field_with_name(field.name())?;
                if other.data_type() != field.data_type() {
                    return Err(PostprocessError::Schema(format!(
                        "column {:?} is {} in {} but {} in earlier inputs",
                        field.name(),
                        other.data_type(),
                        scan.path().display(),
                        field.data_type()
                    )));
                }
                if other.is_nullable() && !field.is_nullable() {
                    *field = field.clone().with_nullable(true);
                }
            }
        }

        Ok(Arc::new(Schema::new(fields)))
    }

    /// Execute the concatenation into `target`.
    ///
    /// Footers are validated before the output is created, so a missing input or
    /// a schema mismatch leaves no output behind.
    pub fn sink_parquet(&self, target: &Path, options: &SinkOptions) -> Result<SinkSummary> {
        let schema = self.resolve_schema()?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(target)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(options.writer_properties()?))?;

        let mut rows = 0u64;
        for scan in &self.scans {
            let reader = scan
                .open()?
                .with_batch_size(options.memory.read_batch_size)
                .build()?;

            let mut file_rows = 0u64;
            for batch in reader {
                let batch = conform_batch(&schema, &batch?)?;
                file_rows += batch.num_rows() as u64;
                writer.write(&batch)?;
            }
            debug!(path = %scan.path().display(), rows = file_rows, "appended input");
            rows += file_rows;
        }
        writer.close()?;

        info!(
            target = %target.display(),
            files = self.scans.len(),
            rows,
            compression_level = options.compression_level,
            "merged parquet inputs"
        );

        Ok(SinkSummary {
            files: self.scans.len(),
            rows,
        })
    }
}

/// Merge local parquet files of one artifact kind into `target`
pub fn merge_parquet_files<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    target: &Path,
    options: &SinkOptions,
) -> Result<SinkSummary> {
    LazyConcat::scan_paths(paths).sink_parquet(target, options)
}

/// Reorder a batch's columns to the output schema
fn conform_batch(schema: &SchemaRef, batch: &RecordBatch) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| {
            batch
                .column_by_name(f.name())
                .cloned()
                .ok_or_else(|| PostprocessError::Schema(format!("batch is missing column {:?}", f.name())))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn sorted_names<'a>(fields: impl Iterator<Item = &'a Field>) -> Vec<String> {
    let mut names: Vec<String> = fields.map(|f| f.name().clone()).collect();
    names.sort_unstable();
    names
}

fn column_set_mismatch(expected: &[Field], found: &Schema, path: &Path) -> PostprocessError {
    let expected: Vec<&str> = expected.iter().map(|f| f.name().as_str()).collect();
    let found: Vec<&str> = found.fields().iter().map(|f| f.name().as_str()).collect();
    PostprocessError::Schema(format!(
        "{} has columns {:?}, expected {:?}",
        path.display(),
        found,
        expected
    ))
}
