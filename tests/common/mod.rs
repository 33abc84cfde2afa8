#![allow(dead_code)]

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rt_postprocess::tables::date32;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One posterior draw: (geo_value, disease, reference_date, variable, value)
pub type Draw<'a> = (&'a str, &'a str, NaiveDate, &'a str, f64);

pub fn samples_batch(draws: &[Draw]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("reference_date", DataType::Date32, false),
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("_variable", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Date32Array::from_iter_values(draws.iter().map(|d| date32(d.2)))),
        Arc::new(StringArray::from_iter_values(draws.iter().map(|d| d.0))),
        Arc::new(StringArray::from_iter_values(draws.iter().map(|d| d.1))),
        Arc::new(StringArray::from_iter_values(draws.iter().map(|d| d.3))),
        Arc::new(Float64Array::from_iter_values(draws.iter().map(|d| d.4))),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

/// Summary rows for one (geo, disease): one row per reference date
pub fn summaries_batch(geo: &str, disease: &str, dates: &[NaiveDate]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("time", DataType::Int64, false),
        Field::new("reference_date", DataType::Date32, false),
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("width", DataType::Float64, false),
        Field::new("_variable", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new("lower", DataType::Float64, false),
        Field::new("upper", DataType::Float64, false),
    ]));
    let n = dates.len();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..n as i64)),
        Arc::new(Date32Array::from_iter_values(dates.iter().map(|d| date32(*d)))),
        Arc::new(StringArray::from_iter_values(std::iter::repeat_n(geo, n))),
        Arc::new(StringArray::from_iter_values(std::iter::repeat_n(disease, n))),
        Arc::new(Float64Array::from_iter_values(std::iter::repeat_n(0.95, n))),
        Arc::new(StringArray::from_iter_values(std::iter::repeat_n("Rt", n))),
        Arc::new(Float64Array::from_iter_values(std::iter::repeat_n(1.0, n))),
        Arc::new(Float64Array::from_iter_values(std::iter::repeat_n(0.8, n))),
        Arc::new(Float64Array::from_iter_values(std::iter::repeat_n(1.2, n))),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

pub fn write_batch(path: &Path, batch: &RecordBatch) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

pub fn parquet_bytes(batch: &RecordBatch) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
    buffer
}

pub fn read_all(path: &Path) -> Vec<RecordBatch> {
    ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap()
        .map(|b| b.unwrap())
        .collect()
}

pub fn row_count(path: &Path) -> usize {
    read_all(path).iter().map(RecordBatch::num_rows).sum()
}

pub fn metadata_json(job_id: &str, task_id: &str, disease: &str, geo: &str, production_date: &str, run_at: &str) -> String {
    format!(
        r#"{{"job_id":"{}","task_id":"{}","disease":"{}","geo_value":"{}","production_date":"{}","run_at":"{}","status":"succeeded"}}"#,
        job_id, task_id, disease, geo, production_date, run_at
    )
}
