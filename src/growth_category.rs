//! Five-bucket growth categories from posterior Rt draws.
//!
//! The samples file is usually several gigabytes. It is scanned in record
//! batches with only the needed columns decoded, and draws are tallied per
//! (geo_value, disease, reference_date), so memory scales with the number of
//! groups rather than the number of rows.

use crate::memory_config::MemoryConfig;
use crate::tables::{date32, write_parquet};
use crate::task::Disease;
use crate::{PostprocessError, Result};
use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A draw counts as growing when Rt is strictly above this
pub const GROWTH_THRESHOLD: f64 = 1.0;

/// Variable tag of the Rt draws in the samples table
pub const RT_VARIABLE: &str = "Rt";

/// Candidate names for the variable column; upstream writes `_variable`
const VARIABLE_COLUMNS: [&str; 2] = ["_variable", "variable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrowthCategory {
    Growing,
    LikelyGrowing,
    NotChanging,
    LikelyDeclining,
    Declining,
}

impl GrowthCategory {
    pub fn label(&self) -> &'static str {
        match self {
            GrowthCategory::Growing => "Growing",
            GrowthCategory::LikelyGrowing => "Likely Growing",
            GrowthCategory::NotChanging => "Not Changing",
            GrowthCategory::LikelyDeclining => "Likely Declining",
            GrowthCategory::Declining => "Declining",
        }
    }

    /// Position on the Declining (0) to Growing (4) scale
    pub fn rank(&self) -> u8 {
        match self {
            GrowthCategory::Declining => 0,
            GrowthCategory::LikelyDeclining => 1,
            GrowthCategory::NotChanging => 2,
            GrowthCategory::LikelyGrowing => 3,
            GrowthCategory::Growing => 4,
        }
    }

    /// Band a probability of growth; `None` means not estimated.
    ///
    /// Bands are checked top down and the first match wins:
    /// (0.90, 1.0] Growing, (0.75, 0.90] Likely Growing, (0.25, 0.75] Not Changing,
    /// (0.10, 0.25] Likely Declining, [0.0, 0.10] Declining.
    pub fn from_p_growing(p_growing: f64) -> Option<Self> {
        let p = p_growing;
        if p > 0.90 && p <= 1.0 {
            Some(GrowthCategory::Growing)
        } else if p > 0.75 && p <= 0.90 {
            Some(GrowthCategory::LikelyGrowing)
        } else if p > 0.25 && p <= 0.75 {
            Some(GrowthCategory::NotChanging)
        } else if p > 0.10 && p <= 0.25 {
            Some(GrowthCategory::LikelyDeclining)
        } else if (0.0..=0.10).contains(&p) {
            Some(GrowthCategory::Declining)
        } else {
            None
        }
    }
}

impl fmt::Display for GrowthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrowthCategoryRow {
    pub geo_value: String,
    pub disease: Disease,
    pub reference_date: NaiveDate,
    pub p_growing: f64,
    pub category: Option<GrowthCategory>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    draws: u64,
    growing: u64,
}

type Tallies = BTreeMap<String, BTreeMap<(Disease, NaiveDate), Tally>>;

/// Compute p_growing and its category for every (geo_value, disease, reference_date)
/// in a samples parquet file. Rows come back sorted by that key.
pub fn calculate_categories(samples: &Path, memory: &MemoryConfig) -> Result<Vec<GrowthCategoryRow>> {
    let file = File::open(samples)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();

    let variable_column = VARIABLE_COLUMNS
        .iter()
        .copied()
        .find(|name| schema.index_of(name).is_ok())
        .ok_or_else(|| {
            PostprocessError::Schema(format!(
                "{} has no variable column (looked for {:?})",
                samples.display(),
                VARIABLE_COLUMNS
            ))
        })?;

    let columns = SampleColumns {
        variable: variable_column,
    };
    let indices = columns
        .names()
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                PostprocessError::Schema(format!("{} has no {:?} column", samples.display(), name))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
    let reader = builder
        .with_projection(mask)
        .with_batch_size(memory.read_batch_size)
        .build()?;

    let mut tallies = Tallies::new();
    let mut rows_read = 0u64;
    for batch in reader {
        let batch = batch?;
        rows_read += batch.num_rows() as u64;
        columns.tally(&batch, &mut tallies)?;
    }

    let rows: Vec<GrowthCategoryRow> = tallies
        .into_iter()
        .flat_map(|(geo_value, by_key)| {
            by_key.into_iter().map(move |((disease, reference_date), tally)| {
                let p_growing = tally.growing as f64 / tally.draws as f64;
                GrowthCategoryRow {
                    geo_value: geo_value.clone(),
                    disease,
                    reference_date,
                    p_growing,
                    category: GrowthCategory::from_p_growing(p_growing),
                }
            })
        })
        .collect();

    info!(
        samples = %samples.display(),
        rows_read,
        groups = rows.len(),
        "calculated growth categories"
    );

    Ok(rows)
}

struct SampleColumns {
    variable: &'static str,
}

impl SampleColumns {
    fn names(&self) -> [&'static str; 5] {
        ["reference_date", "geo_value", "disease", self.variable, "value"]
    }

    fn tally(&self, batch: &RecordBatch, tallies: &mut Tallies) -> Result<()> {
        let variables = column_as(batch, self.variable, &DataType::Utf8)?;
        let variables = downcast::<StringArray>(&variables, self.variable)?;
        let geos = column_as(batch, "geo_value", &DataType::Utf8)?;
        let geos = downcast::<StringArray>(&geos, "geo_value")?;
        let diseases = column_as(batch, "disease", &DataType::Utf8)?;
        let diseases = downcast::<StringArray>(&diseases, "disease")?;
        let dates = column_as(batch, "reference_date", &DataType::Date32)?;
        let dates = downcast::<Date32Array>(&dates, "reference_date")?;
        let values = column_as(batch, "value", &DataType::Float64)?;
        let values = downcast::<Float64Array>(&values, "value")?;

        for i in 0..batch.num_rows() {
            if variables.is_null(i) || variables.value(i) != RT_VARIABLE {
                continue;
            }
            if geos.is_null(i) || diseases.is_null(i) || dates.is_null(i) {
                continue;
            }
            let Some(reference_date) = dates.value_as_date(i) else {
                continue;
            };
            let disease: Disease = diseases.value(i).parse()?;
            let growing = values.is_valid(i) && values.value(i) > GROWTH_THRESHOLD;

            let geo = geos.value(i);
            if !tallies.contains_key(geo) {
                tallies.insert(geo.to_owned(), BTreeMap::new());
            }
            if let Some(by_key) = tallies.get_mut(geo) {
                let tally = by_key.entry((disease, reference_date)).or_default();
                tally.draws += 1;
                if growing {
                    tally.growing += 1;
                }
            }
        }

        Ok(())
    }
}

/// Read a column as `to`, casting dictionary, large string, timestamp or numeric variants
fn column_as(batch: &RecordBatch, name: &str, to: &DataType) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| PostprocessError::Schema(format!("missing column {:?}", name)))?;
    if column.data_type() == to {
        return Ok(column.clone());
    }
    cast(column, to).map_err(|e| {
        PostprocessError::Schema(format!(
            "column {:?} of type {} cannot be read as {}: {}",
            name,
            column.data_type(),
            to,
            e
        ))
    })
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PostprocessError::Schema(format!("column {:?} has unexpected type {}", name, array.data_type()))
    })
}

#[derive(Serialize)]
struct CategoryRecord<'a> {
    geo_value: &'a str,
    disease: &'static str,
    reference_date: NaiveDate,
    p_growing: f64,
    five_cat_p_growing: Option<&'static str>,
}

/// Write categories as CSV with columns
/// `geo_value,disease,reference_date,p_growing,five_cat_p_growing`
pub fn write_categories_csv(rows: &[GrowthCategoryRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(CategoryRecord {
            geo_value: &row.geo_value,
            disease: row.disease.label(),
            reference_date: row.reference_date,
            p_growing: row.p_growing,
            five_cat_p_growing: row.category.as_ref().map(GrowthCategory::label),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn categories_batch(rows: &[GrowthCategoryRow]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("reference_date", DataType::Date32, false),
        Field::new("p_growing", DataType::Float64, false),
        Field::new("five_cat_p_growing", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.geo_value.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.disease.label()))),
        Arc::new(Date32Array::from_iter_values(rows.iter().map(|r| date32(r.reference_date)))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.p_growing))),
        Arc::new(StringArray::from_iter(
            rows.iter().map(|r| r.category.as_ref().map(GrowthCategory::label)),
        )),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

pub fn write_categories_parquet(rows: &[GrowthCategoryRow], path: &Path) -> Result<()> {
    write_parquet(&categories_batch(rows)?, path)
}
