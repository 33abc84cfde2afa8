mod common;

use arrow::array::{ArrayRef, DictionaryArray, Float64Array, LargeStringArray, StringArray};
use arrow::datatypes::{DataType, Field, Int32Type, Schema};
use arrow::record_batch::RecordBatch;
use common::*;
use rt_postprocess::PostprocessError;
use rt_postprocess::growth_category::{GrowthCategory, calculate_categories};
use rt_postprocess::memory_config::MemoryConfig;
use rt_postprocess::task::Disease;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_half_of_draws_above_one_is_not_changing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    let d = date(2025, 1, 20);
    write_batch(
        &path,
        &samples_batch(&[
            ("NM", "COVID-19", d, "Rt", 0.8),
            ("NM", "COVID-19", d, "Rt", 0.95),
            ("NM", "COVID-19", d, "Rt", 1.1),
            ("NM", "COVID-19", d, "Rt", 1.2),
        ]),
    );

    let rows = calculate_categories(&path, &MemoryConfig::default_config()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].geo_value, "NM");
    assert_eq!(rows[0].disease, Disease::Covid19);
    assert_eq!(rows[0].reference_date, d);
    assert_eq!(rows[0].p_growing, 0.5);
    assert_eq!(rows[0].category, Some(GrowthCategory::NotChanging));
}

#[test]
fn test_only_rt_draws_count_and_one_is_not_growing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    let d = date(2025, 1, 20);
    write_batch(
        &path,
        &samples_batch(&[
            ("US", "Influenza", d, "Rt", 1.0),
            ("US", "Influenza", d, "Rt", 1.01),
            ("US", "Influenza", d, "growth_rate", 9.0),
            ("US", "Influenza", d, "growth_rate", 9.0),
        ]),
    );

    let rows = calculate_categories(&path, &MemoryConfig::default_config()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].p_growing, 0.5);
}

#[test]
fn test_groups_are_sorted_and_split_by_every_key_part() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    let (d1, d2) = (date(2025, 1, 19), date(2025, 1, 20));
    write_batch(
        &path,
        &samples_batch(&[
            ("US", "Influenza", d2, "Rt", 0.5),
            ("NM", "Influenza", d1, "Rt", 2.0),
            ("NM", "COVID-19", d2, "Rt", 0.9),
            ("NM", "COVID-19", d1, "Rt", 1.9),
        ]),
    );

    // A batch size of one exercises accumulation across many batches
    let memory = MemoryConfig {
        read_batch_size: 1,
        max_row_group_size: 1,
    };
    let rows = calculate_categories(&path, &memory).unwrap();
    let keys: Vec<_> = rows
        .iter()
        .map(|r| (r.geo_value.as_str(), r.disease, r.reference_date, r.category))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("NM", Disease::Covid19, d1, Some(GrowthCategory::Growing)),
            ("NM", Disease::Covid19, d2, Some(GrowthCategory::Declining)),
            ("NM", Disease::Influenza, d1, Some(GrowthCategory::Growing)),
            ("US", Disease::Influenza, d2, Some(GrowthCategory::Declining)),
        ]
    );
}

#[test]
fn test_dictionary_and_string_typed_columns_are_normalized() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("reference_date", DataType::Utf8, false),
        Field::new(
            "geo_value",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            false,
        ),
        Field::new("disease", DataType::LargeUtf8, false),
        Field::new("variable", DataType::Utf8, false),
        Field::new("value", DataType::Float64, true),
        Field::new("draw", DataType::Float64, false),
    ]));
    let geos: DictionaryArray<Int32Type> = vec!["CA"; 4].into_iter().collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec!["2025-01-20"; 4])),
        Arc::new(geos),
        Arc::new(LargeStringArray::from(vec!["COVID-19"; 4])),
        Arc::new(StringArray::from(vec!["Rt"; 4])),
        Arc::new(Float64Array::from(vec![Some(1.5), None, Some(0.5), Some(0.7)])),
        Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0])),
    ];
    write_batch(&path, &RecordBatch::try_new(schema, columns).unwrap());

    let rows = calculate_categories(&path, &MemoryConfig::default_config()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].geo_value, "CA");
    assert_eq!(rows[0].reference_date, date(2025, 1, 20));
    // a null draw counts toward the total but never as growing
    assert_eq!(rows[0].p_growing, 0.25);
    assert_eq!(rows[0].category, Some(GrowthCategory::LikelyDeclining));
}

#[test]
fn test_missing_value_column_is_schema_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("reference_date", DataType::Utf8, false),
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("_variable", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec!["2025-01-20"])),
        Arc::new(StringArray::from(vec!["CA"])),
        Arc::new(StringArray::from(vec!["COVID-19"])),
        Arc::new(StringArray::from(vec!["Rt"])),
    ];
    write_batch(&path, &RecordBatch::try_new(schema, columns).unwrap());

    let err = calculate_categories(&path, &MemoryConfig::default_config()).unwrap_err();
    assert!(matches!(err, PostprocessError::Schema(_)));
}

#[test]
fn test_unknown_disease_is_schema_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    write_batch(&path, &samples_batch(&[("CA", "RSV", date(2025, 1, 20), "Rt", 1.5)]));
    let err = calculate_categories(&path, &MemoryConfig::default_config()).unwrap_err();
    assert!(matches!(err, PostprocessError::Schema(_)));
}
