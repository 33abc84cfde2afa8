use arrow::array::{ArrayRef, Date32Array, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use parquet::arrow::ArrowWriter;
use rt_postprocess::growth_category::{GrowthCategory, calculate_categories};
use rt_postprocess::memory_config::MemoryConfig;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const GEOS: [&str; 8] = ["AK", "AL", "AZ", "CA", "CO", "NM", "NY", "US"];
const DISEASES: [&str; 2] = ["COVID-19", "Influenza"];

/// `dates * draws` Rt rows for every geo and disease
fn write_samples(path: &Path, dates: i32, draws: usize) {
    let mut geo = Vec::new();
    let mut disease = Vec::new();
    let mut reference_date = Vec::new();
    let mut value = Vec::new();
    for (g, name) in GEOS.iter().enumerate() {
        for d in DISEASES {
            for day in 0..dates {
                for i in 0..draws {
                    geo.push(*name);
                    disease.push(d);
                    reference_date.push(20_000 + day);
                    value.push(0.5 + ((g * 31 + i * 7) % 100) as f64 / 100.0);
                }
            }
        }
    }
    let rows = value.len();
    let schema = Arc::new(Schema::new(vec![
        Field::new("reference_date", DataType::Date32, false),
        Field::new("geo_value", DataType::Utf8, false),
        Field::new("disease", DataType::Utf8, false),
        Field::new("_variable", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Date32Array::from(reference_date)),
        Arc::new(StringArray::from(geo)),
        Arc::new(StringArray::from(disease)),
        Arc::new(StringArray::from(vec!["Rt"; rows])),
        Arc::new(Float64Array::from(value)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn bench_calculate_categories(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("samples.parquet");
    write_samples(&path, 30, 100);
    let memory = MemoryConfig::default_config();

    c.bench_function("growth_category_calculate_48k_draws", |b| {
        b.iter(|| calculate_categories(black_box(&path), black_box(&memory)).unwrap())
    });
}

fn bench_banding(c: &mut Criterion) {
    c.bench_function("growth_category_from_p_growing", |b| {
        b.iter(|| {
            (0..=1000)
                .filter_map(|i| GrowthCategory::from_p_growing(black_box(i as f64 / 1000.0)))
                .count()
        })
    });
}

criterion_group!(benches, bench_calculate_categories, bench_banding);
criterion_main!(benches);
