//! Module for writing the records of a run into a columnar parquet snapshot.
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::record::{CombinedCityRecord, ValidatedRecordSet};

/// Base name of the snapshot files.
pub const SNAPSHOT_NAME: &str = "city_metrics";

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the parquet snapshot.
pub struct SnapshotParameters {
    /// Directory the snapshot files are written to.
    pub directory: PathBuf,
    /// Write a new timestamped file per run instead of replacing `city_metrics.parquet`.
    #[serde(default)]
    pub timestamped: bool,
}

impl Default for SnapshotParameters {
    fn default() -> Self {
        SnapshotParameters {
            directory: PathBuf::from("/var/lib/airlogd"),
            timestamped: false,
        }
    }
}

/// Columnar store receiving a snapshot of every run.
pub trait SnapshotStore {
    /// Writes the records and returns the path of the written snapshot.
    fn write_snapshot(&mut self, records: &ValidatedRecordSet) -> Result<PathBuf, PersistenceError>;
}

/// `SnapshotStore` writing snappy compressed parquet files.
pub struct ParquetSnapshot {
    params: SnapshotParameters,
}

impl ParquetSnapshot {
    pub fn new(params: SnapshotParameters) -> ParquetSnapshot {
        ParquetSnapshot { params }
    }

    /// Path of the snapshot written at `now`.
    pub fn snapshot_path(&self, now: DateTime<Utc>) -> PathBuf {
        let file_name = if self.params.timestamped {
            format!("{}-{}.parquet", SNAPSHOT_NAME, now.format("%Y%m%dT%H%M%SZ"))
        } else {
            format!("{}.parquet", SNAPSHOT_NAME)
        };
        self.params.directory.join(file_name)
    }
}

impl SnapshotStore for ParquetSnapshot {
    /// Writes the snapshot to a temporary file next to the target and renames it into place,
    /// so readers never see a partially written file.
    fn write_snapshot(&mut self, records: &ValidatedRecordSet) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.params.directory)?;

        let path = self.snapshot_path(Utc::now());
        let partial_path = path.with_extension("parquet.partial");
        let batch = record_batch(records.records())?;

        if let Err(err) = write_parquet(&partial_path, &batch) {
            let _ = fs::remove_file(&partial_path);
            return Err(err);
        }
        fs::rename(&partial_path, &path)?;

        log::debug!(target: "airlogd::snapshot", "Wrote {} rows to \'{}\'", batch.num_rows(), path.display());
        Ok(path)
    }
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<(), PersistenceError> {
    let file = File::create(path)?;
    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(properties))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Converts the records into a single arrow batch.
///
/// Every pollutant found in any record becomes its own `components.<name>` column.
pub fn record_batch(records: &[CombinedCityRecord]) -> Result<RecordBatch, PersistenceError> {
    let float = |value: fn(&CombinedCityRecord) -> Option<f64>| -> ArrayRef {
        Arc::new(records.iter().map(value).collect::<Float64Array>())
    };
    let text = |value: fn(&CombinedCityRecord) -> Option<&str>| -> ArrayRef {
        Arc::new(records.iter().map(value).collect::<StringArray>())
    };

    let mut fields = vec![
        Field::new("city", DataType::Utf8, false),
        Field::new("main.temp", DataType::Float64, true),
        Field::new("main.feels_like", DataType::Float64, true),
        Field::new("main.temp_min", DataType::Float64, true),
        Field::new("main.temp_max", DataType::Float64, true),
        Field::new("main.humidity", DataType::Float64, true),
        Field::new("main.pressure", DataType::Float64, true),
        Field::new("coord.lat", DataType::Float64, true),
        Field::new("coord.lon", DataType::Float64, true),
        Field::new("dt", DataType::Utf8, true),
        Field::new("sys.sunrise", DataType::Utf8, true),
        Field::new("sys.sunset", DataType::Utf8, true),
        Field::new("main.aqi", DataType::Int64, true),
        Field::new("air_quality_index", DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.city.as_str()))),
        float(|r| r.temperature),
        float(|r| r.feels_like),
        float(|r| r.temp_min),
        float(|r| r.temp_max),
        float(|r| r.humidity),
        float(|r| r.pressure),
        float(|r| r.latitude),
        float(|r| r.longitude),
        text(|r| r.captured_at.as_deref()),
        text(|r| r.sunrise.as_deref()),
        text(|r| r.sunset.as_deref()),
        Arc::new(records.iter().map(|r| r.aqi.map(|aqi| aqi as i64)).collect::<Int64Array>()),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.aqi_label.as_str()))),
    ];

    let mut component_names: Vec<&str> = records
        .iter()
        .flat_map(|r| r.components.keys().map(String::as_str))
        .collect();
    component_names.sort_unstable();
    component_names.dedup();

    for name in component_names {
        fields.push(Field::new(format!("components.{}", name), DataType::Float64, true));
        columns.push(Arc::new(
            records.iter().map(|r| r.components.get(name).copied()).collect::<Float64Array>(),
        ));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{tests::five_cities, validate};
    use chrono::TimeZone;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    #[test]
    fn record_batch_has_component_columns() {
        let mut records = five_cities().records().to_vec();
        records[1].components.insert("o3".to_string(), 68.5);

        let batch = record_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.num_columns(), 14 + 3);

        let schema = batch.schema();
        let o3 = schema.index_of("components.o3").unwrap();
        assert_eq!(batch.column(o3).null_count(), 4);
        assert!(schema.index_of("components.pm2_5").is_ok());
    }

    #[test]
    fn snapshot_path_fixed_and_timestamped() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 5, 9).unwrap();

        let fixed = ParquetSnapshot::new(SnapshotParameters {
            directory: PathBuf::from("/data"),
            timestamped: false,
        });
        assert_eq!(fixed.snapshot_path(now), PathBuf::from("/data/city_metrics.parquet"));

        let timestamped = ParquetSnapshot::new(SnapshotParameters {
            directory: PathBuf::from("/data"),
            timestamped: true,
        });
        assert_eq!(
            timestamped.snapshot_path(now),
            PathBuf::from("/data/city_metrics-20240301T130509Z.parquet")
        );
    }

    #[test]
    fn write_snapshot_replaces_file() {
        let directory = tempfile::tempdir().unwrap();
        let mut snapshot = ParquetSnapshot::new(SnapshotParameters {
            directory: directory.path().join("nested"),
            timestamped: false,
        });
        let records = validate(five_cities()).unwrap();

        let first = snapshot.write_snapshot(&records).unwrap();
        let second = snapshot.write_snapshot(&records).unwrap();
        assert_eq!(first, second);
        assert!(!first.with_extension("parquet.partial").exists());

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&second).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(rows, 5);
    }
}
