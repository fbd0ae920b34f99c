//! Data quality checks a record set has to pass before it is persisted.
use crate::error::ValidationError;
use crate::record::{CombinedCityRecord, RecordSet, ValidatedRecordSet, COLUMN_AQI, COLUMN_CITY, COLUMN_TEMPERATURE, ESSENTIAL_COLUMNS};

/// Plausible temperature range in celsius.
pub const TEMPERATURE_RANGE: (f64, f64) = (-50.0, 60.0);
/// Valid air quality index range. Only integral scores are valid.
pub const AQI_RANGE: (f64, f64) = (1.0, 5.0);

/// Checks a combined record set and hands it back unchanged if it is valid.
///
/// The checks run in this order:
///
/// * The record set must not be empty.
///
/// * Every essential column (`city`, `main.temp`, `main.aqi`) must be part of the
///   schema and must not be null on any record.
///
/// * Every temperature must lie within [`TEMPERATURE_RANGE`].
///
/// * Every air quality index must be an integral score within [`AQI_RANGE`]. A fractional
///   score is reported as out of range.
///
/// # Errors
///
/// The first failing check as `ValidationError`.
///
pub fn validate(records: RecordSet) -> Result<ValidatedRecordSet, ValidationError> {
    if records.is_empty() {
        return Err(ValidationError::EmptyDataset);
    }

    for column in ESSENTIAL_COLUMNS.iter() {
        if !records.has_column(column) {
            return Err(ValidationError::MissingColumn(column.to_string()));
        }
        if records.records().iter().any(|record| is_null(record, column)) {
            return Err(ValidationError::NullValue(column.to_string()));
        }
    }

    let (min, max) = TEMPERATURE_RANGE;
    let temperatures: Vec<f64> = records
        .records()
        .iter()
        .filter_map(|record| record.temperature)
        .filter(|temperature| *temperature < min || *temperature > max)
        .collect();
    if !temperatures.is_empty() {
        return Err(ValidationError::OutOfRange {
            column: COLUMN_TEMPERATURE.to_string(),
            min,
            max,
            values: temperatures,
        });
    }

    let (min, max) = AQI_RANGE;
    let scores: Vec<f64> = records
        .records()
        .iter()
        .filter_map(|record| record.aqi)
        .filter(|aqi| *aqi < min || *aqi > max || aqi.fract() != 0.0)
        .collect();
    if !scores.is_empty() {
        return Err(ValidationError::OutOfRange {
            column: COLUMN_AQI.to_string(),
            min,
            max,
            values: scores,
        });
    }

    log::debug!(target: "airlogd::validate", "Validated {} records", records.len());
    Ok(ValidatedRecordSet::new(records))
}

fn is_null(record: &CombinedCityRecord, column: &str) -> bool {
    match column {
        COLUMN_CITY => record.city.trim().is_empty(),
        COLUMN_TEMPERATURE => record.temperature.map_or(true, f64::is_nan),
        COLUMN_AQI => record.aqi.map_or(true, f64::is_nan),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::convert::categorize_aqi;
    use std::collections::{BTreeMap, BTreeSet};

    pub(crate) fn record(city: &str, temperature: f64, aqi: i64) -> CombinedCityRecord {
        let mut components = BTreeMap::new();
        components.insert("pm2_5".to_string(), 10.0);
        components.insert("pm10".to_string(), 15.0);
        CombinedCityRecord {
            city: city.to_string(),
            temperature: Some(temperature),
            feels_like: Some(temperature + 1.0),
            temp_min: Some(temperature - 2.0),
            temp_max: Some(temperature + 2.0),
            humidity: Some(50.0),
            pressure: Some(1012.0),
            latitude: Some(28.66),
            longitude: Some(77.23),
            captured_at: Some("2023-11-14 22:13:20".to_string()),
            sunrise: Some("2023-11-14 00:50:00".to_string()),
            sunset: Some("2023-11-14 11:56:40".to_string()),
            components,
            aqi: Some(aqi as f64),
            aqi_label: categorize_aqi(aqi),
        }
    }

    pub(crate) fn all_columns() -> BTreeSet<String> {
        ["city", "main.temp", "main.feels_like", "main.humidity", "main.aqi", "air_quality_index", "components.pm2_5"]
            .iter()
            .map(|column| column.to_string())
            .collect()
    }

    pub(crate) fn five_cities() -> RecordSet {
        RecordSet::new(
            all_columns(),
            vec![
                record("Delhi", 26.85, 2),
                record("Mumbai", 31.2, 3),
                record("Bangalore", -50.0, 1),
                record("Hyderabad", 60.0, 5),
                record("Chennai", 29.0, 4),
            ],
        )
    }

    fn with_records(records: Vec<CombinedCityRecord>) -> RecordSet {
        RecordSet::new(all_columns(), records)
    }

    #[test]
    fn accepts_well_formed_set_unchanged() {
        let records = five_cities();
        let validated = validate(records.clone()).unwrap();
        assert_eq!(validated.record_set(), &records);
        assert_eq!(validated.len(), 5);
    }

    #[test]
    fn rejects_empty_set() {
        assert_eq!(validate(RecordSet::default()), Err(ValidationError::EmptyDataset));
    }

    #[test]
    fn rejects_missing_city_column() {
        let mut columns = all_columns();
        columns.remove("city");
        let records = RecordSet::new(columns, vec![record("Delhi", 20.0, 2)]);
        assert_eq!(validate(records), Err(ValidationError::MissingColumn("city".to_string())));
    }

    #[test]
    fn rejects_missing_aqi_column() {
        let mut columns = all_columns();
        columns.remove("main.aqi");
        let records = RecordSet::new(columns, vec![record("Delhi", 20.0, 2)]);
        assert_eq!(validate(records), Err(ValidationError::MissingColumn("main.aqi".to_string())));
    }

    #[test]
    fn rejects_missing_temperature_column() {
        let mut columns = all_columns();
        columns.remove("main.temp");
        let records = RecordSet::new(columns, vec![record("Delhi", 20.0, 2)]);
        assert_eq!(validate(records), Err(ValidationError::MissingColumn("main.temp".to_string())));
    }

    #[test]
    fn rejects_unrealistic_temperature() {
        let records = with_records(vec![record("Delhi", 20.0, 2), record("Mumbai", 75.0, 2)]);
        assert_eq!(
            validate(records),
            Err(ValidationError::OutOfRange {
                column: "main.temp".to_string(),
                min: -50.0,
                max: 60.0,
                values: vec![75.0],
            })
        );
    }

    #[test]
    fn rejects_aqi_out_of_range() {
        for aqi in &[0, 6] {
            let records = with_records(vec![record("Delhi", 20.0, *aqi)]);
            match validate(records) {
                Err(ValidationError::OutOfRange { column, values, .. }) => {
                    assert_eq!(column, "main.aqi");
                    assert_eq!(values, vec![*aqi as f64]);
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn rejects_fractional_aqi() {
        for score in &[7.5, -1.5, 2.5] {
            let mut fractional = record("Mumbai", 20.0, 2);
            fractional.aqi = Some(*score);
            let records = with_records(vec![record("Delhi", 20.0, 2), fractional]);
            assert_eq!(
                validate(records),
                Err(ValidationError::OutOfRange {
                    column: "main.aqi".to_string(),
                    min: 1.0,
                    max: 5.0,
                    values: vec![*score],
                })
            );
        }
    }

    #[test]
    fn rejects_null_temperature() {
        let mut missing = record("Mumbai", 20.0, 2);
        missing.temperature = None;
        let records = with_records(vec![record("Delhi", 20.0, 2), missing]);
        assert_eq!(validate(records), Err(ValidationError::NullValue("main.temp".to_string())));

        let mut nan = record("Mumbai", 20.0, 2);
        nan.temperature = Some(f64::NAN);
        let records = with_records(vec![nan]);
        assert_eq!(validate(records), Err(ValidationError::NullValue("main.temp".to_string())));
    }

    #[test]
    fn rejects_null_aqi_and_blank_city() {
        let mut missing = record("Delhi", 20.0, 2);
        missing.aqi = None;
        assert_eq!(
            validate(with_records(vec![missing])),
            Err(ValidationError::NullValue("main.aqi".to_string()))
        );

        assert_eq!(
            validate(with_records(vec![record(" ", 20.0, 2)])),
            Err(ValidationError::NullValue("city".to_string()))
        );
    }

    #[test]
    fn null_check_precedes_range_check() {
        let mut missing = record("Mumbai", 20.0, 9);
        missing.temperature = None;
        let records = with_records(vec![record("Delhi", 99.0, 2), missing]);
        assert_eq!(validate(records), Err(ValidationError::NullValue("main.temp".to_string())));
    }
}
