//! Module that contains all record types handled by the pipeline.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column holding the city name, the join key of a run.
pub const COLUMN_CITY: &str = "city";
/// Column holding the temperature in celsius.
pub const COLUMN_TEMPERATURE: &str = "main.temp";
/// Column holding the numeric air quality index.
pub const COLUMN_AQI: &str = "main.aqi";
/// Column holding the derived air quality label.
pub const COLUMN_AQI_LABEL: &str = "air_quality_index";

/// Columns that must be present and non-null for a record set to be persisted.
pub const ESSENTIAL_COLUMNS: [&str; 3] = [COLUMN_CITY, COLUMN_TEMPERATURE, COLUMN_AQI];

#[derive(Debug, Clone, PartialEq)]
/// Weather payload of a single city as returned by the upstream API.
pub struct RawWeatherReading(pub Map<String, Value>);

impl RawWeatherReading {
    /// Coordinates (`coord.lat`, `coord.lon`) of the reading, if present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let coord = self.0.get("coord")?;
        let lat = coord.get("lat")?.as_f64()?;
        let lon = coord.get("lon")?.as_f64()?;
        Some((lat, lon))
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Air pollution payload of a single city as returned by the upstream API.
pub struct RawPollutionReading(pub Map<String, Value>);

impl RawPollutionReading {
    /// The current snapshot, i.e. the first entry of `list`.
    pub fn current_snapshot(&self) -> Option<&Map<String, Value>> {
        self.0.get("list")?.as_array()?.first()?.as_object()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Health category of an air quality index score.
pub enum AqiLabel {
    Good,
    Fair,
    Moderate,
    Poor,
    #[serde(rename = "Very Poor")]
    VeryPoor,
    Unknown,
}

impl AqiLabel {
    /// Display name of the label, as stored downstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiLabel::Good => "Good",
            AqiLabel::Fair => "Fair",
            AqiLabel::Moderate => "Moderate",
            AqiLabel::Poor => "Poor",
            AqiLabel::VeryPoor => "Very Poor",
            AqiLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AqiLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Joined weather and pollution data of a single city.
///
/// Temperatures are in celsius, timestamps are formatted UTC strings.
/// Every field but the city may be null if the upstream payload lacked it.
pub struct CombinedCityRecord {
    /// Name of the city, unique within a run.
    pub city: String,
    /// Temperature in celsius.
    pub temperature: Option<f64>,
    /// Perceived temperature in celsius.
    pub feels_like: Option<f64>,
    /// Minimum temperature in celsius.
    pub temp_min: Option<f64>,
    /// Maximum temperature in celsius.
    pub temp_max: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Atmospheric pressure in hPa.
    pub pressure: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Time the weather data was captured.
    pub captured_at: Option<String>,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
    /// Pollutant concentrations in µg/m³ keyed by pollutant name.
    pub components: BTreeMap<String, f64>,
    /// Air quality index score as received, 1 (good) to 5 (very poor) once validated.
    pub aqi: Option<f64>,
    /// Label derived from `aqi`.
    pub aqi_label: AqiLabel,
}

#[derive(Debug, Clone, PartialEq, Default)]
/// The combined records of one run together with the columns they carry.
///
/// A column is part of the schema if at least one joined row had it.
pub struct RecordSet {
    columns: BTreeSet<String>,
    records: Vec<CombinedCityRecord>,
}

impl RecordSet {
    pub fn new(columns: BTreeSet<String>, records: Vec<CombinedCityRecord>) -> RecordSet {
        RecordSet { columns, records }
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn records(&self) -> &[CombinedCityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A record set that passed validation.
///
/// Only the validator constructs this type and it exposes no mutable access,
/// so persisted data is exactly the data that was checked.
pub struct ValidatedRecordSet(RecordSet);

impl ValidatedRecordSet {
    pub(crate) fn new(records: RecordSet) -> ValidatedRecordSet {
        ValidatedRecordSet(records)
    }

    pub fn record_set(&self) -> &RecordSet {
        &self.0
    }

    pub fn records(&self) -> &[CombinedCityRecord] {
        self.0.records()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn weather_coordinates() {
        let reading = RawWeatherReading(object(json!({"coord": {"lat": 28.66, "lon": 77.23}})));
        assert_eq!(reading.coordinates(), Some((28.66, 77.23)));

        let reading = RawWeatherReading(object(json!({"coord": {"lat": 28.66}})));
        assert_eq!(reading.coordinates(), None);
    }

    #[test]
    fn pollution_current_snapshot_is_first_entry() {
        let reading = RawPollutionReading(object(json!({
            "list": [{"main": {"aqi": 2}}, {"main": {"aqi": 5}}]
        })));
        let snapshot = reading.current_snapshot().unwrap();
        assert_eq!(snapshot["main"]["aqi"], json!(2));

        let empty = RawPollutionReading(object(json!({"list": []})));
        assert!(empty.current_snapshot().is_none());
    }

    #[test]
    fn aqi_label_serializes_display_name() {
        assert_eq!(serde_json::to_string(&AqiLabel::VeryPoor).unwrap(), "\"Very Poor\"");
        assert_eq!(AqiLabel::VeryPoor.to_string(), "Very Poor");
    }
}
