//! Module for joining the weather and pollution payloads of each city into one flat record.
//!
//! Nested json objects are flattened into dotted column names (`main.temp`,
//! `components.pm2_5`) and joined by city name. The join is an explicit hash
//! join; what happens to a city that is missing on one side is decided by the
//! [`JoinPolicy`].
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::convert::{categorize_aqi_score, format_timestamp, kelvin_to_celsius};
use crate::error::CombineError;
use crate::record::{
    AqiLabel, CombinedCityRecord, RawPollutionReading, RawWeatherReading, RecordSet, COLUMN_AQI, COLUMN_AQI_LABEL,
    COLUMN_CITY, COLUMN_TEMPERATURE,
};

/// Columns holding epoch seconds.
const TIMESTAMP_COLUMNS: [&str; 3] = ["dt", "sys.sunrise", "sys.sunset"];
/// Columns holding temperatures in kelvin.
const TEMPERATURE_COLUMNS: [&str; 4] = [COLUMN_TEMPERATURE, "main.feels_like", "main.temp_min", "main.temp_max"];
const COMPONENTS_PREFIX: &str = "components.";

/// A flattened json object keyed by dotted column name.
pub type FlatRow = BTreeMap<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Handling of cities that lack either weather or pollution data.
pub enum JoinPolicy {
    /// Unmatched cities are left out of the result and reported.
    DropUnmatched,
    /// Unmatched cities fail the run.
    Strict,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        JoinPolicy::DropUnmatched
    }
}

#[derive(Debug, Default)]
/// Payloads fetched for a run, keyed by city.
///
/// Both sides are fetched independently, so either may lack a city.
pub struct FetchedPayloads {
    pub weather: Vec<(String, RawWeatherReading)>,
    pub pollution: Vec<(String, RawPollutionReading)>,
}

#[derive(Debug)]
/// Result of a combine step.
pub struct Combined {
    pub records: RecordSet,
    /// Requested cities that were dropped by the join.
    pub dropped: Vec<String>,
}

/// Flattens a json object into dotted column names.
///
/// Arrays and scalars are kept as leaf values.
pub fn flatten(object: &Map<String, Value>) -> FlatRow {
    let mut row = FlatRow::new();
    flatten_into(&mut row, "", object);
    row
}

fn flatten_into(row: &mut FlatRow, prefix: &str, object: &Map<String, Value>) {
    for (key, value) in object {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(row, &column, nested),
            _ => {
                row.insert(column, value.clone());
            }
        }
    }
}

/// Joins weather and pollution payloads into one record per requested city.
///
/// # Arguments
///
/// * `cities` - The requested cities; the output follows this order.
///
/// * `payloads` - The fetched weather and pollution payloads.
///
/// * `policy` - What to do with cities missing on one side of the join.
///
/// # Errors
///
/// * `CombineError::JoinMismatch` - If the policy is `Strict` and a city is unmatched.
///
pub fn combine(cities: &[String], payloads: &FetchedPayloads, policy: JoinPolicy) -> Result<Combined, CombineError> {
    let weather: HashMap<&str, &RawWeatherReading> = payloads
        .weather
        .iter()
        .map(|(city, reading)| (city.as_str(), reading))
        .collect();
    let pollution: HashMap<&str, &Map<String, Value>> = payloads
        .pollution
        .iter()
        .filter_map(|(city, reading)| reading.current_snapshot().map(|snapshot| (city.as_str(), snapshot)))
        .collect();

    let mut seen = HashSet::new();
    let mut columns = BTreeSet::new();
    let mut records = Vec::with_capacity(cities.len());
    let mut dropped = Vec::new();

    for city in cities {
        if !seen.insert(city.as_str()) {
            log::warn!(target: "airlogd::combine", "City \'{}\' requested more than once, combining it once", city);
            continue;
        }

        let (weather_reading, snapshot) = match (weather.get(city.as_str()), pollution.get(city.as_str())) {
            (Some(weather_reading), Some(snapshot)) => (weather_reading, snapshot),
            (weather_reading, snapshot) => {
                log::warn!(target: "airlogd::combine", "Dropping city \'{}\': weather data {}, pollution data {}",
                           city, presence(weather_reading.is_some()), presence(snapshot.is_some()));
                dropped.push(city.clone());
                continue;
            }
        };

        let mut row = flatten(&weather_reading.0);
        for (column, value) in flatten(snapshot) {
            row.entry(column).or_insert(value);
        }

        columns.extend(row.keys().cloned());
        records.push(to_record(city, &row));
    }

    if policy == JoinPolicy::Strict && !dropped.is_empty() {
        return Err(CombineError::JoinMismatch(dropped));
    }

    if !records.is_empty() {
        columns.insert(COLUMN_CITY.to_string());
        columns.insert(COLUMN_AQI_LABEL.to_string());
    }

    Ok(Combined {
        records: RecordSet::new(columns, records),
        dropped,
    })
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "missing"
    }
}

fn to_record(city: &str, row: &FlatRow) -> CombinedCityRecord {
    let temperature = |column: &str| number(row, column).map(kelvin_to_celsius);
    let timestamp = |column: &str| integer(row, column).and_then(format_timestamp);

    let components = row
        .iter()
        .filter_map(|(column, value)| {
            let name = column.strip_prefix(COMPONENTS_PREFIX)?;
            Some((name.to_string(), value.as_f64()?))
        })
        .collect();

    let aqi = number(row, COLUMN_AQI);

    CombinedCityRecord {
        city: city.to_string(),
        temperature: temperature(TEMPERATURE_COLUMNS[0]),
        feels_like: temperature(TEMPERATURE_COLUMNS[1]),
        temp_min: temperature(TEMPERATURE_COLUMNS[2]),
        temp_max: temperature(TEMPERATURE_COLUMNS[3]),
        humidity: number(row, "main.humidity"),
        pressure: number(row, "main.pressure"),
        latitude: number(row, "coord.lat"),
        longitude: number(row, "coord.lon"),
        captured_at: timestamp(TIMESTAMP_COLUMNS[0]),
        sunrise: timestamp(TIMESTAMP_COLUMNS[1]),
        sunset: timestamp(TIMESTAMP_COLUMNS[2]),
        components,
        aqi,
        aqi_label: aqi.map(categorize_aqi_score).unwrap_or(AqiLabel::Unknown),
    }
}

fn number(row: &FlatRow, column: &str) -> Option<f64> {
    row.get(column)?.as_f64()
}

/// Reads an integer column, accepting floats without a fractional part.
fn integer(row: &FlatRow, column: &str) -> Option<i64> {
    let value = row.get(column)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
            .map(|float| float as i64)
    })
}
