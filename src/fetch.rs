//! Module for retrieving weather and air pollution data from the OpenWeather api.
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::record::{RawPollutionReading, RawWeatherReading};

/// Environment variable consulted when no api key is configured.
pub const API_KEY_VARIABLE: &str = "OPENWEATHER_API_KEY";

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required to query the OpenWeather api.
pub struct ApiParameters {
    /// Base url of the api, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// The api key. Falls back to `OPENWEATHER_API_KEY` if unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Timeout of a single request in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    String::from("https://api.openweathermap.org/data/2.5")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiParameters {
    fn default() -> Self {
        ApiParameters {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Source of the raw readings for a city.
///
/// Implementations are shared between the fetch threads of a run.
pub trait Fetcher: Sync {
    /// Current weather of a city by name.
    fn fetch_weather(&self, city: &str) -> Result<RawWeatherReading, FetchError>;

    /// Current air pollution at a location.
    fn fetch_pollution(&self, latitude: f64, longitude: f64) -> Result<RawPollutionReading, FetchError>;
}

/// Blocking http client for the OpenWeather `weather` and `air_pollution` endpoints.
#[derive(Debug)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    /// Creates a client from the api parameters.
    ///
    /// # Errors
    ///
    /// * `FetchError::MissingApiKey` - Neither the parameters nor the environment hold an api key.
    ///
    /// * `FetchError::Client` - The http client cannot be initialized.
    ///
    pub fn new(params: &ApiParameters) -> Result<OpenWeatherClient, FetchError> {
        let api_key = match &params.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => std::env::var(API_KEY_VARIABLE)
                .ok()
                .filter(|key| !key.is_empty())
                .ok_or(FetchError::MissingApiKey)?,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(OpenWeatherClient {
            client,
            base_url: params.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn weather_url(&self, city: &str) -> Result<Url, FetchError> {
        self.url("weather", &[("q", city.to_string())])
    }

    fn pollution_url(&self, latitude: f64, longitude: f64) -> Result<Url, FetchError> {
        self.url("air_pollution", &[("lat", latitude.to_string()), ("lon", longitude.to_string())])
    }

    fn url(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, endpoint);
        let mut url = Url::parse(&raw).map_err(|err| FetchError::Decode {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())))
            .append_pair("appid", &self.api_key);
        Ok(url)
    }

    fn get_object(&self, url: Url) -> Result<Map<String, Value>, FetchError> {
        let display_url = redact(&url);
        log::debug!(target: "airlogd::fetch", "Requesting \'{}\'", display_url);

        let response = self.client.get(url).send().map_err(|source| FetchError::Transport {
            url: display_url.clone(),
            source: source.without_url(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: display_url,
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(|source| FetchError::Transport {
            url: display_url.clone(),
            source: source.without_url(),
        })?;
        decode_object(&display_url, &body)
    }
}

impl Fetcher for OpenWeatherClient {
    fn fetch_weather(&self, city: &str) -> Result<RawWeatherReading, FetchError> {
        let url = self.weather_url(city)?;
        self.get_object(url).map(RawWeatherReading)
    }

    fn fetch_pollution(&self, latitude: f64, longitude: f64) -> Result<RawPollutionReading, FetchError> {
        let url = self.pollution_url(latitude, longitude)?;
        self.get_object(url).map(RawPollutionReading)
    }
}

/// Parses a response body that has to be a json object.
fn decode_object(url: &str, body: &str) -> Result<Map<String, Value>, FetchError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(FetchError::Decode {
            url: url.to_string(),
            reason: format!("expected an object, got \'{}\'", other),
        }),
        Err(err) => Err(FetchError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Url without the api key, safe for log output.
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "appid" { String::from("***") } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
