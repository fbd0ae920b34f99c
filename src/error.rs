//! Error types of the pipeline.
use std::fmt;

/// Errors raised while retrieving data from the upstream API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("No api key configured and OPENWEATHER_API_KEY is not set")]
    MissingApiKey,

    #[error("Could not create http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{url}' returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Response from '{url}' is not a json object: {reason}")]
    Decode { url: String, reason: String },

    #[error("Weather data of '{0}' contains no coordinates")]
    MissingCoordinates(String),
}

/// Errors raised while joining weather and pollution data.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CombineError {
    #[error("Cities without matching weather and pollution data: {0:?}")]
    JoinMismatch(Vec<String>),
}

/// Data quality violations found in a combined record set.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Data validation failed: record set is empty")]
    EmptyDataset,

    #[error("Data validation failed: missing column '{0}'")]
    MissingColumn(String),

    #[error("Data validation failed: null values found in '{0}'")]
    NullValue(String),

    #[error("Data validation failed: values of '{column}' out of range [{min}, {max}]: {}", OffendingValues(.values))]
    OutOfRange {
        column: String,
        min: f64,
        max: f64,
        values: Vec<f64>,
    },
}

struct OffendingValues<'a>(&'a [f64]);

impl fmt::Display for OffendingValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.0.iter().map(|value| value.to_string()).collect();
        write!(f, "[{}]", values.join(", "))
    }
}

/// Errors raised while writing records to the row store or the snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("TLS setup for the database connection failed: {0}")]
    Tls(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal outcome of a failed pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Combine failed: {0}")]
    Combine(#[from] CombineError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read the configuration from '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot deserialize the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
