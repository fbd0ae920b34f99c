//! Configuration file of the daemon.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::combine::JoinPolicy;
use crate::database::DatabaseParameters;
use crate::error::ConfigError;
use crate::fetch::ApiParameters;
use crate::scheduler::ScheduleParameters;
use crate::snapshot::SnapshotParameters;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
/// Parameters of a single pipeline run.
pub struct PipelineParameters {
    #[serde(default)]
    pub join_policy: JoinPolicy,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    /// Cities to collect data for, in output order.
    #[serde(default = "default_cities")]
    pub cities: Vec<String>,
    #[serde(default)]
    pub api_parameters: ApiParameters,
    pub database_connection_parameters: DatabaseParameters,
    #[serde(default)]
    pub snapshot_parameters: SnapshotParameters,
    #[serde(default)]
    pub schedule_parameters: ScheduleParameters,
    #[serde(default)]
    pub pipeline_parameters: PipelineParameters,
}

fn default_cities() -> Vec<String> {
    ["Delhi", "Mumbai", "Bangalore", "Hyderabad", "Chennai"]
        .iter()
        .map(|city| city.to_string())
        .collect()
}

impl Configuration {
    /// Reads and checks the configuration from a yaml file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Configuration::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Configuration, ConfigError> {
        let configuration = serde_yaml::from_str::<Configuration>(content)?;
        configuration.check()?;
        Ok(configuration)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.cities.is_empty() {
            return Err(ConfigError::Invalid(String::from("no cities configured")));
        }
        if let Some(city) = self.cities.iter().find(|city| city.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank city name \'{}\'", city)));
        }
        if self.schedule_parameters.interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from("schedule interval must be at least one second")));
        }
        Ok(())
    }
}
