//! Module running a single fetch, combine, validate and persist cycle.
use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::combine::{combine, FetchedPayloads, JoinPolicy};
use crate::config::PipelineParameters;
use crate::database::RowStore;
use crate::error::{FetchError, PipelineError};
use crate::fetch::Fetcher;
use crate::record::{RawPollutionReading, RawWeatherReading};
use crate::snapshot::SnapshotStore;
use crate::validate::validate;

#[derive(Debug, Clone, PartialEq)]
/// Summary of a successful run.
pub struct RunReport {
    /// Number of persisted records.
    pub records: usize,
    /// Requested cities left out by the join.
    pub dropped_cities: Vec<String>,
    pub snapshot_path: PathBuf,
    /// Wall clock duration of the whole run.
    pub duration: Duration,
}

/// The ETL pipeline of the configured cities.
///
/// Every step depends on the previous one succeeding. Persistence is not
/// atomic across both stores: if the row store was replaced and writing the
/// snapshot fails, the row store keeps the new records.
pub struct Pipeline<F, R, S> {
    cities: Vec<String>,
    join_policy: JoinPolicy,
    fetcher: F,
    row_store: R,
    snapshot_store: S,
}

impl<F, R, S> Pipeline<F, R, S>
where
    F: Fetcher,
    R: RowStore,
    S: SnapshotStore,
{
    pub fn new(cities: Vec<String>, params: &PipelineParameters, fetcher: F, row_store: R, snapshot_store: S) -> Self {
        Pipeline {
            cities,
            join_policy: params.join_policy,
            fetcher,
            row_store,
            snapshot_store,
        }
    }

    pub fn row_store(&self) -> &R {
        &self.row_store
    }

    pub fn snapshot_store(&self) -> &S {
        &self.snapshot_store
    }

    /// Runs one complete pipeline cycle.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - If all records were persisted.
    ///
    /// * `Err(PipelineError)` - The error of the first failing step. It is logged before it is
    ///     returned; no retries are made.
    ///
    pub fn run_once(&mut self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        log::info!(target: "airlogd::pipeline", "Starting pipeline run for {} cities", self.cities.len());

        match self.execute(started) {
            Ok(report) => {
                log::info!(target: "airlogd::pipeline", "Pipeline completed in {:.3}s: {} records persisted, snapshot \'{}\'",
                           report.duration.as_secs_f64(), report.records, report.snapshot_path.display());
                Ok(report)
            }
            Err(err) => {
                log::error!(target: "airlogd::pipeline", "Pipeline failed after {:.3}s: {}",
                            started.elapsed().as_secs_f64(), err);
                Err(err)
            }
        }
    }

    fn execute(&mut self, started: Instant) -> Result<RunReport, PipelineError> {
        log::info!(target: "airlogd::pipeline", "Fetching weather and pollution data...");
        let payloads = fetch_all(&self.fetcher, &self.cities)?;
        log::info!(target: "airlogd::pipeline", "Fetched data for {} cities", payloads.weather.len());

        log::info!(target: "airlogd::pipeline", "Combining weather and pollution data...");
        let combined = combine(&self.cities, &payloads, self.join_policy)?;
        log::info!(target: "airlogd::pipeline", "Combined {} records, dropped {:?}",
                   combined.records.len(), combined.dropped);

        log::info!(target: "airlogd::pipeline", "Validating records...");
        let validated = validate(combined.records)?;

        log::info!(target: "airlogd::pipeline", "Replacing rows of the row store...");
        self.row_store.replace_all(&validated)?;
        log::info!(target: "airlogd::pipeline", "Row store replaced");

        log::info!(target: "airlogd::pipeline", "Writing columnar snapshot...");
        let snapshot_path = match self.snapshot_store.write_snapshot(&validated) {
            Ok(path) => path,
            Err(err) => {
                log::warn!(target: "airlogd::pipeline", "Row store already holds the new records, snapshot is stale");
                return Err(err.into());
            }
        };
        log::info!(target: "airlogd::pipeline", "Snapshot written");

        Ok(RunReport {
            records: validated.len(),
            dropped_cities: combined.dropped,
            snapshot_path,
            duration: started.elapsed(),
        })
    }
}

/// Fetches weather and pollution data of all cities, one thread per city.
///
/// The pollution data is requested for the coordinates of the weather data.
/// The result keeps the order of `cities`; repeated cities are fetched once.
///
/// # Errors
///
/// The first failure in city order.
///
pub fn fetch_all<F: Fetcher>(fetcher: &F, cities: &[String]) -> Result<FetchedPayloads, FetchError> {
    let mut seen = HashSet::new();
    let unique: Vec<&String> = cities.iter().filter(|city| seen.insert(city.as_str())).collect();

    thread::scope(|scope| {
        let handles: Vec<_> = unique
            .iter()
            .map(|city| scope.spawn(move || fetch_city(fetcher, city)))
            .collect();

        let mut payloads = FetchedPayloads::default();
        for (city, handle) in unique.iter().zip(handles) {
            let (weather, pollution) = match handle.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            payloads.weather.push((city.to_string(), weather));
            payloads.pollution.push((city.to_string(), pollution));
        }
        Ok::<_, FetchError>(payloads)
    })
}

fn fetch_city<F: Fetcher>(fetcher: &F, city: &str) -> Result<(RawWeatherReading, RawPollutionReading), FetchError> {
    let weather = fetcher.fetch_weather(city).map_err(|err| {
        log::error!(target: "airlogd::pipeline", "Could not fetch weather data of \'{}\': {}", city, err);
        err
    })?;
    let (latitude, longitude) = weather
        .coordinates()
        .ok_or_else(|| FetchError::MissingCoordinates(city.to_string()))?;
    let pollution = fetcher.fetch_pollution(latitude, longitude).map_err(|err| {
        log::error!(target: "airlogd::pipeline", "Could not fetch pollution data of \'{}\': {}", city, err);
        err
    })?;
    log::debug!(target: "airlogd::pipeline", "Fetched data of \'{}\' at ({}, {})", city, latitude, longitude);
    Ok((weather, pollution))
}
