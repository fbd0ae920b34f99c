//! Collects current weather and air pollution data of a set of cities.
//!
//! Every run fetches the readings of all configured cities, joins them into one
//! record per city, validates the records and replaces the `city_metrics` table
//! of a postgres database and a parquet snapshot with them. The scheduler
//! repeats the run on a fixed interval.
pub mod combine;
pub mod config;
pub mod convert;
pub mod database;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod snapshot;
pub mod validate;
