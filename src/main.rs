extern crate clap;
extern crate ctrlc;
extern crate log;
extern crate log4rs;

use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::App;

use airlogd::config::Configuration;
use airlogd::database::PostgresStore;
use airlogd::fetch::OpenWeatherClient;
use airlogd::pipeline::Pipeline;
use airlogd::scheduler::Scheduler;
use airlogd::snapshot::ParquetSnapshot;

static DEFAULT_CONFIG_PATH: &'static str = "resources/airlogd.yml";
static DEFAULT_LOG_CONFIG_PATH: &'static str = "resources/log.yml";

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_config_path = matches.value_of("log-config").unwrap_or(DEFAULT_LOG_CONFIG_PATH);
    match log4rs::init_file(log_config_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration \'{}\': {}", log_config_path, err);
            exit(100);
        }
    };

    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let configuration = match Configuration::from_file(config_path) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "airlogd", "{}", err);
            exit(101);
        }
    };
    log::info!(target: "airlogd", "Loaded configuration from \'{}\' for cities {:?}", config_path, configuration.cities);

    let fetcher = match OpenWeatherClient::new(&configuration.api_parameters) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            log::error!(target: "airlogd", "Cannot create the weather api client: \'{}\'", err);
            exit(102);
        }
    };

    let mut pipeline = Pipeline::new(
        configuration.cities.clone(),
        &configuration.pipeline_parameters,
        fetcher,
        PostgresStore::new(configuration.database_connection_parameters.clone()),
        ParquetSnapshot::new(configuration.snapshot_parameters.clone()),
    );

    if matches.is_present("once") {
        match pipeline.run_once() {
            Ok(_) => exit(0),
            Err(_) => exit(1),
        }
    }

    let terminate_programm = Arc::new(AtomicBool::new(false));
    let terminate_main_thread = Arc::clone(&terminate_programm);
    let terminate_scheduler_thread = Arc::clone(&terminate_programm);

    let scheduler = Scheduler::new(configuration.schedule_parameters.interval());
    let scheduler_thread = match thread::Builder::new()
        .name("scheduler".to_string())
        .spawn(move || {
            scheduler.run(&terminate_scheduler_thread, || pipeline.run_once());
        }) {
        Ok(scheduler_handle) => scheduler_handle,
        Err(err) => {
            log::error!(target: "airlogd", "Cannot start the scheduler thread: \'{}\'", err);
            exit(201);
        }
    };

    match ctrlc::set_handler(move || {
        log::info!(target: "airlogd", "Termination signal received!");
        terminate_main_thread.store(true, Ordering::SeqCst);
    }) {
        Ok(_) => {},
        Err(err) => {
            log::error!(target: "airlogd", "Cannot set the termination handler: \'{}\'", err);
            exit(202);
        }
    };

    match scheduler_thread.join() {
        Ok(_) => log::debug!(target: "airlogd", "Joined scheduler thread!"),
        Err(_) => {
            log::error!(target: "airlogd", "Could not join the scheduler thread!");
            exit(301);
        }
    };

    log::info!(target: "airlogd", "Exiting");
    exit(0);
}
