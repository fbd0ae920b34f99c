//! Module for connecting to a postgres database and replacing the `city_metrics` table with the
//! records of a pipeline run.
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::{Client, NoTls};
use postgres_openssl::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PersistenceError;
use crate::record::{CombinedCityRecord, ValidatedRecordSet};

static SQL_CREATE_TABLE: &'static str = include_str!("sql/create_table.sql");
static SQL_DELETE_ALL: &'static str = include_str!("sql/delete_all.sql");
static SQL_INSERT_CITY_METRICS: &'static str = include_str!("sql/insert_city_metrics.sql");

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// The hostname of the database server.
    pub hostname: String,
    /// The port for the database server.
    pub port: u16,
    /// The username to connect as.
    pub username: String,
    /// The password to connect with.
    pub password: String,
    /// The database to open on the server.
    pub database: String,
    /// Flag to enable tls for the database server connection.
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
    /// Verify the server certificate against the CA.
    #[serde(default = "default_verify_server")]
    pub verify_server: bool,
}

fn default_verify_server() -> bool {
    true
}

/// Row oriented store holding the latest records of every city.
pub trait RowStore {
    /// Replaces the whole content of the store with the given records.
    fn replace_all(&mut self, records: &ValidatedRecordSet) -> Result<(), PersistenceError>;
}

/// `RowStore` backed by the `city_metrics` table of a postgres database.
///
/// The connection is opened on first use and reopened after it was closed or
/// a replace failed.
pub struct PostgresStore {
    connection_parameters: DatabaseParameters,
    client: Option<Client>,
}

impl PostgresStore {
    pub fn new(connection_parameters: DatabaseParameters) -> PostgresStore {
        PostgresStore {
            connection_parameters,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut Client, PersistenceError> {
        if let Some(client) = self.client.take().filter(|client| !client.is_closed()) {
            return Ok(self.client.insert(client));
        }

        let client = connect(&self.connection_parameters)?;
        log::info!(target: "airlogd::db", "Database connection established!");
        Ok(self.client.insert(client))
    }
}

impl RowStore for PostgresStore {
    /// Deletes all rows of `city_metrics` and inserts the given records in a single transaction.
    ///
    /// # Errors
    ///
    /// * The connection cannot be established.
    ///
    /// * A statement fails, in which case the transaction is rolled back and the table keeps
    ///   its previous content.
    ///
    fn replace_all(&mut self, records: &ValidatedRecordSet) -> Result<(), PersistenceError> {
        let result = replace_city_metrics(self.client()?, records.records());
        if result.is_err() {
            self.client = None;
        }
        result
    }
}

fn replace_city_metrics(database_client: &mut Client, records: &[CombinedCityRecord]) -> Result<(), PersistenceError> {
    let mut transaction = database_client.transaction()?;
    transaction.batch_execute(SQL_CREATE_TABLE)?;

    let deleted = transaction.execute(SQL_DELETE_ALL, &[])?;
    log::debug!(target: "airlogd::db", "Deleted {} previous rows", deleted);

    let insert = transaction.prepare(SQL_INSERT_CITY_METRICS)?;
    for record in records {
        let components = component_json(record);
        let label = record.aqi_label.as_str();
        // Validated scores are integral.
        let aqi = record.aqi.map(|aqi| aqi as i64);
        transaction.execute(&insert, &[
            &record.city,
            &record.temperature,
            &record.feels_like,
            &record.temp_min,
            &record.temp_max,
            &record.humidity,
            &record.pressure,
            &record.latitude,
            &record.longitude,
            &record.captured_at,
            &record.sunrise,
            &record.sunset,
            &components,
            &aqi,
            &label,
        ])?;
    }

    transaction.commit()?;
    log::debug!(target: "airlogd::db", "Inserted {} rows into city_metrics", records.len());
    Ok(())
}

/// Pollutant concentrations of a record as a json object.
fn component_json(record: &CombinedCityRecord) -> Value {
    Value::Object(
        record
            .components
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(*value)))
            .collect(),
    )
}

/// Opens a database connection, using TLS if enabled in the parameters.
///
/// # Errors
///
/// Errors occur when one of the following conditions is met:
///
/// * TLS is enabled but no TLS parameters are given.
///
/// * The files for the TLS connection cannot be found.
///
/// * The connection cannot be established.
///
/// * The the user is not authorized for the database.
///
pub fn connect(connection_parameters: &DatabaseParameters) -> Result<Client, PersistenceError> {
    let mut postgres_config = postgres::Config::new();
    postgres_config
        .user(&connection_parameters.username)
        .password(&connection_parameters.password)
        .host(&connection_parameters.hostname)
        .port(connection_parameters.port)
        .dbname(&connection_parameters.database)
        .application_name(env!("CARGO_PKG_NAME"));

    if !connection_parameters.tls_enable {
        return Ok(postgres_config.connect(NoTls)?);
    }

    let tls_params = match &connection_parameters.tls_params {
        Some(tls_params) => tls_params,
        None => {
            return Err(PersistenceError::Tls(String::from("TLS enabled but no TLS parameters specified!")));
        }
    };

    let mut ssl_connection_builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| PersistenceError::Tls(format!("Could not create ssl connection builder: \'{}\'", err)))?;

    if tls_params.verify_server {
        ssl_connection_builder.set_verify(SslVerifyMode::PEER);
    } else {
        log::warn!(target: "airlogd::db", "Server certificate verification is disabled!");
        ssl_connection_builder.set_verify(SslVerifyMode::NONE);
    }

    ssl_connection_builder
        .set_ca_file(&tls_params.server_ca_path)
        .map_err(|err| PersistenceError::Tls(format!("Could not set ssl ca file: \'{}\'", err)))?;
    ssl_connection_builder
        .set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM)
        .map_err(|err| PersistenceError::Tls(format!("Could not set ssl client cert file: \'{}\'", err)))?;
    ssl_connection_builder
        .set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM)
        .map_err(|err| PersistenceError::Tls(format!("Could not set ssl client key file: \'{}\'", err)))?;

    let tls_connector = MakeTlsConnector::new(ssl_connection_builder.build());
    Ok(postgres_config.connect(tls_connector)?)
}
