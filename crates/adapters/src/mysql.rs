use std::path::PathBuf;

use mdb_core::config::{ConnectionSettings, InstanceConfig, TlsMode};
use mdb_core::dispatcher::ServiceError;
use mdb_core::instances::TableMetadata;
use mdb_core::query_result::{QueryError, Row};
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, SslOpts, Value};
use tracing::warn;

use crate::credentials::{non_empty, resolve_password};
use crate::direct::{columns_with_field_names, float_to_json, metadata_from_pairs, QueryOutput};

pub(crate) const DIALECT: &str = "mysql";
const DEFAULT_PORT: u16 = 3306;

const SELECT_TABLES_METADATA: &str = "SELECT table_name, column_name \
     FROM information_schema.columns \
     WHERE table_schema = database() \
     ORDER BY table_name, ordinal_position";

/// Builds the pool without connecting; connections open on first use.
pub(crate) fn pool(config: &InstanceConfig) -> Pool {
    Pool::new(opts_from_config(config))
}

pub(crate) async fn table_metadata(pool: &Pool) -> Result<TableMetadata, ServiceError> {
    let mut conn = pool.get_conn().await.map_err(to_service_error)?;
    let pairs: Vec<(String, String)> = conn
        .query(SELECT_TABLES_METADATA)
        .await
        .map_err(to_service_error)?;
    Ok(metadata_from_pairs(pairs))
}

pub(crate) async fn run_query(pool: &Pool, query: &str) -> Result<QueryOutput, QueryError> {
    execute(pool, query)
        .await
        .map_err(|error| to_query_error(&error))
}

pub(crate) async fn disconnect(pool: Pool) {
    if let Err(error) = pool.disconnect().await {
        warn!(%error, "failed to disconnect mysql pool");
    }
}

async fn execute(pool: &Pool, query: &str) -> Result<QueryOutput, mysql_async::Error> {
    let mut conn = pool.get_conn().await?;
    let mut result = conn.query_iter(query).await?;
    let names = result
        .columns()
        .map(|columns| {
            columns
                .iter()
                .map(|column| column.name_str().into_owned())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let raw_rows: Vec<mysql_async::Row> = result.collect().await?;
    result.drop_result().await?;

    let columns = columns_with_field_names(names);
    let rows = raw_rows
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .zip(row.unwrap())
                .map(|(column, value)| (column.field_name.clone(), mysql_value_to_json(value)))
                .collect::<Row>()
        })
        .collect();
    Ok((columns, rows))
}

fn mysql_value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => serde_json::Value::String(text),
            Err(error) => {
                serde_json::Value::String(String::from_utf8_lossy(error.as_bytes()).into_owned())
            }
        },
        Value::Int(value) => serde_json::Value::from(value),
        Value::UInt(value) => serde_json::Value::from(value),
        Value::Float(value) => float_to_json(f64::from(value)),
        Value::Double(value) => float_to_json(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut rendered =
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
            if micros > 0 {
                rendered.push_str(&format!(".{micros:06}"));
            }
            serde_json::Value::String(rendered)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(hours);
            let mut rendered = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if micros > 0 {
                rendered.push_str(&format!(".{micros:06}"));
            }
            serde_json::Value::String(rendered)
        }
    }
}

fn opts_from_config(config: &InstanceConfig) -> OptsBuilder {
    let settings = &config.connection;
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(settings.host.clone())
        .tcp_port(settings.port_or(DEFAULT_PORT))
        .user(Some(settings.user.clone()));

    if let Some(password) = resolve_password(config) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = &settings.database {
        builder = builder.db_name(Some(database.clone()));
    }

    if let Some(ssl_opts) = ssl_opts_from_settings(settings) {
        builder = builder.ssl_opts(ssl_opts);
    }

    builder
}

fn ssl_opts_from_settings(settings: &ConnectionSettings) -> Option<SslOpts> {
    let ca_cert_path = non_empty(settings.tls_ca_cert_path.as_deref());
    let requested = match settings.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => ca_cert_path.is_some(),
        TlsMode::Require | TlsMode::VerifyIdentity => true,
    };
    if !requested {
        return None;
    }

    let mut ssl_opts = SslOpts::default();
    if let Some(path) = ca_cert_path {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(path).into()]);
    }
    if settings.tls_mode == TlsMode::Require {
        ssl_opts = ssl_opts.with_danger_skip_domain_validation(true);
    }
    Some(ssl_opts)
}

fn to_service_error(error: mysql_async::Error) -> ServiceError {
    ServiceError::new(error.to_string())
}

fn to_query_error(error: &mysql_async::Error) -> QueryError {
    let query_error = QueryError::new(error.to_string());
    match error {
        mysql_async::Error::Server(server) => query_error.with_detail(serde_json::json!({
            "code": server.code,
            "state": server.state,
        })),
        _ => query_error,
    }
}
