use futures_util::TryStreamExt;
use mdb_core::config::{InstanceConfig, TlsMode};
use mdb_core::dispatcher::ServiceError;
use mdb_core::instances::TableMetadata;
use mdb_core::query_result::{Column, QueryError, Row};
use sqlx::postgres::{PgColumn, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{
    Column as _, Decode, Either, Executor, Postgres, Row as _, Statement, TypeInfo, ValueRef,
};
use tracing::debug;

use crate::credentials::{non_empty, resolve_password};
use crate::direct::{columns_with_field_names, float_to_json, metadata_from_pairs, QueryOutput};

pub(crate) const DIALECT: &str = "postgresql";
const DEFAULT_PORT: u16 = 5432;

// information_schema identifiers are a domain type; cast so they decode as text.
const SELECT_TABLES_METADATA: &str = "SELECT c.table_name::text, c.column_name::text \
     FROM information_schema.tables AS t \
     JOIN information_schema.columns AS c \
       ON c.table_schema = t.table_schema AND c.table_name = t.table_name \
     WHERE t.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
     ORDER BY c.table_name, c.ordinal_position";

/// Builds a lazy pool. Without idle or lifetime limits sqlx spawns no
/// maintenance task, so this works before the runtime exists.
pub(crate) fn pool(config: &InstanceConfig) -> PgPool {
    PgPoolOptions::new()
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_lazy_with(connect_options(config))
}

pub(crate) async fn table_metadata(pool: &PgPool) -> Result<TableMetadata, ServiceError> {
    let pairs: Vec<(String, String)> = sqlx::query_as(SELECT_TABLES_METADATA)
        .fetch_all(pool)
        .await
        .map_err(|error| ServiceError::new(error.to_string()))?;
    Ok(metadata_from_pairs(pairs))
}

pub(crate) async fn run_query(pool: &PgPool, query: &str) -> Result<QueryOutput, QueryError> {
    execute(pool, query)
        .await
        .map_err(|error| to_query_error(&error))
}

/// Runs `query` over the simple protocol so several statements may be sent at
/// once. Only the first statement that yields rows is returned.
async fn execute(pool: &PgPool, query: &str) -> Result<QueryOutput, sqlx::Error> {
    let mut stream = sqlx::raw_sql(query).fetch_many(pool);
    let mut rows: Vec<PgRow> = Vec::new();
    let mut first_set_done = false;
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(_) => first_set_done |= !rows.is_empty(),
            Either::Right(row) if !first_set_done => rows.push(row),
            Either::Right(_) => {}
        }
    }
    drop(stream);

    let names = match rows.first() {
        Some(row) => column_names(row.columns()),
        None => described_column_names(pool, query).await,
    };
    let columns = columns_with_field_names(names);
    let rows = rows.iter().map(|row| row_to_json(row, &columns)).collect();
    Ok((columns, rows))
}

fn column_names(columns: &[PgColumn]) -> Vec<String> {
    columns
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

/// Columns of a statement that returned no rows. Several statements cannot be
/// prepared together; those report no columns.
async fn described_column_names(pool: &PgPool, query: &str) -> Vec<String> {
    match pool.prepare(query).await {
        Ok(statement) => column_names(statement.columns()),
        Err(error) => {
            debug!(%error, "could not describe empty result");
            Vec::new()
        }
    }
}

fn row_to_json(row: &PgRow, columns: &[Column]) -> Row {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| (column.field_name.clone(), cell_to_json(row, index)))
        .collect()
}

fn cell_to_json(row: &PgRow, index: usize) -> serde_json::Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return serde_json::Value::Null;
    };
    if raw.is_null() {
        return serde_json::Value::Null;
    }
    let type_name = row.column(index).type_info().name();
    match <String as Decode<'_, Postgres>>::decode(raw) {
        Ok(text) => text_to_json(type_name, text),
        Err(_) => serde_json::Value::Null,
    }
}

/// Simple-protocol values arrive as text; numbers, booleans and json are
/// restored to their JSON types.
fn text_to_json(type_name: &str, text: String) -> serde_json::Value {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map_or(serde_json::Value::String(text), serde_json::Value::from),
        "FLOAT4" | "FLOAT8" => text
            .parse::<f64>()
            .map_or(serde_json::Value::String(text), float_to_json),
        "BOOL" => match text.as_str() {
            "t" => serde_json::Value::Bool(true),
            "f" => serde_json::Value::Bool(false),
            _ => serde_json::Value::String(text),
        },
        "JSON" | "JSONB" => {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        }
        _ => serde_json::Value::String(text),
    }
}

fn connect_options(config: &InstanceConfig) -> PgConnectOptions {
    let settings = &config.connection;
    let mut options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port_or(DEFAULT_PORT))
        .username(&settings.user)
        .ssl_mode(ssl_mode(settings.tls_mode));

    if let Some(password) = resolve_password(config) {
        options = options.password(&password);
    }

    if let Some(database) = &settings.database {
        options = options.database(database);
    }

    if let Some(path) = non_empty(settings.tls_ca_cert_path.as_deref()) {
        options = options.ssl_root_cert(path);
    }

    options
}

fn ssl_mode(mode: TlsMode) -> PgSslMode {
    match mode {
        TlsMode::Disabled => PgSslMode::Disable,
        TlsMode::Prefer => PgSslMode::Prefer,
        TlsMode::Require => PgSslMode::Require,
        TlsMode::VerifyIdentity => PgSslMode::VerifyFull,
    }
}

fn to_query_error(error: &sqlx::Error) -> QueryError {
    let query_error = QueryError::new(error.to_string());
    match error {
        sqlx::Error::Database(database) => match database.code() {
            Some(code) => query_error.with_detail(serde_json::json!({ "code": code })),
            None => query_error,
        },
        _ => query_error,
    }
}
