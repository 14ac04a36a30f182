//! `PostgreSQL` implementation of [`DatabaseClient`].
//!
//! The client owns a lazily connected pool. Seeding switches the active
//! database by rebuilding the pool against the dataset's database, so a
//! client handle only ever talks to one database at a time. All SQL
//! identifiers taken from datasets pass through [`sanitize_identifier`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::RwLock;
use rpt_core::{DataColumn, DataTable, DatabaseClient, DbDataSet};
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, FromRow, PgPool, Row, TypeInfo};
use tracing::{debug, info};

use crate::config::{EndpointConfig, SslMode};

/// SQLSTATE for `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

pub struct PostgresClient {
    endpoint: EndpointConfig,
    database: RwLock<Option<String>>,
    pool: ArcSwapOption<PgPool>,
}

impl PostgresClient {
    #[must_use]
    pub fn new(endpoint: EndpointConfig) -> Self {
        let database = endpoint.database.clone();
        Self {
            endpoint,
            database: RwLock::new(database),
            pool: ArcSwapOption::empty(),
        }
    }

    /// Database the next connection targets; `None` is the server default.
    #[must_use]
    pub fn database(&self) -> Option<String> {
        self.database.read().clone()
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.endpoint.host)
            .port(self.endpoint.port)
            .username(&self.endpoint.user)
            .password(&self.endpoint.password)
            .ssl_mode(pg_ssl_mode(self.endpoint.ssl_mode));
        match self.database.read().as_deref() {
            Some(database) => options.database(database),
            None => options,
        }
    }

    fn pool(&self) -> anyhow::Result<Arc<PgPool>> {
        self.pool
            .load_full()
            .ok_or_else(|| anyhow!("not connected to {}", self.endpoint.host))
    }

    /// Points the client at `database` and reconnects.
    async fn use_database(&self, database: &str) -> anyhow::Result<()> {
        *self.database.write() = Some(database.to_string());
        self.reconnect().await
    }

    /// Creates `database`, tolerating one that already exists.
    async fn create_database(&self, database: &str) -> anyhow::Result<()> {
        let pool = self.pool()?;
        match sqlx::raw_sql(&format!("CREATE DATABASE {database}"))
            .execute(&*pool)
            .await
        {
            Ok(_) => {
                info!(database, "database created");
                Ok(())
            }
            Err(err) if is_duplicate_database(&err) => {
                debug!(database, "database already exists");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("creating database {database}")),
        }
    }

    /// Inserts every row of `table` in one transaction. Returns the row count.
    async fn insert_rows(&self, name: &str, table: &DataTable) -> anyhow::Result<usize> {
        let rows = table.parsed_rows(name)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(&sanitize_identifier(name), table);
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;
        for fields in &rows {
            let mut query = sqlx::query(&sql);
            for field in fields {
                query = query.bind(*field);
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting into {name}"))?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn connect(&self) -> anyhow::Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(self.connect_options());
        if let Some(previous) = self.pool.swap(Some(Arc::new(pool))) {
            previous.close().await;
        }
        debug!(host = %self.endpoint.host, database = ?self.database(), "pool configured");
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        if let Some(pool) = self.pool.swap(None) {
            pool.close().await;
        }
        Ok(())
    }

    async fn seed(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        let database = sanitize_identifier(&data.name);
        anyhow::ensure!(!database.is_empty(), "dataset name {:?} is not a usable identifier", data.name);

        self.create_database(&database).await?;
        self.use_database(&database).await?;

        let pool = self.pool()?;
        let mut tables = Vec::with_capacity(data.tables.len());
        let mut rows = 0;
        for (name, table) in &data.tables {
            let table_name = sanitize_identifier(name);
            sqlx::raw_sql(&create_table_sql(&table_name, table))
                .execute(&*pool)
                .await
                .with_context(|| format!("creating table {table_name}"))?;
            rows += self.insert_rows(name, table).await?;
            tables.push(table_name);
        }

        Ok(json!({ "database": database, "tables": tables, "rows_inserted": rows }))
    }

    async fn write(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        let database = sanitize_identifier(&data.name);
        self.use_database(&database).await?;
        let mut rows = 0;
        for (name, table) in &data.tables {
            rows += self.insert_rows(name, table).await?;
        }
        Ok(json!({ "database": database, "rows_inserted": rows }))
    }

    async fn delete(&self, data: &DbDataSet) -> anyhow::Result<Value> {
        let database = sanitize_identifier(&data.name);
        self.use_database(&database).await?;
        let pool = self.pool()?;
        let mut dropped = Vec::with_capacity(data.tables.len());
        for name in data.tables.keys() {
            let table_name = sanitize_identifier(name);
            sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {table_name}"))
                .execute(&*pool)
                .await
                .with_context(|| format!("dropping table {table_name}"))?;
            dropped.push(table_name);
        }
        Ok(json!({ "database": database, "tables_dropped": dropped }))
    }

    async fn query(&self, query: &str) -> anyhow::Result<Value> {
        let pool = self.pool()?;
        // Simple protocol: rows come back in text format, so every column
        // can be read as a string when no typed decoder applies.
        let rows = sqlx::raw_sql(query).fetch_all(&*pool).await?;
        Ok(Value::Array(rows.iter().map(row_to_json).collect()))
    }

    async fn list_databases(&self) -> anyhow::Result<Value> {
        let pool = self.pool()?;
        let rows: Vec<DatabaseRow> = sqlx::query_as(
            "SELECT datname, datistemplate, datallowconn, datconnlimit \
             FROM pg_database ORDER BY datname",
        )
        .fetch_all(&*pool)
        .await?;

        Ok(Value::Object(
            rows.into_iter()
                .map(|row| {
                    let info = json!({
                        "template": row.datistemplate,
                        "allow_connections": row.datallowconn,
                        "connection_limit": row.datconnlimit,
                    });
                    (row.datname, info)
                })
                .collect(),
        ))
    }
}

#[derive(Debug, FromRow)]
struct DatabaseRow {
    datname: String,
    datistemplate: bool,
    datallowconn: bool,
    datconnlimit: i32,
}

fn is_duplicate_database(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == DUPLICATE_DATABASE)
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn row_to_json(row: &PgRow) -> Value {
    let mut object = Map::new();
    for column in row.columns() {
        let i = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(i).ok().flatten().map(Value::from),
            "INT2" => row.try_get::<Option<i16>, _>(i).ok().flatten().map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(i).ok().flatten().map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(i).ok().flatten().map(Value::from),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i).ok().flatten().map(Value::from),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i).ok().flatten().map(Value::from),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i).ok().flatten(),
            _ => row
                .try_get_unchecked::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(Value::from),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Value::Object(object)
}

// ---------------------------------------------------------------------------
// SQL text
// ---------------------------------------------------------------------------

/// Lowercases, turns spaces into `_` and keeps only `[a-z0-9_]`.
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Column name: the header when set, the column key otherwise.
fn column_name(key: &str, column: &DataColumn) -> String {
    if column.header.is_empty() {
        sanitize_identifier(key)
    } else {
        sanitize_identifier(&column.header)
    }
}

/// Renders a JSON default as a SQL literal.
#[must_use]
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `CREATE TABLE IF NOT EXISTS` with columns in key order, then table
/// constraints.
#[must_use]
pub fn create_table_sql(table_name: &str, table: &DataTable) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|(key, column)| {
            let mut line = format!("{} {}", column_name(key, column), column.data_type);
            for constraint in &column.constraints {
                line.push(' ');
                line.push_str(constraint);
            }
            if let Some(default) = &column.default_value {
                line.push_str(" DEFAULT ");
                line.push_str(&sql_literal(default));
            }
            line
        })
        .collect();
    lines.extend(table.constraints.iter().cloned());
    format!("CREATE TABLE IF NOT EXISTS {table_name} ({})", lines.join(", "))
}

/// Parameterized insert. Each text parameter is cast to its column type.
#[must_use]
pub fn insert_sql(table_name: &str, table: &DataTable) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|(key, column)| column_name(key, column))
        .collect();
    let values: Vec<String> = table
        .columns
        .values()
        .enumerate()
        .map(|(i, column)| format!("CAST(${} AS {})", i + 1, column.data_type))
        .collect();
    format!(
        "INSERT INTO {table_name} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    )
}
