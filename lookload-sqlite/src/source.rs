//! SQLite row source.

use async_trait::async_trait;
use indexmap::IndexMap;
use lookload_core::{LoadError, LoadResult, ModelSpec, Record, RecordRef, RelationQuery, RowSource, Value};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use smol_str::SmolStr;
use tokio_rusqlite::Connection;
use tracing::{debug, trace};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::SqliteResult;
use crate::sql::{self, Statement};
use crate::types::from_sqlite;

/// Row source backed by one SQLite connection.
///
/// Every statement it runs is recorded, so callers can check how many
/// queries a load issued.
pub struct SqliteSource {
    conn: Connection,
    statements: Mutex<Vec<String>>,
}

impl SqliteSource {
    /// Open a database described by `config`.
    pub async fn open(config: &SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => Connection::open(path).await?,
        };

        let foreign_keys = config.foreign_keys;
        let busy_timeout = config.busy_timeout();
        let journal_mode = match config.path {
            DatabasePath::Memory => None,
            DatabasePath::File(_) => Some(config.journal_mode.as_pragma()),
        };
        conn.call(move |conn| {
            conn.pragma_update(None, "foreign_keys", foreign_keys)?;
            if let Some(timeout) = busy_timeout {
                conn.busy_timeout(timeout)?;
            }
            if let Some(mode) = journal_mode {
                conn.pragma_update_and_check(None, "journal_mode", mode, |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        })
        .await?;

        debug!(path = ?config.path, "opened sqlite database");
        Ok(Self {
            conn,
            statements: Mutex::new(Vec::new()),
        })
    }

    /// Open a private in-memory database.
    pub async fn memory() -> SqliteResult<Self> {
        Self::open(&SqliteConfig::memory()).await
    }

    /// Open a database from a `sqlite:` URL.
    pub async fn from_url(url: &str) -> SqliteResult<Self> {
        Self::open(&SqliteConfig::from_url(url)?).await
    }

    /// Run one or more statements without results, e.g. DDL and seed data.
    ///
    /// Not recorded in the statement log.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Statements run so far, oldest first.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Number of row selects issued against `table`.
    pub fn select_count(&self, table: &str) -> usize {
        let prefix = format!("SELECT * FROM {}", sql::quote_ident(table));
        self.statements
            .lock()
            .iter()
            .filter(|s| s.starts_with(&prefix))
            .count()
    }

    /// Forget recorded statements.
    pub fn clear_statements(&self) {
        self.statements.lock().clear();
    }

    fn record(&self, stmt: &Statement) {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing query");
        self.statements.lock().push(stmt.sql.clone());
    }

    async fn query_rows(&self, stmt: Statement) -> SqliteResult<Vec<IndexMap<SmolStr, Value>>> {
        self.record(&stmt);
        let Statement { sql, params } = stmt;

        let (columns, rows) = self
            .conn
            .call(move |conn| {
                let mut prepared = conn.prepare(&sql)?;
                let columns: Vec<SmolStr> =
                    prepared.column_names().into_iter().map(SmolStr::new).collect();
                let width = columns.len();
                let rows = prepared.query_map(rusqlite::params_from_iter(params), |row| {
                    (0..width)
                        .map(|i| row.get::<_, SqlValue>(i))
                        .collect::<Result<Vec<_>, _>>()
                })?;
                let rows = rows.collect::<Result<Vec<_>, _>>()?;
                Ok((columns, rows))
            })
            .await?;

        trace!(rows = rows.len(), "query returned");
        rows.into_iter()
            .map(|values| {
                columns
                    .iter()
                    .cloned()
                    .zip(values.iter())
                    .map(|(column, value)| from_sqlite(ValueRef::from(value)).map(|v| (column, v)))
                    .collect()
            })
            .collect()
    }

    async fn query_count(&self, stmt: Statement) -> SqliteResult<u64> {
        self.record(&stmt);
        let Statement { sql, params } = stmt;

        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok(count)
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl RowSource for SqliteSource {
    async fn select(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<Vec<RecordRef>> {
        let rows = self
            .query_rows(sql::select(&model.table, query))
            .await
            .map_err(|e| LoadError::storage_on(model.name.clone(), e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|fields| Record::from_row(model.name.clone(), &model.primary_key, fields).into_ref())
            .collect())
    }

    async fn count(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<u64> {
        self.query_count(sql::count(&model.table, query))
            .await
            .map_err(|e| LoadError::storage_on(model.name.clone(), e.to_string()))
    }
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSource")
            .field("statements", &self.statements.lock().len())
            .finish()
    }
}
