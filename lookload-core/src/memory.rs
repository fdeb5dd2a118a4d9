//! In-memory row source.
//!
//! [`MemoryStore`] keeps rows per model and evaluates [`RelationQuery`]
//! filters, ordering and paging itself. It logs every query it answers, so
//! tests can assert how many round trips a load took, and it can be told to
//! fail queries against a model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::query::RelationQuery;
use crate::record::{Record, RecordRef};
use crate::schema::ModelSpec;
use crate::storage::RowSource;
use crate::value::{RecordId, Value};

/// Kind of query answered by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Row selection.
    Select,
    /// Row count.
    Count,
}

/// One answered query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogEntry {
    /// Kind of query.
    pub kind: QueryKind,
    /// The query.
    pub query: RelationQuery,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: Option<RecordId>,
    fields: IndexMap<SmolStr, Value>,
}

/// Rows held in memory, keyed by model name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<IndexMap<SmolStr, Vec<StoredRow>>>,
    log: Mutex<Vec<QueryLogEntry>>,
    failures: Mutex<HashMap<SmolStr, String>>,
    instantiated: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row built as a record.
    ///
    /// The record's identity is stored under the model's primary key column
    /// unless the record already has that column.
    pub fn insert(&self, record: Record) {
        let row = StoredRow {
            id: record.id().cloned(),
            fields: record.fields().clone(),
        };
        self.tables
            .write()
            .entry(SmolStr::new(record.model()))
            .or_default()
            .push(row);
    }

    /// Number of rows stored for a model.
    pub fn row_count(&self, model: &str) -> usize {
        self.tables.read().get(model).map_or(0, Vec::len)
    }

    /// Make every query against `model` fail.
    pub fn fail_on(&self, model: impl Into<SmolStr>, message: impl Into<String>) {
        self.failures.lock().insert(model.into(), message.into());
    }

    /// Stop failing queries against `model`.
    pub fn recover(&self, model: &str) {
        self.failures.lock().remove(model);
    }

    /// Every query answered so far.
    pub fn queries(&self) -> Vec<QueryLogEntry> {
        self.log.lock().clone()
    }

    /// Number of selects answered for a model.
    pub fn select_count(&self, model: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| e.kind == QueryKind::Select && e.query.model == model)
            .count()
    }

    /// Number of selects answered across models.
    pub fn total_selects(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| e.kind == QueryKind::Select)
            .count()
    }

    /// Number of records built from rows.
    pub fn instantiated(&self) -> u64 {
        self.instantiated.load(Ordering::Relaxed)
    }

    /// Forget the query log and the instantiation count.
    pub fn clear_log(&self) {
        self.log.lock().clear();
        self.instantiated.store(0, Ordering::Relaxed);
    }

    fn answer(
        &self,
        kind: QueryKind,
        model: &ModelSpec,
        query: &RelationQuery,
    ) -> LoadResult<Vec<IndexMap<SmolStr, Value>>> {
        self.log.lock().push(QueryLogEntry {
            kind,
            query: query.clone(),
        });

        if let Some(message) = self.failures.lock().get(model.name.as_str()) {
            return Err(LoadError::storage_on(model.name.clone(), message.clone()));
        }

        let tables = self.tables.read();
        let mut rows: Vec<IndexMap<SmolStr, Value>> = tables
            .get(model.name.as_str())
            .into_iter()
            .flatten()
            .map(|row| with_primary_key(row, &model.primary_key))
            .filter(|fields| query.matches(fields))
            .collect();
        drop(tables);

        // Stable sort keeps insertion order among equal keys.
        rows.sort_by(|a, b| query.compare(a, b));
        Ok(rows)
    }
}

fn with_primary_key(row: &StoredRow, primary_key: &SmolStr) -> IndexMap<SmolStr, Value> {
    match &row.id {
        Some(id) if !row.fields.contains_key(primary_key) => {
            let mut fields = IndexMap::with_capacity(row.fields.len() + 1);
            fields.insert(primary_key.clone(), Value::from(id.clone()));
            fields.extend(row.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            fields
        }
        _ => row.fields.clone(),
    }
}

#[async_trait]
impl RowSource for MemoryStore {
    async fn select(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<Vec<RecordRef>> {
        let rows = self.answer(QueryKind::Select, model, query)?;
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);

        let records: Vec<RecordRef> = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|fields| Record::from_row(model.name.clone(), &model.primary_key, fields).into_ref())
            .collect();

        self.instantiated
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        debug!(model = %model.name, rows = records.len(), "memory select");
        Ok(records)
    }

    async fn count(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<u64> {
        let rows = self.answer(QueryKind::Count, model, query)?;
        Ok(rows.len() as u64)
    }
}
