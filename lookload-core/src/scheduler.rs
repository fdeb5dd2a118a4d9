//! Batch scheduler.
//!
//! A [`Loader`] lives for one root query. The executor calls
//! [`Loader::request`] for each record that needs a relationship, receiving a
//! [`LoadHandle`] immediately. Requests accumulate per [`BatchKey`] until the
//! executor has nothing else to do and calls [`Loader::flush`]; each key is
//! then fetched once with the merged plan of all its requests.
//!
//! ```rust
//! use std::sync::Arc;
//! use lookload_core::{Loader, MemoryStore, ModelSpec, Preloader, Record, RelationSpec, Schema, Shape};
//!
//! # futures::executor::block_on(async {
//! let schema = Arc::new(Schema::builder()
//!     .model(ModelSpec::new("Comment", "comments")
//!         .relation(RelationSpec::belongs_to("author", "Author", "author_id")))
//!     .model(ModelSpec::new("Author", "authors"))
//!     .build()?);
//! let store = Arc::new(MemoryStore::new());
//! store.insert(Record::new("Author", 1).with_field("name", "Ada"));
//!
//! let loader = Loader::new(schema.clone(), Preloader::new(schema, store.clone()));
//! let shape = Shape::parse("author { name }")?;
//! let handles: Vec<_> = (1..=3)
//!     .map(|id| {
//!         let comment = Record::new("Comment", id).with_field("author_id", 1).into_ref();
//!         loader.request(&comment, "author", Some(&shape))
//!     })
//!     .collect::<Result<_, _>>()?;
//!
//! loader.flush().await;
//! for handle in handles {
//!     assert_eq!(handle.wait().await?.len(), 1);
//! }
//! assert_eq!(store.select_count("Author"), 1);
//! # Ok::<(), lookload_core::LoadError>(())
//! # }).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::connection::{Connection, ConnectionArgs, ConnectionKey, Scope, load_connection};
use crate::error::{LoadError, LoadResult};
use crate::fetcher::AssociationFetcher;
use crate::handle::{ConnectionHandle, Handle, LoadHandle, LoadState};
use crate::ledger::Ledger;
use crate::plan::{PlanBuilder, PlanNode, PreloadPlan};
use crate::record::{RecordRef, RelationValue};
use crate::schema::Schema;
use crate::shape::Shape;
use crate::stats::{Counter, LoadStats, StatsCollector};
use crate::storage::Storage;
use crate::value::RecordId;

/// Key under which association requests batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    /// Owner model.
    pub model: SmolStr,
    /// Relationship name.
    pub relation: SmolStr,
}

impl BatchKey {
    /// Create a batch key.
    pub fn new(model: impl Into<SmolStr>, relation: impl Into<SmolStr>) -> Self {
        Self {
            model: model.into(),
            relation: relation.into(),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.relation)
    }
}

/// Summary of one or more flushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Flushes performed.
    pub ticks: u64,
    /// Association batches executed.
    pub batches: usize,
    /// Connection batches executed.
    pub connection_batches: usize,
    /// Distinct record identities resolved.
    pub records: usize,
    /// Storage calls issued for association batches.
    pub chunks: usize,
    /// Keys of association batches that failed.
    pub failed: Vec<BatchKey>,
    /// Keys of connection batches that failed.
    pub failed_connections: Vec<ConnectionKey>,
}

impl FlushReport {
    /// Check if nothing was flushed.
    pub fn is_empty(&self) -> bool {
        self.batches == 0 && self.connection_batches == 0
    }

    /// Check if any batch failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.failed_connections.is_empty()
    }

    fn absorb(&mut self, other: FlushReport) {
        self.ticks += other.ticks;
        self.batches += other.batches;
        self.connection_batches += other.connection_batches;
        self.records += other.records;
        self.chunks += other.chunks;
        self.failed.extend(other.failed);
        self.failed_connections.extend(other.failed_connections);
    }
}

struct PendingEntry {
    record: RecordRef,
    aliases: Vec<RecordRef>,
    node: PlanNode,
    tx: watch::Sender<LoadState<RelationValue>>,
    handle: LoadHandle,
}

struct PendingConnection {
    record: RecordRef,
    args: ConnectionArgs,
    tx: watch::Sender<LoadState<Connection>>,
    handle: ConnectionHandle,
}

struct ConnectionBatch {
    scope: Scope,
    entries: IndexMap<(RecordId, ConnectionArgs), PendingConnection>,
}

struct Resolved {
    node: PlanNode,
    value: RelationValue,
}

#[derive(Default)]
struct SchedulerState {
    tick: u64,
    pending: IndexMap<BatchKey, IndexMap<RecordId, PendingEntry>>,
    connections: IndexMap<ConnectionKey, ConnectionBatch>,
    resolved: HashMap<(BatchKey, RecordId), Vec<Resolved>>,
}

/// Batched association loader for one root query.
pub struct Loader<S> {
    schema: Arc<Schema>,
    storage: S,
    config: LoaderConfig,
    state: Mutex<SchedulerState>,
    ledger: Mutex<Ledger>,
    stats: StatsCollector,
}

impl<S: Storage> Loader<S> {
    /// Create a loader with default configuration.
    pub fn new(schema: Arc<Schema>, storage: S) -> Self {
        Self {
            schema,
            storage,
            config: LoaderConfig::default(),
            state: Mutex::new(SchedulerState::default()),
            ledger: Mutex::new(Ledger::new()),
            stats: StatsCollector::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The storage collaborator.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Counters so far.
    pub fn stats(&self) -> LoadStats {
        self.stats.snapshot()
    }

    /// Number of flushes performed.
    pub fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    /// Check if any request waits for a flush.
    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.pending.is_empty() || !state.connections.is_empty()
    }

    /// Request `relation` on `record`, with the lookahead `shape` of the field.
    ///
    /// Returns immediately. The handle resolves at the next flush, or is
    /// already fulfilled when an earlier flush loaded a covering plan for the
    /// same identity.
    pub fn request(
        &self,
        record: &RecordRef,
        relation: &str,
        shape: Option<&Shape>,
    ) -> LoadResult<LoadHandle> {
        self.request_under(record, relation, shape, &[])
    }

    /// Like [`request`](Self::request), for a field nested below `ancestors`.
    ///
    /// Relationship names on the ancestor path are not loaded again beneath
    /// this one.
    pub fn request_under(
        &self,
        record: &RecordRef,
        relation: &str,
        shape: Option<&Shape>,
        ancestors: &[&str],
    ) -> LoadResult<LoadHandle> {
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| LoadError::missing_identity(record.model()))?;
        self.schema.relation(record.model(), relation)?;

        let node = match shape {
            Some(shape) => PlanBuilder::new()
                .with_ancestors(ancestors.iter().copied())
                .node_for(relation, shape),
            None => PlanNode::Bare,
        };
        let key = BatchKey::new(record.model(), relation);
        self.stats.incr(Counter::Requests);

        let mut state = self.state.lock();

        let covering = state
            .resolved
            .get(&(key.clone(), id.clone()))
            .and_then(|entries| entries.iter().find(|r| r.node.covers(&node)));
        if let Some(resolved) = covering {
            if !record.is_loaded(relation) {
                record.set_relation(relation, resolved.value.clone());
            }
            self.stats.incr(Counter::CacheHits);
            debug!(key = %key, id = %id, "answered from resolved cache");
            return Ok(Handle::ready(resolved.value.clone()));
        }

        let batch = state.pending.entry(key.clone()).or_default();
        if let Some(entry) = batch.get_mut(&id) {
            entry.node = std::mem::take(&mut entry.node).merge(node);
            if !Arc::ptr_eq(&entry.record, record)
                && !entry.aliases.iter().any(|a| Arc::ptr_eq(a, record))
            {
                entry.aliases.push(record.clone());
            }
            self.stats.incr(Counter::Coalesced);
            return Ok(entry.handle.clone());
        }

        let (tx, handle) = LoadHandle::channel();
        batch.insert(
            id.clone(),
            PendingEntry {
                record: record.clone(),
                aliases: Vec::new(),
                node,
                tx,
                handle: handle.clone(),
            },
        );
        debug!(key = %key, id = %id, tick = state.tick, "queued association request");
        Ok(handle)
    }

    /// Like [`request`](Self::request), unless this edge was already
    /// requested through `request_once` in this query.
    ///
    /// Returns `None` for a repeated `(record identity, relation)` pair, so a
    /// record reached along several selection paths is registered once.
    pub fn request_once(
        &self,
        record: &RecordRef,
        relation: &str,
        shape: Option<&Shape>,
    ) -> LoadResult<Option<LoadHandle>> {
        if self.already_visited_edge(record, relation) {
            debug!(record = %record.describe(), relation, "edge already requested");
            return Ok(None);
        }
        let handle = self.request(record, relation, shape)?;
        self.visit_edge(record, relation);
        Ok(Some(handle))
    }

    /// Check if the edge `relation` on `record` was marked visited.
    ///
    /// Records without identity are never considered visited.
    pub fn already_visited_edge(&self, record: &RecordRef, relation: &str) -> bool {
        record.id().is_some_and(|id| {
            self.ledger
                .lock()
                .already_visited_edge(record.model(), id, relation)
        })
    }

    /// Mark the edge `relation` on `record` visited; returns `false` if it
    /// already was.
    pub fn visit_edge(&self, record: &RecordRef, relation: &str) -> bool {
        match record.id() {
            Some(id) => self.ledger.lock().visit_edge(record.model(), id, relation),
            None => true,
        }
    }

    /// Request one page of `relation` on `record` under `scope`.
    pub fn request_connection(
        &self,
        record: &RecordRef,
        relation: &str,
        scope: Scope,
        args: ConnectionArgs,
    ) -> LoadResult<ConnectionHandle> {
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| LoadError::missing_identity(record.model()))?;
        self.schema.relation(record.model(), relation)?;
        self.stats.incr(Counter::Requests);

        let key = ConnectionKey {
            model: SmolStr::new(record.model()),
            relation: SmolStr::new(relation),
            scope: SmolStr::new(scope.name()),
        };

        let mut state = self.state.lock();
        let batch = state
            .connections
            .entry(key.clone())
            .or_insert_with(|| ConnectionBatch {
                scope,
                entries: IndexMap::new(),
            });

        let entry_key = (id, args);
        if let Some(entry) = batch.entries.get(&entry_key) {
            self.stats.incr(Counter::Coalesced);
            return Ok(entry.handle.clone());
        }

        let (tx, handle) = ConnectionHandle::channel();
        let args = entry_key.1.clone();
        batch.entries.insert(
            entry_key,
            PendingConnection {
                record: record.clone(),
                args,
                tx,
                handle: handle.clone(),
            },
        );
        debug!(key = %key, "queued connection request");
        Ok(handle)
    }

    /// Execute every pending batch.
    ///
    /// Batches run one after another. A failing batch fails only its own
    /// handles; the report lists it and the flush moves on.
    pub async fn flush(&self) -> FlushReport {
        let (pending, connections, tick) = {
            let mut state = self.state.lock();
            if state.pending.is_empty() && state.connections.is_empty() {
                return FlushReport::default();
            }
            state.tick += 1;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.connections),
                state.tick,
            )
        };

        let mut report = FlushReport {
            ticks: 1,
            ..FlushReport::default()
        };
        debug!(
            tick,
            batches = pending.len(),
            connection_batches = connections.len(),
            "flushing"
        );

        for entries in pending.values() {
            for entry in entries.values() {
                entry.tx.send_replace(LoadState::Batched);
            }
        }
        for batch in connections.values() {
            for entry in batch.entries.values() {
                entry.tx.send_replace(LoadState::Batched);
            }
        }

        for (key, entries) in pending {
            self.run_batch(key, entries, &mut report).await;
        }
        for (key, batch) in connections {
            self.run_connection_batch(key, batch, &mut report).await;
        }

        report
    }

    /// Flush until no request is pending.
    pub async fn run_until_idle(&self) -> FlushReport {
        let mut report = FlushReport::default();
        while self.has_pending() {
            report.absorb(self.flush().await);
        }
        report
    }

    /// Request, flush and wait, for a single caller.
    pub async fn load(
        &self,
        record: &RecordRef,
        relation: &str,
        shape: Option<&Shape>,
    ) -> LoadResult<RelationValue> {
        let handle = self.request(record, relation, shape)?;
        if !handle.is_ready() {
            self.flush().await;
        }
        handle.wait().await
    }

    /// Request a connection, flush and wait, for a single caller.
    pub async fn load_connection(
        &self,
        record: &RecordRef,
        relation: &str,
        scope: Scope,
        args: ConnectionArgs,
    ) -> LoadResult<Connection> {
        let handle = self.request_connection(record, relation, scope, args)?;
        self.flush().await;
        handle.wait().await
    }

    async fn run_batch(
        &self,
        key: BatchKey,
        entries: IndexMap<RecordId, PendingEntry>,
        report: &mut FlushReport,
    ) {
        self.stats.incr(Counter::Batches);
        report.batches += 1;

        let node = entries
            .values()
            .map(|e| e.node.clone())
            .fold(PlanNode::Bare, PlanNode::merge);
        let plan = PreloadPlan::new(key.relation.clone(), node);
        let records: Vec<RecordRef> = entries
            .values()
            .flat_map(|e| std::iter::once(e.record.clone()).chain(e.aliases.iter().cloned()))
            .collect();

        for entry in entries.values() {
            entry.tx.send_replace(LoadState::Fetching);
        }

        let fetcher =
            AssociationFetcher::new(&self.schema, &self.storage, self.config.max_batch_size);
        match fetcher.fetch(&self.ledger, &key.model, &plan, &records).await {
            Ok(outcome) => {
                self.stats.add(Counter::Chunks, outcome.chunks as u64);
                self.stats.add(Counter::LedgerHits, outcome.from_ledger as u64);
                if outcome.skipped {
                    self.stats.incr(Counter::LedgerSkips);
                }
                report.chunks += outcome.chunks;
                report.records += entries.len();

                let many = self
                    .schema
                    .relation(&key.model, &key.relation)
                    .is_ok_and(|r| r.is_many());
                let mut state = self.state.lock();
                for (id, entry) in entries {
                    let value = entry
                        .record
                        .relation(&key.relation)
                        .unwrap_or_else(|| RelationValue::empty(many));
                    // Earlier values stay usable for the plans they covered.
                    let resolved = state.resolved.entry((key.clone(), id)).or_default();
                    resolved.retain(|r| !plan.node.covers(&r.node));
                    resolved.push(Resolved {
                        node: plan.node.clone(),
                        value: value.clone(),
                    });
                    entry.tx.send_replace(LoadState::Fulfilled(value));
                }
            }
            Err(err) => {
                warn!(key = %key, plan = %plan, error = %err, "association batch failed");
                self.stats.incr(Counter::Failures);
                report.failed.push(key);
                for entry in entries.values() {
                    entry.tx.send_replace(LoadState::Failed(err.clone()));
                }
            }
        }
    }

    async fn run_connection_batch(
        &self,
        key: ConnectionKey,
        batch: ConnectionBatch,
        report: &mut FlushReport,
    ) {
        self.stats.incr(Counter::ConnectionBatches);
        report.connection_batches += 1;

        let mut failed = false;
        for entry in batch.entries.values() {
            entry.tx.send_replace(LoadState::Fetching);
            let result = load_connection(
                &self.schema,
                &self.storage,
                &entry.record,
                &key.relation,
                &batch.scope,
                &entry.args,
            )
            .await;
            match result {
                Ok(connection) => {
                    entry.tx.send_replace(LoadState::Fulfilled(connection));
                }
                Err(err) => {
                    warn!(
                        key = %key,
                        record = %entry.record.describe(),
                        error = %err,
                        "connection load failed"
                    );
                    failed = true;
                    entry.tx.send_replace(LoadState::Failed(err));
                }
            }
        }

        if failed {
            self.stats.incr(Counter::Failures);
            report.failed_connections.push(key);
        }
    }
}

impl<S> fmt::Debug for Loader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Loader")
            .field("tick", &state.tick)
            .field("pending", &state.pending.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
