//! Storage collaborators.
//!
//! The loader talks to storage through [`Storage`]: "populate this
//! relationship, plus these nested relationships, on these records" and
//! "give me the query behind one record's relationship". [`Preloader`]
//! implements it generically over a [`RowSource`], which only has to answer
//! flat row queries. Each relation level becomes one `IN (...)` query per
//! concrete target model (split further only when the key list exceeds the
//! source's in-list limit).
//!
//! Loads are staged: a [`SlotWrites`] collects every slot a load would
//! populate, and records are touched only when it is committed after the
//! whole load succeeded.
//!
//! ```rust
//! use std::sync::Arc;
//! use lookload_core::{MemoryStore, ModelSpec, Preloader, PreloadPlan, Record, RelationSpec, Schema, Storage};
//!
//! # futures::executor::block_on(async {
//! let schema = Arc::new(Schema::builder()
//!     .model(ModelSpec::new("Post", "posts")
//!         .relation(RelationSpec::has_many("comments", "Comment", "post_id")))
//!     .model(ModelSpec::new("Comment", "comments"))
//!     .build()?);
//!
//! let store = Arc::new(MemoryStore::new());
//! store.insert(Record::new("Comment", 1).with_field("post_id", 7));
//! store.insert(Record::new("Comment", 2).with_field("post_id", 7));
//!
//! let preloader = Preloader::new(schema, store.clone());
//! let post = Record::new("Post", 7).into_ref();
//! preloader.eager_load(&[post.clone()], &PreloadPlan::bare("comments")).await?;
//!
//! assert_eq!(post.relation("comments").unwrap().len(), 2);
//! assert_eq!(store.select_count("Comment"), 1);
//! # Ok::<(), lookload_core::LoadError>(())
//! # }).unwrap();
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::error::{LoadError, LoadResult};
use crate::plan::PreloadPlan;
use crate::query::{Filter, OrderBy, RelationQuery};
use crate::record::{RecordRef, RelationValue};
use crate::schema::{ModelSpec, RelationKind, RelationSpec, Schema};
use crate::value::{RecordId, Value};

/// Default number of keys in one `IN (...)` list.
pub const DEFAULT_IN_LIST_LIMIT: usize = 1000;

/// Answers flat row queries for one backend.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Select rows of `model` matching `query`, as fresh records.
    async fn select(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<Vec<RecordRef>>;

    /// Count rows of `model` matching `query`, ignoring limit and offset.
    async fn count(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<u64>;
}

#[async_trait]
impl<R: RowSource + ?Sized> RowSource for Arc<R> {
    async fn select(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<Vec<RecordRef>> {
        (**self).select(model, query).await
    }

    async fn count(&self, model: &ModelSpec, query: &RelationQuery) -> LoadResult<u64> {
        (**self).count(model, query).await
    }
}

/// Relationship slot writes held back until a load has fully succeeded.
///
/// Reads through [`SlotWrites::relation`] see staged values first, so nested
/// levels of a load can walk what earlier levels found without the caller's
/// records changing. Dropping the set discards the writes.
#[derive(Default)]
pub struct SlotWrites {
    writes: IndexMap<(usize, SmolStr), (RecordRef, RelationValue)>,
}

impl SlotWrites {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` for `relation` on `record`, replacing an earlier staged value.
    pub fn stage(&mut self, record: &RecordRef, relation: impl Into<SmolStr>, value: RelationValue) {
        let relation = relation.into();
        self.writes.insert(
            (Arc::as_ptr(record) as usize, relation),
            (record.clone(), value),
        );
    }

    /// Staged value, falling back to the record's populated slot.
    pub fn relation(&self, record: &RecordRef, relation: &str) -> Option<RelationValue> {
        self.writes
            .get(&(Arc::as_ptr(record) as usize, SmolStr::new(relation)))
            .map(|(_, value)| value.clone())
            .or_else(|| record.relation(relation))
    }

    /// Check if the slot is staged or already populated.
    pub fn is_loaded(&self, record: &RecordRef, relation: &str) -> bool {
        self.writes
            .contains_key(&(Arc::as_ptr(record) as usize, SmolStr::new(relation)))
            || record.is_loaded(relation)
    }

    /// Take over the writes of `other`.
    pub fn extend(&mut self, other: SlotWrites) {
        self.writes.extend(other.writes);
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Check if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every staged write, in staging order.
    pub fn commit(self) {
        for ((_, relation), (record, value)) in self.writes {
            record.set_relation(relation, value);
        }
    }
}

impl std::fmt::Debug for SlotWrites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.writes
                    .iter()
                    .map(|((_, relation), (record, _))| format!("{}.{}", record.describe(), relation)),
            )
            .finish()
    }
}

/// The loader's view of relational storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load `plan.relation` and everything nested in `plan` for `records`
    /// without touching them, returning the slot writes to apply.
    ///
    /// Records whose slot is already populated keep it. Once committed,
    /// every record passed in has the slot populated, possibly empty.
    async fn stage_load(&self, records: &[RecordRef], plan: &PreloadPlan) -> LoadResult<SlotWrites>;

    /// Populate `plan.relation` and everything nested in `plan` on `records`.
    ///
    /// Nothing is written unless the whole load succeeds.
    async fn eager_load(&self, records: &[RecordRef], plan: &PreloadPlan) -> LoadResult<()> {
        self.stage_load(records, plan).await?.commit();
        Ok(())
    }

    /// Query selecting the rows behind one record's relationship.
    async fn scoped_relation(&self, record: &RecordRef, relation: &str) -> LoadResult<RelationQuery>;

    /// Run a query.
    async fn execute(&self, query: &RelationQuery) -> LoadResult<Vec<RecordRef>>;

    /// Count the rows a query selects, ignoring limit and offset.
    async fn count(&self, query: &RelationQuery) -> LoadResult<u64>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn stage_load(&self, records: &[RecordRef], plan: &PreloadPlan) -> LoadResult<SlotWrites> {
        (**self).stage_load(records, plan).await
    }

    async fn eager_load(&self, records: &[RecordRef], plan: &PreloadPlan) -> LoadResult<()> {
        (**self).eager_load(records, plan).await
    }

    async fn scoped_relation(&self, record: &RecordRef, relation: &str) -> LoadResult<RelationQuery> {
        (**self).scoped_relation(record, relation).await
    }

    async fn execute(&self, query: &RelationQuery) -> LoadResult<Vec<RecordRef>> {
        (**self).execute(query).await
    }

    async fn count(&self, query: &RelationQuery) -> LoadResult<u64> {
        (**self).count(query).await
    }
}

/// Generic eager loader over a [`RowSource`].
#[derive(Debug)]
pub struct Preloader<R> {
    schema: Arc<Schema>,
    source: R,
    in_list_limit: usize,
}

impl<R: RowSource> Preloader<R> {
    /// Create a preloader.
    pub fn new(schema: Arc<Schema>, source: R) -> Self {
        Self {
            schema,
            source,
            in_list_limit: DEFAULT_IN_LIST_LIMIT,
        }
    }

    /// Set the maximum number of keys in one `IN (...)` list.
    pub fn in_list_limit(mut self, limit: usize) -> Self {
        self.in_list_limit = limit.max(1);
        self
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The row source.
    pub fn source(&self) -> &R {
        &self.source
    }

    fn preload<'a>(
        &'a self,
        records: &'a [RecordRef],
        plan: &'a PreloadPlan,
        nested: bool,
        writes: &'a mut SlotWrites,
    ) -> BoxFuture<'a, LoadResult<()>> {
        async move {
            let mut by_model: IndexMap<SmolStr, Vec<RecordRef>> = IndexMap::new();
            for record in records {
                by_model
                    .entry(SmolStr::new(record.model()))
                    .or_default()
                    .push(record.clone());
            }

            // Records reached through a polymorphic relation mix models; a
            // nested relationship only has to exist on one of them.
            let declared_somewhere = by_model
                .keys()
                .any(|model| self.schema.relation(model, &plan.relation).is_ok());

            for (model, group) in by_model {
                let owner = self.schema.require_model(&model)?;
                let relation = match self.schema.relation(&model, &plan.relation) {
                    Ok(relation) => relation,
                    Err(LoadError::UnknownRelationship { .. }) if nested && declared_somewhere => {
                        debug!(
                            model = %model,
                            relation = %plan.relation,
                            "relationship not declared on this target type"
                        );
                        continue;
                    }
                    // A nested plan entry came from a shape node with sub-selections.
                    Err(LoadError::UnknownRelationship { .. }) if nested => {
                        return Err(LoadError::malformed_shape(model, plan.relation.clone()));
                    }
                    Err(e) => return Err(e),
                };

                let pending: Vec<RecordRef> = group
                    .iter()
                    .filter(|r| !writes.is_loaded(r, &plan.relation))
                    .cloned()
                    .collect();

                if !pending.is_empty() {
                    info!(
                        relation = %plan.relation,
                        model = %model,
                        records = pending.len(),
                        plan = %plan,
                        "preloading association"
                    );
                    self.load_relation(owner, relation, &pending, writes).await?;
                }

                if plan.node.is_bare() {
                    continue;
                }

                let targets = related_records(&group, &plan.relation, writes);
                if targets.is_empty() {
                    continue;
                }
                for (name, node) in plan.node.children() {
                    let child = PreloadPlan::new(name.clone(), node.clone());
                    self.preload(&targets, &child, true, writes).await?;
                }
            }

            Ok(())
        }
        .boxed()
    }

    async fn load_relation(
        &self,
        owner: &ModelSpec,
        relation: &RelationSpec,
        pending: &[RecordRef],
        writes: &mut SlotWrites,
    ) -> LoadResult<()> {
        match &relation.kind {
            RelationKind::BelongsTo {
                target,
                foreign_key,
            } => {
                let target = self.schema.require_model(target)?;
                self.load_belongs_to(target, foreign_key, &relation.name, pending, writes)
                    .await
            }
            RelationKind::Polymorphic {
                foreign_key,
                foreign_type,
            } => {
                let mut by_type: IndexMap<SmolStr, Vec<RecordRef>> = IndexMap::new();
                for record in pending {
                    let target = record
                        .get(foreign_type)
                        .and_then(Value::as_str)
                        .filter(|name| self.schema.model(name).is_some());
                    match target {
                        Some(name) => by_type
                            .entry(SmolStr::new(name))
                            .or_default()
                            .push(record.clone()),
                        None => writes.stage(record, relation.name.clone(), RelationValue::One(None)),
                    }
                }
                for (type_name, group) in by_type {
                    let target = self.schema.require_model(&type_name)?;
                    self.load_belongs_to(target, foreign_key, &relation.name, &group, writes)
                        .await?;
                }
                Ok(())
            }
            RelationKind::HasOne {
                target,
                foreign_key,
                as_type,
            } => {
                let target = self.schema.require_model(target)?;
                let base = inverse_base(owner, target, as_type.as_ref(), &[]);
                self.load_has(target, base, foreign_key, &relation.name, false, pending, writes)
                    .await
            }
            RelationKind::HasMany {
                target,
                foreign_key,
                as_type,
                order_by,
            } => {
                let target = self.schema.require_model(target)?;
                let base = inverse_base(owner, target, as_type.as_ref(), order_by);
                self.load_has(target, base, foreign_key, &relation.name, true, pending, writes)
                    .await
            }
        }
    }

    async fn load_belongs_to(
        &self,
        target: &ModelSpec,
        foreign_key: &str,
        name: &SmolStr,
        pending: &[RecordRef],
        writes: &mut SlotWrites,
    ) -> LoadResult<()> {
        let keys: IndexSet<RecordId> = pending
            .iter()
            .filter_map(|r| r.get(foreign_key).and_then(Value::as_id))
            .collect();

        let rows = self
            .select_in(target, &RelationQuery::new(target.name.clone()), &target.primary_key, keys)
            .await?;
        let by_id: IndexMap<RecordId, RecordRef> = rows
            .into_iter()
            .filter_map(|row| row.id().cloned().map(|id| (id, row)))
            .collect();

        for record in pending {
            let found = record
                .get(foreign_key)
                .and_then(Value::as_id)
                .and_then(|id| by_id.get(&id).cloned());
            writes.stage(record, name.clone(), RelationValue::One(found));
        }
        Ok(())
    }

    async fn load_has(
        &self,
        target: &ModelSpec,
        base: RelationQuery,
        foreign_key: &SmolStr,
        name: &SmolStr,
        many: bool,
        pending: &[RecordRef],
        writes: &mut SlotWrites,
    ) -> LoadResult<()> {
        let keys: IndexSet<RecordId> = pending.iter().filter_map(|r| r.id().cloned()).collect();

        let rows = self.select_in(target, &base, foreign_key, keys).await?;
        let mut by_owner: IndexMap<RecordId, Vec<RecordRef>> = IndexMap::new();
        for row in rows {
            if let Some(owner_id) = row.get(foreign_key).and_then(Value::as_id) {
                by_owner.entry(owner_id).or_default().push(row);
            }
        }

        for record in pending {
            let mut related = record
                .id()
                .and_then(|id| by_owner.get(id).cloned())
                .unwrap_or_default();
            let value = if many {
                RelationValue::Many(related)
            } else {
                related.truncate(1);
                RelationValue::One(related.pop())
            };
            writes.stage(record, name.clone(), value);
        }
        Ok(())
    }

    async fn select_in(
        &self,
        model: &ModelSpec,
        base: &RelationQuery,
        column: &SmolStr,
        keys: IndexSet<RecordId>,
    ) -> LoadResult<Vec<RecordRef>> {
        let keys: Vec<RecordId> = keys.into_iter().collect();
        let mut rows = Vec::new();
        for chunk in keys.chunks(self.in_list_limit) {
            let values = chunk.iter().cloned().map(Value::from).collect();
            let query = base.clone().filter(Filter::in_list(column.clone(), values));
            rows.extend(self.source.select(model, &query).await?);
        }
        debug!(model = %model.name, rows = rows.len(), "batched select finished");
        Ok(rows)
    }
}

/// Base query for the target side of a has-one/has-many.
fn inverse_base(
    owner: &ModelSpec,
    target: &ModelSpec,
    as_type: Option<&SmolStr>,
    order_by: &[OrderBy],
) -> RelationQuery {
    let mut query = RelationQuery::new(target.name.clone());
    if let Some(type_column) = as_type {
        query = query.filter(Filter::equals(type_column.clone(), owner.name.as_str()));
    }
    if order_by.is_empty() {
        query.order_by(OrderBy::asc(target.primary_key.clone()))
    } else {
        query.order_by_all(order_by.iter().cloned())
    }
}

/// Records held in `relation` across `owners`, each handle once.
fn related_records(owners: &[RecordRef], relation: &str, writes: &SlotWrites) -> Vec<RecordRef> {
    let mut seen = HashSet::new();
    owners
        .iter()
        .filter_map(|owner| writes.relation(owner, relation))
        .flat_map(|value| value.records().cloned().collect::<Vec<_>>())
        .filter(|record| seen.insert(Arc::as_ptr(record) as usize))
        .collect()
}

#[async_trait]
impl<R: RowSource> Storage for Preloader<R> {
    async fn stage_load(&self, records: &[RecordRef], plan: &PreloadPlan) -> LoadResult<SlotWrites> {
        let mut writes = SlotWrites::new();
        self.preload(records, plan, false, &mut writes).await?;
        Ok(writes)
    }

    async fn scoped_relation(&self, record: &RecordRef, relation: &str) -> LoadResult<RelationQuery> {
        let owner = self.schema.require_model(record.model())?;
        let spec = self.schema.relation(record.model(), relation)?;

        match &spec.kind {
            RelationKind::BelongsTo {
                target,
                foreign_key,
            } => {
                let target = self.schema.require_model(target)?;
                Ok(belongs_to_query(target, record.get(foreign_key)))
            }
            RelationKind::Polymorphic {
                foreign_key,
                foreign_type,
            } => {
                let type_name = record
                    .get(foreign_type)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        LoadError::invalid_argument(
                            foreign_type.clone(),
                            format!("`{}` has no target type", record.describe()),
                        )
                    })?;
                let target = self.schema.require_model(type_name)?;
                Ok(belongs_to_query(target, record.get(foreign_key)))
            }
            RelationKind::HasOne {
                target,
                foreign_key,
                as_type,
            } => {
                let id = record
                    .id()
                    .ok_or_else(|| LoadError::missing_identity(record.model()))?;
                let target = self.schema.require_model(target)?;
                Ok(inverse_base(owner, target, as_type.as_ref(), &[])
                    .filter(Filter::equals(foreign_key.clone(), id.clone())))
            }
            RelationKind::HasMany {
                target,
                foreign_key,
                as_type,
                ..
            } => {
                let id = record
                    .id()
                    .ok_or_else(|| LoadError::missing_identity(record.model()))?;
                let target = self.schema.require_model(target)?;
                // Connections supply their own order; only keep the filters.
                let mut query = inverse_base(owner, target, as_type.as_ref(), &[]);
                query.order_by.clear();
                Ok(query.filter(Filter::equals(foreign_key.clone(), id.clone())))
            }
        }
    }

    async fn execute(&self, query: &RelationQuery) -> LoadResult<Vec<RecordRef>> {
        let model = self.schema.require_model(&query.model)?;
        self.source.select(model, query).await
    }

    async fn count(&self, query: &RelationQuery) -> LoadResult<u64> {
        let model = self.schema.require_model(&query.model)?;
        self.source.count(model, &query.unpaged()).await
    }
}

fn belongs_to_query(target: &ModelSpec, key: Option<&Value>) -> RelationQuery {
    let query = RelationQuery::new(target.name.clone());
    match key.and_then(Value::as_id) {
        Some(id) => query.filter(Filter::equals(target.primary_key.clone(), id)),
        // No key selects nothing.
        None => query.filter(Filter::in_list(target.primary_key.clone(), Vec::new())),
    }
}
