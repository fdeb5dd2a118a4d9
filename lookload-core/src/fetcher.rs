//! Execution of one flushed association batch.
//!
//! The fetcher turns a batch (owner model, merged plan, records) into as few
//! storage calls as possible:
//!
//! 1. records are deduplicated by identity; later handles with the same
//!    identity become aliases of the first
//! 2. identities already fetched under the same plan signature are served
//!    from the ledger
//! 3. polymorphic relations are partitioned by concrete target type, with
//!    unknown or missing types resolving to an empty slot
//! 4. each partition is split into chunks of at most `max_batch_size`
//!    records, one staged load per chunk
//!
//! Slot writes from every chunk are collected and applied together once the
//! last chunk succeeded; a failing batch leaves every record as it was.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::error::{LoadError, LoadResult};
use crate::ledger::Ledger;
use crate::plan::{PlanSignature, PreloadPlan};
use crate::record::{RecordRef, RelationValue};
use crate::schema::{RelationKind, RelationSpec, Schema};
use crate::storage::{SlotWrites, Storage};
use crate::value::{RecordId, Value};

/// What a fetch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Distinct identities handed to storage.
    pub fetched: usize,
    /// Distinct identities served from the ledger.
    pub from_ledger: usize,
    /// Identities resolved empty without storage (unknown polymorphic type).
    pub unresolved: usize,
    /// Storage calls issued.
    pub chunks: usize,
    /// Nothing was left to fetch after the ledger check.
    pub skipped: bool,
}

struct Identity {
    representative: RecordRef,
    aliases: Vec<RecordRef>,
}

impl Identity {
    fn handles(&self) -> impl Iterator<Item = &RecordRef> {
        std::iter::once(&self.representative).chain(self.aliases.iter())
    }

    fn stage(&self, writes: &mut SlotWrites, relation: &SmolStr, value: RelationValue) {
        for record in self.handles() {
            writes.stage(record, relation.clone(), value.clone());
        }
    }
}

/// Executes association batches against a storage collaborator.
pub struct AssociationFetcher<'a, S: ?Sized> {
    schema: &'a Schema,
    storage: &'a S,
    max_batch_size: usize,
}

impl<'a, S: Storage + ?Sized> AssociationFetcher<'a, S> {
    /// Create a fetcher.
    pub fn new(schema: &'a Schema, storage: &'a S, max_batch_size: usize) -> Self {
        Self {
            schema,
            storage,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Populate `plan.relation` on every record of `owner`.
    ///
    /// On success every record has the slot populated, possibly empty. On
    /// failure neither slots nor the ledger are written.
    pub async fn fetch(
        &self,
        ledger: &Mutex<Ledger>,
        owner: &str,
        plan: &PreloadPlan,
        records: &[RecordRef],
    ) -> LoadResult<FetchOutcome> {
        let relation = self.schema.relation(owner, &plan.relation)?;
        let identities = dedup(owner, records)?;
        let signature = PlanSignature::new(owner, plan.clone());
        let mut outcome = FetchOutcome::default();
        let mut writes = SlotWrites::new();

        let remaining: Vec<&Identity> = {
            let ledger = ledger.lock();
            identities
                .iter()
                .filter(|(id, identity)| match ledger.representative(&signature, id) {
                    Some(previous) => {
                        if let Some(value) = previous.relation(&plan.relation) {
                            identity.stage(&mut writes, &plan.relation, value);
                        }
                        outcome.from_ledger += 1;
                        false
                    }
                    None => true,
                })
                .map(|(_, identity)| identity)
                .collect()
        };

        if remaining.is_empty() {
            debug!(owner, signature = %signature, "ledger covers batch; skipping fetch");
            outcome.skipped = true;
            writes.commit();
            return Ok(outcome);
        }

        info!(
            relation = %plan.relation,
            owner,
            records = remaining.len(),
            plan = %plan,
            "fetching association batch"
        );

        for partition in self.partition(relation, &remaining, &mut outcome, &mut writes) {
            outcome.fetched += partition.len();
            for chunk in partition.chunks(self.max_batch_size) {
                let reps: Vec<RecordRef> = chunk.iter().map(|i| i.representative.clone()).collect();
                writes.extend(self.storage.stage_load(&reps, plan).await?);
                outcome.chunks += 1;
            }
        }

        for identity in &remaining {
            let value = writes
                .relation(&identity.representative, &plan.relation)
                .unwrap_or_else(|| RelationValue::empty(relation.is_many()));
            identity.stage(&mut writes, &plan.relation, value);
        }
        writes.commit();

        ledger
            .lock()
            .mark_fetched(&signature, remaining.iter().map(|i| &i.representative));

        Ok(outcome)
    }

    /// Split identities by concrete target type.
    ///
    /// Non-polymorphic relations form a single partition. Polymorphic records
    /// whose type column is missing or names an unregistered model get an
    /// empty slot staged here and are not handed to storage.
    fn partition<'i>(
        &self,
        relation: &RelationSpec,
        identities: &[&'i Identity],
        outcome: &mut FetchOutcome,
        writes: &mut SlotWrites,
    ) -> Vec<Vec<&'i Identity>> {
        let RelationKind::Polymorphic { foreign_type, .. } = &relation.kind else {
            return vec![identities.to_vec()];
        };

        let mut by_type: IndexMap<SmolStr, Vec<&'i Identity>> = IndexMap::new();
        for identity in identities {
            let target = identity
                .representative
                .get(foreign_type)
                .and_then(Value::as_str)
                .filter(|name| self.schema.model(name).is_some());
            match target {
                Some(name) => by_type.entry(SmolStr::new(name)).or_default().push(*identity),
                None => {
                    identity.stage(writes, &relation.name, RelationValue::One(None));
                    outcome.unresolved += 1;
                }
            }
        }
        debug!(relation = %relation.name, types = by_type.len(), "partitioned polymorphic batch");
        by_type.into_values().collect()
    }
}

fn dedup(owner: &str, records: &[RecordRef]) -> LoadResult<IndexMap<RecordId, Identity>> {
    let mut identities: IndexMap<RecordId, Identity> = IndexMap::new();
    for record in records {
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| LoadError::missing_identity(owner))?;
        match identities.get_mut(&id) {
            Some(identity) => {
                let seen = identity.handles().any(|r| Arc::ptr_eq(r, record));
                if !seen {
                    identity.aliases.push(record.clone());
                }
            }
            None => {
                identities.insert(
                    id,
                    Identity {
                        representative: record.clone(),
                        aliases: Vec::new(),
                    },
                );
            }
        }
    }
    Ok(identities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::memory::MemoryStore;
    use crate::plan::PlanNode;
    use crate::record::Record;
    use crate::schema::ModelSpec;
    use crate::storage::Preloader;

    fn setup() -> (Arc<Schema>, Arc<MemoryStore>) {
        let schema = Arc::new(
            Schema::builder()
                .model(
                    ModelSpec::new("Post", "posts")
                        .relation(RelationSpec::has_many("comments", "Comment", "post_id")),
                )
                .model(
                    ModelSpec::new("Comment", "comments")
                        .relation(RelationSpec::polymorphic("author", "author_id", "author_type")),
                )
                .model(ModelSpec::new("Author", "authors"))
                .model(ModelSpec::new("User", "users"))
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        for id in 1..=4 {
            store.insert(Record::new("Comment", id * 10).with_field("post_id", id));
        }
        store.insert(Record::new("Author", 1));
        store.insert(Record::new("User", 1));
        (schema, store)
    }

    fn comment(id: i64, author_type: Option<&str>) -> RecordRef {
        Record::new("Comment", id)
            .with_field("author_id", 1)
            .with_field("author_type", author_type)
            .into_ref()
    }

    #[tokio::test]
    async fn test_aliases_share_one_fetch() {
        let (schema, store) = setup();
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 500);
        let ledger = Mutex::new(Ledger::new());

        let a = Record::new("Post", 1).into_ref();
        let b = Record::new("Post", 1).into_ref();
        let c = Record::new("Post", 2).into_ref();
        let outcome = fetcher
            .fetch(&ledger, "Post", &PreloadPlan::bare("comments"), &[a.clone(), b.clone(), a.clone(), c])
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(b.relation("comments").unwrap().len(), 1);
        assert!(Arc::ptr_eq(
            &a.relation("comments").unwrap().as_many()[0],
            &b.relation("comments").unwrap().as_many()[0]
        ));
    }

    #[tokio::test]
    async fn test_ledger_skips_repeat_fetch() {
        let (schema, store) = setup();
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 500);
        let ledger = Mutex::new(Ledger::new());
        let plan = PreloadPlan::bare("comments");

        let first = Record::new("Post", 3).into_ref();
        fetcher.fetch(&ledger, "Post", &plan, &[first]).await.unwrap();

        let again = Record::new("Post", 3).into_ref();
        let outcome = fetcher.fetch(&ledger, "Post", &plan, &[again.clone()]).await.unwrap();

        assert!(outcome.skipped);
        assert_eq!(outcome.from_ledger, 1);
        assert_eq!(again.relation("comments").unwrap().len(), 1);
        assert_eq!(store.select_count("Comment"), 1);

        // A different plan is a different signature.
        let nested = PreloadPlan::new(
            "comments",
            PlanNode::from_children([("author", PlanNode::Bare)]),
        );
        let outcome = fetcher.fetch(&ledger, "Post", &nested, &[again]).await.unwrap();
        assert!(!outcome.skipped);
    }

    #[tokio::test]
    async fn test_chunking() {
        let (schema, store) = setup();
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 3);
        let ledger = Mutex::new(Ledger::new());

        let posts: Vec<_> = (1..=4).map(|id| Record::new("Post", id).into_ref()).collect();
        let outcome = fetcher
            .fetch(&ledger, "Post", &PreloadPlan::bare("comments"), &posts)
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 2);
        assert_eq!(store.select_count("Comment"), 2);
        assert!(posts.iter().all(|p| p.relation("comments").unwrap().len() == 1));
    }

    #[tokio::test]
    async fn test_polymorphic_partition() {
        let (schema, store) = setup();
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 500);
        let ledger = Mutex::new(Ledger::new());

        let comments = vec![
            comment(1, Some("Author")),
            comment(2, Some("User")),
            comment(3, Some("Author")),
            comment(4, Some("Robot")),
            comment(5, None),
        ];
        let outcome = fetcher
            .fetch(&ledger, "Comment", &PreloadPlan::bare("author"), &comments)
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.unresolved, 2);
        assert_eq!(store.select_count("Author"), 1);
        assert_eq!(store.select_count("User"), 1);
        assert_eq!(comments[1].relation("author").unwrap().as_one().unwrap().model(), "User");
        assert!(comments[3].relation("author").unwrap().is_empty());
        assert!(comments[4].relation("author").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_partition_commits_nothing() {
        let (schema, store) = setup();
        store.fail_on("User", "user shard down");
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 500);
        let ledger = Mutex::new(Ledger::new());

        let comments = vec![
            comment(1, Some("Author")),
            comment(2, Some("User")),
            comment(3, Some("Robot")),
        ];
        let err = fetcher
            .fetch(&ledger, "Comment", &PreloadPlan::bare("author"), &comments)
            .await
            .unwrap_err();

        assert!(err.is_storage());
        // The Author partition ran first and succeeded.
        assert_eq!(store.select_count("Author"), 1);
        assert!(comments.iter().all(|c| !c.is_loaded("author")));
        assert!(ledger.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_commits_nothing() {
        let (schema, store) = setup();
        store.insert(
            Record::new("Comment", 21)
                .with_field("post_id", 2)
                .with_field("author_id", 1)
                .with_field("author_type", "User"),
        );
        store.fail_on("User", "user shard down");
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 1);
        let ledger = Mutex::new(Ledger::new());

        let posts = vec![Record::new("Post", 1).into_ref(), Record::new("Post", 2).into_ref()];
        let plan = PreloadPlan::new(
            "comments",
            PlanNode::from_children([("author", PlanNode::Bare)]),
        );
        let err = fetcher.fetch(&ledger, "Post", &plan, &posts).await.unwrap_err();

        // Post 1's chunk succeeded; post 2's failed on the nested level.
        assert!(err.is_storage());
        assert_eq!(store.select_count("Comment"), 2);
        assert!(posts.iter().all(|p| !p.is_loaded("comments")));
    }

    #[tokio::test]
    async fn test_errors_leave_ledger_untouched() {
        let (schema, store) = setup();
        let preloader = Preloader::new(schema.clone(), store.clone());
        let fetcher = AssociationFetcher::new(&schema, &preloader, 500);
        let ledger = Mutex::new(Ledger::new());
        let post = Record::new("Post", 1).into_ref();

        let err = fetcher
            .fetch(&ledger, "Post", &PreloadPlan::bare("tags"), &[post.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownRelationship);

        store.fail_on("Comment", "offline");
        let err = fetcher
            .fetch(&ledger, "Post", &PreloadPlan::bare("comments"), &[post.clone()])
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert!(!post.is_loaded("comments"));
        assert!(ledger.lock().is_empty());

        let transient = Record::transient("Post").into_ref();
        let err = fetcher
            .fetch(&ledger, "Post", &PreloadPlan::bare("comments"), &[transient])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingIdentity);
    }
}
