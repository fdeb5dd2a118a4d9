//! # lookload-core
//!
//! Lookahead-driven batched association loading.
//!
//! Resolving a relationship field once per parent record issues one query per
//! parent. This crate replaces that with deferred requests that are grouped by
//! owner model and relationship, then fetched once per group with a preload
//! plan derived from the selection below the field.
//!
//! This crate provides:
//! - A selection [`Shape`] parser and the [`PlanBuilder`] that turns shapes
//!   into merged [`PreloadPlan`]s
//! - The batch scheduler [`Loader`] with per-request [`LoadHandle`]s
//! - The [`AssociationFetcher`] that deduplicates records by identity and
//!   consults the per-query [`Ledger`]
//! - Paginated, scoped relationships through [`Connection`]s
//! - The [`Storage`] contract, a generic [`Preloader`] over any [`RowSource`],
//!   and an in-memory [`MemoryStore`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lookload_core::{Loader, MemoryStore, ModelSpec, Preloader, Record, RelationSpec, Schema, Shape};
//!
//! # futures::executor::block_on(async {
//! let schema = Arc::new(Schema::builder()
//!     .model(ModelSpec::new("Post", "posts")
//!         .relation(RelationSpec::has_many("comments", "Comment", "post_id")))
//!     .model(ModelSpec::new("Comment", "comments")
//!         .relation(RelationSpec::belongs_to("author", "Author", "author_id")))
//!     .model(ModelSpec::new("Author", "authors"))
//!     .build()?);
//!
//! let store = Arc::new(MemoryStore::new());
//! store.insert(Record::new("Author", 7).with_field("name", "Grace"));
//! for id in 1..=4 {
//!     store.insert(Record::new("Comment", id).with_field("post_id", id % 2 + 1).with_field("author_id", 7));
//! }
//!
//! let loader = Loader::new(schema.clone(), Preloader::new(schema, store.clone()));
//! let shape = Shape::parse("comments { body author { name } }")?;
//! let posts: Vec<_> = (1..=2).map(|id| Record::new("Post", id).into_ref()).collect();
//! let handles = posts
//!     .iter()
//!     .map(|post| loader.request(post, "comments", Some(&shape)))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! loader.flush().await;
//! for handle in handles {
//!     let comments = handle.wait().await?;
//!     assert!(comments.records().all(|c| c.is_loaded("author")));
//! }
//! assert_eq!(store.select_count("Comment"), 1);
//! assert_eq!(store.select_count("Author"), 1);
//! # Ok::<(), lookload_core::LoadError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod fetcher;
pub mod field;
pub mod handle;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod plan;
pub mod query;
pub mod record;
pub mod scheduler;
pub mod schema;
pub mod shape;
pub mod stats;
pub mod storage;
pub mod value;

pub use config::{
    ASSOCIATION_LOADER_FLAG, DEFAULT_MAX_BATCH_SIZE, FeatureFlags, LoaderConfig,
};
pub use connection::{
    Connection, ConnectionArgs, ConnectionKey, Edge, PageInfo, PageWindow, Scope, decode_cursor,
    encode_cursor,
};
pub use error::{ErrorCode, LoadError, LoadResult};
pub use fetcher::{AssociationFetcher, FetchOutcome};
pub use field::{AssociationField, FieldResolution};
pub use handle::{ConnectionHandle, Handle, LoadHandle, LoadState};
pub use ledger::Ledger;
pub use memory::{MemoryStore, QueryKind, QueryLogEntry};
pub use plan::{PlanBuilder, PlanNode, PlanSignature, PreloadPlan, build_plan};
pub use query::{Filter, OrderBy, RelationQuery, SortOrder};
pub use record::{Record, RecordKey, RecordRef, RelationValue};
pub use scheduler::{BatchKey, FlushReport, Loader};
pub use schema::{ModelSpec, RelationKind, RelationSpec, Schema, SchemaBuilder};
pub use shape::Shape;
pub use stats::LoadStats;
pub use storage::{DEFAULT_IN_LIST_LIMIT, Preloader, RowSource, SlotWrites, Storage};
pub use value::{RecordId, Value};
