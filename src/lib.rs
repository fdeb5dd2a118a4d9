//! # Lookload
//!
//! Batched association loading for nested query resolvers.
//!
//! A resolver that walks `posts { comments { author { name } } }` one record
//! at a time issues a query per post and another per comment. Lookload
//! defers each relationship request, groups the requests by owner model and
//! relationship, and fetches each group once, preloading the nested
//! relationships the selection below the field asks for.
//!
//! Lookload provides:
//! - A batch scheduler with per-request handles, flushed by the executor
//! - Preload plans derived from lookahead selection shapes
//! - A per-query ledger so no record is fetched twice for the same plan
//! - Scoped, paginated relationships (connections)
//! - An in-memory store and, with the `sqlite` feature, a SQLite backend
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lookload::prelude::*;
//!
//! # futures::executor::block_on(async {
//! let schema = Arc::new(Schema::builder()
//!     .model(ModelSpec::new("Post", "posts")
//!         .relation(RelationSpec::belongs_to("author", "Author", "author_id")))
//!     .model(ModelSpec::new("Author", "authors"))
//!     .build()?);
//! let store = Arc::new(MemoryStore::new());
//! store.insert(Record::new("Author", 1).with_field("name", "Ada"));
//!
//! let loader = Loader::new(schema.clone(), Preloader::new(schema, store.clone()));
//! let post = Record::new("Post", 10).with_field("author_id", 1).into_ref();
//! let author = loader.load(&post, "author", None).await?;
//! assert_eq!(author.as_one().and_then(|a| a.get("name")), Some(&Value::from("Ada")));
//! # Ok::<(), lookload::LoadError>(())
//! # }).unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use lookload_core::*;

/// SQLite backend.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use lookload_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use lookload_core::{
        AssociationField, Connection, ConnectionArgs, FeatureFlags, FieldResolution, LoadError,
        LoadHandle, LoadResult, Loader, LoaderConfig, MemoryStore, ModelSpec, Preloader, Record,
        RecordRef, RelationSpec, RelationValue, Schema, Scope, Shape, Storage, Value,
    };
}
