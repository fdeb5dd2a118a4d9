//! Static model and relationship registry.
//!
//! The registry is built once when the schema is set up and consulted by the
//! scheduler, the fetcher and the preloader. It replaces per-relationship
//! accessor generation: every relationship is a [`RelationSpec`] entry keyed
//! by name on its owner [`ModelSpec`], and records expose the matching slot
//! through [`Record::relation`](crate::Record::relation) /
//! [`Record::set_relation`](crate::Record::set_relation).
//!
//! ```rust
//! use lookload_core::{ModelSpec, RelationSpec, Schema};
//!
//! let schema = Schema::builder()
//!     .model(ModelSpec::new("Post", "posts")
//!         .relation(RelationSpec::has_many("comments", "Comment", "post_id")))
//!     .model(ModelSpec::new("Comment", "comments")
//!         .relation(RelationSpec::belongs_to("post", "Post", "post_id"))
//!         .relation(RelationSpec::polymorphic("author", "author_id", "author_type")))
//!     .model(ModelSpec::new("Author", "authors"))
//!     .build()
//!     .unwrap();
//!
//! assert!(schema.relation("Post", "comments").is_ok());
//! assert!(schema.relation("Post", "likes").is_err());
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::{LoadError, LoadResult};
use crate::query::OrderBy;

/// Shape of a relationship between models.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    /// The owner holds a foreign key to one target (e.g., Comment belongs to Post).
    BelongsTo {
        /// Target model.
        target: SmolStr,
        /// Foreign key column on the owner.
        foreign_key: SmolStr,
    },
    /// Like `BelongsTo`, but the target model is named per record by a
    /// discriminator column (e.g., Comment belongs to an Author or a User).
    Polymorphic {
        /// Foreign key column on the owner.
        foreign_key: SmolStr,
        /// Discriminator column on the owner holding the target model name.
        foreign_type: SmolStr,
    },
    /// The target holds a foreign key to the owner, at most one row (e.g., Author has one Profile).
    HasOne {
        /// Target model.
        target: SmolStr,
        /// Foreign key column on the target.
        foreign_key: SmolStr,
        /// Discriminator column on the target for polymorphic inverses.
        as_type: Option<SmolStr>,
    },
    /// The target holds a foreign key to the owner (e.g., Post has many Comments).
    HasMany {
        /// Target model.
        target: SmolStr,
        /// Foreign key column on the target.
        foreign_key: SmolStr,
        /// Discriminator column on the target for polymorphic inverses.
        as_type: Option<SmolStr>,
        /// Default ordering of the related rows.
        order_by: Vec<OrderBy>,
    },
}

/// Specification for a relationship between models.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSpec {
    /// Name of the relationship (field name).
    pub name: SmolStr,
    /// Kind and keys.
    pub kind: RelationKind,
}

impl RelationSpec {
    /// Create a belongs-to relationship.
    pub fn belongs_to(
        name: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        foreign_key: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsTo {
                target: target.into(),
                foreign_key: foreign_key.into(),
            },
        }
    }

    /// Create a polymorphic belongs-to relationship.
    pub fn polymorphic(
        name: impl Into<SmolStr>,
        foreign_key: impl Into<SmolStr>,
        foreign_type: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::Polymorphic {
                foreign_key: foreign_key.into(),
                foreign_type: foreign_type.into(),
            },
        }
    }

    /// Create a has-one relationship.
    pub fn has_one(
        name: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        foreign_key: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::HasOne {
                target: target.into(),
                foreign_key: foreign_key.into(),
                as_type: None,
            },
        }
    }

    /// Create a has-many relationship.
    pub fn has_many(
        name: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        foreign_key: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::HasMany {
                target: target.into(),
                foreign_key: foreign_key.into(),
                as_type: None,
                order_by: Vec::new(),
            },
        }
    }

    /// Mark a has-one/has-many as the inverse of a polymorphic belongs-to.
    ///
    /// Target rows are additionally filtered on `type_column = <owner model>`.
    pub fn inverse_of_polymorphic(mut self, type_column: impl Into<SmolStr>) -> Self {
        match &mut self.kind {
            RelationKind::HasOne { as_type, .. } | RelationKind::HasMany { as_type, .. } => {
                *as_type = Some(type_column.into());
            }
            _ => {}
        }
        self
    }

    /// Set the default ordering of a has-many relationship.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        if let RelationKind::HasMany { order_by, .. } = &mut self.kind {
            order_by.push(order);
        }
        self
    }

    /// Check if this relationship returns multiple records.
    pub fn is_many(&self) -> bool {
        matches!(self.kind, RelationKind::HasMany { .. })
    }

    /// Check if the target model is chosen per record.
    pub fn is_polymorphic(&self) -> bool {
        matches!(self.kind, RelationKind::Polymorphic { .. })
    }

    /// Statically known target model; `None` for polymorphic relationships.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::BelongsTo { target, .. }
            | RelationKind::HasOne { target, .. }
            | RelationKind::HasMany { target, .. } => Some(target),
            RelationKind::Polymorphic { .. } => None,
        }
    }
}

/// Specification for a model (one table).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Model name, as stored in polymorphic discriminator columns.
    pub name: SmolStr,
    /// Table name.
    pub table: SmolStr,
    /// Primary key column.
    pub primary_key: SmolStr,
    relations: IndexMap<SmolStr, RelationSpec>,
}

impl ModelSpec {
    /// Create a model with an `id` primary key.
    pub fn new(name: impl Into<SmolStr>, table: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: SmolStr::new("id"),
            relations: IndexMap::new(),
        }
    }

    /// Set the primary key column.
    pub fn primary_key(mut self, column: impl Into<SmolStr>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Declare a relationship.
    pub fn relation(mut self, spec: RelationSpec) -> Self {
        self.relations.insert(spec.name.clone(), spec);
        self
    }

    /// Get a relationship by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.get(name)
    }

    /// All relationships in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationSpec> {
        self.relations.values()
    }
}

/// Registry of every model and its relationships.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: IndexMap<SmolStr, Arc<ModelSpec>>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Get a model by name.
    pub fn model(&self, name: &str) -> Option<&Arc<ModelSpec>> {
        self.models.get(name)
    }

    /// Get a model by name, failing with `UnknownModel`.
    pub fn require_model(&self, name: &str) -> LoadResult<&Arc<ModelSpec>> {
        self.model(name).ok_or_else(|| LoadError::unknown_model(name))
    }

    /// Get a relationship, failing with `UnknownRelationship`.
    pub fn relation(&self, model: &str, relation: &str) -> LoadResult<&RelationSpec> {
        self.require_model(model)?
            .get_relation(relation)
            .ok_or_else(|| LoadError::unknown_relationship(model, relation))
    }

    /// All registered models.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSpec>> {
        self.models.values()
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    models: Vec<ModelSpec>,
}

impl SchemaBuilder {
    /// Register a model.
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    /// Validate and build the schema.
    ///
    /// Fails when a model is registered twice or a relationship targets a
    /// model that does not exist. Polymorphic targets are resolved per record
    /// at load time and are not checked here.
    pub fn build(self) -> LoadResult<Schema> {
        let mut models = IndexMap::new();
        for model in self.models {
            if models.contains_key(&model.name) {
                return Err(LoadError::schema(format!(
                    "model `{}` is registered twice",
                    model.name
                )));
            }
            models.insert(model.name.clone(), Arc::new(model));
        }

        for model in models.values() {
            for relation in model.relations() {
                if let Some(target) = relation.target() {
                    if !models.contains_key(target) {
                        return Err(LoadError::schema(format!(
                            "relationship `{}.{}` targets unknown model `{}`",
                            model.name, relation.name, target
                        )));
                    }
                }
            }
        }

        Ok(Schema { models })
    }
}
