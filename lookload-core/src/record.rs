//! Record handles and their relationship slots.
//!
//! A [`Record`] is owned by the query executor and shared with the loader as
//! a [`RecordRef`]. The loader never creates or drops executor records; it
//! only fills their relationship slots. A slot is in one of three states:
//!
//! - unpopulated: [`Record::relation`] returns `None`
//! - populated-empty: `Some(RelationValue::One(None))` or `Some(RelationValue::Many(vec![]))`
//! - populated: the related record(s)
//!
//! ```rust
//! use lookload_core::{Record, RelationValue};
//!
//! let post = Record::new("Post", 1).with_field("title", "GraphQL Rocks").into_ref();
//! assert!(!post.is_loaded("comments"));
//!
//! post.set_relation("comments", RelationValue::Many(Vec::new()));
//! assert!(post.is_loaded("comments"));
//! assert!(post.relation("comments").unwrap().is_empty());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::value::{RecordId, Value};

/// Shared handle to a record.
pub type RecordRef = Arc<Record>;

/// Identity of a record across models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Model name.
    pub model: SmolStr,
    /// Primary key.
    pub id: RecordId,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model, self.id)
    }
}

/// Value held by a populated relationship slot.
#[derive(Clone)]
pub enum RelationValue {
    /// To-one relationship; `None` when the target does not exist.
    One(Option<RecordRef>),
    /// To-many relationship.
    Many(Vec<RecordRef>),
}

impl RelationValue {
    /// Empty value of the right arity.
    pub fn empty(many: bool) -> Self {
        if many {
            Self::Many(Vec::new())
        } else {
            Self::One(None)
        }
    }

    /// Check if no related record is present.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(one) => one.is_none(),
            Self::Many(many) => many.is_empty(),
        }
    }

    /// Number of related records.
    pub fn len(&self) -> usize {
        match self {
            Self::One(one) => usize::from(one.is_some()),
            Self::Many(many) => many.len(),
        }
    }

    /// Get the related record of a to-one value.
    pub fn as_one(&self) -> Option<&RecordRef> {
        match self {
            Self::One(one) => one.as_ref(),
            Self::Many(_) => None,
        }
    }

    /// Get the related records of a to-many value.
    pub fn as_many(&self) -> &[RecordRef] {
        match self {
            Self::One(_) => &[],
            Self::Many(many) => many,
        }
    }

    /// Iterate the related records regardless of arity.
    pub fn records(&self) -> impl Iterator<Item = &RecordRef> {
        let slice: &[RecordRef] = match self {
            Self::One(Some(one)) => std::slice::from_ref(one),
            Self::One(None) => &[],
            Self::Many(many) => many,
        };
        slice.iter()
    }
}

impl fmt::Debug for RelationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print keys only; relationship graphs may be cyclic.
        match self {
            Self::One(None) => write!(f, "One(None)"),
            Self::One(Some(r)) => write!(f, "One({})", r.describe()),
            Self::Many(many) => f
                .debug_tuple("Many")
                .field(&many.iter().map(|r| r.describe()).collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// One row of a relational entity.
pub struct Record {
    model: SmolStr,
    id: Option<RecordId>,
    fields: IndexMap<SmolStr, Value>,
    relations: RwLock<HashMap<SmolStr, RelationValue>>,
}

impl Record {
    /// Create a record with an identity.
    pub fn new(model: impl Into<SmolStr>, id: impl Into<RecordId>) -> Self {
        Self {
            model: model.into(),
            id: Some(id.into()),
            fields: IndexMap::new(),
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Create a record that has not been persisted yet.
    pub fn transient(model: impl Into<SmolStr>) -> Self {
        Self {
            model: model.into(),
            id: None,
            fields: IndexMap::new(),
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Build a record from a storage row, reading the identity from `primary_key`.
    pub fn from_row(
        model: impl Into<SmolStr>,
        primary_key: &str,
        fields: IndexMap<SmolStr, Value>,
    ) -> Self {
        let id = fields.get(primary_key).and_then(Value::as_id);
        Self {
            model: model.into(),
            id,
            fields,
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Set a scalar field.
    pub fn with_field(mut self, name: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> RecordRef {
        Arc::new(self)
    }

    /// Model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Primary key, if the record has one.
    pub fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    /// Model-qualified identity.
    pub fn key(&self) -> Option<RecordKey> {
        self.id.as_ref().map(|id| RecordKey {
            model: self.model.clone(),
            id: id.clone(),
        })
    }

    /// Read a scalar field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All scalar fields in column order.
    pub fn fields(&self) -> &IndexMap<SmolStr, Value> {
        &self.fields
    }

    /// Read a relationship slot; `None` while unpopulated.
    pub fn relation(&self, name: &str) -> Option<RelationValue> {
        self.relations.read().get(name).cloned()
    }

    /// Check if a relationship slot is populated.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.relations.read().contains_key(name)
    }

    /// Populate a relationship slot.
    pub fn set_relation(&self, name: impl Into<SmolStr>, value: RelationValue) {
        self.relations.write().insert(name.into(), value);
    }

    /// Names of the populated relationship slots.
    pub fn loaded_relations(&self) -> Vec<SmolStr> {
        let mut names: Vec<_> = self.relations.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Short `Model#id` description for logs.
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("{}#{}", self.model, id),
            None => format!("{}#<new>", self.model),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("loaded", &self.loaded_relations())
            .finish()
    }
}
