//! Association field resolution behind a feature flag.
//!
//! An [`AssociationField`] is the call site a schema field delegates to. With
//! its flag enabled (the default for [`ASSOCIATION_LOADER_FLAG`]) the field
//! goes through the batched loader and yields a deferred handle. With the
//! flag disabled it falls back to loading the relationship for the single
//! record right away, one storage call per record.

use futures::future::BoxFuture;
use smol_str::SmolStr;
use tracing::debug;

use crate::config::{ASSOCIATION_LOADER_FLAG, FeatureFlags};
use crate::error::LoadResult;
use crate::handle::LoadHandle;
use crate::plan::PreloadPlan;
use crate::record::{RecordRef, RelationValue};
use crate::scheduler::Loader;
use crate::shape::Shape;
use crate::storage::Storage;

/// Outcome of resolving an association field.
#[derive(Debug)]
pub enum FieldResolution {
    /// Resolves at the loader's next flush.
    Deferred(LoadHandle),
    /// Already loaded.
    Ready(RelationValue),
}

impl FieldResolution {
    /// Check if the value is available without a flush.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Wait for the value.
    pub fn value(self) -> BoxFuture<'static, LoadResult<RelationValue>> {
        Box::pin(async move {
            match self {
                Self::Deferred(handle) => handle.wait().await,
                Self::Ready(value) => Ok(value),
            }
        })
    }
}

/// A relationship-valued field of a schema type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationField {
    name: SmolStr,
    flag: Option<SmolStr>,
}

impl AssociationField {
    /// Field routed through the loader while `association_loader` is enabled.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            flag: Some(SmolStr::new(ASSOCIATION_LOADER_FLAG)),
        }
    }

    /// Field always routed through the loader.
    pub fn always_batched(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            flag: None,
        }
    }

    /// Use a different flag.
    pub fn flag(mut self, flag: impl Into<SmolStr>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    /// Relationship name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this field goes through the loader under `flags`.
    pub fn is_batched(&self, flags: &FeatureFlags) -> bool {
        self.flag.as_deref().is_none_or(|flag| flags.enabled(flag))
    }

    /// Resolve the field for `record`.
    pub async fn resolve<S: Storage>(
        &self,
        loader: &Loader<S>,
        flags: &FeatureFlags,
        record: &RecordRef,
        shape: Option<&Shape>,
    ) -> LoadResult<FieldResolution> {
        if self.is_batched(flags) {
            return loader
                .request(record, &self.name, shape)
                .map(FieldResolution::Deferred);
        }

        let relation = loader.schema().relation(record.model(), &self.name)?;
        if let Some(value) = record.relation(&self.name) {
            return Ok(FieldResolution::Ready(value));
        }

        debug!(record = %record.describe(), field = %self.name, "loading association without batching");
        loader
            .storage()
            .eager_load(std::slice::from_ref(record), &PreloadPlan::bare(self.name.clone()))
            .await?;
        let value = record
            .relation(&self.name)
            .unwrap_or_else(|| RelationValue::empty(relation.is_many()));
        Ok(FieldResolution::Ready(value))
    }
}
