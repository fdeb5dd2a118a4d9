//! Error types for association loading.
//!
//! Every failure carries an [`ErrorCode`] for programmatic handling.
//! Error codes follow a pattern: L{category}{number}
//! - 1xxx: Schema and shape errors (unknown relationship, malformed shape)
//! - 2xxx: Storage errors (backend failures, cancelled loads)
//! - 3xxx: Configuration and argument errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use lookload_core::{ErrorCode, LoadError};
//!
//! let err = LoadError::unknown_relationship("Post", "authors");
//! assert_eq!(err.code(), ErrorCode::UnknownRelationship);
//! assert_eq!(err.code().code(), "L1001");
//! assert!(err.to_string().contains("authors"));
//! ```
//!
//! `LoadError` is `Clone`: a single batch failure is handed to every caller
//! suspended on that batch.

use std::fmt;

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Schema and shape errors (1xxx)
    /// Relationship not declared on the owner model (L1001).
    UnknownRelationship = 1001,
    /// Model not registered in the schema (L1002).
    UnknownModel = 1002,
    /// Shape names a non-relationship field as a relationship (L1003).
    MalformedShape = 1003,
    /// Record handle without a primary key (L1004).
    MissingIdentity = 1004,
    /// Shape text could not be parsed (L1005).
    ShapeSyntax = 1005,
    /// Schema declaration is inconsistent (L1006).
    InvalidSchema = 1006,

    // Storage errors (2xxx)
    /// Backend failure (L2001).
    Storage = 2001,
    /// Load abandoned before it completed (L2002).
    Cancelled = 2002,

    // Configuration errors (3xxx)
    /// Invalid configuration (L3001).
    InvalidConfiguration = 3001,
    /// Invalid argument (L3002).
    InvalidArgument = 3002,

    // Internal errors (9xxx)
    /// Internal error (L9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "L1001").
    pub fn code(&self) -> String {
        format!("L{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownRelationship => "Unknown relationship",
            Self::UnknownModel => "Unknown model",
            Self::MalformedShape => "Malformed shape descriptor",
            Self::MissingIdentity => "Record has no identity",
            Self::ShapeSyntax => "Shape syntax error",
            Self::InvalidSchema => "Invalid schema",
            Self::Storage => "Storage failure",
            Self::Cancelled => "Load cancelled",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::InvalidArgument => "Invalid argument",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised while planning or executing association loads.
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum LoadError {
    /// The relationship is not declared on the owner model.
    #[error("relationship `{relation}` is not declared on `{model}`")]
    #[diagnostic(
        code(lookload::unknown_relationship),
        help("declare the relationship on the model before requesting it")
    )]
    UnknownRelationship { model: SmolStr, relation: SmolStr },

    /// The model is not registered in the schema.
    #[error("model `{model}` is not registered in the schema")]
    #[diagnostic(code(lookload::unknown_model))]
    UnknownModel { model: SmolStr },

    /// A shape node with sub-selections does not name a relationship.
    #[error("malformed shape: `{model}.{field}` has sub-selections but is not a relationship")]
    #[diagnostic(code(lookload::malformed_shape))]
    MalformedShape { model: SmolStr, field: SmolStr },

    /// The record has no primary key value.
    #[error("record of `{model}` has no identity")]
    #[diagnostic(code(lookload::missing_identity))]
    MissingIdentity { model: SmolStr },

    /// The shape text could not be parsed.
    #[error("invalid shape syntax: {message}")]
    #[diagnostic(code(lookload::shape_syntax))]
    ShapeSyntax { message: String },

    /// The schema declaration is inconsistent.
    #[error("invalid schema: {message}")]
    #[diagnostic(code(lookload::invalid_schema))]
    Schema { message: String },

    /// The storage collaborator failed.
    #[error("storage error{}: {message}", on_model(.model))]
    #[diagnostic(code(lookload::storage))]
    Storage {
        model: Option<SmolStr>,
        message: String,
    },

    /// The load was abandoned before it completed.
    #[error("load was cancelled before completion")]
    #[diagnostic(code(lookload::cancelled))]
    Cancelled,

    /// An argument was rejected.
    #[error("invalid argument `{name}`: {message}")]
    #[diagnostic(code(lookload::invalid_argument))]
    InvalidArgument { name: SmolStr, message: String },

    /// The configuration was rejected.
    #[error("configuration error: {message}")]
    #[diagnostic(code(lookload::config))]
    Config { message: String },

    /// Internal invariant violated.
    #[error("internal error: {message}")]
    #[diagnostic(code(lookload::internal))]
    Internal { message: String },
}

fn on_model(model: &Option<SmolStr>) -> String {
    model
        .as_ref()
        .map(|m| format!(" on `{}`", m))
        .unwrap_or_default()
}

impl LoadError {
    /// Create an unknown relationship error.
    pub fn unknown_relationship(model: impl Into<SmolStr>, relation: impl Into<SmolStr>) -> Self {
        Self::UnknownRelationship {
            model: model.into(),
            relation: relation.into(),
        }
    }

    /// Create an unknown model error.
    pub fn unknown_model(model: impl Into<SmolStr>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    /// Create a malformed shape error.
    pub fn malformed_shape(model: impl Into<SmolStr>, field: impl Into<SmolStr>) -> Self {
        Self::MalformedShape {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Create a missing identity error.
    pub fn missing_identity(model: impl Into<SmolStr>) -> Self {
        Self::MissingIdentity {
            model: model.into(),
        }
    }

    /// Create a storage error without a model.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            model: None,
            message: message.into(),
        }
    }

    /// Create a storage error attributed to a model.
    pub fn storage_on(model: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self::Storage {
            model: Some(model.into()),
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(name: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownRelationship { .. } => ErrorCode::UnknownRelationship,
            Self::UnknownModel { .. } => ErrorCode::UnknownModel,
            Self::MalformedShape { .. } => ErrorCode::MalformedShape,
            Self::MissingIdentity { .. } => ErrorCode::MissingIdentity,
            Self::ShapeSyntax { .. } => ErrorCode::ShapeSyntax,
            Self::Schema { .. } => ErrorCode::InvalidSchema,
            Self::Storage { .. } => ErrorCode::Storage,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Config { .. } => ErrorCode::InvalidConfiguration,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Check if this is a storage failure.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Check if this error is a programmer or schema error.
    ///
    /// These abort the root query and are never worth retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownRelationship { .. }
                | Self::UnknownModel { .. }
                | Self::MalformedShape { .. }
                | Self::MissingIdentity { .. }
                | Self::Schema { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::UnknownRelationship.code(), "L1001");
        assert_eq!(ErrorCode::Storage.code(), "L2001");
        assert_eq!(ErrorCode::InvalidConfiguration.code(), "L3001");
    }

    #[test]
    fn test_unknown_relationship_names_both_sides() {
        let err = LoadError::unknown_relationship("Comment", "reactions");
        let message = err.to_string();
        assert!(message.contains("Comment"));
        assert!(message.contains("reactions"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_storage_error_display() {
        let err = LoadError::storage_on("Post", "connection reset");
        assert_eq!(err.to_string(), "storage error on `Post`: connection reset");
        assert!(err.is_storage());
        assert!(!err.is_fatal());

        let err = LoadError::storage("timeout");
        assert_eq!(err.to_string(), "storage error: timeout");
    }

    #[test]
    fn test_error_codes_match_variants() {
        assert_eq!(LoadError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            LoadError::malformed_shape("Profile", "bio").code(),
            ErrorCode::MalformedShape
        );
        assert_eq!(
            LoadError::config("bad").code().description(),
            "Invalid configuration"
        );
    }
}
