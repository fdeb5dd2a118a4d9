//! SQLite row source for lookload.
//!
//! [`SqliteSource`] answers the flat row queries a
//! [`Preloader`](lookload_core::Preloader) issues, rendering them as
//! parameterized SQL and running them through `tokio-rusqlite`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lookload_core::{Loader, Preloader};
//! use lookload_sqlite::SqliteSource;
//!
//! let source = SqliteSource::from_url("sqlite://./blog.db").await?;
//! let loader = Loader::new(schema.clone(), Preloader::new(schema, source));
//! ```

pub mod config;
pub mod error;
pub mod source;
pub mod sql;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig};
pub use error::{SqliteError, SqliteResult};
pub use source::SqliteSource;
pub use sql::Statement;
