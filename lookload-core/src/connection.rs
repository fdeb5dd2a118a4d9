//! Scoped, paginated relationship connections.
//!
//! A connection request asks for one page of a record's relationship after a
//! named [`Scope`] (e.g. "not spam", "newest first") has been applied. Requests
//! are batched by `(model, relation, scope)` and flushed together with
//! association batches.
//!
//! Pagination is offset based. Cursors are opaque strings of the form
//! `cursor:<offset>`; `first`/`after` page forwards and `last`/`before` page
//! backwards within the scoped result.
//!
//! ```rust
//! use lookload_core::{decode_cursor, encode_cursor, ConnectionArgs, PageWindow};
//!
//! let args = ConnectionArgs::new().first(2);
//! let window = PageWindow::compute(&args, 5).unwrap();
//! assert_eq!((window.start, window.end), (0, 2));
//! assert!(window.has_next_page);
//! assert!(!window.has_previous_page);
//!
//! assert_eq!(encode_cursor(3), "cursor:3");
//! assert_eq!(decode_cursor("cursor:3").unwrap(), 3);
//! ```

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::query::{OrderBy, RelationQuery};
use crate::record::RecordRef;
use crate::schema::Schema;
use crate::storage::Storage;

const CURSOR_PREFIX: &str = "cursor:";

/// Encode an offset as a cursor.
pub fn encode_cursor(offset: u64) -> String {
    format!("{}{}", CURSOR_PREFIX, offset)
}

/// Decode a cursor produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> LoadResult<u64> {
    cursor
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| LoadError::invalid_argument("cursor", format!("malformed cursor `{}`", cursor)))
}

/// Named refinement of a relationship query.
#[derive(Clone)]
pub struct Scope {
    name: SmolStr,
    apply: Arc<dyn Fn(RelationQuery) -> RelationQuery + Send + Sync>,
}

impl Scope {
    /// Create a scope. Requests batch together only when their scope names match.
    pub fn new(
        name: impl Into<SmolStr>,
        apply: impl Fn(RelationQuery) -> RelationQuery + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// Scope that leaves the query unchanged.
    pub fn unscoped() -> Self {
        Self::new("unscoped", |query| query)
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the scope to a query.
    pub fn apply(&self, query: RelationQuery) -> RelationQuery {
        (self.apply)(query)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scope").field(&self.name).finish()
    }
}

/// Pagination arguments of a connection field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionArgs {
    /// Take at most this many from the start of the window.
    pub first: Option<u64>,
    /// Start after this cursor.
    pub after: Option<String>,
    /// Take at most this many from the end of the window.
    pub last: Option<u64>,
    /// End before this cursor.
    pub before: Option<String>,
}

impl ConnectionArgs {
    /// Arguments selecting everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `first`.
    pub fn first(mut self, n: u64) -> Self {
        self.first = Some(n);
        self
    }

    /// Set `after`.
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Set `last`.
    pub fn last(mut self, n: u64) -> Self {
        self.last = Some(n);
        self
    }

    /// Set `before`.
    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Resolved slice `[start, end)` of the scoped result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// First offset in the page.
    pub start: u64,
    /// One past the last offset in the page.
    pub end: u64,
    /// Rows exist after `end`.
    pub has_next_page: bool,
    /// Rows exist before `start`.
    pub has_previous_page: bool,
}

impl PageWindow {
    /// Resolve arguments against a result of `total` rows.
    pub fn compute(args: &ConnectionArgs, total: u64) -> LoadResult<Self> {
        let mut start = match &args.after {
            Some(cursor) => decode_cursor(cursor)?.saturating_add(1),
            None => 0,
        };
        let mut end = match &args.before {
            Some(cursor) => decode_cursor(cursor)?.min(total),
            None => total,
        };
        start = start.min(end);

        if let Some(first) = args.first {
            end = end.min(start.saturating_add(first));
        }
        if let Some(last) = args.last {
            start = start.max(end.saturating_sub(last));
        }

        Ok(Self {
            start,
            end,
            has_next_page: end < total,
            has_previous_page: start > 0,
        })
    }

    /// Number of rows in the page.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Check if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Pagination state of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// More rows follow the page.
    pub has_next_page: bool,
    /// Rows precede the page.
    pub has_previous_page: bool,
    /// Cursor of the first edge.
    pub start_cursor: Option<String>,
    /// Cursor of the last edge.
    pub end_cursor: Option<String>,
}

/// One row of a connection.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Position of the row.
    pub cursor: String,
    /// The row.
    pub node: RecordRef,
}

/// One page of a scoped relationship.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    /// Rows in the page.
    pub edges: Vec<Edge>,
    /// Pagination state.
    pub page_info: PageInfo,
    /// Rows in the scoped relationship across all pages.
    pub total_count: u64,
}

impl Connection {
    /// Rows in the page, without cursors.
    pub fn nodes(&self) -> Vec<RecordRef> {
        self.edges.iter().map(|e| e.node.clone()).collect()
    }

    /// Check if the page has no rows.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Key under which connection requests batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// Owner model.
    pub model: SmolStr,
    /// Relationship name.
    pub relation: SmolStr,
    /// Scope name.
    pub scope: SmolStr,
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.model, self.relation, self.scope)
    }
}

/// Load one page of `record.relation` under `scope`.
///
/// The scope's query gets a primary key order when it sets none, and its
/// limit and offset are replaced by the page window.
pub(crate) async fn load_connection<S: Storage + ?Sized>(
    schema: &Schema,
    storage: &S,
    record: &RecordRef,
    relation: &str,
    scope: &Scope,
    args: &ConnectionArgs,
) -> LoadResult<Connection> {
    let mut query = scope.apply(storage.scoped_relation(record, relation).await?);
    if !query.is_ordered() {
        let target = schema.require_model(&query.model)?;
        query = query.order_by(OrderBy::asc(target.primary_key.clone()));
    }
    let query = query.unpaged();

    let total = storage.count(&query).await?;
    let window = PageWindow::compute(args, total)?;

    let rows = if window.is_empty() {
        Vec::new()
    } else {
        storage
            .execute(&query.offset(window.start).limit(window.len()))
            .await?
    };

    debug!(
        record = %record.describe(),
        relation,
        scope = scope.name(),
        total,
        rows = rows.len(),
        "connection page loaded"
    );

    let edges: Vec<Edge> = rows
        .into_iter()
        .enumerate()
        .map(|(i, node)| Edge {
            cursor: encode_cursor(window.start + i as u64),
            node,
        })
        .collect();

    Ok(Connection {
        page_info: PageInfo {
            has_next_page: window.has_next_page,
            has_previous_page: window.has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        },
        edges,
        total_count: total,
    })
}
