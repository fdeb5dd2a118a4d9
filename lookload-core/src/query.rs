//! Row-source queries: filters, ordering and limits.
//!
//! A [`RelationQuery`] is the backend-neutral description of "rows of one
//! model matching these conditions". The preloader builds them for batched
//! `IN (...)` loads, connection scopes refine them, and each [`RowSource`]
//! turns them into its own dialect.
//!
//! ```rust
//! use lookload_core::{Filter, OrderBy, RelationQuery, Value};
//!
//! let query = RelationQuery::new("Comment")
//!     .filter(Filter::in_list("post_id", vec![Value::Int(1), Value::Int(2)]))
//!     .filter(Filter::equals("spam", false))
//!     .order_by(OrderBy::desc("created_at"))
//!     .limit(2);
//!
//! assert_eq!(query.filters.len(), 2);
//! assert_eq!(query.limit, Some(2));
//! ```
//!
//! [`RowSource`]: crate::RowSource

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::Value;

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order (A-Z, 0-9, oldest first).
    #[default]
    Asc,
    /// Descending order (Z-A, 9-0, newest first).
    Desc,
}

impl SortOrder {
    /// Get the SQL keyword for this sort order.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Ordering on a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column name.
    pub column: SmolStr,
    /// Sort order.
    pub order: SortOrder,
}

impl OrderBy {
    /// Create a new order by column.
    pub fn new(column: impl Into<SmolStr>, order: SortOrder) -> Self {
        Self {
            column: column.into(),
            order,
        }
    }

    /// Ascending order on a column.
    pub fn asc(column: impl Into<SmolStr>) -> Self {
        Self::new(column, SortOrder::Asc)
    }

    /// Descending order on a column.
    pub fn desc(column: impl Into<SmolStr>) -> Self {
        Self::new(column, SortOrder::Desc)
    }

    /// Generate the SQL fragment (e.g., `created_at DESC`).
    pub fn to_sql(&self) -> String {
        format!("{} {}", self.column, self.order.as_sql())
    }
}

/// A filter condition on one model's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals value.
    Equals(SmolStr, Value),
    /// Column does not equal value.
    NotEquals(SmolStr, Value),
    /// Column is one of the values.
    In(SmolStr, Vec<Value>),
    /// Column is null.
    IsNull(SmolStr),
    /// Column is not null.
    IsNotNull(SmolStr),
    /// All conditions hold.
    And(Vec<Filter>),
}

impl Filter {
    /// Create an equals filter.
    pub fn equals(column: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        Self::Equals(column.into(), value.into())
    }

    /// Create a not-equals filter.
    pub fn not_equals(column: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        Self::NotEquals(column.into(), value.into())
    }

    /// Create an IN filter.
    pub fn in_list(column: impl Into<SmolStr>, values: Vec<Value>) -> Self {
        Self::In(column.into(), values)
    }

    /// Create an IS NULL filter.
    pub fn is_null(column: impl Into<SmolStr>) -> Self {
        Self::IsNull(column.into())
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(column: impl Into<SmolStr>) -> Self {
        Self::IsNotNull(column.into())
    }

    /// Combine filters with AND.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Evaluate the filter against a row.
    ///
    /// Missing columns read as null. Null compares unequal to everything,
    /// including through `NotEquals`, matching SQL three-valued logic.
    pub fn matches(&self, row: &IndexMap<SmolStr, Value>) -> bool {
        let column = |name: &str| row.get(name).unwrap_or(&Value::Null);
        match self {
            Self::Equals(name, value) => column(name).loose_eq(value),
            Self::NotEquals(name, value) => {
                let current = column(name);
                !current.is_null() && !value.is_null() && !current.loose_eq(value)
            }
            Self::In(name, values) => {
                let current = column(name);
                values.iter().any(|v| current.loose_eq(v))
            }
            Self::IsNull(name) => column(name).is_null(),
            Self::IsNotNull(name) => !column(name).is_null(),
            Self::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

/// Query for rows of one model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelationQuery {
    /// Model whose rows are selected.
    pub model: SmolStr,
    /// Conditions, all of which must hold.
    pub filters: Vec<Filter>,
    /// Ordering, applied in sequence.
    pub order_by: Vec<OrderBy>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Number of rows to skip.
    pub offset: Option<u64>,
}

impl RelationQuery {
    /// Create a query selecting every row of a model.
    pub fn new(model: impl Into<SmolStr>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Add a condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an ordering column.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Add several ordering columns.
    pub fn order_by_all(mut self, orders: impl IntoIterator<Item = OrderBy>) -> Self {
        self.order_by.extend(orders);
        self
    }

    /// Limit the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check if any ordering is set.
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Query without limit and offset, for counting.
    pub fn unpaged(&self) -> Self {
        Self {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    /// Check if a row satisfies every condition.
    pub fn matches(&self, row: &IndexMap<SmolStr, Value>) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Compare two rows under this query's ordering.
    pub fn compare(&self, a: &IndexMap<SmolStr, Value>, b: &IndexMap<SmolStr, Value>) -> Ordering {
        for order in &self.order_by {
            let left = a.get(order.column.as_str()).unwrap_or(&Value::Null);
            let right = b.get(order.column.as_str()).unwrap_or(&Value::Null);
            let ord = left.loose_cmp(right).unwrap_or(Ordering::Equal);
            let ord = match order.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
