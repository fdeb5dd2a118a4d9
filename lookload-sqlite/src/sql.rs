//! SQL rendering for relation queries.

use lookload_core::{Filter, RelationQuery};
use rusqlite::types::Value as SqlValue;

use crate::types::to_sqlite;

/// A statement with `?` placeholders and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

/// Quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render `SELECT *` for a query against `table`.
pub fn select(table: &str, query: &RelationQuery) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    push_where(&mut sql, &mut params, &query.filters);

    if !query.order_by.is_empty() {
        let order: Vec<String> = query
            .order_by
            .iter()
            .map(|o| format!("{} {}", quote_ident(&o.column), o.order.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    match (query.limit, query.offset) {
        (None, None) => {}
        (limit, offset) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(limit.map_or(-1, clamp)));
            params.push(SqlValue::Integer(offset.map_or(0, clamp)));
        }
    }

    Statement { sql, params }
}

/// Render `SELECT COUNT(*)`, ignoring limit and offset.
pub fn count(table: &str, query: &RelationQuery) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    push_where(&mut sql, &mut params, &query.filters);
    Statement { sql, params }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn push_where(sql: &mut String, params: &mut Vec<SqlValue>, filters: &[Filter]) {
    if filters.is_empty() {
        return;
    }
    let conditions: Vec<String> = filters.iter().map(|f| render(f, params)).collect();
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
}

fn render(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    match filter {
        Filter::Equals(column, value) => {
            params.push(to_sqlite(value));
            format!("{} = ?", quote_ident(column))
        }
        Filter::NotEquals(column, value) => {
            params.push(to_sqlite(value));
            format!("{} <> ?", quote_ident(column))
        }
        // An empty list matches nothing.
        Filter::In(_, values) if values.is_empty() => "0 = 1".to_string(),
        Filter::In(column, values) => {
            params.extend(values.iter().map(to_sqlite));
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({})", quote_ident(column), placeholders)
        }
        Filter::IsNull(column) => format!("{} IS NULL", quote_ident(column)),
        Filter::IsNotNull(column) => format!("{} IS NOT NULL", quote_ident(column)),
        Filter::And(filters) if filters.is_empty() => "1 = 1".to_string(),
        Filter::And(filters) => {
            let parts: Vec<String> = filters.iter().map(|f| render(f, params)).collect();
            format!("({})", parts.join(" AND "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookload_core::{OrderBy, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_with_in_list() {
        let query = RelationQuery::new("Comment")
            .filter(Filter::in_list("post_id", vec![Value::Int(1), Value::Int(2)]))
            .order_by(OrderBy::asc("id"));
        let stmt = select("comments", &query);

        assert_eq!(
            stmt.sql,
            r#"SELECT * FROM "comments" WHERE "post_id" IN (?, ?) ORDER BY "id" ASC"#
        );
        assert_eq!(stmt.params, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);
    }

    #[test]
    fn test_select_paged() {
        let query = RelationQuery::new("Comment")
            .filter(Filter::equals("spam", false))
            .order_by(OrderBy::desc("created_at"))
            .offset(2);
        let stmt = select("comments", &query);

        assert_eq!(
            stmt.sql,
            r#"SELECT * FROM "comments" WHERE "spam" = ? ORDER BY "created_at" DESC LIMIT ? OFFSET ?"#
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Integer(0), SqlValue::Integer(-1), SqlValue::Integer(2)]
        );
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let query = RelationQuery::new("Author").filter(Filter::in_list("id", Vec::new()));
        assert_eq!(select("authors", &query).sql, r#"SELECT * FROM "authors" WHERE 0 = 1"#);
    }

    #[test]
    fn test_count_ignores_paging() {
        let query = RelationQuery::new("Comment")
            .filter(Filter::and(vec![
                Filter::is_not_null("body"),
                Filter::not_equals("author_id", 3),
            ]))
            .limit(2);
        let stmt = count("comments", &query);

        assert_eq!(
            stmt.sql,
            r#"SELECT COUNT(*) FROM "comments" WHERE ("body" IS NOT NULL AND "author_id" <> ?)"#
        );
        assert_eq!(stmt.params, vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
