//! Batched loading against a real SQLite database.

use std::sync::Arc;

use lookload_core::{
    ConnectionArgs, Filter, Loader, ModelSpec, OrderBy, Preloader, RecordRef, RelationQuery,
    RelationSpec, Schema, Scope, Shape, Storage, Value,
};
use lookload_sqlite::SqliteSource;
use pretty_assertions::assert_eq;

const SEED: &str = "
CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
CREATE TABLE comments (
    id INTEGER PRIMARY KEY,
    post_id INTEGER NOT NULL REFERENCES posts(id),
    author_id INTEGER REFERENCES authors(id),
    body TEXT,
    spam INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE activities (id INTEGER PRIMARY KEY, subject_id INTEGER, subject_type TEXT);

INSERT INTO authors (id, name) VALUES (1, 'Ada'), (2, 'Grace');
INSERT INTO posts (id, title) VALUES (1, 'Batching'), (2, 'Lookahead'), (3, 'Quiet');
INSERT INTO comments (id, post_id, author_id, body, spam) VALUES
    (1, 1, 1, 'one', 0),
    (2, 1, 2, 'two', 0),
    (3, 1, 1, 'cheap pills', 1),
    (4, 1, 2, 'four', 0),
    (5, 1, 1, 'five', 0),
    (6, 1, 2, 'six', 0),
    (7, 2, 1, 'seven', 0);
INSERT INTO activities (id, subject_id, subject_type) VALUES
    (1, 1, 'Post'), (2, 2, 'Comment'), (3, 2, 'Post'), (4, 7, 'Comment');
";

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .model(ModelSpec::new("Author", "authors"))
            .model(
                ModelSpec::new("Post", "posts")
                    .relation(RelationSpec::has_many("comments", "Comment", "post_id")),
            )
            .model(
                ModelSpec::new("Comment", "comments")
                    .relation(RelationSpec::belongs_to("author", "Author", "author_id"))
                    .relation(RelationSpec::belongs_to("post", "Post", "post_id")),
            )
            .model(
                ModelSpec::new("Activity", "activities")
                    .relation(RelationSpec::polymorphic("subject", "subject_id", "subject_type")),
            )
            .build()
            .unwrap(),
    )
}

async fn setup() -> (Loader<Preloader<Arc<SqliteSource>>>, Arc<SqliteSource>) {
    let source = Arc::new(SqliteSource::memory().await.unwrap());
    source.execute_batch(SEED).await.unwrap();
    let schema = schema();
    let loader = Loader::new(schema.clone(), Preloader::new(schema, source.clone()));
    (loader, source)
}

async fn roots(loader: &Loader<Preloader<Arc<SqliteSource>>>, model: &str) -> Vec<RecordRef> {
    let query = RelationQuery::new(model).order_by(OrderBy::asc("id"));
    loader.storage().execute(&query).await.unwrap()
}

#[tokio::test]
async fn test_one_select_per_table() {
    let (loader, source) = setup().await;
    let posts = roots(&loader, "Post").await;
    source.clear_statements();

    let shape = Shape::parse("comments { body author { name } }").unwrap();
    let handles: Vec<_> = posts
        .iter()
        .map(|post| loader.request(post, "comments", Some(&shape)).unwrap())
        .collect();
    loader.flush().await;

    let mut counts = Vec::new();
    for handle in handles {
        let comments = handle.wait().await.unwrap();
        assert!(comments.records().all(|c| c.is_loaded("author")));
        counts.push(comments.len());
    }
    assert_eq!(counts, vec![6, 1, 0]);
    assert_eq!(source.select_count("comments"), 1);
    assert_eq!(source.select_count("authors"), 1);
    assert_eq!(source.statements().len(), 2);
}

#[tokio::test]
async fn test_polymorphic_subjects_one_select_per_type() {
    let (loader, source) = setup().await;
    let activities = roots(&loader, "Activity").await;
    source.clear_statements();

    let handles: Vec<_> = activities
        .iter()
        .map(|activity| loader.request(activity, "subject", None).unwrap())
        .collect();
    loader.flush().await;

    let mut subjects = Vec::new();
    for handle in handles {
        let value = handle.wait().await.unwrap();
        let subject = value.as_one().unwrap();
        subjects.push(format!("{}#{}", subject.model(), subject.id().unwrap()));
    }
    assert_eq!(subjects, vec!["Post#1", "Comment#2", "Post#2", "Comment#7"]);
    assert_eq!(source.select_count("posts"), 1);
    assert_eq!(source.select_count("comments"), 1);
}

#[tokio::test]
async fn test_scoped_connection_pages_in_sql() {
    let (loader, source) = setup().await;
    let posts = roots(&loader, "Post").await;
    source.clear_statements();

    let not_spam = Scope::new("not_spam", |query: RelationQuery| {
        query.filter(Filter::equals("spam", Value::Bool(false)))
    });
    let page = loader
        .load_connection(
            &posts[0],
            "comments",
            not_spam.clone(),
            ConnectionArgs::new().first(2),
        )
        .await
        .unwrap();

    assert_eq!(page.total_count, 5);
    assert_eq!(page.edges.len(), 2);
    assert!(page.page_info.has_next_page);
    assert!(!page.page_info.has_previous_page);
    let bodies: Vec<_> = page
        .nodes()
        .iter()
        .map(|c| c.get("body").cloned().unwrap())
        .collect();
    assert_eq!(bodies, vec![Value::from("one"), Value::from("two")]);

    let empty = loader
        .load_connection(&posts[2], "comments", not_spam, ConnectionArgs::new().first(2))
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.total_count, 0);
    assert!(!empty.page_info.has_next_page);
}

#[tokio::test]
async fn test_storage_failure_reaches_waiters() {
    let (loader, source) = setup().await;
    let posts = roots(&loader, "Post").await;
    source.execute_batch("DROP TABLE comments;").await.unwrap();

    let handle = loader.request(&posts[0], "comments", None).unwrap();
    let report = loader.flush().await;
    assert!(report.has_failures());
    assert!(handle.wait().await.unwrap_err().is_storage());
}
