//! Integration tests for loader configuration and flag-driven field routing.

use std::io::Write;
use std::sync::Arc;

use lookload::{
    ASSOCIATION_LOADER_FLAG, AssociationField, ErrorCode, Loader, LoaderConfig, MemoryStore,
    ModelSpec, Preloader, Record, RelationSpec, Schema,
};

fn loader(config: LoaderConfig) -> (Loader<Preloader<Arc<MemoryStore>>>, Arc<MemoryStore>) {
    let schema = Arc::new(
        Schema::builder()
            .model(
                ModelSpec::new("Comment", "comments")
                    .relation(RelationSpec::belongs_to("author", "Author", "author_id")),
            )
            .model(ModelSpec::new("Author", "authors"))
            .build()
            .unwrap(),
    );
    let store = Arc::new(MemoryStore::new());
    for id in 1..=4 {
        store.insert(Record::new("Author", id).with_field("name", format!("author {id}")));
    }
    let loader = Loader::new(schema.clone(), Preloader::new(schema, store.clone())).with_config(config);
    (loader, store)
}

/// Test loading configuration from a file
#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        max_batch_size = 2

        [flags]
        association_loader = false
        "#
    )
    .unwrap();

    let config = LoaderConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_batch_size, 2);
    assert!(!config.flags.enabled(ASSOCIATION_LOADER_FLAG));
}

/// Test that a missing file is a configuration error
#[test]
fn test_config_missing_file() {
    let err = LoaderConfig::from_file("/nonexistent/lookload.toml").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

/// Test that unknown keys are rejected
#[test]
fn test_config_unknown_key() {
    let err = LoaderConfig::from_toml_str("max_batch = 10").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

/// Test that configuration round-trips through TOML
#[test]
fn test_config_serializes() {
    let config = LoaderConfig::new().max_batch_size(64).flag("beta", true);
    let text = toml::to_string(&config).unwrap();
    assert_eq!(LoaderConfig::from_toml_str(&text).unwrap(), config);
}

#[tokio::test]
async fn test_max_batch_size_splits_storage_calls() {
    let (loader, store) = loader(LoaderConfig::new().max_batch_size(2));
    let comments: Vec<_> = (1..=4)
        .map(|id| Record::new("Comment", id).with_field("author_id", id).into_ref())
        .collect();

    let handles: Vec<_> = comments
        .iter()
        .map(|c| loader.request(c, "author", None).unwrap())
        .collect();
    let report = loader.flush().await;

    assert_eq!(report.batches, 1);
    assert_eq!(report.chunks, 2);
    assert_eq!(store.select_count("Author"), 2);
    for handle in handles {
        assert_eq!(handle.wait().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_flag_from_config_routes_fields() {
    let field = AssociationField::new("author");
    let comments: Vec<_> = (1..=4)
        .map(|id| Record::new("Comment", id).with_field("author_id", id).into_ref())
        .collect();

    let (batched, store) = loader(LoaderConfig::default());
    let flags = batched.config().flags.clone();
    let mut pending = Vec::new();
    for comment in &comments {
        pending.push(field.resolve(&batched, &flags, comment, None).await.unwrap());
    }
    batched.flush().await;
    for resolution in pending {
        assert_eq!(resolution.value().await.unwrap().len(), 1);
    }
    assert_eq!(store.select_count("Author"), 1);

    let (naive, store) = loader(LoaderConfig::new().flag(ASSOCIATION_LOADER_FLAG, false));
    let flags = naive.config().flags.clone();
    for comment in &comments {
        let fresh = Record::new("Comment", comment.id().cloned().unwrap())
            .with_field("author_id", comment.get("author_id").cloned().unwrap())
            .into_ref();
        let resolution = field.resolve(&naive, &flags, &fresh, None).await.unwrap();
        assert!(!resolution.is_deferred());
    }
    assert_eq!(store.select_count("Author"), 4);
}
