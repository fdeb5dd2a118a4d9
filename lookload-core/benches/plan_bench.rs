//! Benchmarks for shape parsing, plan construction and batched flushes.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lookload_core::{
    Loader, MemoryStore, ModelSpec, PlanBuilder, Preloader, Record, RelationSpec, Schema, Shape,
};

const SHAPES: [&str; 4] = [
    "comments { body }",
    "comments { author { name } }",
    "comments { author { avatar { url } } likes { id } }",
    "comments { post { comments { author { name } } } }",
];

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .model(
                ModelSpec::new("Post", "posts")
                    .relation(RelationSpec::has_many("comments", "Comment", "post_id")),
            )
            .model(
                ModelSpec::new("Comment", "comments")
                    .relation(RelationSpec::belongs_to("author", "Author", "author_id"))
                    .relation(RelationSpec::belongs_to("post", "Post", "post_id")),
            )
            .model(ModelSpec::new("Author", "authors"))
            .build()
            .expect("valid schema"),
    )
}

fn bench_shape_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("shape_parse");
    for (i, text) in SHAPES.iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), text, |b, text| {
            b.iter(|| Shape::parse(black_box(text)))
        });
    }
    group.finish();
}

fn bench_plan_build(c: &mut Criterion) {
    let shapes: Vec<Shape> = SHAPES
        .iter()
        .map(|text| Shape::parse(text).expect("valid shape"))
        .collect();
    let builder = PlanBuilder::new();

    let mut group = c.benchmark_group("plan_build");
    for records in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &n| {
            b.iter(|| {
                builder.build(
                    "comments",
                    (0..n).map(|i| Some(&shapes[i % shapes.len()])),
                )
            })
        });
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let schema = schema();
    let store = Arc::new(MemoryStore::new());
    for id in 1..=50i64 {
        store.insert(Record::new("Author", id).with_field("name", format!("author {id}")));
    }
    for id in 1..=1000i64 {
        store.insert(
            Record::new("Comment", id)
                .with_field("post_id", id % 100 + 1)
                .with_field("author_id", id % 50 + 1),
        );
    }
    let shape = Shape::parse("comments { author { name } }").expect("valid shape");

    let mut group = c.benchmark_group("flush");
    for posts in [10i64, 100] {
        group.throughput(Throughput::Elements(posts as u64));
        group.bench_with_input(BenchmarkId::from_parameter(posts), &posts, |b, &n| {
            b.to_async(&runtime).iter(|| {
                let loader = Loader::new(schema.clone(), Preloader::new(schema.clone(), store.clone()));
                let shape = shape.clone();
                async move {
                    let handles: Vec<_> = (1..=n)
                        .map(|id| {
                            let post = Record::new("Post", id).into_ref();
                            loader.request(&post, "comments", Some(&shape)).expect("request")
                        })
                        .collect();
                    loader.flush().await;
                    black_box(handles)
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_shape_parse, bench_plan_build, bench_flush);
criterion_main!(benches);
