//! Integration tests for preload plan construction and merging.

use insta::assert_snapshot;
use lookload::{PlanBuilder, PlanNode, PreloadPlan, Shape, build_plan};

fn plan(relation: &str, shape: &str) -> PreloadPlan {
    let shape = Shape::parse(shape).unwrap();
    build_plan(relation, [Some(&shape)])
}

fn samples() -> Vec<PreloadPlan> {
    vec![
        PreloadPlan::bare("comments"),
        plan("comments", "comments { author { name } }"),
        plan("comments", "comments { likes { id } body }"),
        plan("comments", "comments { author { profile { bio } } }"),
        plan("comments", "comments { author { posts { title } } likes { id } }"),
    ]
}

#[test]
fn test_merge_is_associative() {
    let plans = samples();
    for a in &plans {
        for b in &plans {
            for c in &plans {
                let left = a.clone().merge(b.clone()).merge(c.clone());
                let right = a.clone().merge(b.clone().merge(c.clone()));
                assert_eq!(left, right, "({a} + {b}) + {c}");
            }
        }
    }
}

#[test]
fn test_merge_is_commutative_and_idempotent() {
    let plans = samples();
    for a in &plans {
        assert_eq!(a.clone().merge(a.clone()), *a);
        for b in &plans {
            assert_eq!(a.clone().merge(b.clone()), b.clone().merge(a.clone()));
        }
    }
}

#[test]
fn test_bare_plan_is_absorbed() {
    let bare = PreloadPlan::bare("comments");
    for p in samples() {
        assert_eq!(bare.clone().merge(p.clone()), p);
        assert!(p.covers(&bare));
    }
}

#[test]
fn test_merged_plan_covers_its_parts() {
    let plans = samples();
    let merged = plans
        .iter()
        .cloned()
        .fold(PreloadPlan::bare("comments"), PreloadPlan::merge);
    assert!(plans.iter().all(|p| merged.covers(p)));
    assert_snapshot!(
        merged.to_string(),
        @"{comments: [{author: [posts, profile]}, likes]}"
    );
}

#[test]
fn test_many_records_fold_into_one_plan() {
    let a = Shape::parse("comments { author { name } }").unwrap();
    let b = Shape::parse("comments { body }").unwrap();
    let shapes = (0..100).map(|i| if i % 2 == 0 { Some(&a) } else { Some(&b) });

    let plan = PlanBuilder::new().build("comments", shapes.chain([None]));
    assert_snapshot!(plan.to_string(), @"{comments: [author]}");
    assert_eq!(plan.node.depth_count(), 1);
}

#[test]
fn test_cycles_collapse_to_bare() {
    let shape = Shape::parse("author { posts { author { posts { title } } } }").unwrap();
    let plan = build_plan("author", [Some(&shape)]);
    assert_snapshot!(plan.to_string(), @"{author: [{posts: [author]}]}");

    let nested = PlanBuilder::new()
        .with_ancestors(["posts"])
        .node_for("comments", &Shape::parse("comments { posts { id } }").unwrap());
    assert_eq!(nested, PlanNode::from_children([("posts", PlanNode::Bare)]));
}

#[test]
fn test_leaf_fields_never_become_relations() {
    let plan = plan("comments", "comments { id body created_at }");
    assert!(plan.node.is_bare());
    assert_snapshot!(plan.to_string(), @"comments");
}
