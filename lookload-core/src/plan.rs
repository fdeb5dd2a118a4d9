//! Preload plans and the plan builder.
//!
//! A [`PreloadPlan`] names a relationship to load and, recursively, which
//! nested relationships to load beneath it. Plans derived from different
//! records' shapes are merged into one per batch, so a batch of posts where
//! one wants `comments { author }` and another wants `comments { likes }`
//! loads comments once with both nested relationships.
//!
//! ```rust
//! use lookload_core::{PlanBuilder, PlanNode, Shape};
//!
//! let a = Shape::parse("comments { author { name } }").unwrap();
//! let b = Shape::parse("comments { likes { id } body }").unwrap();
//!
//! let plan = PlanBuilder::new().build("comments", [Some(&a), Some(&b), None]);
//! assert_eq!(plan.to_string(), "{comments: [author, likes]}");
//! assert!(plan.node.child("author").is_some());
//! assert_eq!(plan.node.child("body"), None);
//! ```
//!
//! Merging is total and forms a join: it is associative, commutative and
//! idempotent, and a bare plan is absorbed by any plan for the same relation.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use smol_str::SmolStr;

use crate::shape::Shape;

/// What to load beneath one relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanNode {
    /// Load the relationship only.
    #[default]
    Bare,
    /// Load the relationship and these nested relationships.
    ///
    /// Never empty; see [`PlanNode::nested`].
    Nested(BTreeMap<SmolStr, PlanNode>),
}

impl PlanNode {
    /// Build a nested node, normalizing an empty map to `Bare`.
    pub fn nested(children: BTreeMap<SmolStr, PlanNode>) -> Self {
        if children.is_empty() {
            Self::Bare
        } else {
            Self::Nested(children)
        }
    }

    /// Build a nested node from `(name, node)` pairs.
    pub fn from_children(
        children: impl IntoIterator<Item = (impl Into<SmolStr>, PlanNode)>,
    ) -> Self {
        Self::nested(
            children
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        )
    }

    /// Check if nothing is loaded beneath this node.
    pub fn is_bare(&self) -> bool {
        matches!(self, Self::Bare)
    }

    /// Nested relationships in name order.
    pub fn children(&self) -> impl Iterator<Item = (&SmolStr, &PlanNode)> {
        let map = match self {
            Self::Bare => None,
            Self::Nested(map) => Some(map),
        };
        map.into_iter().flat_map(|m| m.iter())
    }

    /// Get a nested relationship.
    pub fn child(&self, name: &str) -> Option<&PlanNode> {
        match self {
            Self::Bare => None,
            Self::Nested(map) => map.get(name),
        }
    }

    /// Merge two nodes: union of nested relationships, recursively.
    pub fn merge(self, other: PlanNode) -> PlanNode {
        match (self, other) {
            (Self::Bare, other) => other,
            (this, Self::Bare) => this,
            (Self::Nested(mut left), Self::Nested(right)) => {
                for (name, node) in right {
                    let merged = match left.remove(&name) {
                        Some(existing) => existing.merge(node),
                        None => node,
                    };
                    left.insert(name, merged);
                }
                Self::Nested(left)
            }
        }
    }

    /// Check if loading `self` also loads everything `other` asks for.
    pub fn covers(&self, other: &PlanNode) -> bool {
        match (self, other) {
            (_, Self::Bare) => true,
            (Self::Bare, Self::Nested(_)) => false,
            (Self::Nested(mine), Self::Nested(theirs)) => theirs
                .iter()
                .all(|(name, node)| mine.get(name).is_some_and(|m| m.covers(node))),
        }
    }

    /// Number of relationships loaded beneath this node, at every depth.
    pub fn depth_count(&self) -> usize {
        self.children().map(|(_, n)| 1 + n.depth_count()).sum()
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare => Ok(()),
            Self::Nested(map) => {
                write!(f, "[")?;
                for (i, (name, node)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if node.is_bare() {
                        write!(f, "{}", name)?;
                    } else {
                        write!(f, "{{{}: {}}}", name, node)?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// A relationship to load plus what to load beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreloadPlan {
    /// Relationship name.
    pub relation: SmolStr,
    /// Nested relationships.
    pub node: PlanNode,
}

impl PreloadPlan {
    /// Create a plan.
    pub fn new(relation: impl Into<SmolStr>, node: PlanNode) -> Self {
        Self {
            relation: relation.into(),
            node,
        }
    }

    /// Create a plan with nothing nested.
    pub fn bare(relation: impl Into<SmolStr>) -> Self {
        Self::new(relation, PlanNode::Bare)
    }

    /// Merge two plans for the same relationship.
    ///
    /// Plans for different relationships are not comparable; the receiver's
    /// relation name is kept.
    pub fn merge(self, other: PreloadPlan) -> PreloadPlan {
        debug_assert_eq!(self.relation, other.relation);
        Self {
            relation: self.relation,
            node: self.node.merge(other.node),
        }
    }

    /// Check if loading `self` also loads everything `other` asks for.
    pub fn covers(&self, other: &PreloadPlan) -> bool {
        self.relation == other.relation && self.node.covers(&other.node)
    }

    /// Plan for a nested relationship of this plan.
    pub fn child(&self, name: &str) -> Option<PreloadPlan> {
        self.node
            .child(name)
            .map(|node| PreloadPlan::new(name, node.clone()))
    }
}

impl fmt::Display for PreloadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.node.is_bare() {
            write!(f, "{}", self.relation)
        } else {
            write!(f, "{{{}: {}}}", self.relation, self.node)
        }
    }
}

/// Exact key under which a fetch is recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanSignature {
    /// Owner model.
    pub owner: SmolStr,
    /// Plan fetched for the owner's records.
    pub plan: PreloadPlan,
}

impl PlanSignature {
    /// Create a signature.
    pub fn new(owner: impl Into<SmolStr>, plan: PreloadPlan) -> Self {
        Self {
            owner: owner.into(),
            plan,
        }
    }
}

impl fmt::Display for PlanSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.plan)
    }
}

/// Turns shape descriptors into preload plans.
///
/// A child shape is treated as a nested relationship if and only if it has
/// sub-selections of its own; leaves are scalar fields and never loaded.
/// Relationship names already on the current path resolve to a bare node,
/// which cuts cycles such as `author { posts { author { ... } } }`.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    ancestors: HashSet<SmolStr>,
}

impl PlanBuilder {
    /// Create a builder with an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the path with relationships loaded above the request.
    pub fn with_ancestors(mut self, names: impl IntoIterator<Item = impl Into<SmolStr>>) -> Self {
        self.ancestors.extend(names.into_iter().map(Into::into));
        self
    }

    /// Build the merged plan for `relation` from every requesting record's shape.
    ///
    /// `None` shapes (no lookahead available) are skipped; if every shape is
    /// `None` the plan is bare.
    pub fn build<'a>(
        &self,
        relation: &str,
        shapes: impl IntoIterator<Item = Option<&'a Shape>>,
    ) -> PreloadPlan {
        let node = shapes
            .into_iter()
            .flatten()
            .map(|shape| self.node_for(relation, shape))
            .fold(PlanNode::Bare, PlanNode::merge);
        PreloadPlan::new(relation, node)
    }

    /// Build the plan node for one record's shape of `relation`.
    pub fn node_for(&self, relation: &str, shape: &Shape) -> PlanNode {
        let mut path = self.ancestors.clone();
        path.insert(SmolStr::new(relation));
        Self::walk(shape, &mut path)
    }

    fn walk(shape: &Shape, path: &mut HashSet<SmolStr>) -> PlanNode {
        let mut children = BTreeMap::new();
        for child in shape.children() {
            if child.is_leaf() {
                continue;
            }
            let name = SmolStr::new(child.name());
            let node = if path.contains(&name) {
                PlanNode::Bare
            } else {
                path.insert(name.clone());
                let node = Self::walk(child, path);
                path.remove(&name);
                node
            };
            let merged = match children.remove(&name) {
                Some(existing) => PlanNode::merge(existing, node),
                None => node,
            };
            children.insert(name, merged);
        }
        PlanNode::nested(children)
    }
}

/// Build a plan with an empty ancestor path.
pub fn build_plan<'a>(
    relation: &str,
    shapes: impl IntoIterator<Item = Option<&'a Shape>>,
) -> PreloadPlan {
    PlanBuilder::new().build(relation, shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shape(text: &str) -> Shape {
        Shape::parse(text).unwrap()
    }

    fn node(text: &str) -> PlanNode {
        let shape = shape(text);
        PlanBuilder::new().node_for(shape.name(), &shape)
    }

    #[test]
    fn test_leaf_only_shape_is_bare() {
        let plan = build_plan("author", [Some(&shape("author { name bio }"))]);
        assert_eq!(plan, PreloadPlan::bare("author"));
    }

    #[test]
    fn test_all_nil_shapes_give_bare_plan() {
        assert_eq!(build_plan("comments", [None, None]), PreloadPlan::bare("comments"));
        assert_eq!(
            build_plan("comments", std::iter::empty()),
            PreloadPlan::bare("comments")
        );
    }

    #[test]
    fn test_nested_relationships_detected_by_children() {
        let n = node("comments { body author { name profile { bio } } likes { id } }");
        let expected = PlanNode::from_children([
            (
                "author",
                PlanNode::from_children([("profile", PlanNode::Bare)]),
            ),
            ("likes", PlanNode::Bare),
        ]);
        assert_eq!(n, expected);
    }

    #[test]
    fn test_cycle_resolves_to_bare() {
        let n = node("author { posts { author { posts { title } } } }");
        // `author` is already on the path below `author`, so the recursion stops there.
        let expected = PlanNode::from_children([(
            "posts",
            PlanNode::from_children([("author", PlanNode::Bare)]),
        )]);
        assert_eq!(n, expected);
    }

    #[test]
    fn test_ancestors_cut_recursion() {
        let s = shape("comments { post { title } author { name } }");
        let n = PlanBuilder::new()
            .with_ancestors(["post"])
            .node_for("comments", &s);
        assert_eq!(n.child("post"), Some(&PlanNode::Bare));
        assert_eq!(n.child("author"), Some(&PlanNode::Bare));
    }

    #[test]
    fn test_siblings_reuse_names_off_path() {
        // `likes` appears under two different parents; only ancestors are cut.
        let n = node("posts { likes { id } comments { likes { id } } }");
        assert_eq!(
            n.child("comments").and_then(|c| c.child("likes")),
            Some(&PlanNode::Bare)
        );
        assert_eq!(n.child("likes"), Some(&PlanNode::Bare));
    }

    #[test]
    fn test_merge_laws() {
        let a = node("c { author { profile { bio } } }");
        let b = node("c { likes { id } author { posts { id } } }");
        let c = node("c { post { author { id } } }");

        // Associative.
        assert_eq!(
            a.clone().merge(b.clone()).merge(c.clone()),
            a.clone().merge(b.clone().merge(c.clone()))
        );
        // Commutative.
        assert_eq!(a.clone().merge(b.clone()), b.clone().merge(a.clone()));
        // Idempotent.
        assert_eq!(a.clone().merge(a.clone()), a);
        // Bare absorption.
        assert_eq!(PlanNode::Bare.merge(a.clone()), a);
        assert_eq!(a.clone().merge(PlanNode::Bare), a);
    }

    #[test]
    fn test_nesting_wins_over_bare_on_shared_name() {
        let a = PlanNode::from_children([("author", PlanNode::Bare)]);
        let b = PlanNode::from_children([(
            "author",
            PlanNode::from_children([("profile", PlanNode::Bare)]),
        )]);
        assert_eq!(a.merge(b.clone()), b);
    }

    #[test]
    fn test_merge_across_records() {
        let one = shape("comments { author { name } }");
        let two = shape("comments { likes { id } }");
        let plan = build_plan("comments", [Some(&one), None, Some(&two)]);
        assert_eq!(plan.to_string(), "{comments: [author, likes]}");
    }

    #[test]
    fn test_covers() {
        let big = node("c { author { profile { bio } } likes { id } }");
        let small = node("c { author { id } }");
        assert!(big.covers(&small));
        assert!(!small.covers(&big));
        assert!(small.covers(&PlanNode::Bare));
        assert!(!PlanNode::Bare.covers(&small));
    }

    #[test]
    fn test_empty_nested_normalizes() {
        assert_eq!(PlanNode::nested(BTreeMap::new()), PlanNode::Bare);
        assert_eq!(PlanNode::Bare.depth_count(), 0);
        assert_eq!(node("c { a { b { x } } d { y } }").depth_count(), 3);
    }

    #[test]
    fn test_display() {
        let plan = PreloadPlan::new(
            "comments",
            PlanNode::from_children([
                (
                    "author",
                    PlanNode::from_children([("profile", PlanNode::Bare)]),
                ),
                ("likes", PlanNode::Bare),
            ]),
        );
        assert_eq!(plan.to_string(), "{comments: [{author: [profile]}, likes]}");
        assert_eq!(PreloadPlan::bare("author").to_string(), "author");
        assert_eq!(
            PlanSignature::new("Post", PreloadPlan::bare("comments")).to_string(),
            "Post:comments"
        );
    }
}
