//! Per-query record of what has already been fetched.
//!
//! The ledger is owned by one [`Loader`](crate::Loader) and dies with it.
//! For each [`PlanSignature`] it remembers which record identities were
//! fetched and keeps one representative record per identity, whose populated
//! slot can be copied onto any later handle with the same identity.

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;

use crate::plan::PlanSignature;
use crate::record::RecordRef;
use crate::value::RecordId;

/// Fetch ledger for one root query.
#[derive(Debug, Default)]
pub struct Ledger {
    fetched: HashMap<PlanSignature, HashMap<RecordId, RecordRef>>,
    edges: HashSet<(SmolStr, RecordId, SmolStr)>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `id` was fetched under `signature`.
    pub fn already_fetched(&self, signature: &PlanSignature, id: &RecordId) -> bool {
        self.fetched
            .get(signature)
            .is_some_and(|ids| ids.contains_key(id))
    }

    /// Record that `records` were fetched under `signature`.
    ///
    /// Records without identity are ignored. The first record seen for an
    /// identity stays its representative.
    pub fn mark_fetched<'a>(
        &mut self,
        signature: &PlanSignature,
        records: impl IntoIterator<Item = &'a RecordRef>,
    ) {
        let ids = self.fetched.entry(signature.clone()).or_default();
        for record in records {
            if let Some(id) = record.id() {
                ids.entry(id.clone()).or_insert_with(|| record.clone());
            }
        }
    }

    /// Record fetched under `signature` for `id`, if any.
    pub fn representative(&self, signature: &PlanSignature, id: &RecordId) -> Option<&RecordRef> {
        self.fetched.get(signature).and_then(|ids| ids.get(id))
    }

    /// Check if the relationship edge `(model, id, relation)` was traversed.
    pub fn already_visited_edge(&self, model: &str, id: &RecordId, relation: &str) -> bool {
        self.edges
            .contains(&(SmolStr::new(model), id.clone(), SmolStr::new(relation)))
    }

    /// Record a traversed edge; returns `false` if it was already recorded.
    pub fn visit_edge(&mut self, model: &str, id: &RecordId, relation: &str) -> bool {
        self.edges
            .insert((SmolStr::new(model), id.clone(), SmolStr::new(relation)))
    }

    /// Number of signatures recorded.
    pub fn len(&self) -> usize {
        self.fetched.len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty() && self.edges.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.fetched.clear();
        self.edges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanNode, PreloadPlan};
    use crate::record::Record;
    use std::sync::Arc;

    fn signature(relation: &str) -> PlanSignature {
        PlanSignature::new("Post", PreloadPlan::bare(relation))
    }

    #[test]
    fn test_mark_and_check() {
        let mut ledger = Ledger::new();
        let sig = signature("comments");
        let post = Record::new("Post", 1).into_ref();
        let transient = Record::transient("Post").into_ref();

        assert!(!ledger.already_fetched(&sig, &RecordId::Int(1)));
        ledger.mark_fetched(&sig, [&post, &transient]);
        assert!(ledger.already_fetched(&sig, &RecordId::Int(1)));
        assert!(!ledger.already_fetched(&signature("author"), &RecordId::Int(1)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_signature_is_exact() {
        let mut ledger = Ledger::new();
        let bare = signature("comments");
        let nested = PlanSignature::new(
            "Post",
            PreloadPlan::new(
                "comments",
                PlanNode::from_children([("author", PlanNode::Bare)]),
            ),
        );
        ledger.mark_fetched(&bare, [&Record::new("Post", 1).into_ref()]);
        assert!(!ledger.already_fetched(&nested, &RecordId::Int(1)));
    }

    #[test]
    fn test_first_representative_wins() {
        let mut ledger = Ledger::new();
        let sig = signature("comments");
        let first = Record::new("Post", 1).into_ref();
        let second = Record::new("Post", 1).into_ref();

        ledger.mark_fetched(&sig, [&first]);
        ledger.mark_fetched(&sig, [&second]);
        let rep = ledger.representative(&sig, &RecordId::Int(1)).unwrap();
        assert!(Arc::ptr_eq(rep, &first));
    }

    #[test]
    fn test_edges() {
        let mut ledger = Ledger::new();
        let id = RecordId::Int(4);
        assert!(ledger.visit_edge("Comment", &id, "author"));
        assert!(!ledger.visit_edge("Comment", &id, "author"));
        assert!(ledger.already_visited_edge("Comment", &id, "author"));
        assert!(!ledger.already_visited_edge("Comment", &id, "likes"));

        ledger.clear();
        assert!(ledger.is_empty());
    }
}
