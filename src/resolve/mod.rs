//! Fragment Resolution
//!
//! Turns a request identifier into a fragment: its members, its outgoing
//! relations and a cache directive.
//!
//! # State machine
//!
//! ```text
//! Parsing → PrefixWalk(0..n-1) → LeafLookup → Found | Redirect | NotFound
//! ```
//!
//! `Redirect` carries the canonical identifier to re-resolve, e.g. when a
//! timestamp request lands between two bucket versions.

mod resolver;

pub use resolver::FragmentResolver;

use crate::model::{BucketId, CacheDirective, IndexValue, Member, Relation, RelationType};
use serde::Serialize;

/// Relation with its target expressed as a request identifier
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedRelation {
    pub kind: RelationType,
    /// Identifier a client follows
    pub target: String,
    pub path: Option<String>,
    pub value: Option<IndexValue>,
    pub timestamp_bound: bool,
}

impl ResolvedRelation {
    pub fn from_relation(relation: &Relation, target: String) -> Self {
        Self {
            kind: relation.kind,
            target,
            path: relation.path.clone(),
            value: relation.value.clone(),
            timestamp_bound: relation.timestamp_bound,
        }
    }
}

/// A resolved fragment
#[derive(Debug, Clone, Serialize)]
pub struct Fragment {
    /// Canonical identifier of this fragment
    pub identifier: String,
    pub bucket_id: BucketId,
    /// Version timestamp for timestamp-capable streams
    pub timestamp: Option<i64>,
    pub members: Vec<Member>,
    pub relations: Vec<ResolvedRelation>,
    pub cache: CacheDirective,
}

impl Fragment {
    /// Relations of one kind
    pub fn relations_of(&self, kind: RelationType) -> impl Iterator<Item = &ResolvedRelation> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id.as_str()).collect()
    }
}

/// Terminal state of a resolution
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    Found(Fragment),
    /// Re-resolve against this canonical identifier
    Redirect(String),
    NotFound,
}

impl ResolutionOutcome {
    pub fn fragment(&self) -> Option<&Fragment> {
        match self {
            ResolutionOutcome::Found(fragment) => Some(fragment),
            _ => None,
        }
    }

    pub fn redirect(&self) -> Option<&str> {
        match self {
            ResolutionOutcome::Redirect(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolutionOutcome::NotFound)
    }
}

/// Keep the first relation per (kind, target)
pub(crate) fn dedupe(relations: Vec<ResolvedRelation>) -> Vec<ResolvedRelation> {
    let mut seen = std::collections::HashSet::new();
    relations
        .into_iter()
        .filter(|r| seen.insert((r.kind, r.target.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(kind: RelationType, target: &str) -> ResolvedRelation {
        ResolvedRelation {
            kind,
            target: target.to_string(),
            path: None,
            value: None,
            timestamp_bound: false,
        }
    }

    #[test]
    fn test_dedupe_by_kind_and_target() {
        let relations = vec![
            relation(RelationType::GreaterThan, "3/2"),
            relation(RelationType::GreaterThan, "3/2"),
            relation(RelationType::LessThan, "3/2"),
            relation(RelationType::GreaterThan, "1/4"),
        ];
        let deduped = dedupe(relations);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].target, "3/2");
        assert_eq!(deduped[2].target, "1/4");
    }

    #[test]
    fn test_outcome_accessors() {
        let redirect = ResolutionOutcome::Redirect("a?timestamp=1".to_string());
        assert_eq!(redirect.redirect(), Some("a?timestamp=1"));
        assert!(redirect.fragment().is_none());
        assert!(ResolutionOutcome::NotFound.is_not_found());
    }
}
