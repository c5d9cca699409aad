//! Core data types for the fragmentation engine
//!
//! This module defines the fundamental types shared by the extractors, the
//! index tree, the resolver and every repository backend:
//! - `Member`: An immutable record of the stream, described by quads
//! - `IndexValue`: A comparable value that places a member at one level
//! - `Bucket`: A persisted fragment holding member ids and relations
//! - `Relation`: A typed edge from one bucket to another
//! - `CacheDirective`: Cache policy for a resolved fragment

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// Object (or subject) position of a statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Term {
    Iri { value: String },
    Blank { value: String },
    Literal {
        value: String,
        #[serde(default)]
        datatype: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Lexical form of the term
    pub fn lexical(&self) -> &str {
        match self {
            Term::Iri { value } | Term::Blank { value } | Term::Literal { value, .. } => value,
        }
    }

    /// Datatype IRI, for typed literals
    pub fn datatype(&self) -> Option<&str> {
        match self {
            Term::Literal { datatype, .. } => datatype.as_deref(),
            _ => None,
        }
    }
}

/// A single statement of a member payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quad {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
    #[serde(default)]
    pub graph: Option<String>,
}

impl Quad {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
            graph: None,
        }
    }
}

/// One immutable record of the stream
///
/// Owned by the member store; buckets only reference it by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    /// Globally unique identifier
    pub id: String,
    /// Ordered statements describing the member
    #[serde(default)]
    pub quads: Vec<Quad>,
    /// Ingestion time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Member {
    /// Create an empty member stamped with the current time
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quads: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder method: append a statement about the member itself
    pub fn with(mut self, predicate: impl Into<String>, object: Term) -> Self {
        let quad = Quad::new(self.id.clone(), predicate, object);
        self.quads.push(quad);
        self
    }

    /// Builder method: append an arbitrary statement
    pub fn quad(mut self, quad: Quad) -> Self {
        self.quads.push(quad);
        self
    }

    /// Objects of every statement with the given predicate, in payload order
    pub fn objects<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.quads
            .iter()
            .filter(move |q| q.predicate == predicate)
            .map(|q| &q.object)
    }
}

/// Comparable scalar carried by an index value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Integer(i64),
    Decimal(f64),
    /// Unix timestamp in milliseconds
    DateTime(i64),
    Text(String),
}

impl Scalar {
    /// Infer a scalar from a lexical form (integer, then decimal, else text)
    pub fn infer(lexical: &str) -> Self {
        if let Ok(i) = lexical.parse::<i64>() {
            return Scalar::Integer(i);
        }
        match lexical.parse::<f64>() {
            Ok(f) if f.is_finite() => Scalar::Decimal(f),
            _ => Scalar::Text(lexical.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scalar::Integer(_) | Scalar::Decimal(_) => 0,
            Scalar::DateTime(_) => 1,
            Scalar::Text(_) => 2,
        }
    }

    /// Total order: numbers < date-times < text
    pub fn compare(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Integer(a), Scalar::Integer(b)) => a.cmp(b),
            (Scalar::Integer(a), Scalar::Decimal(b)) => (*a as f64).total_cmp(b),
            (Scalar::Decimal(a), Scalar::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Scalar::Decimal(a), Scalar::Decimal(b)) => a.total_cmp(b),
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a.cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Millisecond timestamp, for date-time and integer scalars
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Scalar::DateTime(ms) | Scalar::Integer(ms) => Some(*ms),
            _ => None,
        }
    }
}

/// Value an extractor derives for one member (or one request) at one level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexValue {
    /// Lexical form; identity of the sibling bucket and its path segment
    pub key: String,
    /// Comparable value used for sibling ordering
    pub value: Scalar,
    /// Predicate reported on relations built from this value
    #[serde(default)]
    pub path: Option<String>,
    /// Whether relations expose this value
    #[serde(default = "default_true")]
    pub use_in_relation: bool,
}

fn default_true() -> bool {
    true
}

impl IndexValue {
    pub fn new(key: impl Into<String>, value: Scalar) -> Self {
        Self {
            key: key.into(),
            value,
            path: None,
            use_in_relation: true,
        }
    }

    pub fn integer(i: i64) -> Self {
        Self::new(i.to_string(), Scalar::Integer(i))
    }

    /// Date-time value keyed by its millisecond timestamp
    pub fn datetime(millis: i64) -> Self {
        Self::new(millis.to_string(), Scalar::DateTime(millis))
    }

    /// Value whose scalar is inferred from its key
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let value = Scalar::infer(&key);
        Self::new(key, value)
    }

    /// Builder: set the relation predicate
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Builder: keep this value out of relations
    pub fn hidden(mut self) -> Self {
        self.use_in_relation = false;
        self
    }

    /// Sibling order comparator
    pub fn compare(&self, other: &IndexValue) -> Ordering {
        self.value.compare(&other.value)
    }
}

/// Identifier of a bucket: one key per non-timestamp level
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BucketId(pub Vec<String>);

impl BucketId {
    pub fn new(keys: Vec<String>) -> Self {
        Self(keys)
    }

    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse the textual form produced by [`BucketId::to_key`]
    pub fn from_key(key: &str) -> Self {
        Self(
            key.split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
                .collect(),
        )
    }

    /// Percent-encoded keys joined with `/`
    pub fn to_key(&self) -> String {
        self.0
            .iter()
            .map(|k| urlencoding::encode(k).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Self(keys)
    }

    /// Progressively longer prefixes: `[[k0], [k0, k1], ...]`
    pub fn prefixes(&self) -> Vec<BucketId> {
        (1..=self.0.len())
            .map(|n| BucketId(self.0[..n].to_vec()))
            .collect()
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// Kind of a relation between two buckets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationType {
    LessThan,
    GreaterThan,
    EqualTo,
    LessThanOrEqual,
    GreaterThanOrEqual,
    NotEqual,
}

impl RelationType {
    /// Name of the relation class in the fragmentation vocabulary
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::LessThan => "LessThanRelation",
            RelationType::GreaterThan => "GreaterThanRelation",
            RelationType::EqualTo => "EqualToRelation",
            RelationType::LessThanOrEqual => "LessThanOrEqualToRelation",
            RelationType::GreaterThanOrEqual => "GreaterThanOrEqualToRelation",
            RelationType::NotEqual => "NotEqualToRelation",
        }
    }

    /// Relation pointing back from the target
    pub fn inverse(&self) -> RelationType {
        match self {
            RelationType::LessThan => RelationType::GreaterThan,
            RelationType::GreaterThan => RelationType::LessThan,
            RelationType::LessThanOrEqual => RelationType::GreaterThanOrEqual,
            RelationType::GreaterThanOrEqual => RelationType::LessThanOrEqual,
            RelationType::EqualTo => RelationType::EqualTo,
            RelationType::NotEqual => RelationType::NotEqual,
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directed, typed edge from one bucket to a sibling bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub kind: RelationType,
    pub target: BucketId,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub value: Option<IndexValue>,
    #[serde(default)]
    pub timestamp_bound: bool,
}

impl Relation {
    /// Relation carrying `value` when the value may be exposed
    pub fn new(kind: RelationType, target: BucketId, value: &IndexValue) -> Self {
        Self {
            kind,
            target,
            path: value.path.clone(),
            value: value.use_in_relation.then(|| value.clone()),
            timestamp_bound: false,
        }
    }

    /// Identity used for deduplication
    pub fn same_edge(&self, other: &Relation) -> bool {
        self.kind == other.kind
            && self.target == other.target
            && self.timestamp_bound == other.timestamp_bound
    }
}

/// A persisted fragment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub id: BucketId,
    pub stream_id: String,
    pub root: bool,
    pub leaf: bool,
    /// Index value this bucket represents at its level
    pub value: Option<IndexValue>,
    /// Sealed: no member will ever be added again
    pub immutable: bool,
    pub members: BTreeSet<String>,
    pub relations: Vec<Relation>,
    /// Version timestamp (milliseconds) for timestamp-capable streams
    pub timestamp: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bucket {
    /// Create an empty, mutable, non-root, non-leaf bucket
    pub fn new(stream_id: impl Into<String>, id: BucketId) -> Self {
        let now = Utc::now();
        Self {
            id,
            stream_id: stream_id.into(),
            root: false,
            leaf: false,
            value: None,
            immutable: false,
            members: BTreeSet::new(),
            relations: Vec::new(),
            timestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a member id; returns false if it was already present
    pub fn add_member(&mut self, member_id: impl Into<String>) -> bool {
        self.members.insert(member_id.into())
    }

    /// Add a relation unless an identical edge exists
    pub fn add_relation(&mut self, relation: Relation) -> bool {
        if self.relations.iter().any(|r| r.same_edge(&relation)) {
            return false;
        }
        self.relations.push(relation);
        true
    }

    /// Fold an update into this bucket (upsert semantics shared by all backends)
    pub fn merge(&mut self, other: &Bucket) {
        self.root |= other.root;
        self.leaf |= other.leaf;
        self.immutable |= other.immutable;
        if self.value.is_none() {
            self.value = other.value.clone();
        }
        if self.timestamp.is_none() {
            self.timestamp = other.timestamp;
        }
        self.members.extend(other.members.iter().cloned());
        for relation in &other.relations {
            self.add_relation(relation.clone());
        }
        self.created_at = self.created_at.min(other.created_at);
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// Timestamp version label used in storage keys
    pub fn version(&self) -> i64 {
        self.timestamp.unwrap_or(UNVERSIONED)
    }
}

/// Storage version of buckets that are not timestamp versions
pub const UNVERSIONED: i64 = i64::MIN;

/// Render a millisecond timestamp the way identifiers carry it
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

/// Parse an RFC 3339 date-time or integer milliseconds
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Cache policy for a resolved fragment: `(public, max-age, immutable)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheDirective {
    pub public: bool,
    /// Seconds
    pub max_age: Option<u64>,
    pub immutable: bool,
}

impl fmt::Display for CacheDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![if self.public { "public" } else { "private" }.to_string()];
        if let Some(age) = self.max_age {
            parts.push(format!("max-age={}", age));
        }
        if self.immutable {
            parts.push("immutable".to_string());
        }
        write!(f, "{}", parts.join(", "))
    }
}
