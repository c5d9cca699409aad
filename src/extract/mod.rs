//! Extractor Pipeline
//!
//! A bucketization strategy is an ordered list of levels. Each level
//! combines the capabilities below:
//!
//! - **QuadExtractor**: member → index values for this level
//! - **PathExtractor**: request identifier ↔ index value for this level
//! - **IndexExtractor**: bookkeeping that needs tree state (e.g. paging)
//! - **CacheExtractor**: cache directive for a resolved bucket (one per strategy)
//!
//! # Example
//!
//! ```text
//! levels = [property(ex:x), property(ex:y)]
//!
//! Member { ex:x 1, ex:y 2 }  →  [1] → [2]    bucket "1/2"
//! Request "1/2"              →  [1] → [2]    same bucket
//! ```

mod cache;
mod identifier;
mod page;
mod property;
mod timestamp;

pub use cache::{PrivateCache, SealedCache};
pub use identifier::FragmentId;
pub use page::PageExtractor;
pub use property::PropertyExtractor;
pub use timestamp::TimestampExtractor;

use crate::config::{CacheConfig, CacheMode, LevelConfig, StrategyConfig};
use crate::index::TreeNode;
use crate::model::{
    Bucket, CacheDirective, EngineError, EngineResult, ExtractionMiss, IndexValue, Member,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of extracting one level's values from a member
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Values placing the member at this level (at least one)
    Values(Vec<IndexValue>),
    /// The member lacks the expected property and is skipped
    Skip(ExtractionMiss),
}

/// Derives index values from a member
pub trait QuadExtractor: Send + Sync {
    fn extract(&self, member: &Member) -> Extraction;
}

/// Maps a request identifier to this level's index value and back
pub trait PathExtractor: Send + Sync {
    /// Path segments consumed (0 for query-encoded levels)
    fn segments(&self) -> usize;

    /// Value the request encodes at `offset`; `None` when absent
    fn extract_path(&self, id: &FragmentId, offset: usize) -> EngineResult<Option<IndexValue>>;

    /// Request identifier with this level's value replaced by `value`
    fn set_path(&self, value: &IndexValue, id: &FragmentId, offset: usize) -> FragmentId;
}

/// Assigns final index values using the state of the parent node
pub trait IndexExtractor: Send + Sync {
    fn assign(&self, parent: &TreeNode, values: Vec<IndexValue>) -> Vec<IndexValue>;
}

/// Decides cache directives for a resolved bucket
pub trait CacheExtractor: Send + Sync {
    fn directive(&self, bucket: &Bucket) -> CacheDirective;
}

/// How a level is encoded in a fragment identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One path segment
    Segment,
    /// A named query parameter
    Query(String),
}

impl Encoding {
    pub fn from_query(query: Option<&str>) -> Self {
        match query {
            Some(name) => Encoding::Query(name.to_string()),
            None => Encoding::Segment,
        }
    }

    pub fn segments(&self) -> usize {
        match self {
            Encoding::Segment => 1,
            Encoding::Query(_) => 0,
        }
    }

    /// Raw value at this level
    pub fn read<'a>(&self, id: &'a FragmentId, offset: usize) -> Option<&'a str> {
        match self {
            Encoding::Segment => id.segment(offset),
            Encoding::Query(name) => id.param(name),
        }
    }

    /// Identifier with this level's raw value replaced
    pub fn write(&self, id: &FragmentId, offset: usize, raw: &str) -> FragmentId {
        match self {
            Encoding::Segment => id.with_segment(offset, raw),
            Encoding::Query(name) => id.with_param(name.clone(), raw),
        }
    }
}

/// Kind of bucketization level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Property,
    Page,
    Timestamp,
}

/// Persisted description of a level (stream metadata)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub kind: LevelKind,
    pub predicate: Option<String>,
    pub encoding: Encoding,
}

/// One level of a bucketization strategy
#[derive(Clone)]
pub struct Level {
    kind: LevelKind,
    predicate: Option<String>,
    encoding: Encoding,
    quad: Arc<dyn QuadExtractor>,
    path: Arc<dyn PathExtractor>,
    index: Option<Arc<dyn IndexExtractor>>,
}

impl Level {
    pub fn property(extractor: PropertyExtractor) -> Self {
        let predicate = Some(extractor.predicate().to_string());
        let encoding = extractor.encoding().clone();
        let extractor = Arc::new(extractor);
        Self {
            kind: LevelKind::Property,
            predicate,
            encoding,
            quad: extractor.clone(),
            path: extractor,
            index: None,
        }
    }

    pub fn page(extractor: PageExtractor) -> Self {
        let encoding = extractor.encoding().clone();
        let extractor = Arc::new(extractor);
        Self {
            kind: LevelKind::Page,
            predicate: None,
            encoding,
            quad: extractor.clone(),
            path: extractor.clone(),
            index: Some(extractor),
        }
    }

    pub fn timestamp(extractor: TimestampExtractor) -> Self {
        let predicate = Some(extractor.predicate().to_string());
        let encoding = Encoding::Query(extractor.param().to_string());
        let extractor = Arc::new(extractor);
        Self {
            kind: LevelKind::Timestamp,
            predicate,
            encoding,
            quad: extractor.clone(),
            path: extractor,
            index: None,
        }
    }

    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn is_timestamp(&self) -> bool {
        self.kind == LevelKind::Timestamp
    }

    /// Monotonic levels only ever grow at the top; older siblings get sealed
    pub fn monotonic(&self) -> bool {
        matches!(self.kind, LevelKind::Page | LevelKind::Timestamp)
    }

    pub fn quad(&self) -> &dyn QuadExtractor {
        self.quad.as_ref()
    }

    pub fn path(&self) -> &dyn PathExtractor {
        self.path.as_ref()
    }

    pub fn index(&self) -> Option<&dyn IndexExtractor> {
        self.index.as_deref()
    }

    pub fn descriptor(&self) -> LevelDescriptor {
        LevelDescriptor {
            kind: self.kind,
            predicate: self.predicate.clone(),
            encoding: self.encoding.clone(),
        }
    }
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Level")
            .field("kind", &self.kind)
            .field("predicate", &self.predicate)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// A validated sequence of levels plus the cache policy
#[derive(Clone)]
pub struct Strategy {
    levels: Vec<Level>,
    cache: Arc<dyn CacheExtractor>,
}

impl Strategy {
    /// Validate and build a strategy
    ///
    /// At most one timestamp level is allowed and it must come last.
    pub fn new(levels: Vec<Level>, cache: Arc<dyn CacheExtractor>) -> EngineResult<Self> {
        if levels.is_empty() {
            return Err(EngineError::Config(
                "strategy needs at least one level".to_string(),
            ));
        }

        let timestamp_levels: Vec<usize> = levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_timestamp())
            .map(|(i, _)| i)
            .collect();

        match timestamp_levels.as_slice() {
            [] => {}
            [i] if *i == levels.len() - 1 => {}
            [_] => {
                return Err(EngineError::Config(
                    "timestamp level must be the last level".to_string(),
                ))
            }
            _ => {
                return Err(EngineError::Config(
                    "at most one timestamp level is allowed".to_string(),
                ))
            }
        }

        Ok(Self { levels, cache })
    }

    /// Build from configuration
    pub fn from_config(config: &StrategyConfig, cache: &CacheConfig) -> EngineResult<Self> {
        let mut levels = Vec::with_capacity(config.levels.len());
        for level in &config.levels {
            levels.push(match level {
                LevelConfig::Property { predicate, query } => Level::property(
                    PropertyExtractor::new(predicate.clone(), Encoding::from_query(query.as_deref())),
                ),
                LevelConfig::Page { per_page, query } => {
                    if *per_page == 0 {
                        return Err(EngineError::Config("per_page must be positive".to_string()));
                    }
                    Level::page(PageExtractor::new(
                        *per_page,
                        Encoding::from_query(query.as_deref()),
                    ))
                }
                LevelConfig::Timestamp {
                    predicate,
                    window_ms,
                    param,
                } => {
                    if *window_ms <= 0 {
                        return Err(EngineError::Config("window_ms must be positive".to_string()));
                    }
                    Level::timestamp(TimestampExtractor::new(
                        predicate.clone(),
                        *window_ms,
                        param.clone(),
                    ))
                }
            });
        }

        let cache: Arc<dyn CacheExtractor> = match cache.mode {
            CacheMode::Sealed => Arc::new(SealedCache::new(cache.public, cache.max_age_secs)),
            CacheMode::Private => Arc::new(PrivateCache),
        };

        Self::new(levels, cache)
    }

    /// All levels, timestamp level included
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Levels that make up bucket ids (the timestamp level excluded)
    pub fn bucket_levels(&self) -> &[Level] {
        match self.levels.last() {
            Some(last) if last.is_timestamp() => &self.levels[..self.levels.len() - 1],
            _ => &self.levels,
        }
    }

    pub fn timestamp_level(&self) -> Option<&Level> {
        self.levels.last().filter(|l| l.is_timestamp())
    }

    pub fn timestamp_capable(&self) -> bool {
        self.timestamp_level().is_some()
    }

    /// Path segments a request must carry
    pub fn required_segments(&self) -> usize {
        self.levels.iter().map(|l| l.path().segments()).sum()
    }

    /// Path offset at which level `depth` reads its segment
    pub fn segment_offset(&self, depth: usize) -> usize {
        self.levels[..depth.min(self.levels.len())]
            .iter()
            .map(|l| l.path().segments())
            .sum()
    }

    pub fn cache(&self) -> &dyn CacheExtractor {
        self.cache.as_ref()
    }

    pub fn descriptors(&self) -> Vec<LevelDescriptor> {
        self.levels.iter().map(Level::descriptor).collect()
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("levels", &self.levels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(p: &str) -> Level {
        Level::property(PropertyExtractor::new(p, Encoding::Segment))
    }

    fn timestamp() -> Level {
        Level::timestamp(TimestampExtractor::new("ex:t", 1000, "timestamp"))
    }

    #[test]
    fn test_strategy_requires_levels() {
        assert!(Strategy::new(Vec::new(), Arc::new(PrivateCache)).is_err());
    }

    #[test]
    fn test_timestamp_level_must_be_last() {
        let err = Strategy::new(vec![timestamp(), property("ex:x")], Arc::new(PrivateCache));
        assert!(matches!(err, Err(EngineError::Config(_))));

        let twice = Strategy::new(vec![timestamp(), timestamp()], Arc::new(PrivateCache));
        assert!(matches!(twice, Err(EngineError::Config(_))));

        let ok = Strategy::new(vec![property("ex:x"), timestamp()], Arc::new(PrivateCache))
            .unwrap();
        assert!(ok.timestamp_capable());
        assert_eq!(ok.bucket_levels().len(), 1);
    }

    #[test]
    fn test_required_segments() {
        let paged_by_query = Level::page(PageExtractor::new(
            10,
            Encoding::Query("page".to_string()),
        ));
        let strategy = Strategy::new(
            vec![property("ex:x"), paged_by_query, property("ex:y")],
            Arc::new(PrivateCache),
        )
        .unwrap();

        assert_eq!(strategy.required_segments(), 2);
        assert_eq!(strategy.segment_offset(0), 0);
        assert_eq!(strategy.segment_offset(1), 1);
        assert_eq!(strategy.segment_offset(2), 1);
    }

    #[test]
    fn test_descriptors() {
        let strategy =
            Strategy::new(vec![property("ex:x"), timestamp()], Arc::new(PrivateCache)).unwrap();
        let descriptors = strategy.descriptors();
        assert_eq!(descriptors[0].kind, LevelKind::Property);
        assert_eq!(descriptors[0].encoding, Encoding::Segment);
        assert_eq!(descriptors[1].kind, LevelKind::Timestamp);
        assert_eq!(descriptors[1].encoding, Encoding::Query("timestamp".to_string()));

        let json = serde_json::to_value(&descriptors).unwrap();
        assert_eq!(json[0]["encoding"], "segment");
        assert_eq!(json[1]["encoding"], serde_json::json!({ "query": "timestamp" }));
    }
}
