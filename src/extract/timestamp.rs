//! Timestamp extractor: fixed time windows that version a bucket
//!
//! Window starts are `floor(ts / window) * window`. The timestamp level is
//! always the last level and is carried in the query string, so every
//! version of a bucket shares its path.

use super::{Extraction, FragmentId, PathExtractor, QuadExtractor};
use crate::model::{
    format_timestamp, parse_timestamp, EngineError, EngineResult, ExtractionMiss, IndexValue,
    Member,
};

#[derive(Debug, Clone)]
pub struct TimestampExtractor {
    predicate: String,
    window_ms: i64,
    param: String,
}

impl TimestampExtractor {
    pub fn new(predicate: impl Into<String>, window_ms: i64, param: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            window_ms: window_ms.max(1),
            param: param.into(),
        }
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Start of the window containing `millis`
    pub fn window_start(&self, millis: i64) -> i64 {
        millis.div_euclid(self.window_ms) * self.window_ms
    }
}

impl QuadExtractor for TimestampExtractor {
    fn extract(&self, member: &Member) -> Extraction {
        let parsed = member
            .objects(&self.predicate)
            .find_map(|term| parse_timestamp(term.lexical()));

        match parsed {
            Some(ms) => Extraction::Values(vec![
                IndexValue::datetime(self.window_start(ms)).with_path(self.predicate.clone())
            ]),
            None => {
                tracing::warn!(
                    member = %member.id,
                    predicate = %self.predicate,
                    "Member has no parsable timestamp, skipping"
                );
                Extraction::Skip(ExtractionMiss::new(member.id.clone(), self.predicate.clone()))
            }
        }
    }
}

impl PathExtractor for TimestampExtractor {
    fn segments(&self) -> usize {
        0
    }

    /// The requested instant, not floored: version lookup is "at or before"
    fn extract_path(&self, id: &FragmentId, _offset: usize) -> EngineResult<Option<IndexValue>> {
        let Some(raw) = id.param(&self.param) else {
            return Ok(None);
        };
        parse_timestamp(raw)
            .map(|ms| Some(IndexValue::datetime(ms).with_path(self.predicate.clone())))
            .ok_or_else(|| {
                EngineError::InvalidIdentifier(format!("unparsable timestamp '{}'", raw))
            })
    }

    fn set_path(&self, value: &IndexValue, id: &FragmentId, _offset: usize) -> FragmentId {
        match value.value.as_millis() {
            Some(ms) => id.with_param(self.param.clone(), format_timestamp(ms)),
            None => id.with_param(self.param.clone(), value.key.clone()),
        }
    }
}
