//! Fragment Identifier Parser
//!
//! Parses fragment identifiers into ordered path segments and a query map.
//!
//! # Grammar
//!
//! ```text
//! identifier := path ('?' query)?
//! path       := segment ('/' segment)*
//! query      := key ('=' value)? ('&' key ('=' value)?)*
//! ```
//!
//! Segments, keys and values are percent-decoded. Empty segments are dropped,
//! so `/a//b` and `a/b` denote the same fragment. Reconstruction re-encodes
//! every segment and query pair deterministically (query keys sorted), which
//! makes `parse(reconstruct(id)) == id` hold for every parsed identifier.
//!
//! # Examples
//!
//! ```text
//! 1/2
//! sensors/temperature?timestamp=2024-01-01T00%3A00%3A00.000Z
//! ?page=3
//! ```

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::{all_consuming, opt},
    multi::separated_list0,
    sequence::{pair, preceded},
    IResult,
};

use crate::model::{EngineError, EngineResult};
use std::collections::BTreeMap;
use std::fmt;

/// Parsed request identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentId {
    /// Decoded, non-empty path segments
    pub segments: Vec<String>,
    /// Decoded query parameters (last occurrence wins)
    pub query: BTreeMap<String, String>,
}

impl FragmentId {
    pub fn new(segments: Vec<String>, query: BTreeMap<String, String>) -> Self {
        Self { segments, query }
    }

    /// Parse an identifier string
    pub fn parse(input: &str) -> EngineResult<Self> {
        let (_, (path, pairs)) = all_consuming(parse_identifier)(input.trim()).map_err(|e| {
            EngineError::InvalidIdentifier(format!("'{}': {:?}", input, e))
        })?;

        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode)
            .collect::<EngineResult<Vec<_>>>()?;

        let mut query = BTreeMap::new();
        for (key, value) in pairs.unwrap_or_default() {
            query.insert(decode(key)?, decode(value.unwrap_or(""))?);
        }

        Ok(Self { segments, query })
    }

    /// Deterministic textual form
    pub fn reconstruct(&self) -> String {
        let path = self
            .segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if self.query.is_empty() {
            return path;
        }

        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", path, query)
    }

    pub fn segment(&self, offset: usize) -> Option<&str> {
        self.segments.get(offset).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Copy with the segment at `offset` replaced (appended when missing)
    pub fn with_segment(&self, offset: usize, segment: impl Into<String>) -> Self {
        let mut next = self.clone();
        let segment = segment.into();
        if offset < next.segments.len() {
            next.segments[offset] = segment;
        } else {
            next.segments.push(segment);
        }
        next
    }

    /// Copy with a query parameter set
    pub fn with_param(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.query.insert(name.into(), value.into());
        next
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reconstruct())
    }
}

fn decode(raw: &str) -> EngineResult<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| EngineError::InvalidIdentifier(format!("bad percent-encoding in '{}': {}", raw, e)))
}

type QueryPairs<'a> = Vec<(&'a str, Option<&'a str>)>;

/// Parse `path ('?' query)?`
fn parse_identifier(input: &str) -> IResult<&str, (&str, Option<QueryPairs<'_>>)> {
    pair(
        take_while(|c| c != '?'),
        opt(preceded(char('?'), parse_query_pairs)),
    )(input)
}

/// Parse `pair ('&' pair)*`
fn parse_query_pairs(input: &str) -> IResult<&str, QueryPairs<'_>> {
    separated_list0(char('&'), parse_pair)(input)
}

/// Parse `key ('=' value)?`
fn parse_pair(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    pair(
        take_while1(|c| c != '=' && c != '&'),
        opt(preceded(char('='), take_while(|c| c != '&'))),
    )(input)
}
