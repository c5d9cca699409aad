//! Fragmenta data model
//!
//! - **types**: Members, index values, buckets, relations, cache directives
//! - **error**: Error types and the extraction-miss skip signal
//!
//! # Ownership
//!
//! ```text
//! Member store:  Member { id, quads }        (immutable, written once)
//!                     ↑ by id
//! Bucket store:  Bucket { id, members, relations, timestamp }
//!                     ↓ relations
//!                sibling buckets
//! ```

pub mod error;
pub mod types;

pub use error::{EngineError, EngineResult, ExtractionMiss, LateArrival};
pub use types::{
    format_timestamp, parse_timestamp, Bucket, BucketId, CacheDirective, IndexValue, Member, Quad,
    Relation, RelationType, Scalar, Term, UNVERSIONED, XSD_DATE_TIME, XSD_DECIMAL, XSD_DOUBLE,
    XSD_INTEGER,
};
