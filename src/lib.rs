//! # Fragmenta
//!
//! Fragmentation and resolution engine for append-only member streams.
//! Members are placed into a hierarchy of buckets by a configured
//! bucketization strategy; buckets are served as linked fragments a client
//! can traverse without a full index.
//!
//! ## Features
//!
//! - **Bucketization levels**: property values, fixed-size pages, time windows
//! - **Sorted siblings**: O(1) LessThan/GreaterThan neighbors per bucket
//! - **Sealing**: monotonic levels mark finished buckets immutable for caching
//! - **Timestamp versions**: resolve a bucket as of a point in time
//! - **Backends**: memory, SQLite documents, snapshotting search index
//!
//! ## Modules
//!
//! - [`extract`]: extractor pipeline and strategies
//! - [`index`]: in-process ordered bucket index
//! - [`builder`]: ADD / GET traversal
//! - [`resolve`]: fragment resolution
//! - [`repository`]: persistence backends
//! - [`engine`]: hosting-adapter surface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fragmenta::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::open(&Config::default()).await?;
//!
//!     engine.write(&Member::new("urn:member:1")).await?;
//!
//!     match engine.resolve("0").await? {
//!         ResolutionOutcome::Found(fragment) => {
//!             println!("{} members, cache: {}", fragment.members.len(), fragment.cache)
//!         }
//!         ResolutionOutcome::Redirect(target) => println!("see {}", target),
//!         ResolutionOutcome::NotFound => println!("not found"),
//!     }
//!
//!     engine.close().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod engine;
pub mod extract;
pub mod index;
pub mod model;
pub mod repository;
pub mod resolve;

// Re-export top-level types for convenience
pub use model::{
    Bucket, BucketId, CacheDirective, EngineError, EngineResult, ExtractionMiss, IndexValue,
    LateArrival, Member, Quad, Relation, RelationType, Scalar, Term,
};

pub use extract::{Extraction, FragmentId, Level, LevelKind, Strategy};

pub use index::{IndexStats, IndexTree, RelationManager, SiblingOrder};

pub use builder::{Builder, Operation, Traversal};

pub use resolve::{Fragment, FragmentResolver, ResolutionOutcome, ResolvedRelation};

pub use repository::{open_repository, Repository, TimeBound};

pub use engine::{Engine, EngineStats, WriteOutcome};

pub use config::{Config, ConfigError, LoggingConfig};
