//! Cache policies for resolved fragments

use super::CacheExtractor;
use crate::model::{Bucket, CacheDirective};

/// Shared caching with a max age; sealed buckets are also immutable
#[derive(Debug, Clone)]
pub struct SealedCache {
    public: bool,
    max_age: u64,
}

impl SealedCache {
    pub fn new(public: bool, max_age: u64) -> Self {
        Self { public, max_age }
    }
}

impl CacheExtractor for SealedCache {
    fn directive(&self, bucket: &Bucket) -> CacheDirective {
        CacheDirective {
            public: self.public,
            max_age: Some(self.max_age),
            immutable: bucket.immutable,
        }
    }
}

/// Never cache in shared caches
#[derive(Debug, Clone, Default)]
pub struct PrivateCache;

impl CacheExtractor for PrivateCache {
    fn directive(&self, _bucket: &Bucket) -> CacheDirective {
        CacheDirective {
            public: false,
            max_age: None,
            immutable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BucketId;

    #[test]
    fn test_sealed_cache_follows_bucket() {
        let cache = SealedCache::new(true, 1500);
        let mut bucket = Bucket::new("s", BucketId::new(vec!["1".into()]));

        assert_eq!(cache.directive(&bucket).to_string(), "public, max-age=1500");
        bucket.immutable = true;
        assert_eq!(
            cache.directive(&bucket).to_string(),
            "public, max-age=1500, immutable"
        );
    }

    #[test]
    fn test_private_cache() {
        let mut bucket = Bucket::new("s", BucketId::root());
        bucket.immutable = true;
        assert_eq!(PrivateCache.directive(&bucket).to_string(), "private");
    }
}
