//! Pagination extractor: fixed-size pages under a parent bucket

use super::{Encoding, Extraction, FragmentId, IndexExtractor, PathExtractor, QuadExtractor};
use crate::index::TreeNode;
use crate::model::{EngineError, EngineResult, IndexValue, Member};

/// Splits the members routed through a parent into pages of `per_page`
///
/// The page number depends on tree state, so quad extraction only yields a
/// placeholder and [`IndexExtractor::assign`] computes the real page.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    per_page: usize,
    encoding: Encoding,
}

impl PageExtractor {
    pub fn new(per_page: usize, encoding: Encoding) -> Self {
        Self {
            per_page: per_page.max(1),
            encoding,
        }
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Page a member lands on after `routed` earlier members
    pub fn page_for(&self, routed: usize) -> i64 {
        (routed / self.per_page) as i64
    }
}

impl QuadExtractor for PageExtractor {
    fn extract(&self, _member: &Member) -> Extraction {
        Extraction::Values(vec![IndexValue::integer(0)])
    }
}

impl IndexExtractor for PageExtractor {
    fn assign(&self, parent: &TreeNode, _values: Vec<IndexValue>) -> Vec<IndexValue> {
        vec![IndexValue::integer(self.page_for(parent.routed))]
    }
}

impl PathExtractor for PageExtractor {
    fn segments(&self) -> usize {
        self.encoding.segments()
    }

    fn extract_path(&self, id: &FragmentId, offset: usize) -> EngineResult<Option<IndexValue>> {
        let Some(raw) = self.encoding.read(id, offset) else {
            return Ok(None);
        };
        match raw.parse::<i64>() {
            Ok(page) if page >= 0 => Ok(Some(IndexValue::integer(page))),
            _ => Err(EngineError::InvalidIdentifier(format!(
                "page must be a non-negative integer, got '{}'",
                raw
            ))),
        }
    }

    fn set_path(&self, value: &IndexValue, id: &FragmentId, offset: usize) -> FragmentId {
        self.encoding.write(id, offset, &value.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexTree;

    #[test]
    fn test_page_boundaries() {
        let extractor = PageExtractor::new(2, Encoding::Segment);
        assert_eq!(extractor.page_for(0), 0);
        assert_eq!(extractor.page_for(1), 0);
        assert_eq!(extractor.page_for(2), 1);
        assert_eq!(extractor.page_for(5), 2);
    }

    #[test]
    fn test_assign_uses_parent_count() {
        let extractor = PageExtractor::new(3, Encoding::Segment);
        let mut tree = IndexTree::new();
        let root = tree.root();

        tree.node_mut(root).routed = 3;
        let assigned = extractor.assign(tree.node(root), vec![IndexValue::integer(0)]);
        assert_eq!(assigned, vec![IndexValue::integer(1)]);
    }

    #[test]
    fn test_extract_path_validates() {
        let extractor = PageExtractor::new(10, Encoding::Query("page".to_string()));
        let ok = FragmentId::parse("a?page=4").unwrap();
        assert_eq!(
            extractor.extract_path(&ok, 0).unwrap(),
            Some(IndexValue::integer(4))
        );

        let bad = FragmentId::parse("a?page=-1").unwrap();
        assert!(matches!(
            extractor.extract_path(&bad, 0),
            Err(EngineError::InvalidIdentifier(_))
        ));

        let absent = FragmentId::parse("a").unwrap();
        assert_eq!(extractor.extract_path(&absent, 0).unwrap(), None);
    }
}
