//! Property-value extractor: one level keyed by the objects of a predicate

use super::{Encoding, Extraction, FragmentId, PathExtractor, QuadExtractor};
use crate::model::{
    parse_timestamp, EngineResult, ExtractionMiss, IndexValue, Member, Scalar, Term,
    XSD_DATE_TIME, XSD_DECIMAL, XSD_DOUBLE, XSD_INTEGER,
};

/// Buckets members by the value(s) of a predicate
///
/// A member with several values for the predicate fans out into several
/// sibling buckets.
#[derive(Debug, Clone)]
pub struct PropertyExtractor {
    predicate: String,
    encoding: Encoding,
}

impl PropertyExtractor {
    pub fn new(predicate: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            predicate: predicate.into(),
            encoding,
        }
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }
}

/// Typed comparable value for an object term
fn scalar_for(term: &Term) -> Scalar {
    let lexical = term.lexical();
    match term {
        Term::Iri { .. } | Term::Blank { .. } => Scalar::Text(lexical.to_string()),
        Term::Literal { datatype, .. } => match datatype.as_deref() {
            Some(XSD_INTEGER) => lexical
                .parse::<i64>()
                .map(Scalar::Integer)
                .unwrap_or_else(|_| Scalar::infer(lexical)),
            Some(XSD_DECIMAL) | Some(XSD_DOUBLE) => match lexical.parse::<f64>() {
                Ok(f) if f.is_finite() => Scalar::Decimal(f),
                _ => Scalar::Text(lexical.to_string()),
            },
            Some(XSD_DATE_TIME) => parse_timestamp(lexical)
                .map(Scalar::DateTime)
                .unwrap_or_else(|| Scalar::Text(lexical.to_string())),
            _ => Scalar::infer(lexical),
        },
    }
}

impl QuadExtractor for PropertyExtractor {
    fn extract(&self, member: &Member) -> Extraction {
        let mut values: Vec<IndexValue> = Vec::new();

        for term in member.objects(&self.predicate) {
            let key = term.lexical();
            // An empty key would name no path segment
            if key.is_empty() || values.iter().any(|v| v.key == key) {
                continue;
            }
            values.push(IndexValue::new(key, scalar_for(term)).with_path(self.predicate.clone()));
        }

        if values.is_empty() {
            tracing::warn!(
                member = %member.id,
                predicate = %self.predicate,
                "Member has no value for predicate, skipping"
            );
            return Extraction::Skip(ExtractionMiss::new(member.id.clone(), self.predicate.clone()));
        }

        Extraction::Values(values)
    }
}

impl PathExtractor for PropertyExtractor {
    fn segments(&self) -> usize {
        self.encoding.segments()
    }

    fn extract_path(&self, id: &FragmentId, offset: usize) -> EngineResult<Option<IndexValue>> {
        Ok(self
            .encoding
            .read(id, offset)
            .map(|raw| IndexValue::from_key(raw).with_path(self.predicate.clone())))
    }

    fn set_path(&self, value: &IndexValue, id: &FragmentId, offset: usize) -> FragmentId {
        self.encoding.write(id, offset, &value.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: &str = "http://example.org/x";

    #[test]
    fn test_extract_single_value() {
        let extractor = PropertyExtractor::new(X, Encoding::Segment);
        let member = Member::new("m1").with(X, Term::typed("42", XSD_INTEGER));

        match extractor.extract(&member) {
            Extraction::Values(values) => {
                assert_eq!(values.len(), 1);
                assert_eq!(values[0].key, "42");
                assert_eq!(values[0].value, Scalar::Integer(42));
                assert_eq!(values[0].path.as_deref(), Some(X));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_fans_out_and_dedupes() {
        let extractor = PropertyExtractor::new(X, Encoding::Segment);
        let member = Member::new("m1")
            .with(X, Term::literal("a"))
            .with(X, Term::literal("b"))
            .with(X, Term::literal("a"));

        match extractor.extract(&member) {
            Extraction::Values(values) => {
                let keys: Vec<&str> = values.iter().map(|v| v.key.as_str()).collect();
                assert_eq!(keys, vec!["a", "b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_missing_predicate_skips() {
        let extractor = PropertyExtractor::new(X, Encoding::Segment);
        let member = Member::new("m1").with("http://example.org/other", Term::literal("1"));

        assert_eq!(
            extractor.extract(&member),
            Extraction::Skip(ExtractionMiss::new("m1", X))
        );
    }

    #[test]
    fn test_extract_ignores_empty_values() {
        let extractor = PropertyExtractor::new(X, Encoding::Segment);

        let only_empty = Member::new("m1").with(X, Term::literal(""));
        assert_eq!(
            extractor.extract(&only_empty),
            Extraction::Skip(ExtractionMiss::new("m1", X))
        );

        let mixed = Member::new("m2")
            .with(X, Term::literal(""))
            .with(X, Term::literal("b"));
        match extractor.extract(&mixed) {
            Extraction::Values(values) => {
                let keys: Vec<&str> = values.iter().map(|v| v.key.as_str()).collect();
                assert_eq!(keys, vec!["b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_typed_literals() {
        let dt = Term::typed("2024-01-01T00:00:00Z", XSD_DATE_TIME);
        assert_eq!(scalar_for(&dt), Scalar::DateTime(1_704_067_200_000));
        assert_eq!(scalar_for(&Term::typed("2.5", XSD_DECIMAL)), Scalar::Decimal(2.5));
        assert_eq!(
            scalar_for(&Term::iri("http://example.org/a")),
            Scalar::Text("http://example.org/a".into())
        );
    }

    #[test]
    fn test_path_roundtrip() {
        let extractor = PropertyExtractor::new(X, Encoding::Segment);
        let id = FragmentId::parse("1/2").unwrap();

        let value = extractor.extract_path(&id, 1).unwrap().unwrap();
        assert_eq!(value.key, "2");
        assert!(extractor.extract_path(&id, 2).unwrap().is_none());

        let moved = extractor.set_path(&IndexValue::from_key("3"), &id, 1);
        assert_eq!(moved.reconstruct(), "1/3");
    }

    #[test]
    fn test_query_encoding() {
        let extractor = PropertyExtractor::new(X, Encoding::Query("x".to_string()));
        assert_eq!(extractor.segments(), 0);

        let id = FragmentId::parse("a?x=7").unwrap();
        let value = extractor.extract_path(&id, 0).unwrap().unwrap();
        assert_eq!(value.value, Scalar::Integer(7));

        let moved = extractor.set_path(&IndexValue::integer(8), &id, 0);
        assert_eq!(moved.reconstruct(), "a?x=8");
    }
}
