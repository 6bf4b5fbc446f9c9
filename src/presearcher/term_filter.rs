use std::collections::{HashMap, HashSet};

use tantivy::schema::{Field, FieldType, Schema};
use tantivy::Searcher;

/// Snapshot of every term present in the query index, per field.
///
/// Document tokens absent from this set cannot retrieve any fragment, so the
/// presearcher drops them before building the candidate-selection query.
/// Filtering is sound because a term missing from the index matches nothing.
pub struct QueryTermFilter {
    terms: HashMap<Field, HashSet<Vec<u8>>>,
}

impl QueryTermFilter {
    pub fn empty() -> Self {
        Self {
            terms: HashMap::new(),
        }
    }

    pub fn build(searcher: &Searcher, schema: &Schema) -> tantivy::Result<Self> {
        let mut terms: HashMap<Field, HashSet<Vec<u8>>> = HashMap::new();
        for (field, entry) in schema.fields() {
            let indexed_text = match entry.field_type() {
                FieldType::Str(options) => options.get_indexing_options().is_some(),
                _ => false,
            };
            if !indexed_text {
                continue;
            }
            let field_terms = terms.entry(field).or_default();
            for segment_reader in searcher.segment_readers() {
                let inverted_index = segment_reader.inverted_index(field)?;
                let mut stream = inverted_index.terms().stream()?;
                while stream.advance() {
                    field_terms.insert(stream.key().to_vec());
                }
            }
        }
        Ok(Self { terms })
    }

    pub fn contains(&self, field: Field, token: &str) -> bool {
        self.terms
            .get(&field)
            .map_or(false, |terms| terms.contains(token.as_bytes()))
    }

    pub fn term_count(&self) -> usize {
        self.terms.values().map(HashSet::len).sum()
    }
}
