use std::collections::{BTreeMap, HashSet};

use tantivy::query::{BooleanQuery, Occur, Query, TermSetQuery};
use tantivy::schema::{FieldType, Schema, SchemaBuilder, TantivyDocument, INDEXED};
use tantivy::tokenizer::TokenizerManager;
use tantivy::Term;

use crate::analyzer::QueryAnalyzer;
use crate::error::{Error, Result};
use crate::presearcher::term_filtered::{anyterm_query, tokenize_document, write_signature};
use crate::presearcher::{Presearcher, QueryTermFilter, ANYTERM_FIELD};

/// Multi-pass presearcher: indexes one signature per extraction phase, each
/// in its own set of suffixed fields, and requires a candidate document to
/// match every pass. Costs index space, buys precision on conjunctions.
pub struct MultipassTermFilteredPresearcher {
    analyzer: QueryAnalyzer,
    passes: usize,
}

impl MultipassTermFilteredPresearcher {
    pub fn new(analyzer: QueryAnalyzer, passes: usize) -> Result<Self> {
        if passes == 0 {
            return Err(Error::Config(
                "multipass presearcher needs at least one pass".to_string(),
            ));
        }
        Ok(Self { analyzer, passes })
    }

    fn pass_field_name(name: &str, pass: usize) -> String {
        if pass == 0 {
            name.to_string()
        } else {
            format!("{name}_{pass}")
        }
    }
}

impl Presearcher for MultipassTermFilteredPresearcher {
    fn register_fields(&self, document_schema: &Schema, builder: &mut SchemaBuilder) {
        for (_, entry) in document_schema.fields() {
            builder.add_field(entry.clone());
        }
        for pass in 1..self.passes {
            for (_, entry) in document_schema.fields() {
                if let FieldType::Str(options) = entry.field_type() {
                    if options.get_indexing_options().is_some() {
                        builder.add_text_field(
                            &Self::pass_field_name(entry.name(), pass),
                            options.clone(),
                        );
                    }
                }
            }
        }
        builder.add_bool_field(ANYTERM_FIELD, INDEXED);
    }

    fn index_query(
        &self,
        query: &dyn Query,
        _metadata: &BTreeMap<String, String>,
        schema: &Schema,
    ) -> Result<TantivyDocument> {
        let mut tree = self.analyzer.build_tree(query);
        let mut document = TantivyDocument::default();
        for pass in 0..self.passes {
            let mut terms = HashSet::new();
            tree.collect_terms(&mut terms);
            write_signature(&mut document, terms, schema, |field| {
                let name = Self::pass_field_name(schema.get_field_entry(field).name(), pass);
                Ok(schema.get_field(&name)?)
            })?;
            // An exhausted tree just repeats its final signature in the
            // remaining passes.
            tree.advance_phase();
        }
        Ok(document)
    }

    fn build_query(
        &self,
        document: &TantivyDocument,
        document_schema: &Schema,
        schema: &Schema,
        tokenizers: &TokenizerManager,
        term_filter: &QueryTermFilter,
    ) -> Result<Box<dyn Query>> {
        let tokens = tokenize_document(document, document_schema, tokenizers)?;
        let mut pass_clauses = Vec::new();
        for pass in 0..self.passes {
            let mut terms = HashSet::new();
            for (field, token) in &tokens {
                let name =
                    Self::pass_field_name(document_schema.get_field_entry(*field).name(), pass);
                let pass_field = schema.get_field(&name)?;
                if term_filter.contains(pass_field, token) {
                    terms.insert(Term::from_field_text(pass_field, token));
                }
            }
            pass_clauses.push((
                Occur::Must,
                Box::new(TermSetQuery::new(terms)) as Box<dyn Query>,
            ));
        }
        Ok(Box::new(BooleanQuery::new(vec![
            (
                Occur::Should,
                Box::new(BooleanQuery::new(pass_clauses)) as Box<dyn Query>,
            ),
            (Occur::Should, Box::new(anyterm_query(schema)?)),
        ])))
    }
}

#[cfg(test)]
mod test {
    use tantivy::collector::Count;
    use tantivy::Index;

    use super::*;
    use crate::parser::{MonitorQueryParser, SchemaQueryParser};

    fn candidate_count(passes: usize, queries: &[&str], document_text: &str) -> usize {
        let mut schema_builder = Schema::builder();
        let body = schema_builder.add_text_field("body", tantivy::schema::TEXT);
        let document_schema = schema_builder.build();

        let presearcher =
            MultipassTermFilteredPresearcher::new(QueryAnalyzer::default(), passes).unwrap();
        let mut builder = Schema::builder();
        presearcher.register_fields(&document_schema, &mut builder);
        let schema = builder.build();

        let index = Index::create_in_ram(schema.clone());
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        let parser = SchemaQueryParser::for_schema(&document_schema).unwrap();
        for query in queries {
            let parsed = parser.parse(query, &BTreeMap::new()).unwrap();
            let signature = presearcher
                .index_query(parsed.as_ref(), &BTreeMap::new(), &schema)
                .unwrap();
            writer.add_document(signature).unwrap();
        }
        writer.commit().unwrap();
        let searcher = index.reader().unwrap().searcher();
        let term_filter = QueryTermFilter::build(&searcher, &schema).unwrap();

        let mut document = TantivyDocument::default();
        document.add_text(body, document_text);
        let query = presearcher
            .build_query(
                &document,
                &document_schema,
                &schema,
                index.tokenizers(),
                &term_filter,
            )
            .unwrap();
        searcher.search(query.as_ref(), &Count).unwrap()
    }

    #[test]
    fn test_rejects_zero_passes() {
        assert!(MultipassTermFilteredPresearcher::new(QueryAnalyzer::default(), 0).is_err());
    }

    #[test]
    fn test_second_pass_filters_partial_conjunction_matches() {
        let queries = ["+body:wellington +body:mole"];
        assert_eq!(candidate_count(2, queries.as_ref(), "wellington mole"), 1);
        // A single-pass presearcher would select this document as a
        // candidate; the second pass rules it out.
        assert_eq!(candidate_count(2, queries.as_ref(), "wellington badger"), 0);
        assert_eq!(candidate_count(2, queries.as_ref(), "badger"), 0);
    }

    #[test]
    fn test_exhausted_tree_repeats_its_signature() {
        let queries = ["body:mole body:rat"];
        assert_eq!(candidate_count(3, queries.as_ref(), "a mole"), 1);
        assert_eq!(candidate_count(3, queries.as_ref(), "a stoat"), 0);
    }
}
