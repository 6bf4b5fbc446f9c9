use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery, TermSetQuery};
use tantivy::schema::{
    Field, FieldType, IndexRecordOption, Schema, SchemaBuilder, TantivyDocument, Value, INDEXED,
};
use tantivy::tokenizer::TokenizerManager;
use tantivy::{Document, Term};

use crate::analyzer::{QueryAnalyzer, QueryTerm};
use crate::error::{Error, Result};
use crate::presearcher::{Presearcher, QueryTermFilter, ANYTERM_FIELD};

/// Single-pass presearcher: one signature per query fragment, indexed in the
/// fragment's own fields.
#[derive(Default)]
pub struct TermFilteredPresearcher {
    analyzer: QueryAnalyzer,
}

impl TermFilteredPresearcher {
    pub fn new(analyzer: QueryAnalyzer) -> Self {
        Self { analyzer }
    }
}

impl Presearcher for TermFilteredPresearcher {
    fn register_fields(&self, document_schema: &Schema, builder: &mut SchemaBuilder) {
        for (_, entry) in document_schema.fields() {
            builder.add_field(entry.clone());
        }
        builder.add_bool_field(ANYTERM_FIELD, INDEXED);
    }

    fn index_query(
        &self,
        query: &dyn Query,
        _metadata: &BTreeMap<String, String>,
        schema: &Schema,
    ) -> Result<TantivyDocument> {
        let mut terms = HashSet::new();
        self.analyzer.build_tree(query).collect_terms(&mut terms);

        let mut document = TantivyDocument::default();
        write_signature(&mut document, terms, schema, |field| Ok(field))?;
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
        let mut terms = HashSet::new();
        for (field, token) in tokenize_document(document, document_schema, tokenizers)? {
            if term_filter.contains(field, &token) {
                terms.insert(Term::from_field_text(field, &token));
            }
        }
        Ok(Box::new(BooleanQuery::new(vec![
            (
                Occur::Should,
                Box::new(TermSetQuery::new(terms)) as Box<dyn Query>,
            ),
            (Occur::Should, Box::new(anyterm_query(schema)?)),
        ])))
    }
}

/// Write the collected signature terms into `document`, grouping texts per
/// field and joining them into a single value. `map_field` lets the multipass
/// presearcher redirect terms into per-pass fields.
pub(crate) fn write_signature(
    document: &mut TantivyDocument,
    terms: HashSet<QueryTerm>,
    schema: &Schema,
    map_field: impl Fn(Field) -> Result<Field>,
) -> Result<()> {
    let mut field_texts: HashMap<Field, Vec<String>> = HashMap::new();
    let mut any = false;
    for term in terms {
        if term.is_any() {
            any = true;
        } else {
            field_texts.entry(term.field).or_default().push(term.text);
        }
    }
    for (field, mut texts) in field_texts {
        texts.sort_unstable();
        document.add_text(map_field(field)?, texts.iter().join(" "));
    }
    if any {
        document.add_bool(schema.get_field(ANYTERM_FIELD)?, true);
    }
    Ok(())
}

pub(crate) fn anyterm_query(schema: &Schema) -> Result<TermQuery> {
    Ok(TermQuery::new(
        Term::from_field_bool(schema.get_field(ANYTERM_FIELD)?, true),
        IndexRecordOption::Basic,
    ))
}

/// Tokenize every indexed text value of the document with the tokenizer its
/// field is configured with. Non-text fields and non-text values are skipped.
pub(crate) fn tokenize_document(
    document: &TantivyDocument,
    document_schema: &Schema,
    tokenizers: &TokenizerManager,
) -> Result<Vec<(Field, String)>> {
    let mut tokens = Vec::new();
    for (field, value) in document.iter_fields_and_values() {
        let entry = document_schema.get_field_entry(field);
        let indexing_options = match entry.field_type() {
            FieldType::Str(options) => options.get_indexing_options(),
            _ => continue,
        };
        let Some(indexing_options) = indexing_options else {
            continue;
        };
        let Some(text) = value.as_str() else {
            continue;
        };
        let mut tokenizer = tokenizers.get(indexing_options.tokenizer()).ok_or_else(|| {
            Error::Config(format!(
                "no tokenizer named {:?} for field {:?}",
                indexing_options.tokenizer(),
                entry.name()
            ))
        })?;
        let mut token_stream = tokenizer.token_stream(text);
        token_stream.process(&mut |token| tokens.push((field, token.text.clone())));
    }
    Ok(tokens)
}

#[cfg(test)]
mod test {
    use tantivy::collector::Count;
    use tantivy::query::AllQuery;
    use tantivy::schema::TEXT;
    use tantivy::Index;

    use super::*;
    use crate::parser::MonitorQueryParser;

    fn document_schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("body", TEXT);
        schema_builder.build()
    }

    fn index_schema(document_schema: &Schema, presearcher: &TermFilteredPresearcher) -> Schema {
        let mut builder = Schema::builder();
        presearcher.register_fields(document_schema, &mut builder);
        builder.build()
    }

    fn parse(schema: &Schema, query: &str) -> Box<dyn Query> {
        crate::parser::SchemaQueryParser::for_schema(schema)
            .unwrap()
            .parse(query, &BTreeMap::new())
            .unwrap()
    }

    fn candidate_count(
        presearcher: &TermFilteredPresearcher,
        queries: &[&str],
        document_text: &str,
    ) -> usize {
        let document_schema = document_schema();
        let schema = index_schema(&document_schema, presearcher);
        let index = Index::create_in_ram(schema.clone());
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        for query in queries {
            let parsed = parse(&document_schema, query);
            let signature = presearcher
                .index_query(parsed.as_ref(), &BTreeMap::new(), &schema)
                .unwrap();
            writer.add_document(signature).unwrap();
        }
        writer.commit().unwrap();
        let searcher = index.reader().unwrap().searcher();
        let term_filter = QueryTermFilter::build(&searcher, &schema).unwrap();

        let body = document_schema.get_field("body").unwrap();
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
    fn test_document_retrieves_matching_signatures() {
        let presearcher = TermFilteredPresearcher::default();
        let queries = ["body:mole", "body:rat", "body:weasel"];
        assert_eq!(candidate_count(&presearcher, &queries, "the mole and the rat"), 2);
        assert_eq!(candidate_count(&presearcher, &queries, "nothing relevant"), 0);
    }

    #[test]
    fn test_conjunction_indexes_one_term() {
        let presearcher = TermFilteredPresearcher::default();
        let queries = ["+body:wellington +body:mole"];
        // Only the more selective term is in the signature.
        assert_eq!(candidate_count(&presearcher, &queries, "wellington"), 1);
        assert_eq!(candidate_count(&presearcher, &queries, "mole"), 0);
    }

    #[test]
    fn test_match_all_query_is_always_a_candidate() {
        let document_schema = document_schema();
        let presearcher = TermFilteredPresearcher::default();
        let schema = index_schema(&document_schema, &presearcher);
        let signature = presearcher
            .index_query(&AllQuery, &BTreeMap::new(), &schema)
            .unwrap();

        let index = Index::create_in_ram(schema.clone());
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        writer.add_document(signature).unwrap();
        writer.commit().unwrap();
        let searcher = index.reader().unwrap().searcher();
        let term_filter = QueryTermFilter::build(&searcher, &schema).unwrap();

        let body = document_schema.get_field("body").unwrap();
        let mut document = TantivyDocument::default();
        document.add_text(body, "anything at all");
        let query = presearcher
            .build_query(
                &document,
                &document_schema,
                &schema,
                index.tokenizers(),
                &term_filter,
            )
            .unwrap();
        assert_eq!(searcher.search(query.as_ref(), &Count).unwrap(), 1);
    }
}
