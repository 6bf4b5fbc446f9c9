use std::collections::BTreeMap;

use tantivy::query::{Query, QueryParser};
use tantivy::schema::{FieldType, Schema};
use tantivy::tokenizer::TokenizerManager;

use crate::error::{Error, Result};

/// Turns a stored query string into a tantivy query.
///
/// Implementations may consult the query's metadata, so one monitor can hold
/// queries written for different dialects or languages.
pub trait MonitorQueryParser: Send + Sync {
    fn parse(&self, query: &str, metadata: &BTreeMap<String, String>) -> Result<Box<dyn Query>>;
}

/// Default parser: tantivy's own query grammar over every indexed text field
/// of the document schema.
pub struct SchemaQueryParser {
    parser: QueryParser,
}

impl SchemaQueryParser {
    pub fn for_schema(schema: &Schema) -> Result<Self> {
        let default_fields: Vec<_> = schema
            .fields()
            .filter(|(_, entry)| match entry.field_type() {
                FieldType::Str(options) => options.get_indexing_options().is_some(),
                _ => false,
            })
            .map(|(field, _)| field)
            .collect();
        if default_fields.is_empty() {
            return Err(Error::Config(
                "document schema has no indexed text fields".to_string(),
            ));
        }
        Ok(Self {
            parser: QueryParser::new(schema.clone(), default_fields, TokenizerManager::default()),
        })
    }
}

impl MonitorQueryParser for SchemaQueryParser {
    fn parse(&self, query: &str, _metadata: &BTreeMap<String, String>) -> Result<Box<dyn Query>> {
        self.parser
            .parse_query(query)
            .map_err(|error| Error::Parse(error.to_string()))
    }
}
