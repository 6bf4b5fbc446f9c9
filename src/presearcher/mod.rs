//! Presearchers turn stored queries into indexable signature documents, and
//! incoming documents into candidate-selection queries over those signatures.
//!
//! The contract is soundness: the query built from a document must retrieve
//! every indexed fragment whose original query could match that document.
//! Retrieving too much only costs matcher time; retrieving too little loses
//! matches.

mod multipass;
mod term_filter;
mod term_filtered;

pub use multipass::MultipassTermFilteredPresearcher;
pub use term_filter::QueryTermFilter;
pub use term_filtered::TermFilteredPresearcher;

use std::collections::BTreeMap;

use tantivy::query::Query;
use tantivy::schema::{Schema, SchemaBuilder, TantivyDocument};
use tantivy::tokenizer::TokenizerManager;

use crate::error::Result;

/// Indexed bool field set on fragments whose signature degenerated to
/// match-all; the document query always includes it as a disjunct.
pub const ANYTERM_FIELD: &str = "__anytermfield__";

pub trait Presearcher: Send + Sync {
    /// Add this presearcher's fields to the query index schema. Document
    /// schema fields are registered first, so field ids used when analyzing
    /// queries against the document schema stay valid in the query index.
    fn register_fields(&self, document_schema: &Schema, builder: &mut SchemaBuilder);

    /// Build the signature document under which a query fragment is indexed.
    fn index_query(
        &self,
        query: &dyn Query,
        metadata: &BTreeMap<String, String>,
        schema: &Schema,
    ) -> Result<TantivyDocument>;

    /// Build the candidate-selection query for an incoming document.
    fn build_query(
        &self,
        document: &TantivyDocument,
        document_schema: &Schema,
        schema: &Schema,
        tokenizers: &TokenizerManager,
        term_filter: &QueryTermFilter,
    ) -> Result<Box<dyn Query>>;
}
