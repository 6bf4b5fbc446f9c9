//! Reverse search over a corpus of stored queries.
//!
//! A [`Monitor`] holds registered queries and matches incoming documents
//! against all of them at once. Queries are decomposed into fragments, each
//! fragment is indexed under a signature of its most selective terms, and an
//! incoming document first retrieves the fragments whose signatures it could
//! satisfy before running only those candidates in full.
//!
//! ```no_run
//! use percolator::{
//!     Monitor, MonitorConfig, MonitorQuery, SchemaQueryParser, TermFilteredPresearcher,
//! };
//! use tantivy::schema::{Schema, TEXT};
//! use tantivy::TantivyDocument;
//!
//! # fn main() -> percolator::Result<()> {
//! let mut schema_builder = Schema::builder();
//! let body = schema_builder.add_text_field("body", TEXT);
//! let schema = schema_builder.build();
//!
//! let monitor = Monitor::new(
//!     schema.clone(),
//!     Box::new(SchemaQueryParser::for_schema(&schema)?),
//!     TermFilteredPresearcher::default(),
//!     MonitorConfig::default(),
//! )?;
//! monitor.register(&MonitorQuery::new("1", "body:mole"))?;
//!
//! let mut document = TantivyDocument::default();
//! document.add_text(body, "the mole and the rat");
//! let matches = monitor.match_document(document)?;
//! assert!(matches.matches.contains("1"));
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
mod error;
mod list;
pub mod monitor;
pub mod parser;
pub mod presearcher;
mod queries;
mod query;
mod query_decomposer;

pub use error::{Error, MatchError, QueryError, Result};
pub use monitor::{
    CacheEntry, CacheStats, CandidateMatcher, DocumentMatcher, Matches, Monitor, MonitorConfig,
    PurgeListener, SlowLog, SlowLogEntry,
};
pub use parser::{MonitorQueryParser, SchemaQueryParser};
pub use presearcher::{
    MultipassTermFilteredPresearcher, Presearcher, QueryTermFilter, TermFilteredPresearcher,
};
pub use queries::{BoostedQuery, DisMaxQuery};
pub use query::{Fingerprint, MonitorQuery};
pub use query_decomposer::QueryDecomposer;
