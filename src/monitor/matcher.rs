use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use tantivy::collector::{Collector, SegmentCollector};
use tantivy::query::Query;
use tantivy::schema::{Schema, TantivyDocument};
use tantivy::{Index, ReloadPolicy, Searcher, SegmentOrdinal, SegmentReader};

use crate::error::MatchError;

const DOCUMENT_INDEX_BUDGET: usize = 15_000_000;

/// Runs one candidate query against the document under test. The default
/// implementation is [`DocumentMatcher`]; custom implementations can score,
/// highlight, or batch instead.
pub trait CandidateMatcher {
    fn match_query(
        &mut self,
        query_id: &str,
        query: &dyn Query,
        metadata: &BTreeMap<String, String>,
    ) -> tantivy::Result<bool>;
}

/// Matches candidates against a throwaway single-document index.
pub struct DocumentMatcher {
    searcher: Searcher,
}

impl DocumentMatcher {
    pub fn for_document(document: TantivyDocument, schema: Schema) -> tantivy::Result<Self> {
        let index = Index::create_in_ram(schema);
        let mut writer = index.writer_with_num_threads(1, DOCUMENT_INDEX_BUDGET)?;
        writer.add_document(document)?;
        writer.commit()?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            searcher: reader.searcher(),
        })
    }
}

impl CandidateMatcher for DocumentMatcher {
    fn match_query(
        &mut self,
        _query_id: &str,
        query: &dyn Query,
        _metadata: &BTreeMap<String, String>,
    ) -> tantivy::Result<bool> {
        self.searcher.search(query, &QueryMatchCollector)
    }
}

/// Result of matching one document against the monitor.
pub struct Matches {
    pub matches: HashSet<String>,
    pub errors: Vec<MatchError>,
    /// Candidates actually run against the document, after presearch.
    pub queries_run: usize,
    /// Time spent building and running the candidate-selection query.
    pub query_build_time: Duration,
    /// Time spent running candidates against the document.
    pub search_time: Duration,
    pub slow_log: SlowLog,
}

impl Matches {
    pub(crate) fn new(slow_log_limit: Duration) -> Self {
        Self {
            matches: HashSet::new(),
            errors: Vec::new(),
            queries_run: 0,
            query_build_time: Duration::ZERO,
            search_time: Duration::ZERO,
            slow_log: SlowLog::new(slow_log_limit),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    pub query_id: String,
    pub elapsed: Duration,
}

/// Records candidates that took longer than the configured limit to run.
#[derive(Debug, Clone)]
pub struct SlowLog {
    limit: Duration,
    entries: Vec<SlowLogEntry>,
}

impl SlowLog {
    pub(crate) fn new(limit: Duration) -> Self {
        Self {
            limit,
            entries: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, query_id: &str, elapsed: Duration) {
        if elapsed > self.limit {
            self.entries.push(SlowLogEntry {
                query_id: query_id.to_string(),
                elapsed,
            });
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn entries(&self) -> &[SlowLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for SlowLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{} [{:?}]", entry.query_id, entry.elapsed)?;
        }
        Ok(())
    }
}

/// Bool collector: did anything match at all.
struct QueryMatchCollector;

impl Collector for QueryMatchCollector {
    type Fruit = bool;
    type Child = QueryMatchChildCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        _segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(QueryMatchChildCollector { is_match: false })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<bool>) -> tantivy::Result<bool> {
        Ok(segment_fruits.into_iter().any(|matched| matched))
    }
}

struct QueryMatchChildCollector {
    is_match: bool,
}

impl SegmentCollector for QueryMatchChildCollector {
    type Fruit = bool;

    fn collect(&mut self, _doc: tantivy::DocId, _score: tantivy::Score) {
        self.is_match = true;
    }

    fn harvest(self) -> Self::Fruit {
        self.is_match
    }
}
