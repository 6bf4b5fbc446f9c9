//! The monitor: registers queries, indexes their presearch signatures, and
//! matches incoming documents against every registered query.

mod cache;
mod index;
mod matcher;

pub use cache::{CacheEntry, CacheStats};
pub use matcher::{CandidateMatcher, DocumentMatcher, Matches, SlowLog, SlowLogEntry};

use std::collections::HashSet;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tantivy::query::{AllQuery, TermQuery};
use tantivy::schema::{IndexRecordOption, Schema, TantivyDocument};
use tantivy::Term;

use crate::error::{Error, MatchError, QueryError, Result};
use crate::monitor::cache::{CacheMap, QueryCache};
use crate::monitor::index::{IndexedFragment, QueryIndex};
use crate::parser::MonitorQueryParser;
use crate::presearcher::{Presearcher, QueryTermFilter};
use crate::query::MonitorQuery;
use crate::query_decomposer::QueryDecomposer;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Pending fragments above this count trigger an intermediate commit
    /// while registering a batch of queries.
    pub commit_batch_size: usize,
    /// Interval of the background cache purge. Zero disables the background
    /// thread; [`Monitor::purge_cache`] still works.
    pub purge_frequency: Duration,
    /// Candidates slower than this are recorded in the per-match slow log.
    pub slow_log_limit: Duration,
    pub writer_memory_budget: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            commit_batch_size: 5000,
            purge_frequency: Duration::from_secs(300),
            slow_log_limit: Duration::from_millis(2),
            writer_memory_budget: 50_000_000,
        }
    }
}

/// Notified after every purge attempt, mainly for metrics and tests.
pub trait PurgeListener: Send + Sync {
    fn purged(&self, _stats: &CacheStats) {}
    fn purge_failed(&self, _error: &Error) {}
}

/// A fragment ready for publication: its cache entry plus the signature
/// document to index.
struct PendingFragment {
    entry: CacheEntry,
    document: TantivyDocument,
}

struct MonitorInner<P: Presearcher> {
    document_schema: Schema,
    parser: Box<dyn MonitorQueryParser>,
    presearcher: P,
    index: QueryIndex,
    cache: QueryCache,
    term_filter: RwLock<Arc<QueryTermFilter>>,
    /// Commits hold the shared side while publishing cache entries and
    /// committing their documents, so a purge that begins mid-commit waits
    /// until those fragments are searchable. The purge holds the exclusive
    /// side around the overflow-buffer installation and the final swap.
    purge_lock: RwLock<()>,
    /// One purge cycle at a time.
    purge_cycle: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn PurgeListener>>>,
    last_purged: Mutex<Option<SystemTime>>,
    /// Nanoseconds; adjustable at runtime without pausing matches.
    slow_log_limit: AtomicU64,
    config: MonitorConfig,
}

/// Stores queries and matches documents against them.
///
/// Reverse search: the monitor's tantivy index holds one signature document
/// per stored query fragment, an incoming document is turned into a query
/// over those signatures, and the surviving candidates are run one by one
/// against a single-document index of the incoming document.
pub struct Monitor<P: Presearcher + 'static> {
    inner: Arc<MonitorInner<P>>,
    // Behind a mutex so the monitor stays Sync; mpsc senders are not.
    purge_shutdown: Mutex<Option<mpsc::Sender<()>>>,
    purge_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Presearcher + 'static> Monitor<P> {
    /// In-memory monitor with nothing registered.
    pub fn new(
        document_schema: Schema,
        parser: Box<dyn MonitorQueryParser>,
        presearcher: P,
        config: MonitorConfig,
    ) -> Result<Self> {
        let index = QueryIndex::create_in_ram(
            &document_schema,
            &presearcher,
            config.writer_memory_budget,
        )?;
        let inner = Self::build_inner(document_schema, parser, presearcher, index, config);
        Self::start(inner)
    }

    /// Open (or create) a persisted monitor. Stored queries are re-parsed to
    /// rebuild the cache; queries that no longer parse are returned as
    /// [`QueryError`]s and stay unmatchable until re-registered.
    pub fn open(
        path: &Path,
        document_schema: Schema,
        parser: Box<dyn MonitorQueryParser>,
        presearcher: P,
        config: MonitorConfig,
    ) -> Result<(Self, Vec<QueryError>)> {
        let index = QueryIndex::open_in_dir(
            path,
            &document_schema,
            &presearcher,
            config.writer_memory_budget,
        )?;
        let inner = Self::build_inner(document_schema, parser, presearcher, index, config);
        let errors = inner.load_stored_queries()?;
        Ok((Self::start(inner)?, errors))
    }

    fn build_inner(
        document_schema: Schema,
        parser: Box<dyn MonitorQueryParser>,
        presearcher: P,
        index: QueryIndex,
        config: MonitorConfig,
    ) -> Arc<MonitorInner<P>> {
        Arc::new(MonitorInner {
            document_schema,
            parser,
            presearcher,
            index,
            cache: QueryCache::new(),
            term_filter: RwLock::new(Arc::new(QueryTermFilter::empty())),
            purge_lock: RwLock::new(()),
            purge_cycle: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            last_purged: Mutex::new(None),
            slow_log_limit: AtomicU64::new(config.slow_log_limit.as_nanos() as u64),
            config,
        })
    }

    fn start(inner: Arc<MonitorInner<P>>) -> Result<Self> {
        if inner.config.purge_frequency.is_zero() {
            return Ok(Self {
                inner,
                purge_shutdown: Mutex::new(None),
                purge_thread: Mutex::new(None),
            });
        }
        let frequency = inner.config.purge_frequency;
        let weak = Arc::downgrade(&inner);
        let (shutdown, signal) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("percolator-purge".to_string())
            .spawn(move || Self::purge_loop(weak, signal, frequency))?;
        Ok(Self {
            inner,
            purge_shutdown: Mutex::new(Some(shutdown)),
            purge_thread: Mutex::new(Some(thread)),
        })
    }

    fn purge_loop(
        monitor: Weak<MonitorInner<P>>,
        signal: mpsc::Receiver<()>,
        frequency: Duration,
    ) {
        loop {
            match signal.recv_timeout(frequency) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            let Some(monitor) = monitor.upgrade() else {
                return;
            };
            if let Err(error) = monitor.purge_cache() {
                warn!("background cache purge failed: {error}");
            }
        }
    }

    pub fn document_schema(&self) -> &Schema {
        &self.inner.document_schema
    }

    /// Register or replace queries. Returns one [`QueryError`] per query
    /// that failed to parse or index; the rest of the batch still lands.
    pub fn update(&self, queries: &[MonitorQuery]) -> Result<Vec<QueryError>> {
        self.inner.update(queries)
    }

    pub fn register(&self, query: &MonitorQuery) -> Result<Vec<QueryError>> {
        self.inner.update(std::slice::from_ref(query))
    }

    /// Delete queries by id. Cache entries for deleted queries linger until
    /// the next purge; they are unreachable because their fragments are gone
    /// from the index.
    pub fn delete_by_ids<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        self.inner.commit(&ids, Vec::new())
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    /// Match a document with the default single-document matcher.
    pub fn match_document(&self, document: TantivyDocument) -> Result<Matches> {
        let (candidates, cache, mut matches) = self.inner.collect_candidates(&document)?;
        // Candidate selection is done with the document, so the matcher can
        // take it whole.
        let mut matcher =
            DocumentMatcher::for_document(document, self.inner.document_schema.clone())
                .map_err(Error::Index)?;
        self.inner
            .run_candidates(candidates, &cache, &mut matcher, &mut matches);
        Ok(matches)
    }

    /// Match a document with a caller-supplied matcher.
    pub fn match_document_with(
        &self,
        document: &TantivyDocument,
        matcher: &mut dyn CandidateMatcher,
    ) -> Result<Matches> {
        self.inner.match_document_with(document, matcher)
    }

    pub fn get_query(&self, id: &str) -> Result<Option<MonitorQuery>> {
        self.inner.get_query(id)
    }

    pub fn get_query_ids(&self) -> Result<HashSet<String>> {
        self.inner.get_query_ids()
    }

    pub fn get_query_count(&self) -> Result<usize> {
        Ok(self.inner.get_query_ids()?.len())
    }

    /// Number of indexed fragments; at least [`get_query_count`], since one
    /// query may decompose into several fragments.
    ///
    /// [`get_query_count`]: Monitor::get_query_count
    pub fn get_disjunct_count(&self) -> usize {
        self.inner.index.searcher().num_docs() as usize
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache_stats()
    }

    /// Drop cache entries whose fragments are no longer indexed. Runs
    /// concurrently with updates and matches.
    pub fn purge_cache(&self) -> Result<CacheStats> {
        self.inner.purge_cache()
    }

    pub fn register_purge_listener(&self, listener: Arc<dyn PurgeListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Adjust the slow log threshold for subsequent match runs.
    pub fn set_slow_log_limit(&self, limit: Duration) {
        self.inner
            .slow_log_limit
            .store(limit.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl<P: Presearcher + 'static> Drop for Monitor<P> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.purge_shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.purge_thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl<P: Presearcher> MonitorInner<P> {
    fn update(&self, queries: &[MonitorQuery]) -> Result<Vec<QueryError>> {
        let mut errors = Vec::new();
        let mut deletes = Vec::new();
        let mut pending = Vec::new();
        for query in queries {
            // The previous version is replaced even when the new one is
            // broken, so a broken update never leaves a stale query running.
            deletes.push(query.id.clone());
            match self.decompose(query) {
                Ok(fragments) => pending.extend(fragments),
                Err(error) => errors.push(QueryError::new(&query.id, &query.query, &error)),
            }
            if pending.len() > self.config.commit_batch_size {
                self.commit(&deletes, mem::take(&mut pending))?;
                deletes.clear();
            }
        }
        self.commit(&deletes, pending)?;
        Ok(errors)
    }

    /// Parse and decompose one query into its indexable fragments.
    fn decompose(&self, query: &MonitorQuery) -> Result<Vec<PendingFragment>> {
        let parsed = self.parser.parse(&query.query, &query.metadata)?;
        if let Some(highlight) = &query.highlight {
            // Validated now so a broken highlight query surfaces at
            // registration rather than at match time.
            self.parser.parse(highlight, &query.metadata)?;
        }

        let mut subqueries = Vec::new();
        QueryDecomposer::new(&mut subqueries).decompose(parsed);

        let root = query.fingerprint();
        let source =
            bincode::serialize(query).map_err(|error| Error::Serialization(error.to_string()))?;
        let fields = self.index.fields;

        let mut fragments = Vec::with_capacity(subqueries.len());
        for (position, subquery) in subqueries.into_iter().enumerate() {
            let fingerprint = root.child(position as u32);
            let mut document = self.presearcher.index_query(
                subquery.as_ref(),
                &query.metadata,
                self.index.schema(),
            )?;
            document.add_text(fields.id, &query.id);
            document.add_text(fields.del, &query.id);
            document.add_bytes(fields.hash, fingerprint.as_bytes().to_vec());
            document.add_bytes(fields.source, source.clone());
            fragments.push(PendingFragment {
                entry: CacheEntry {
                    fingerprint,
                    query: subquery,
                    metadata: query.metadata.clone(),
                },
                document,
            });
        }
        Ok(fragments)
    }

    /// Apply deletes and publish fragments atomically with respect to
    /// matching: cache entries are published before their documents are
    /// committed, so every fragment a searcher can see resolves in the
    /// cache snapshot taken afterwards. The shared purge guard keeps a
    /// concurrent purge from scanning the index between an entry's
    /// publication and its fragment becoming searchable, which would drop
    /// the entry from the rebuilt map.
    fn commit(&self, deletes: &[String], fragments: Vec<PendingFragment>) -> Result<()> {
        let _publishing = self.purge_lock.read();
        let mut writer = self.index.writer.lock();
        for id in deletes {
            writer.delete_term(Term::from_field_text(self.index.fields.del, id));
        }
        let published = fragments.len();
        for fragment in fragments {
            self.cache.publish(fragment.entry);
            writer.add_document(fragment.document)?;
        }
        writer.commit()?;
        self.index.reader.reload()?;
        self.rebuild_term_filter()?;
        debug!(
            "committed {published} fragment(s), {deleted} delete(s)",
            deleted = deletes.len()
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _publishing = self.purge_lock.read();
        let mut writer = self.index.writer.lock();
        writer.delete_all_documents()?;
        writer.commit()?;
        self.index.reader.reload()?;
        self.cache.clear();
        self.rebuild_term_filter()?;
        Ok(())
    }

    fn rebuild_term_filter(&self) -> Result<()> {
        let searcher = self.index.searcher();
        let filter = QueryTermFilter::build(&searcher, self.index.schema())?;
        *self.term_filter.write() = Arc::new(filter);
        Ok(())
    }

    fn match_document_with(
        &self,
        document: &TantivyDocument,
        matcher: &mut dyn CandidateMatcher,
    ) -> Result<Matches> {
        let (candidates, cache, mut matches) = self.collect_candidates(document)?;
        self.run_candidates(candidates, &cache, matcher, &mut matches);
        Ok(matches)
    }

    fn collect_candidates(
        &self,
        document: &TantivyDocument,
    ) -> Result<(Vec<IndexedFragment>, Arc<CacheMap>, Matches)> {
        let build_start = Instant::now();
        // Searcher first, cache second: entries are published before their
        // fragments commit, so the snapshot covers everything visible here.
        let searcher = self.index.searcher();
        let cache = self.cache.snapshot();
        let term_filter = self.term_filter.read().clone();

        let candidate_query = self.presearcher.build_query(
            document,
            &self.document_schema,
            self.index.schema(),
            self.index.tokenizers(),
            &term_filter,
        )?;
        let candidates = self.index.scan(&searcher, candidate_query.as_ref())?;
        let slow_log_limit = Duration::from_nanos(self.slow_log_limit.load(Ordering::Relaxed));
        let mut matches = Matches::new(slow_log_limit);
        matches.query_build_time = build_start.elapsed();
        Ok((candidates, cache, matches))
    }

    fn run_candidates(
        &self,
        candidates: Vec<IndexedFragment>,
        cache: &CacheMap,
        matcher: &mut dyn CandidateMatcher,
        matches: &mut Matches,
    ) {
        let search_start = Instant::now();
        for candidate in candidates {
            // Fragments of deleted queries can outlive their cache entries
            // between commits; fragments without entries are simply stale.
            let Some(entry) = cache.get(&candidate.fingerprint) else {
                continue;
            };
            matches.queries_run += 1;
            let candidate_start = Instant::now();
            match matcher.match_query(&candidate.id, entry.query.as_ref(), &entry.metadata) {
                Ok(true) => {
                    matches.matches.insert(candidate.id.clone());
                }
                Ok(false) => {}
                Err(error) => matches.errors.push(MatchError::new(&candidate.id, &error)),
            }
            matches.slow_log.record(&candidate.id, candidate_start.elapsed());
        }
        matches.search_time = search_start.elapsed();
    }

    fn get_query(&self, id: &str) -> Result<Option<MonitorQuery>> {
        let searcher = self.index.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.index.fields.id, id),
            IndexRecordOption::Basic,
        );
        match self.index.scan(&searcher, &query)?.first() {
            Some(fragment) => Ok(Some(fragment.stored_query()?)),
            None => Ok(None),
        }
    }

    fn get_query_ids(&self) -> Result<HashSet<String>> {
        let searcher = self.index.searcher();
        Ok(self
            .index
            .scan(&searcher, &AllQuery)?
            .into_iter()
            .map(|fragment| fragment.id)
            .collect())
    }

    fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cached_queries: self.cache.len(),
            last_purged: *self.last_purged.lock(),
        }
    }

    fn purge_cache(&self) -> Result<CacheStats> {
        let _cycle = self.purge_cycle.lock();
        let snapshot = {
            let _exclusive = self.purge_lock.write();
            self.cache.begin_purge()
        };
        match self.rebuild_cache(&snapshot) {
            Ok(rebuilt) => {
                {
                    let _exclusive = self.purge_lock.write();
                    self.cache.finish_purge(rebuilt);
                }
                *self.last_purged.lock() = Some(SystemTime::now());
                let stats = self.cache_stats();
                info!("cache purged, {} entr(ies) remain", stats.cached_queries);
                for listener in self.listeners.read().iter() {
                    listener.purged(&stats);
                }
                Ok(stats)
            }
            Err(error) => {
                self.cache.abort_purge();
                warn!("cache purge failed: {error}");
                for listener in self.listeners.read().iter() {
                    listener.purge_failed(&error);
                }
                Err(error)
            }
        }
    }

    /// Full index scan copying entries for still-indexed fragments out of
    /// the pre-purge snapshot. Runs without the cache lock held; concurrent
    /// publishes go to the overflow buffer and are merged afterwards.
    fn rebuild_cache(&self, snapshot: &CacheMap) -> Result<CacheMap> {
        self.index.reader.reload()?;
        let searcher = self.index.searcher();
        let rebuilt = CacheMap::new();
        for fragment in self.index.scan(&searcher, &AllQuery)? {
            if let Some(entry) = snapshot.get(&fragment.fingerprint) {
                rebuilt.insert(fragment.fingerprint, entry.clone());
            }
        }
        Ok(rebuilt)
    }

    /// Rebuild the cache from the serialized queries stored with each
    /// fragment. Fingerprints are deterministic, so re-decomposing yields
    /// the same keys the index already holds.
    fn load_stored_queries(&self) -> Result<Vec<QueryError>> {
        let searcher = self.index.searcher();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for fragment in self.index.scan(&searcher, &AllQuery)? {
            if !seen.insert(fragment.id.clone()) {
                continue;
            }
            match fragment.stored_query() {
                Ok(stored) => {
                    if let Err(error) = self.reload_query(&stored) {
                        errors.push(QueryError::new(&fragment.id, &stored.query, &error));
                    }
                }
                Err(error) => errors.push(QueryError::new(&fragment.id, "", &error)),
            }
        }
        self.rebuild_term_filter()?;
        info!(
            "loaded {loaded} stored quer(ies), {failed} failed",
            loaded = seen.len() - errors.len(),
            failed = errors.len()
        );
        Ok(errors)
    }

    fn reload_query(&self, query: &MonitorQuery) -> Result<()> {
        for fragment in self.decompose(query)? {
            self.cache.publish(fragment.entry);
        }
        Ok(())
    }
}
