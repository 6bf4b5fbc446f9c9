//! Randomized equivalence tests: the monitor's answer must agree exactly
//! with running every stored query against the document one by one. The
//! presearch phase may select too many candidates, never too few, and the
//! final matcher removes the excess.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use dashmap::DashMap;
use percolator::analyzer::QueryAnalyzer;
use percolator::{
    BoostedQuery, DisMaxQuery, DocumentMatcher, Error, Monitor, MonitorConfig, MonitorQuery,
    MonitorQueryParser, MultipassTermFilteredPresearcher, Presearcher, QueryDecomposer, Result,
    TermFilteredPresearcher,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tantivy::query::{BooleanQuery, Occur, Query, QueryClone, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, TantivyDocument, TEXT};
use tantivy::Term;

const VOCABULARY: [&str; 8] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta",
];

fn document_schema() -> (Schema, Field) {
    let mut schema_builder = Schema::builder();
    let body = schema_builder.add_text_field("body", TEXT);
    (schema_builder.build(), body)
}

fn random_term(rng: &mut StdRng, body: Field) -> Box<dyn Query> {
    let word = VOCABULARY[rng.gen_range(0..VOCABULARY.len())];
    Box::new(TermQuery::new(
        Term::from_field_text(body, word),
        IndexRecordOption::Basic,
    ))
}

fn random_query(rng: &mut StdRng, body: Field, depth: usize) -> Box<dyn Query> {
    if depth == 0 || rng.gen_bool(0.4) {
        return random_term(rng, body);
    }
    if rng.gen_bool(0.15) {
        return Box::new(BoostedQuery::new(
            random_query(rng, body, depth - 1),
            rng.gen_range(1..4) as f32,
        ));
    }
    if rng.gen_bool(0.15) {
        let disjuncts = (0..rng.gen_range(2..4))
            .map(|_| random_query(rng, body, depth - 1))
            .collect();
        return Box::new(DisMaxQuery::new(disjuncts));
    }
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for _ in 0..rng.gen_range(2..4) {
        let occur = if rng.gen_bool(0.5) {
            Occur::Must
        } else {
            Occur::Should
        };
        clauses.push((occur, random_query(rng, body, depth - 1)));
    }
    // Negative clauses only ever appear alongside positive ones.
    if rng.gen_bool(0.3) {
        clauses.push((Occur::MustNot, random_term(rng, body)));
    }
    Box::new(BooleanQuery::new(clauses))
}

fn random_document(rng: &mut StdRng, body: Field) -> TantivyDocument {
    let words: Vec<&str> = (0..rng.gen_range(2..6))
        .map(|_| VOCABULARY[rng.gen_range(0..VOCABULARY.len())])
        .collect();
    let mut document = TantivyDocument::default();
    document.add_text(body, words.join(" "));
    document
}

/// Parser handing out pre-built queries by key, so the fuzzer controls the
/// exact query structure the monitor stores.
struct FuzzParser {
    queries: DashMap<String, Box<dyn Query>>,
}

impl MonitorQueryParser for FuzzParser {
    fn parse(&self, query: &str, _metadata: &BTreeMap<String, String>) -> Result<Box<dyn Query>> {
        self.queries
            .get(query)
            .map(|entry| entry.value().box_clone())
            .ok_or_else(|| Error::Parse(format!("unknown fuzz query {query:?}")))
    }
}

fn brute_force_matches(
    queries: &[(String, Box<dyn Query>)],
    document: &TantivyDocument,
    schema: &Schema,
) -> HashSet<String> {
    let mut matcher = DocumentMatcher::for_document(document.clone(), schema.clone()).unwrap();
    let metadata = BTreeMap::new();
    queries
        .iter()
        .filter(|(id, query)| {
            percolator::CandidateMatcher::match_query(&mut matcher, id, query.as_ref(), &metadata)
                .unwrap()
        })
        .map(|(id, _)| id.clone())
        .collect()
}

fn assert_monitor_agrees_with_brute_force<P: Presearcher + 'static>(presearcher: P, seed: u64) {
    let (schema, body) = document_schema();
    let mut rng = StdRng::seed_from_u64(seed);

    let parser = FuzzParser {
        queries: DashMap::new(),
    };
    let mut queries = Vec::new();
    let mut monitor_queries = Vec::new();
    for index in 0..40 {
        let key = format!("fuzz-{index}");
        let query = random_query(&mut rng, body, 3);
        parser.queries.insert(key.clone(), query.box_clone());
        queries.push((key.clone(), query));
        monitor_queries.push(MonitorQuery::new(key.clone(), key));
    }

    let monitor = Monitor::new(
        schema.clone(),
        Box::new(parser),
        presearcher,
        MonitorConfig {
            purge_frequency: Duration::ZERO,
            ..MonitorConfig::default()
        },
    )
    .unwrap();
    let errors = monitor.update(&monitor_queries).unwrap();
    assert!(errors.is_empty());

    for _ in 0..30 {
        let document = random_document(&mut rng, body);
        let expected = brute_force_matches(&queries, &document, &schema);
        let matches = monitor.match_document(document).unwrap();
        assert!(matches.errors.is_empty());
        assert_eq!(matches.matches, expected);
    }
}

#[test]
fn test_single_pass_presearcher_loses_no_matches() {
    assert_monitor_agrees_with_brute_force(TermFilteredPresearcher::default(), 7);
}

#[test]
fn test_multipass_presearcher_loses_no_matches() {
    let presearcher =
        MultipassTermFilteredPresearcher::new(QueryAnalyzer::default(), 2).unwrap();
    assert_monitor_agrees_with_brute_force(presearcher, 11);
}

#[test]
fn test_decomposition_preserves_matching() {
    let (schema, body) = document_schema();
    let mut rng = StdRng::seed_from_u64(23);

    for _ in 0..60 {
        let query = random_query(&mut rng, body, 3);
        let mut fragments = Vec::new();
        QueryDecomposer::new(&mut fragments).decompose(query.box_clone());
        assert!(!fragments.is_empty());

        for _ in 0..10 {
            let document = random_document(&mut rng, body);
            let mut matcher =
                DocumentMatcher::for_document(document.clone(), schema.clone()).unwrap();
            let metadata = BTreeMap::new();
            let whole = percolator::CandidateMatcher::match_query(
                &mut matcher,
                "whole",
                query.as_ref(),
                &metadata,
            )
            .unwrap();
            let any_fragment = fragments.iter().any(|fragment| {
                percolator::CandidateMatcher::match_query(
                    &mut matcher,
                    "fragment",
                    fragment.as_ref(),
                    &metadata,
                )
                .unwrap()
            });
            assert_eq!(
                whole, any_fragment,
                "decomposition changed matching behavior"
            );
        }
    }
}
