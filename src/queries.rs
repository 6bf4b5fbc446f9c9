//! Query combinators whose structure stays inspectable.
//!
//! tantivy's own `BoostQuery` and `DisjunctionMaxQuery` keep their parts
//! private once built, so nothing downstream can see through them. The
//! decomposer and the analyzer need to, so queries built for the monitor use
//! these wrappers instead; they execute through the tantivy equivalents.
//! Raw tantivy boost and dis-max queries still work, they are just treated
//! as opaque.

use tantivy::query::{BoostQuery, DisjunctionMaxQuery, EnableScoring, Query, QueryClone, Weight};
use tantivy::{Score, Term};

/// A boosted query that exposes its inner query and factor.
#[derive(Debug)]
pub struct BoostedQuery {
    query: Box<dyn Query>,
    boost: Score,
}

impl BoostedQuery {
    pub fn new(query: Box<dyn Query>, boost: Score) -> Self {
        Self { query, boost }
    }

    pub fn query(&self) -> &dyn Query {
        self.query.as_ref()
    }

    pub fn boost(&self) -> Score {
        self.boost
    }
}

impl Clone for BoostedQuery {
    fn clone(&self) -> Self {
        Self {
            query: self.query.box_clone(),
            boost: self.boost,
        }
    }
}

impl Query for BoostedQuery {
    fn weight(&self, enable_scoring: EnableScoring<'_>) -> tantivy::Result<Box<dyn Weight>> {
        BoostQuery::new(self.query.box_clone(), self.boost).weight(enable_scoring)
    }

    fn query_terms<'a>(&'a self, visitor: &mut dyn FnMut(&'a Term, bool)) {
        self.query.query_terms(visitor);
    }
}

/// A dis-max query that exposes its disjuncts.
#[derive(Debug)]
pub struct DisMaxQuery {
    disjuncts: Vec<Box<dyn Query>>,
    tie_breaker: Score,
}

impl DisMaxQuery {
    pub fn new(disjuncts: Vec<Box<dyn Query>>) -> Self {
        Self::with_tie_breaker(disjuncts, 0.0)
    }

    pub fn with_tie_breaker(disjuncts: Vec<Box<dyn Query>>, tie_breaker: Score) -> Self {
        Self {
            disjuncts,
            tie_breaker,
        }
    }

    pub fn disjuncts(&self) -> &[Box<dyn Query>] {
        &self.disjuncts
    }
}

impl Clone for DisMaxQuery {
    fn clone(&self) -> Self {
        Self {
            disjuncts: self
                .disjuncts
                .iter()
                .map(|disjunct| disjunct.box_clone())
                .collect(),
            tie_breaker: self.tie_breaker,
        }
    }
}

impl Query for DisMaxQuery {
    fn weight(&self, enable_scoring: EnableScoring<'_>) -> tantivy::Result<Box<dyn Weight>> {
        DisjunctionMaxQuery::with_tie_breaker(
            self.disjuncts
                .iter()
                .map(|disjunct| disjunct.box_clone())
                .collect(),
            self.tie_breaker,
        )
        .weight(enable_scoring)
    }

    fn query_terms<'a>(&'a self, visitor: &mut dyn FnMut(&'a Term, bool)) {
        for disjunct in &self.disjuncts {
            disjunct.query_terms(visitor);
        }
    }
}
