//! Term extraction for presearch indexing.
//!
//! [`QueryAnalyzer`] converts a parsed query into a [`QueryTree`], a
//! structural view from which weighted signature terms are collected. The
//! tree over-approximates the query: anything it cannot see through becomes
//! a match-all node, which keeps extraction sound at the cost of extra
//! candidates.

mod query_tree;
pub mod weights;

pub use query_tree::{QueryTerm, QueryTree, SignatureScore, TermKind};
pub use weights::{TermWeightor, WeightNorm};

use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::Term;

use crate::queries::{BoostedQuery, DisMaxQuery};

pub struct QueryAnalyzer {
    weightor: TermWeightor,
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new(TermWeightor::default())
    }
}

impl QueryAnalyzer {
    pub fn new(weightor: TermWeightor) -> Self {
        Self { weightor }
    }

    pub fn build_tree(&self, query: &dyn Query) -> QueryTree {
        self.build(query, 1.0)
    }

    fn build(&self, query: &dyn Query, boost: f32) -> QueryTree {
        if let Some(query) = query.downcast_ref::<TermQuery>() {
            return self.term_node(query.term(), boost);
        }
        if let Some(query) = query.downcast_ref::<BooleanQuery>() {
            return self.build_boolean(query, boost);
        }
        if let Some(query) = query.downcast_ref::<BoostedQuery>() {
            return self.build(query.query(), boost * query.boost());
        }
        if let Some(query) = query.downcast_ref::<DisMaxQuery>() {
            let mut children = Vec::new();
            for disjunct in query.disjuncts() {
                children.push(self.build(disjunct.as_ref(), boost));
            }
            return QueryTree::disjunction(children);
        }
        if let Some(query) = query.downcast_ref::<PhraseQuery>() {
            // A phrase is stricter than the conjunction of its terms, so the
            // conjunction is a sound over-approximation.
            let children = query
                .phrase_terms()
                .iter()
                .map(|term| self.term_node(term, boost))
                .collect();
            return QueryTree::conjunction(children);
        }
        if query.downcast_ref::<AllQuery>().is_some() {
            return QueryTree::any("match-all query");
        }
        if query.downcast_ref::<EmptyQuery>().is_some() {
            return QueryTree::any("empty query");
        }
        QueryTree::any("unrecognized query type")
    }

    fn term_node(&self, term: &Term, boost: f32) -> QueryTree {
        match term.value().as_str() {
            Some(text) => {
                let term = QueryTerm::exact(term.field(), text);
                let weight = self.weightor.weigh(&term) * boost;
                QueryTree::term(term, weight)
            }
            None => QueryTree::any("non-text term"),
        }
    }

    fn build_boolean(&self, query: &BooleanQuery, boost: f32) -> QueryTree {
        let mut mandatory = Vec::new();
        let mut optional = Vec::new();
        for (occur, clause) in query.clauses() {
            match occur {
                Occur::Must => mandatory.push(self.build(clause.as_ref(), boost)),
                Occur::Should => optional.push(self.build(clause.as_ref(), boost)),
                // Terms from negated clauses never appear in matching
                // documents, so they contribute nothing to the signature.
                Occur::MustNot => {}
            }
        }
        if !mandatory.is_empty() {
            return QueryTree::conjunction(mandatory);
        }
        if !optional.is_empty() {
            return QueryTree::disjunction(optional);
        }
        QueryTree::any("purely negative query")
    }
}
