use std::iter;

use tantivy::query::{BooleanQuery, Occur, Query, QueryClone};

use crate::list::List;
use crate::queries::{BoostedQuery, DisMaxQuery};

/// Splits a query into independently indexable disjuncts.
///
/// Disjunctions (OR clauses, dis-max branches) map naturally onto separate
/// index fragments, so they are split recursively. Conjunctions are kept
/// whole unless they reduce to a single mandatory clause, in which case that
/// clause is decomposed instead. Negative clauses are re-applied to every
/// fragment produced from the rest of the query, and boosts are propagated
/// to every fragment produced from the boosted node. tantivy's own boost
/// and dis-max queries keep their parts private and are indexed as single
/// opaque fragments.
pub struct QueryDecomposer<'a> {
    subqueries: List<'a, Box<dyn Query>>,
}

impl<'a> QueryDecomposer<'a> {
    pub fn new(subqueries: &'a mut Vec<Box<dyn Query>>) -> Self {
        Self::from_list(List::new(subqueries))
    }

    fn from_list(subqueries: List<'a, Box<dyn Query>>) -> Self {
        Self { subqueries }
    }

    pub fn decompose(&mut self, query: Box<dyn Query>) {
        // Decompose within a window of the output list, so exclusion and
        // boost rewriting only touch fragments produced from this query.
        let mut scoped = QueryDecomposer::from_list(self.subqueries.saved());

        let query = match query.downcast::<BooleanQuery>() {
            Ok(query) => return scoped.decompose_boolean(query),
            Err(query) => query,
        };

        let query = match query.downcast::<BoostedQuery>() {
            Ok(query) => return scoped.decompose_boost(&query),
            Err(query) => query,
        };

        let query = match query.downcast::<DisMaxQuery>() {
            Ok(query) => return scoped.decompose_dis_max(&query),
            Err(query) => query,
        };

        self.subqueries.push(query);
    }

    fn decompose_boolean(&mut self, query: Box<BooleanQuery>) {
        let mut mandatory = Vec::new();
        let mut exclusions = Vec::new();
        let mut optional = Vec::new();

        for (occur, clause) in query.clauses() {
            match occur {
                Occur::Should => QueryDecomposer::new(&mut optional).decompose(clause.box_clone()),
                Occur::Must => mandatory.push(clause),
                Occur::MustNot => exclusions.push(clause),
            }
        }

        // More than one mandatory clause, or one mandatory clause alongside
        // optional siblings: the whole query is a single opaque fragment.
        // The optional fragments are discarded, since on their own they
        // would match documents the conjunction rejects.
        if mandatory.len() > 1 || (mandatory.len() == 1 && !optional.is_empty()) {
            self.subqueries.push(query);
            return;
        }

        if let &[mandatory_clause] = &mandatory[..] {
            QueryDecomposer::from_list(self.subqueries.saved())
                .decompose(mandatory_clause.box_clone());
        } else {
            for subquery in optional {
                self.subqueries.push(subquery);
            }
        }

        if exclusions.is_empty() {
            return;
        }

        for subquery in &mut self.subqueries {
            *subquery = Box::new(BooleanQuery::new(
                iter::once((Occur::Must, subquery.box_clone()))
                    .chain(
                        exclusions
                            .iter()
                            .map(|exclusion| (Occur::MustNot, exclusion.box_clone())),
                    )
                    .collect(),
            ));
        }
    }

    fn decompose_boost(&mut self, query: &BoostedQuery) {
        if query.boost() == 1.0 {
            return self.decompose(query.query().box_clone());
        }

        self.decompose(query.query().box_clone());
        for subquery in &mut self.subqueries {
            *subquery = Box::new(BoostedQuery::new(subquery.box_clone(), query.boost()));
        }
    }

    fn decompose_dis_max(&mut self, query: &DisMaxQuery) {
        for disjunct in query.disjuncts() {
            self.decompose(disjunct.box_clone());
        }
    }
}

#[cfg(test)]
mod test {
    use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, TermQuery};
    use tantivy::schema::{Field, IndexRecordOption, Schema, TEXT};
    use tantivy::Term;

    use super::*;
    use crate::queries::{BoostedQuery, DisMaxQuery};

    fn term_query(field: Field, text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, text),
            IndexRecordOption::Basic,
        ))
    }

    fn body_field() -> Field {
        let mut schema_builder = Schema::builder();
        let body = schema_builder.add_text_field("body", TEXT);
        schema_builder.build();
        body
    }

    fn decompose(query: Box<dyn Query>) -> Vec<Box<dyn Query>> {
        let mut subqueries = Vec::new();
        QueryDecomposer::new(&mut subqueries).decompose(query);
        subqueries
    }

    #[test]
    fn test_disjunction_is_split() {
        let body = body_field();
        let query = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
            (Occur::Should, term_query(body, "toad")),
        ]));
        assert_eq!(decompose(query).len(), 3);
    }

    #[test]
    fn test_nested_disjunctions_are_flattened() {
        let body = body_field();
        let inner = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "rat")),
            (Occur::Should, term_query(body, "toad")),
        ]));
        let query = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, inner as Box<dyn Query>),
        ]));
        assert_eq!(decompose(query).len(), 3);
    }

    #[test]
    fn test_conjunction_is_kept_whole() {
        let body = body_field();
        let query = Box::new(BooleanQuery::new(vec![
            (Occur::Must, term_query(body, "mole")),
            (Occur::Must, term_query(body, "rat")),
        ]));
        let subqueries = decompose(query);
        assert_eq!(subqueries.len(), 1);
        assert!(subqueries[0].downcast_ref::<BooleanQuery>().is_some());
    }

    #[test]
    fn test_single_mandatory_clause_is_unwrapped() {
        let body = body_field();
        let inner = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
        ]));
        let query = Box::new(BooleanQuery::new(vec![(
            Occur::Must,
            inner as Box<dyn Query>,
        )]));
        assert_eq!(decompose(query).len(), 2);
    }

    #[test]
    fn test_mandatory_clause_with_optional_sibling_is_kept_whole() {
        let body = body_field();
        let query = Box::new(BooleanQuery::new(vec![
            (Occur::Must, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
        ]));
        assert_eq!(decompose(query).len(), 1);
    }

    #[test]
    fn test_exclusions_are_applied_to_every_fragment() {
        let body = body_field();
        let query = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
            (Occur::MustNot, term_query(body, "weasel")),
        ]));
        let subqueries = decompose(query);
        assert_eq!(subqueries.len(), 2);
        for subquery in &subqueries {
            let rewritten = subquery
                .downcast_ref::<BooleanQuery>()
                .expect("fragments with exclusions are boolean queries");
            let clauses = rewritten.clauses();
            assert!(clauses.iter().any(|(occur, _)| *occur == Occur::MustNot));
        }
    }

    #[test]
    fn test_boost_is_propagated_to_fragments() {
        let body = body_field();
        let disjunction = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
        ]));
        let query = Box::new(BoostedQuery::new(disjunction as Box<dyn Query>, 2.0));
        let subqueries = decompose(query);
        assert_eq!(subqueries.len(), 2);
        for subquery in &subqueries {
            let boosted = subquery
                .downcast_ref::<BoostedQuery>()
                .expect("fragments of a boosted query are boosted");
            assert_eq!(boosted.boost(), 2.0);
        }
    }

    #[test]
    fn test_unit_boost_is_dropped() {
        let body = body_field();
        let query = Box::new(BoostedQuery::new(term_query(body, "mole"), 1.0));
        let subqueries = decompose(query);
        assert_eq!(subqueries.len(), 1);
        assert!(subqueries[0].downcast_ref::<TermQuery>().is_some());
    }

    #[test]
    fn test_dis_max_disjuncts_are_split() {
        let body = body_field();
        let query = Box::new(DisMaxQuery::new(vec![
            term_query(body, "mole"),
            term_query(body, "rat"),
        ]));
        assert_eq!(decompose(query).len(), 2);
    }

    #[test]
    fn test_opaque_tantivy_boost_query_is_kept_whole() {
        let body = body_field();
        let disjunction = Box::new(BooleanQuery::new(vec![
            (Occur::Should, term_query(body, "mole")),
            (Occur::Should, term_query(body, "rat")),
        ]));
        let query = Box::new(BoostQuery::new(disjunction as Box<dyn Query>, 2.0));
        let subqueries = decompose(query);
        assert_eq!(subqueries.len(), 1);
        assert!(subqueries[0].downcast_ref::<BoostQuery>().is_some());
    }
}
