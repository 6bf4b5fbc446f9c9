use std::collections::HashSet;

use tantivy::schema::Field;

/// How an extracted term relates to the query it came from. `Derived` marks
/// terms manufactured from a broader primitive (wildcard or ngram folding)
/// rather than taken verbatim; `Any` marks a match-all placeholder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TermKind {
    Exact,
    Derived,
    Any,
    Custom,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueryTerm {
    pub field: Field,
    pub text: String,
    pub kind: TermKind,
}

impl QueryTerm {
    pub fn new(field: Field, text: impl Into<String>, kind: TermKind) -> Self {
        Self {
            field,
            text: text.into(),
            kind,
        }
    }

    pub fn exact(field: Field, text: impl Into<String>) -> Self {
        Self::new(field, text, TermKind::Exact)
    }

    /// Placeholder standing in for "any document whatsoever". Collected
    /// whenever a branch cannot be narrowed down to concrete terms.
    pub fn any_marker() -> Self {
        Self::new(Field::from_field_id(0), "*", TermKind::Any)
    }

    pub fn is_any(&self) -> bool {
        self.kind == TermKind::Any
    }
}

/// Aggregate selectivity of one extracted signature. A signature is as
/// selective as its weakest term, so the aggregate weight is the minimum;
/// ties are broken towards signatures with fewer match-all placeholders and
/// fewer terms overall.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SignatureScore {
    pub any_terms: usize,
    pub min_weight: f32,
    pub term_count: usize,
}

impl SignatureScore {
    fn of(terms: &[(QueryTerm, f32)]) -> Self {
        Self {
            any_terms: terms.iter().filter(|(term, _)| term.is_any()).count(),
            min_weight: terms
                .iter()
                .map(|(_, weight)| *weight)
                .fold(f32::INFINITY, f32::min),
            term_count: terms.len(),
        }
    }

    pub fn better_than(&self, other: &SignatureScore) -> bool {
        if self.any_terms != other.any_terms {
            return self.any_terms < other.any_terms;
        }
        if self.min_weight != other.min_weight {
            return self.min_weight > other.min_weight;
        }
        self.term_count < other.term_count
    }
}

/// Structural view of a query used for presearch term extraction.
///
/// The soundness contract: for every phase, any document matching the
/// original query contains at least one collected term (or the signature
/// contains the match-all placeholder). Disjunctions therefore collect the
/// union of their children, while a conjunction collects exactly one child,
/// the most selective one. The conjunction's `cursor` records how many
/// children have been deprioritized by previous phases.
#[derive(Debug)]
pub enum QueryTree {
    Term { term: QueryTerm, weight: f32 },
    Any { reason: &'static str },
    Disjunction { children: Vec<QueryTree> },
    Conjunction { children: Vec<QueryTree>, cursor: usize },
}

impl QueryTree {
    pub fn term(term: QueryTerm, weight: f32) -> QueryTree {
        QueryTree::Term { term, weight }
    }

    pub fn any(reason: &'static str) -> QueryTree {
        QueryTree::Any { reason }
    }

    pub fn disjunction(children: Vec<QueryTree>) -> QueryTree {
        if children.is_empty() {
            return QueryTree::any("empty disjunction");
        }
        // A single match-all branch makes the whole disjunction match-all.
        if children.iter().any(QueryTree::is_any) {
            return QueryTree::any("disjunction with match-all branch");
        }
        if children.len() == 1 {
            return children.into_iter().next().expect("checked length");
        }
        QueryTree::Disjunction { children }
    }

    pub fn conjunction(children: Vec<QueryTree>) -> QueryTree {
        if children.is_empty() {
            return QueryTree::any("empty conjunction");
        }
        // Match-all clauses impose no constraint, so they never make good
        // signature candidates; satisfying the remaining clauses is still
        // necessary for the whole conjunction.
        let mut restricted: Vec<QueryTree> =
            children.into_iter().filter(|child| !child.is_any()).collect();
        match restricted.len() {
            0 => QueryTree::any("conjunction of match-all clauses"),
            1 => restricted.pop().expect("checked length"),
            _ => QueryTree::Conjunction {
                children: restricted,
                cursor: 0,
            },
        }
    }

    pub fn is_any(&self) -> bool {
        match self {
            QueryTree::Term { term, .. } => term.is_any(),
            QueryTree::Any { .. } => true,
            QueryTree::Disjunction { children } => children.iter().any(QueryTree::is_any),
            QueryTree::Conjunction { children, .. } => children.iter().all(QueryTree::is_any),
        }
    }

    pub fn score(&self) -> SignatureScore {
        let mut terms = Vec::new();
        self.collect_weighted(&mut terms);
        SignatureScore::of(&terms)
    }

    pub fn weight(&self) -> f32 {
        self.score().min_weight
    }

    pub fn collect_terms(&self, out: &mut HashSet<QueryTerm>) {
        let mut terms = Vec::new();
        self.collect_weighted(&mut terms);
        out.extend(terms.into_iter().map(|(term, _)| term));
    }

    fn collect_weighted(&self, out: &mut Vec<(QueryTerm, f32)>) {
        match self {
            QueryTree::Term { term, weight } => out.push((term.clone(), *weight)),
            QueryTree::Any { .. } => out.push((QueryTerm::any_marker(), 0.0)),
            QueryTree::Disjunction { children } => {
                for child in children {
                    child.collect_weighted(out);
                }
            }
            QueryTree::Conjunction { children, cursor } => {
                children[Self::best_child(children, *cursor)].collect_weighted(out)
            }
        }
    }

    /// Move to the next extraction phase, producing a distinct, still-sound
    /// signature. Returns false once no node has an unexhausted alternative;
    /// after that, signatures no longer change.
    pub fn advance_phase(&mut self) -> bool {
        match self {
            QueryTree::Term { .. } | QueryTree::Any { .. } => false,
            QueryTree::Disjunction { children } => {
                let mut changed = false;
                for child in children {
                    if child.advance_phase() {
                        changed = true;
                    }
                }
                changed
            }
            QueryTree::Conjunction { children, cursor } => {
                let selected = Self::best_child(children, *cursor);
                if children[selected].advance_phase() {
                    return true;
                }
                // Re-select among the clauses not yet used by a previous
                // phase, skipping alternatives with no selective terms.
                let alternative = (*cursor..children.len())
                    .filter(|index| *index != selected)
                    .map(|index| children[index].score())
                    .fold(None::<SignatureScore>, |best, score| match best {
                        Some(best) if best.better_than(&score) => Some(best),
                        _ => Some(score),
                    });
                match alternative {
                    Some(score) if score.min_weight > 0.0 && score.any_terms == 0 => {
                        children.swap(*cursor, selected);
                        *cursor += 1;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn best_child(children: &[QueryTree], cursor: usize) -> usize {
        let mut best = cursor.min(children.len() - 1);
        let mut best_score = children[best].score();
        for index in best + 1..children.len() {
            let score = children[index].score();
            if score.better_than(&best_score) {
                best = index;
                best_score = score;
            }
        }
        best
    }

    pub fn node_count(&self) -> usize {
        match self {
            QueryTree::Term { .. } | QueryTree::Any { .. } => 1,
            QueryTree::Disjunction { children } => {
                1 + children.iter().map(QueryTree::node_count).sum::<usize>()
            }
            QueryTree::Conjunction { children, .. } => {
                1 + children.iter().map(QueryTree::node_count).sum::<usize>()
            }
        }
    }
}
