use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tantivy::schema::Field;

use crate::analyzer::query_tree::{QueryTerm, TermKind};

/// One multiplicative component of a term's weight. Norms compose by
/// multiplication, so returning 1.0 leaves a term untouched and returning
/// 0.0 vetoes it as a signature candidate.
pub trait WeightNorm: Send + Sync {
    fn norm(&self, term: &QueryTerm) -> f32;
}

/// Combines a set of [`WeightNorm`]s into a single per-term weight.
pub struct TermWeightor {
    norms: Vec<Box<dyn WeightNorm>>,
}

impl TermWeightor {
    pub fn new(norms: Vec<Box<dyn WeightNorm>>) -> Self {
        Self { norms }
    }

    pub fn weigh(&self, term: &QueryTerm) -> f32 {
        self.norms.iter().fold(1.0, |weight, norm| weight * norm.norm(term))
    }
}

impl Default for TermWeightor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(TermTypeNorm::default()),
            Box::new(TokenLengthNorm::default()),
        ])
    }
}

/// Longer tokens tend to be rarer, so they make better signature terms.
/// Weight approaches 4 - a as the length grows.
pub struct TokenLengthNorm {
    a: f32,
    k: f32,
}

impl TokenLengthNorm {
    pub fn new(a: f32, k: f32) -> Self {
        Self { a, k }
    }
}

impl Default for TokenLengthNorm {
    fn default() -> Self {
        Self::new(3.0, 0.3)
    }
}

impl WeightNorm for TokenLengthNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        if term.is_any() {
            return 1.0;
        }
        4.0 - self.a * (-self.k * term.text.len() as f32).exp()
    }
}

/// Downweights terms by provenance: match-all placeholders are vetoed and
/// derived terms (manufactured from a broader primitive) are distrusted.
pub struct TermTypeNorm {
    pub any_weight: f32,
    pub derived_weight: f32,
}

impl Default for TermTypeNorm {
    fn default() -> Self {
        Self {
            any_weight: 0.0,
            derived_weight: 0.25,
        }
    }
}

impl WeightNorm for TermTypeNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        match term.kind {
            TermKind::Any => self.any_weight,
            TermKind::Derived => self.derived_weight,
            TermKind::Exact | TermKind::Custom => 1.0,
        }
    }
}

/// Scales every term from one field.
pub struct FieldWeightNorm {
    field: Field,
    weight: f32,
}

impl FieldWeightNorm {
    pub fn new(field: Field, weight: f32) -> Self {
        Self { field, weight }
    }
}

impl WeightNorm for FieldWeightNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        if term.field == self.field {
            self.weight
        } else {
            1.0
        }
    }
}

/// Scales a fixed set of tokens regardless of field, typically used to
/// suppress known-frequent terms.
pub struct TermWeightNorm {
    weight: f32,
    terms: HashSet<String>,
}

impl TermWeightNorm {
    pub fn new(weight: f32, terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            weight,
            terms: terms.into_iter().collect(),
        }
    }
}

impl WeightNorm for TermWeightNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        if self.terms.contains(&term.text) {
            self.weight
        } else {
            1.0
        }
    }
}

/// Scales a fixed set of tokens within a single field.
pub struct FieldSpecificTermWeightNorm {
    field: Field,
    weight: f32,
    terms: HashSet<String>,
}

impl FieldSpecificTermWeightNorm {
    pub fn new(field: Field, weight: f32, terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            field,
            weight,
            terms: terms.into_iter().collect(),
        }
    }
}

impl WeightNorm for FieldSpecificTermWeightNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        if term.field == self.field && self.terms.contains(&term.text) {
            self.weight
        } else {
            1.0
        }
    }
}

/// Shared corpus frequencies, updatable while the monitor runs.
pub type TermFrequencies = Arc<DashMap<String, u64>>;

/// Weights terms by inverse corpus frequency: `n / frequency + k` for known
/// terms, 1 for unknown ones.
pub struct TermFrequencyNorm {
    frequencies: TermFrequencies,
    n: f32,
    k: f32,
}

impl TermFrequencyNorm {
    pub fn new(frequencies: TermFrequencies, n: f32, k: f32) -> Self {
        Self { frequencies, n, k }
    }
}

impl WeightNorm for TermFrequencyNorm {
    fn norm(&self, term: &QueryTerm) -> f32 {
        match self.frequencies.get(&term.text) {
            Some(frequency) if *frequency > 0 => self.n / *frequency as f32 + self.k,
            _ => 1.0,
        }
    }
}
