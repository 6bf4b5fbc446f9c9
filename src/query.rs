use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Fixed-size digest identifying a stored query fragment. Used as the query
/// cache key and persisted alongside each indexed fragment, so a reload of
/// the same query reproduces the same fingerprints.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Fingerprint> {
        bytes.try_into().ok().map(Fingerprint)
    }

    /// Derive the fingerprint of the fragment at `position` within a
    /// decomposed query. The positional suffix is folded back through the
    /// digest so child fingerprints stay fixed-size.
    pub fn child(&self, position: u32) -> Fingerprint {
        let mut hasher = Xxh3::new();
        hasher.update(&self.0);
        hasher.update(&position.to_le_bytes());
        Fingerprint(hasher.digest128().to_be_bytes())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A stored query registered with the monitor.
///
/// `metadata` is ordered so that fingerprints are deterministic; it is passed
/// through to the presearcher when the query is indexed and to the candidate
/// matcher when the query is run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorQuery {
    pub id: String,
    pub query: String,
    pub highlight: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl MonitorQuery {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            highlight: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_highlight(mut self, highlight: impl Into<String>) -> Self {
        self.highlight = Some(highlight.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Root fingerprint for this query; fragment fingerprints are derived
    /// from it with [`Fingerprint::child`].
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Xxh3::new();
        hasher.update(self.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.query.as_bytes());
        hasher.update(&[0]);
        if let Some(highlight) = &self.highlight {
            hasher.update(highlight.as_bytes());
        }
        hasher.update(&[0]);
        for (key, value) in &self.metadata {
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.as_bytes());
            hasher.update(&[0]);
        }
        Fingerprint(hasher.digest128().to_be_bytes())
    }
}

impl PartialEq for MonitorQuery {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.query == other.query && self.highlight == other.highlight
    }
}

impl Eq for MonitorQuery {}

impl Hash for MonitorQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.query.hash(state);
        self.highlight.hash(state);
    }
}
