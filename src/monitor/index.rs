use std::path::Path;

use parking_lot::Mutex;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::Query;
use tantivy::schema::{Field, Schema, TantivyDocument, Value, STORED, STRING};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher};

use crate::error::{Error, Result};
use crate::presearcher::Presearcher;
use crate::query::{Fingerprint, MonitorQuery};

/// Stored query id, one value per fragment.
pub(crate) const ID_FIELD: &str = "_id";
/// Indexed-only copy of the id, targeted by delete-by-term.
pub(crate) const DEL_FIELD: &str = "_del";
/// Fragment fingerprint, the cache key.
pub(crate) const HASH_FIELD: &str = "_hash";
/// Serialized [`MonitorQuery`], recovered when reopening a persisted index.
pub(crate) const SOURCE_FIELD: &str = "_mq";

#[derive(Clone, Copy)]
pub(crate) struct QueryIndexFields {
    pub id: Field,
    pub del: Field,
    pub hash: Field,
    pub source: Field,
}

/// The tantivy index holding one signature document per query fragment.
/// Single writer behind a mutex, manual-reload reader so that commits decide
/// exactly when new fragments become searchable.
pub(crate) struct QueryIndex {
    index: Index,
    pub writer: Mutex<IndexWriter>,
    pub reader: IndexReader,
    schema: Schema,
    pub fields: QueryIndexFields,
}

impl QueryIndex {
    fn build_schema(document_schema: &Schema, presearcher: &dyn Presearcher) -> Schema {
        let mut builder = Schema::builder();
        presearcher.register_fields(document_schema, &mut builder);
        builder.add_text_field(ID_FIELD, STRING | STORED);
        builder.add_text_field(DEL_FIELD, STRING);
        builder.add_bytes_field(HASH_FIELD, STORED);
        builder.add_bytes_field(SOURCE_FIELD, STORED);
        builder.build()
    }

    pub fn create_in_ram(
        document_schema: &Schema,
        presearcher: &dyn Presearcher,
        memory_budget: usize,
    ) -> Result<Self> {
        let schema = Self::build_schema(document_schema, presearcher);
        Self::from_index(Index::create_in_ram(schema.clone()), schema, memory_budget)
    }

    pub fn open_in_dir(
        path: &Path,
        document_schema: &Schema,
        presearcher: &dyn Presearcher,
        memory_budget: usize,
    ) -> Result<Self> {
        let schema = Self::build_schema(document_schema, presearcher);
        let directory = MmapDirectory::open(path).map_err(|error| Error::Index(error.into()))?;
        let index = Index::open_or_create(directory, schema.clone())?;
        Self::from_index(index, schema, memory_budget)
    }

    fn from_index(index: Index, schema: Schema, memory_budget: usize) -> Result<Self> {
        let writer = index.writer_with_num_threads(1, memory_budget)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let fields = QueryIndexFields {
            id: schema.get_field(ID_FIELD)?,
            del: schema.get_field(DEL_FIELD)?,
            hash: schema.get_field(HASH_FIELD)?,
            source: schema.get_field(SOURCE_FIELD)?,
        };
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            schema,
            fields,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn tokenizers(&self) -> &tantivy::tokenizer::TokenizerManager {
        self.index.tokenizers()
    }

    pub fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    /// Retrieve the bookkeeping fields of every fragment matching `query`.
    pub fn scan(&self, searcher: &Searcher, query: &dyn Query) -> Result<Vec<IndexedFragment>> {
        let addresses = searcher.search(query, &DocSetCollector)?;
        let mut fragments = Vec::with_capacity(addresses.len());
        for address in addresses {
            let stored: TantivyDocument = searcher.doc(address)?;
            if let Some(fragment) = IndexedFragment::from_stored(&stored, &self.fields) {
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }
}

pub(crate) struct IndexedFragment {
    pub id: String,
    pub fingerprint: Fingerprint,
    source: Option<Vec<u8>>,
}

impl IndexedFragment {
    fn from_stored(document: &TantivyDocument, fields: &QueryIndexFields) -> Option<Self> {
        let id = document.get_first(fields.id)?.as_str()?.to_string();
        let fingerprint = Fingerprint::from_bytes(document.get_first(fields.hash)?.as_bytes()?)?;
        let source = document
            .get_first(fields.source)
            .and_then(|value| value.as_bytes())
            .map(<[u8]>::to_vec);
        Some(Self {
            id,
            fingerprint,
            source,
        })
    }

    pub fn stored_query(&self) -> Result<MonitorQuery> {
        let source = self.source.as_deref().ok_or_else(|| {
            Error::Serialization(format!("fragment of query \"{}\" has no stored source", self.id))
        })?;
        bincode::deserialize(source).map_err(|error| Error::Serialization(error.to_string()))
    }
}
