//! # VectorStore
//!
//! Per-project semantic memory.
//!
//! A [`MemoryStore`] owns one isolated collection per [`CollectionKey`]
//! (`owner_id`, `project_id`). Each collection is an append-only list of
//! [`MemoryRecord`]s with a [`VectorIndex`] on top. Records are written to the
//! `memory_records` table first, then indexed in memory; a collection is
//! hydrated from the table the first time it is touched, so memories survive
//! restarts.
//!
//! ## Consistency rules
//! - Record ids are `0, 1, 2, ...` within a collection, assigned under the
//!   collection's writer lock together with the durable write, so concurrent
//!   appends never share or skip an id.
//! - Searches take the collection's read lock and run in parallel.
//! - `search` never fails: embedding or index errors are logged and become an
//!   empty result. `append` surfaces every error.
//! - A record whose index insert fails is already in the log; the collection
//!   is reloaded from the log on its next access.
//! - `delete_collection` removes rows and empties the collection under the
//!   writer lock.
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use membrane::database::Database;
//! use membrane::embedding::SentenceEmbeddingsModel;
//! use membrane::index::IndexKind;
//! use membrane::vector_store::{CollectionKey, MemoryStore};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = Arc::new(SentenceEmbeddingsModel::load()?);
//! let database = Arc::new(Database::open("membrane.db")?);
//! let store = MemoryStore::new(embedder, IndexKind::Flat, database);
//!
//! let key = CollectionKey::new("alice", "novel");
//! store.append(&key, "The heroine is afraid of water.", None).await?;
//! let hits = store.search(&key, "What is she afraid of?", 3).await;
//! println!("{hits:?}");
//! # Ok(()) }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::embedding::{EmbeddingFunction, embed_checked};
use crate::error::MemoryError;
use crate::index::{IndexKind, VectorIndex};
use crate::models::MemoryRecordRow;

/// Identifies one collection. Kept structured so ids containing separators
/// can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub owner_id: String,
    pub project_id: String,
}

impl CollectionKey {
    pub fn new(owner_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            project_id: project_id.into(),
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.owner_id, self.project_id)
    }
}

/// Collection-local record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar metadata value attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Open mapping of string keys to scalar values, e.g. `source` -> file name.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// An immutable stored memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// A search hit with its distance to the query (smaller is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub id: RecordId,
    pub text: String,
    pub distance: f32,
    pub metadata: Metadata,
}

/// Builds the index for a new collection from the embedder's dimension.
pub type IndexFactory = Arc<dyn Fn(usize) -> Box<dyn VectorIndex> + Send + Sync>;

struct Collection {
    index: Box<dyn VectorIndex>,
    records: BTreeMap<u64, MemoryRecord>,
    next_id: u64,
    hydrated: bool,
}

/// Per-project append-only semantic memory.
pub struct MemoryStore {
    embedder: Arc<dyn EmbeddingFunction>,
    index_factory: IndexFactory,
    log: RecordLog,
    collections: parking_lot::RwLock<HashMap<CollectionKey, Arc<RwLock<Collection>>>>,
}

impl MemoryStore {
    pub fn new(
        embedder: Arc<dyn EmbeddingFunction>,
        index_kind: IndexKind,
        database: Arc<Database>,
    ) -> Self {
        Self::with_index_factory(embedder, Arc::new(move |dim| index_kind.build(dim)), database)
    }

    /// Like [`new`](Self::new) with a custom index per collection.
    pub fn with_index_factory(
        embedder: Arc<dyn EmbeddingFunction>,
        index_factory: IndexFactory,
        database: Arc<Database>,
    ) -> Self {
        info!(
            "Memory store using {} ({} dims)",
            embedder.model_id(),
            embedder.dimension()
        );
        Self {
            embedder,
            index_factory,
            log: RecordLog { database },
            collections: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingFunction> {
        &self.embedder
    }

    /// Embed and durably store `text` in the collection for `key`.
    ///
    /// # Errors
    /// - [`MemoryError::EmptyText`] if `text` is blank.
    /// - [`MemoryError::Embedding`] if the embedder fails or returns the wrong dimension.
    /// - [`MemoryError::Storage`] if the record log write fails; no id is consumed.
    pub async fn append(
        &self,
        key: &CollectionKey,
        text: &str,
        metadata: Option<Metadata>,
    ) -> Result<RecordId, MemoryError> {
        let ids = self
            .append_batch(key, vec![(text.to_string(), metadata.unwrap_or_default())])
            .await?;
        Ok(ids[0])
    }

    /// Append several texts in order under a single writer-lock acquisition.
    ///
    /// All texts are validated and embedded before anything is written. Ids are
    /// returned in input order.
    pub async fn append_batch(
        &self,
        key: &CollectionKey,
        items: Vec<(String, Metadata)>,
    ) -> Result<Vec<RecordId>, MemoryError> {
        if items.iter().any(|(text, _)| text.trim().is_empty()) {
            return Err(MemoryError::EmptyText);
        }

        let mut embedded = Vec::with_capacity(items.len());
        for (text, metadata) in items {
            let vector = embed_checked(self.embedder.as_ref(), &text).await?;
            embedded.push((text, vector, metadata));
        }

        let handle = self.collection(key);
        let mut collection = handle.write().await;
        self.hydrate(key, &mut collection)?;

        let mut ids = Vec::with_capacity(embedded.len());
        for (text, vector, metadata) in embedded {
            let record = MemoryRecord {
                id: RecordId(collection.next_id),
                text,
                vector,
                metadata,
                created_at: Utc::now(),
            };
            self.log.append(key, &record, self.embedder.model_id())?;
            collection.next_id += 1;

            // The row is durable; rebuild from the log on next access.
            if let Err(err) = collection.index.insert(record.id.0, &record.vector) {
                warn!(
                    "Indexing memory {} in {} failed, reloading collection: {}",
                    record.id, key, err
                );
                *collection = self.empty_collection();
                return Err(err.into());
            }

            debug!("Stored memory {} in {}", record.id, key);
            ids.push(record.id);
            collection.records.insert(record.id.0, record);
        }

        Ok(ids)
    }

    /// Top-`top_k` texts closest to `query`, best first.
    ///
    /// Never fails: an empty or unknown collection, or any embedding/index
    /// failure, yields an empty list.
    pub async fn search(&self, key: &CollectionKey, query: &str, top_k: usize) -> Vec<String> {
        match self.try_search(key, query, top_k).await {
            Ok(hits) => hits.into_iter().map(|hit| hit.text).collect(),
            Err(err) => {
                warn!("Memory search in {} failed, using no context: {}", key, err);
                Vec::new()
            }
        }
    }

    /// Fallible search returning distances and ids alongside the texts.
    ///
    /// `top_k` of `0` is treated as `1`.
    pub async fn try_search(
        &self,
        key: &CollectionKey,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let top_k = top_k.max(1);
        let handle = self.collection(key);

        if self.read_hydrated(key, &handle).await?.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_checked(self.embedder.as_ref(), query).await?;

        let collection = self.read_hydrated(key, &handle).await?;
        let hits = collection
            .index
            .search(&vector, top_k)?
            .into_iter()
            .filter_map(|neighbor| {
                collection
                    .records
                    .get(&neighbor.id)
                    .map(|record| ScoredMemory {
                        id: record.id,
                        text: record.text.clone(),
                        distance: neighbor.distance,
                        metadata: record.metadata.clone(),
                    })
            })
            .collect::<Vec<_>>();

        debug!("Memory search in {} returned {} hits", key, hits.len());
        Ok(hits)
    }

    /// Number of records in the collection for `key`.
    pub async fn len(&self, key: &CollectionKey) -> Result<usize, MemoryError> {
        let handle = self.collection(key);
        let collection = self.read_hydrated(key, &handle).await?;
        Ok(collection.records.len())
    }

    /// Drop the collection and its stored records. Deleting an unknown
    /// collection is a no-op.
    ///
    /// Rows are deleted and the in-memory collection emptied under one writer
    /// lock, so no concurrent search or append can observe one without the
    /// other.
    pub async fn delete_collection(&self, key: &CollectionKey) -> Result<(), MemoryError> {
        let handle = self.collection(key);
        let mut collection = handle.write().await;

        let removed = self.log.delete(key)?;
        *collection = Collection {
            hydrated: true,
            ..self.empty_collection()
        };
        info!("Deleted collection {} ({} records)", key, removed);
        Ok(())
    }

    fn collection(&self, key: &CollectionKey) -> Arc<RwLock<Collection>> {
        if let Some(handle) = self.collections.read().get(key) {
            return Arc::clone(handle);
        }

        let mut collections = self.collections.write();
        let handle = collections.entry(key.clone()).or_insert_with(|| {
            debug!("Creating collection {}", key);
            Arc::new(RwLock::new(self.empty_collection()))
        });
        Arc::clone(handle)
    }

    /// A collection with a fresh index that still has to be hydrated.
    fn empty_collection(&self) -> Collection {
        Collection {
            index: (self.index_factory)(self.embedder.dimension()),
            records: BTreeMap::new(),
            next_id: 0,
            hydrated: false,
        }
    }

    async fn read_hydrated<'a>(
        &self,
        key: &CollectionKey,
        handle: &'a RwLock<Collection>,
    ) -> Result<RwLockReadGuard<'a, Collection>, MemoryError> {
        let collection = handle.read().await;
        if collection.hydrated {
            return Ok(collection);
        }
        drop(collection);

        let mut collection = handle.write().await;
        self.hydrate(key, &mut collection)?;
        Ok(RwLockWriteGuard::downgrade(collection))
    }

    /// Load persisted records into a collection that is not hydrated yet.
    /// On failure the collection is left untouched and the next access retries.
    fn hydrate(&self, key: &CollectionKey, collection: &mut Collection) -> Result<(), MemoryError> {
        if collection.hydrated {
            return Ok(());
        }

        let dimension = self.embedder.dimension();
        let model_id = self.embedder.model_id();
        let mut loaded = self.empty_collection();
        let mut skipped = 0usize;

        for stored in self.log.load(key)? {
            loaded.next_id = loaded.next_id.max(stored.record.id.0 + 1);

            if stored.embedding_model != model_id || stored.record.vector.len() != dimension {
                skipped += 1;
                continue;
            }
            loaded
                .index
                .insert(stored.record.id.0, &stored.record.vector)?;
            loaded.records.insert(stored.record.id.0, stored.record);
        }

        if skipped > 0 {
            warn!(
                "Skipped {} records in {} embedded by a different model than {}",
                skipped, key, model_id
            );
        }
        if !loaded.records.is_empty() {
            info!("Loaded {} memories for {}", loaded.records.len(), key);
        }

        loaded.hydrated = true;
        *collection = loaded;
        Ok(())
    }
}

struct StoredRecord {
    record: MemoryRecord,
    embedding_model: String,
}

/// Durable side of the store: the `memory_records` table.
struct RecordLog {
    database: Arc<Database>,
}

fn encoding_error(err: impl fmt::Display) -> MemoryError {
    MemoryError::Encoding(err.to_string())
}

impl RecordLog {
    fn append(
        &self,
        key: &CollectionKey,
        record: &MemoryRecord,
        embedding_model: &str,
    ) -> Result<(), MemoryError> {
        use crate::schema::memory_records::dsl::memory_records;

        let vector = bincode::serde::encode_to_vec(&record.vector, bincode::config::standard())
            .map_err(encoding_error)?;
        let metadata = serde_json::to_string(&record.metadata).map_err(encoding_error)?;
        let record_id = i64::try_from(record.id.0).map_err(encoding_error)?;

        let row = MemoryRecordRow {
            id: None,
            owner_id: key.owner_id.clone(),
            project_id: key.project_id.clone(),
            record_id,
            text: record.text.clone(),
            vector,
            metadata,
            embedding_model: embedding_model.to_string(),
            created_at: record.created_at.naive_utc(),
        };

        self.database.with_connection(|conn| {
            diesel::insert_into(memory_records)
                .values(&row)
                .execute(conn)
        })?;
        Ok(())
    }

    fn load(&self, key: &CollectionKey) -> Result<Vec<StoredRecord>, MemoryError> {
        use crate::schema::memory_records::dsl::*;

        let rows: Vec<MemoryRecordRow> = self.database.with_connection(|conn| {
            memory_records
                .filter(owner_id.eq(&key.owner_id))
                .filter(project_id.eq(&key.project_id))
                .order(record_id.asc())
                .select(MemoryRecordRow::as_select())
                .load(conn)
        })?;

        rows.into_iter()
            .map(|row| -> Result<StoredRecord, MemoryError> {
                let (decoded, _): (Vec<f32>, usize) =
                    bincode::serde::decode_from_slice(&row.vector, bincode::config::standard())
                        .map_err(encoding_error)?;
                let meta: Metadata = serde_json::from_str(&row.metadata).map_err(encoding_error)?;
                let local_id = u64::try_from(row.record_id).map_err(encoding_error)?;

                Ok(StoredRecord {
                    record: MemoryRecord {
                        id: RecordId(local_id),
                        text: row.text,
                        vector: decoded,
                        metadata: meta,
                        created_at: Utc.from_utc_datetime(&row.created_at),
                    },
                    embedding_model: row.embedding_model,
                })
            })
            .collect()
    }

    fn delete(&self, key: &CollectionKey) -> Result<usize, MemoryError> {
        use crate::schema::memory_records::dsl::*;

        let removed = self.database.with_connection(|conn| {
            diesel::delete(
                memory_records
                    .filter(owner_id.eq(&key.owner_id))
                    .filter(project_id.eq(&key.project_id)),
            )
            .execute(conn)
        })?;
        Ok(removed)
    }
}

/// Split a document into chunks of at most `max_chars` characters, preferring
/// paragraph and then line boundaries. Blank chunks are dropped.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    fn flush(current: &mut String, chunks: &mut Vec<String>) {
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
        current.clear();
    }

    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        for line in paragraph.lines() {
            let mut rest = line;
            while rest.chars().count() > max_chars {
                flush(&mut current, &mut chunks);
                let cut = rest
                    .char_indices()
                    .nth(max_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }

            let needed = current.chars().count() + rest.chars().count() + 1;
            if !current.is_empty() && needed > max_chars {
                flush(&mut current, &mut chunks);
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(rest);
        }
        flush(&mut current, &mut chunks);
    }

    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}
