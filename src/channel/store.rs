//! Remote document store abstraction.
//!
//! A keyed document store with an atomic merge-write and a per-key live
//! listener. The in-memory backend serves a single process; the sled backend
//! keeps last-known positions across restarts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use super::document::{merge, Document};
use crate::config::defaults::STORE_BROADCAST_CAPACITY;

// ============================================================================
// Types
// ============================================================================

/// A document together with its write sequence number (1 on first write).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub seq: u64,
    pub fields: Document,
}

/// Live updates for one key. Ends only when the store goes away.
pub type DocumentStream = BoxStream<'static, Result<StoredDocument, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned for '{0}'")]
    Poisoned(String),

    #[error("Write to '{0}' produced no document")]
    EmptyWrite(String),
}

/// Shared document store used by the location channel.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Atomically merge `fields` into the document at `collection/key`,
    /// creating it if absent. Returns the stored result.
    async fn merge_write(
        &self,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<StoredDocument, StoreError>;

    /// One-shot read.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Live listener: emits the current document (if any) and then every
    /// later write. Sequence numbers are strictly increasing; intermediate
    /// writes may be skipped when the listener falls behind, the newest
    /// document is always delivered.
    async fn listen(&self, collection: &str, key: &str) -> Result<DocumentStream, StoreError>;

    fn backend_name(&self) -> &str;
}

fn document_key(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

// ============================================================================
// In-Memory Store
// ============================================================================

struct Slot {
    current: Mutex<Option<StoredDocument>>,
    tx: broadcast::Sender<StoredDocument>,
}

impl Slot {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(STORE_BROADCAST_CAPACITY);
        Self {
            current: Mutex::new(None),
            tx,
        }
    }

    fn snapshot(&self, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.current
            .lock()
            .map(|c| c.clone())
            .map_err(|_| StoreError::Poisoned(key.to_string()))
    }
}

/// Process-local store. Writes to different keys never contend beyond a
/// dashmap shard lookup; writes to the same key serialize on its slot.
#[derive(Default)]
pub struct InMemoryStore {
    slots: DashMap<String, Arc<Slot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }

    /// Number of live listeners on a document.
    pub fn listener_count(&self, collection: &str, key: &str) -> usize {
        self.slots
            .get(&document_key(collection, key))
            .map_or(0, |slot| slot.tx.receiver_count())
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn merge_write(
        &self,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<StoredDocument, StoreError> {
        let doc_key = document_key(collection, key);
        let slot = self.slot(&doc_key);
        let mut current = slot
            .current
            .lock()
            .map_err(|_| StoreError::Poisoned(doc_key.clone()))?;

        let mut next = current.clone().unwrap_or(StoredDocument {
            seq: 0,
            fields: Document::new(),
        });
        merge(&mut next.fields, fields);
        next.seq += 1;
        *current = Some(next.clone());

        // Sent under the slot lock so listeners see writes in seq order.
        let _ = slot.tx.send(next.clone());
        Ok(next)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let doc_key = document_key(collection, key);
        match self.slots.get(&doc_key) {
            Some(slot) => slot.snapshot(&doc_key),
            None => Ok(None),
        }
    }

    async fn listen(&self, collection: &str, key: &str) -> Result<DocumentStream, StoreError> {
        let doc_key = document_key(collection, key);
        let slot = self.slot(&doc_key);

        // Snapshot and subscribe under one lock so no write falls between them.
        let (initial, rx) = {
            let current = slot
                .current
                .lock()
                .map_err(|_| StoreError::Poisoned(doc_key.clone()))?;
            (current.clone(), slot.tx.subscribe())
        };

        let state = MemoryListener {
            doc_key,
            slot,
            rx,
            pending: initial,
            last_seq: 0,
        };
        Ok(futures::stream::unfold(state, MemoryListener::next).boxed())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

struct MemoryListener {
    doc_key: String,
    slot: Arc<Slot>,
    rx: broadcast::Receiver<StoredDocument>,
    pending: Option<StoredDocument>,
    last_seq: u64,
}

impl MemoryListener {
    async fn next(mut self) -> Option<(Result<StoredDocument, StoreError>, Self)> {
        loop {
            if let Some(doc) = self.pending.take() {
                if doc.seq > self.last_seq {
                    self.last_seq = doc.seq;
                    return Some((Ok(doc), self));
                }
            }

            match self.rx.recv().await {
                Ok(doc) => self.pending = Some(doc),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(key = %self.doc_key, skipped, "Listener lagged, re-reading current document");
                    match self.slot.snapshot(&self.doc_key) {
                        Ok(doc) => self.pending = doc,
                        Err(e) => return Some((Err(e), self)),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Sled Store
// ============================================================================

/// sled-backed store. One tree per collection, JSON-encoded documents.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(sled::Error::Io)?;
            }
        }
        let db = sled::open(path)?;
        tracing::info!(path = %path.display(), "Opened location store");
        Ok(Self { db })
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn decode_stored(bytes: &[u8]) -> Result<StoredDocument, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl RemoteStore for SledStore {
    async fn merge_write(
        &self,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<StoredDocument, StoreError> {
        let tree = self.db.open_tree(collection)?;
        let mut encode_error = None;

        let stored = tree.update_and_fetch(key.as_bytes(), |old| {
            let mut next = match old.map(decode_stored) {
                Some(Ok(doc)) => doc,
                Some(Err(e)) => {
                    tracing::warn!(collection, key, error = %e, "Replacing undecodable stored document");
                    StoredDocument { seq: 0, fields: Document::new() }
                }
                None => StoredDocument { seq: 0, fields: Document::new() },
            };
            merge(&mut next.fields, fields.clone());
            next.seq += 1;
            match serde_json::to_vec(&next) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    encode_error = Some(e);
                    old.map(<[u8]>::to_vec)
                }
            }
        })?;

        if let Some(e) = encode_error {
            return Err(e.into());
        }
        match stored {
            Some(bytes) => decode_stored(&bytes),
            None => Err(StoreError::EmptyWrite(document_key(collection, key))),
        }
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let tree = self.db.open_tree(collection)?;
        tree.get(key.as_bytes())?
            .map(|bytes| decode_stored(&bytes))
            .transpose()
    }

    async fn listen(&self, collection: &str, key: &str) -> Result<DocumentStream, StoreError> {
        let tree = self.db.open_tree(collection)?;
        // Subscribe before reading so a concurrent write is seen by one or the other.
        let subscriber = tree.watch_prefix(key.as_bytes());
        let initial = tree.get(key.as_bytes())?.map(|bytes| decode_stored(&bytes)).transpose()?;

        let state = SledListener {
            key: key.as_bytes().to_vec(),
            subscriber,
            pending: initial,
            last_seq: 0,
        };
        Ok(futures::stream::unfold(state, SledListener::next).boxed())
    }

    fn backend_name(&self) -> &str {
        "sled"
    }
}

struct SledListener {
    key: Vec<u8>,
    subscriber: sled::Subscriber,
    pending: Option<StoredDocument>,
    last_seq: u64,
}

impl SledListener {
    async fn next(mut self) -> Option<(Result<StoredDocument, StoreError>, Self)> {
        loop {
            if let Some(doc) = self.pending.take() {
                if doc.seq > self.last_seq {
                    self.last_seq = doc.seq;
                    return Some((Ok(doc), self));
                }
            }

            match (&mut self.subscriber).await? {
                // watch_prefix also matches longer keys sharing the prefix
                sled::Event::Insert { key, value } if key.as_ref() == self.key.as_slice() => {
                    match decode_stored(&value) {
                        Ok(doc) => self.pending = Some(doc),
                        Err(e) => return Some((Err(e), self)),
                    }
                }
                _ => {}
            }
        }
    }
}
