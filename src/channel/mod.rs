//! Shared Location Channel
//!
//! Holds the last-known position of each publisher in a [`RemoteStore`] and
//! fans updates out to subscribers.
//!
//! - One document per publisher id; last write wins by arrival order
//! - Subscribers get the current state first, then every later state
//! - A subscriber that falls behind skips to the newest state
//! - Dropping a [`LocationFeed`] releases the underlying listener

pub mod document;
pub mod store;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{DocumentStream, InMemoryStore, RemoteStore, SledStore, StoreError, StoredDocument};

use crate::config::{StoreBackend, StoreConfig};
use crate::types::{PositionSample, TrackingError};

/// Latest published position of one publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherState {
    pub publisher_id: String,
    pub sample: PositionSample,
    /// Write sequence number, 1 on the first publish and +1 per publish
    pub seq: u64,
}

/// Live sequence of publisher states.
pub type LocationFeed = BoxStream<'static, Result<PublisherState, ChannelError>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed document for '{publisher_id}': {reason}")]
    MalformedDocument { publisher_id: String, reason: String },

    #[error("Refusing to publish invalid position {sample} for '{publisher_id}'")]
    InvalidSample { publisher_id: String, sample: String },
}

impl ChannelError {
    /// Map a failed publish into the engine error taxonomy.
    pub fn as_write_failure(&self) -> TrackingError {
        TrackingError::RemoteWriteFailed(self.to_string())
    }

    /// Map a failed read or listen into the engine error taxonomy.
    pub fn as_read_failure(&self) -> TrackingError {
        TrackingError::RemoteReadFailed(self.to_string())
    }
}

/// Typed view over a document collection of publisher positions.
#[derive(Clone)]
pub struct SharedLocationChannel {
    store: Arc<dyn RemoteStore>,
    collection: String,
}

impl SharedLocationChannel {
    pub fn new(store: Arc<dyn RemoteStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Channel over a fresh in-memory store.
    pub fn in_memory(collection: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), collection)
    }

    /// Build the configured backend.
    pub fn from_config(config: &StoreConfig, collection: impl Into<String>) -> Result<Self, ChannelError> {
        let store: Arc<dyn RemoteStore> = match config.backend {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Sled => Arc::new(SledStore::open(&config.path)?),
        };
        Ok(Self::new(store, collection))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn backend_name(&self) -> &str {
        self.store.backend_name()
    }

    /// Upsert the publisher's position. Fields of the stored document that
    /// the sample does not name are kept.
    ///
    /// Samples with non-finite or out-of-range coordinates are rejected
    /// before anything is written.
    pub async fn publish(
        &self,
        publisher_id: &str,
        sample: &PositionSample,
    ) -> Result<PublisherState, ChannelError> {
        if !sample.is_valid() {
            return Err(ChannelError::InvalidSample {
                publisher_id: publisher_id.to_string(),
                sample: sample.to_string(),
            });
        }
        let stored = self
            .store
            .merge_write(&self.collection, publisher_id, document::encode(sample))
            .await?;
        let state = to_state(publisher_id, &stored)?;
        tracing::debug!(publisher_id, seq = state.seq, %sample, "Published position");
        Ok(state)
    }

    /// Live feed for a publisher: the current state (if any), then updates.
    ///
    /// A malformed document yields an `Err` item; the feed continues.
    pub async fn subscribe(&self, publisher_id: &str) -> Result<LocationFeed, ChannelError> {
        let docs = self.store.listen(&self.collection, publisher_id).await?;
        let id = publisher_id.to_string();
        let feed = docs.map(move |item| match item {
            Ok(doc) => to_state(&id, &doc),
            Err(e) => Err(ChannelError::Store(e)),
        });
        tracing::debug!(publisher_id, collection = %self.collection, "Subscribed to publisher");
        Ok(feed.boxed())
    }

    /// One-shot read of the current state.
    pub async fn latest(&self, publisher_id: &str) -> Result<Option<PublisherState>, ChannelError> {
        self.store
            .get(&self.collection, publisher_id)
            .await?
            .map(|doc| to_state(publisher_id, &doc))
            .transpose()
    }
}

fn to_state(publisher_id: &str, doc: &StoredDocument) -> Result<PublisherState, ChannelError> {
    Ok(PublisherState {
        publisher_id: publisher_id.to_string(),
        sample: document::decode(publisher_id, &doc.fields)?,
        seq: doc.seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_latest() {
        let channel = SharedLocationChannel::in_memory("buses");
        assert!(channel.latest("bus1").await.unwrap().is_none());

        let state = channel.publish("bus1", &PositionSample::new(10.0, 10.0, 1_000)).await.unwrap();
        assert_eq!(state.seq, 1);

        let state = channel.publish("bus1", &PositionSample::new(10.005, 10.0, 2_000)).await.unwrap();
        assert_eq!(state.seq, 2);

        let latest = channel.latest("bus1").await.unwrap().unwrap();
        assert_eq!(latest.sample.latitude, 10.005);
        assert_eq!(latest.sample.timestamp_millis, 2_000);
        assert_eq!(latest.sample.speed_mps, Some(0.0));
    }

    #[tokio::test]
    async fn invalid_sample_leaves_stored_position_untouched() {
        let channel = SharedLocationChannel::in_memory("buses");
        channel.publish("bus1", &PositionSample::new(10.0, 10.0, 1_000)).await.unwrap();

        let err = channel.publish("bus1", &PositionSample::new(f64::NAN, 10.0, 2_000)).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidSample { .. }));
        assert!(matches!(err.as_write_failure(), TrackingError::RemoteWriteFailed(_)));
        assert!(channel
            .publish("bus1", &PositionSample::new(95.0, 10.0, 3_000))
            .await
            .is_err());

        let latest = channel.latest("bus1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 1);
        assert_eq!(latest.sample.latitude, 10.0);

        let mut feed = channel.subscribe("bus1").await.unwrap();
        assert_eq!(feed.next().await.unwrap().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn last_write_wins_by_arrival_not_timestamp() {
        let channel = SharedLocationChannel::in_memory("buses");
        channel.publish("bus1", &PositionSample::new(1.0, 1.0, 5_000)).await.unwrap();
        channel.publish("bus1", &PositionSample::new(2.0, 2.0, 1_000)).await.unwrap();
        let latest = channel.latest("bus1").await.unwrap().unwrap();
        assert_eq!(latest.sample.latitude, 2.0);
    }

    #[tokio::test]
    async fn subscribe_sees_current_then_updates() {
        let channel = SharedLocationChannel::in_memory("buses");
        channel.publish("bus1", &PositionSample::new(1.0, 1.0, 0)).await.unwrap();

        let mut feed = channel.subscribe("bus1").await.unwrap();
        assert_eq!(feed.next().await.unwrap().unwrap().seq, 1);

        channel.publish("bus1", &PositionSample::new(1.5, 1.0, 0)).await.unwrap();
        let update = feed.next().await.unwrap().unwrap();
        assert_eq!(update.seq, 2);
        assert_eq!(update.sample.latitude, 1.5);
    }

    #[tokio::test]
    async fn publishers_are_independent() {
        let channel = SharedLocationChannel::in_memory("buses");
        channel.publish("bus1", &PositionSample::new(1.0, 1.0, 0)).await.unwrap();
        let other = channel.publish("bus2", &PositionSample::new(2.0, 2.0, 0)).await.unwrap();
        assert_eq!(other.seq, 1);
    }

    #[tokio::test]
    async fn malformed_document_surfaces_as_error_item() {
        let store = Arc::new(InMemoryStore::new());
        let channel = SharedLocationChannel::new(store.clone(), "buses");
        store
            .merge_write("buses", "bus1", json!({"latitude": "north"}).as_object().unwrap().clone())
            .await
            .unwrap();

        let mut feed = channel.subscribe("bus1").await.unwrap();
        let item = feed.next().await.unwrap();
        assert!(matches!(item, Err(ChannelError::MalformedDocument { .. })));
        assert!(matches!(channel.latest("bus1").await, Err(ChannelError::MalformedDocument { .. })));
    }
}
