//! Location source abstraction.
//!
//! Provides a unified trait for obtaining position fixes from different
//! sources: replayed tracks (CSV / JSON), stdin, a stationary position, and
//! a manually driven source for tests and demos.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{PermissionScope, PositionSample, TrackingError, WatchOptions};

/// A cancellable, ordered sequence of fixes.
///
/// Dropping the stream cancels the underlying watch. An `Err` item is
/// terminal for that watch: consumers stop reading and surface it.
pub type PositionStream = BoxStream<'static, Result<PositionSample, TrackingError>>;

/// Trait abstracting where position fixes come from.
///
/// Implementations handle format parsing and pacing internally. Permission
/// refusals surface as [`TrackingError::PermissionDenied`] and are never
/// retried silently.
#[async_trait]
pub trait LocationSource: Send + Sync + 'static {
    /// Ask for a location permission grant.
    async fn request_permission(&self, scope: PermissionScope) -> Result<(), TrackingError>;

    /// One-shot current fix.
    async fn current_position(&self) -> Result<PositionSample, TrackingError>;

    /// Open a continuous watch. Each call starts a fresh stream.
    async fn watch(&self, options: WatchOptions) -> Result<PositionStream, TrackingError>;

    /// Human-readable name for logging (e.g. "replay", "stdin", "manual").
    fn source_name(&self) -> &str;
}
