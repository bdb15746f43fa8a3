//! Publisher session: throttled fixes → shared channel.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::PublisherStatus;
use crate::acquisition::PositionStream;
use crate::channel::SharedLocationChannel;

/// A running publisher loop.
pub struct PublisherSession {
    publisher_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PublisherSession {
    /// Spawn the loop over an already-throttled stream.
    pub fn spawn(
        publisher_id: String,
        channel: SharedLocationChannel,
        fixes: PositionStream,
        status: Arc<RwLock<PublisherStatus>>,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run_publisher(
            publisher_id.clone(),
            channel,
            fixes,
            status,
            cancel.clone(),
        ));
        Self {
            publisher_id,
            cancel,
            task: Some(task),
        }
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    /// Whether the loop has exited (source ended, failed, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(publisher_id = %self.publisher_id, error = %e, "[Publisher] Task ended abnormally");
            }
        }
    }
}

impl Drop for PublisherSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_publisher(
    publisher_id: String,
    channel: SharedLocationChannel,
    mut fixes: PositionStream,
    status: Arc<RwLock<PublisherStatus>>,
    cancel: CancellationToken,
) {
    {
        let mut s = status.write().await;
        s.tracking = true;
        s.last_error = None;
    }
    info!(publisher_id = %publisher_id, backend = channel.backend_name(), "[Publisher] Started");

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(publisher_id = %publisher_id, "[Publisher] Shutdown signal received");
                break;
            }
            item = fixes.next() => item,
        };

        let sample = match item {
            Some(Ok(sample)) => sample,
            Some(Err(e)) => {
                // Location errors end the session; the user retries explicitly.
                warn!(publisher_id = %publisher_id, error = %e, "[Publisher] Location stream failed");
                status.write().await.last_error = Some(e);
                break;
            }
            None => {
                info!(publisher_id = %publisher_id, "[Publisher] Location source ended");
                break;
            }
        };

        let result = channel.publish(&publisher_id, &sample).await;
        let mut s = status.write().await;
        s.last_sample = Some(sample);
        match result {
            Ok(state) => {
                s.published_count += 1;
                s.last_seq = Some(state.seq);
                s.last_error = None;
                debug!(publisher_id = %publisher_id, seq = state.seq, speed_kmh = sample.speed_kmh(), "[Publisher] Published {}", sample);
            }
            Err(e) => {
                // Not retried: the next fix supersedes this one.
                warn!(publisher_id = %publisher_id, error = %e, "[Publisher] Publish failed");
                s.last_error = Some(e.as_write_failure());
            }
        }
    }

    let published = {
        let mut s = status.write().await;
        s.tracking = false;
        s.published_count
    };
    info!(publisher_id = %publisher_id, published, "[Publisher] Stopped");
}
