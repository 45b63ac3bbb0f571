use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::fallback::FallbackExtractor;
use crate::sync::{RawMessage, SyncController};
use crate::upload::Uploader;

/// Drain `rx` into the controller until every sender is dropped.
///
/// Each message is ingested on its own task so a slow upload never holds up
/// the next message. Duplicates and out-of-order deliveries are ingested as
/// they come. The handle resolves to the number of messages processed.
pub fn spawn_intake_worker<U, F>(
    controller: Arc<SyncController<U, F>>,
    mut rx: mpsc::Receiver<RawMessage>,
) -> JoinHandle<usize>
where
    U: Uploader + 'static,
    F: FallbackExtractor + 'static,
{
    tokio::spawn(async move {
        let mut inflight = JoinSet::new();
        let mut processed = 0usize;

        while let Some(message) = rx.recv().await {
            let controller = Arc::clone(&controller);
            inflight.spawn(async move { controller.ingest(message).await });

            // Reap whatever already finished so the set stays small.
            while let Some(done) = inflight.try_join_next() {
                processed += record_outcome(done);
            }
        }

        while let Some(done) = inflight.join_next().await {
            processed += record_outcome(done);
        }
        tracing::info!(processed, "intake channel closed");
        processed
    })
}

fn record_outcome(
    done: Result<payclaim_core::ParsedPayment, tokio::task::JoinError>,
) -> usize {
    match done {
        Ok(payment) => {
            tracing::debug!(
                local_id = %payment.local_id,
                status = %payment.sync_status,
                "message ingested"
            );
            1
        }
        Err(e) => {
            tracing::warn!("intake task failed: {e}");
            0
        }
    }
}
