use std::sync::Arc;

use tokio::sync::broadcast;

use crate::ingress::PayloadSource;
use crate::reconciler::Reconciler;

/// Background task draining the payload source into the reconciler.
pub struct IngressTask<S: PayloadSource> {
    source: S,
    reconciler: Arc<Reconciler>,
    shutdown: broadcast::Receiver<()>,
}

impl<S: PayloadSource> IngressTask<S> {
    pub fn new(source: S, reconciler: Arc<Reconciler>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            source,
            reconciler,
            shutdown,
        }
    }

    /// Drain payloads until shutdown or until the source closes. One bad
    /// payload never terminates the loop.
    pub async fn run(mut self) {
        tracing::info!("ingress task started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("ingress task received shutdown signal");
                    break;
                }
                payload = self.source.next() => {
                    match payload {
                        Some(raw) => self.handle_payload(&raw).await,
                        None => {
                            tracing::info!("payload source closed");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("ingress task stopped");
    }

    async fn handle_payload(&self, raw: &str) {
        let payload: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "dropping payload that is not valid JSON");
                return;
            }
        };

        let summary = self.reconciler.process_and_send_data(&payload).await;
        if summary.failed > 0 {
            tracing::warn!(
                created = summary.created,
                updated = summary.updated,
                failed = summary.failed,
                "payload batch partially failed"
            );
        }
    }
}
