//! Collaborator seams: where payloads come from and where filtered
//! notifications go

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

/// Source of raw agent payloads feeding the inserter path.
#[async_trait]
pub trait PayloadSource: Send {
    /// Next raw payload. `None` means the source closed for good.
    async fn next(&mut self) -> Option<String>;
}

/// Downstream consumer of filtered notification documents.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn publish(&self, payload: Value) -> Result<()>;
}

/// mpsc-backed payload source.
pub struct ChannelSource {
    receiver: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl PayloadSource for ChannelSource {
    async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// mpsc-backed notification sink.
pub struct ChannelSink {
    sender: mpsc::Sender<Value>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Value>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl PayloadSink for ChannelSink {
    async fn publish(&self, payload: Value) -> Result<()> {
        self.sender
            .send(payload)
            .await
            .map_err(|_| BridgeError::Payload("notification sink closed".to_string()))
    }
}

/// Producer handle plus source for the ingress side.
pub fn payload_channel(capacity: usize) -> (mpsc::Sender<String>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource::new(rx))
}

/// Sink plus consumer handle for the notification side.
pub fn notification_channel(capacity: usize) -> (ChannelSink, mpsc::Receiver<Value>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (tx, mut source) = payload_channel(4);
        tx.send("first".to_string()).await.unwrap();
        tx.send("second".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(source.next().await.as_deref(), Some("first"));
        assert_eq!(source.next().await.as_deref(), Some("second"));
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_publishes() {
        let (sink, mut rx) = notification_channel(4);
        sink.publish(json!({"id": "urn:x"})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"id": "urn:x"}));
    }

    #[tokio::test]
    async fn test_closed_sink_is_an_error() {
        let (sink, rx) = notification_channel(1);
        drop(rx);
        assert!(sink.publish(json!({})).await.is_err());
    }
}
