use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::ingress::PayloadSink;
use crate::notification::NotificationCache;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<NotificationCache>,
    pub watched_attributes: Arc<Vec<String>>,
    pub sink: Arc<dyn PayloadSink>,
    /// Gauge shared with the subscription manager
    pub active_subscriptions: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        watched_attributes: Vec<String>,
        sink: Arc<dyn PayloadSink>,
        active_subscriptions: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            cache: Arc::new(NotificationCache::new()),
            watched_attributes: Arc::new(watched_attributes),
            sink,
            active_subscriptions,
            start_time: Instant::now(),
        }
    }
}
