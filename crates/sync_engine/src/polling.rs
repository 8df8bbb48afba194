use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::error::SyncError;
use tracing::{debug, info};

use crate::{
    gateway::GatewayApi,
    normalizer::{normalize_payload, NormalizedMessage},
};

/// Pulls bulk history to backfill whatever the push channel missed.
pub struct HistoryPoller {
    gateway: Arc<dyn GatewayApi>,
    instance: Option<String>,
    limit: usize,
    in_flight: AtomicBool,
}

impl HistoryPoller {
    pub fn new(gateway: Arc<dyn GatewayApi>, instance: Option<String>, limit: usize) -> Self {
        Self {
            gateway,
            instance,
            limit,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Fetches and normalizes one history page. Returns an empty batch when a
    /// poll is already running; overlapping polls would only repeat work.
    pub async fn poll_once(&self) -> Result<Vec<NormalizedMessage>, SyncError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("polling: skipping tick, previous poll still running");
            return Ok(Vec::new());
        }
        let result = self.fetch().await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn fetch(&self) -> Result<Vec<NormalizedMessage>, SyncError> {
        let payload = self.gateway.fetch_messages().await?;
        let mut messages = normalize_payload(&payload, None, self.instance.as_deref());
        if messages.len() > self.limit {
            messages.sort_by_key(|m| m.message.timestamp);
            let excess = messages.len() - self.limit;
            messages = messages.split_off(excess);
        }
        info!(count = messages.len(), "polling: history page normalized");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SendReceipt;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use shared::{domain::ConversationKey, error::ErrorKind};

    struct StaticHistory(Value);

    #[async_trait]
    impl GatewayApi for StaticHistory {
        async fn connection_state(&self) -> Result<bool, SyncError> {
            Ok(true)
        }

        async fn fetch_messages(&self) -> Result<Value, SyncError> {
            Ok(self.0.clone())
        }

        async fn send_text(
            &self,
            _key: &ConversationKey,
            _text: &str,
        ) -> Result<SendReceipt, SyncError> {
            Ok(SendReceipt::default())
        }

        async fn fetch_profile_picture(
            &self,
            _key: &ConversationKey,
        ) -> Result<Option<String>, SyncError> {
            Ok(None)
        }
    }

    fn item(id: &str, seconds: i64) -> Value {
        json!({
            "key": {"remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": id},
            "message": {"conversation": id},
            "messageTimestamp": seconds
        })
    }

    #[tokio::test]
    async fn poll_keeps_the_newest_messages_within_limit() {
        let history = json!({"messages": [item("C", 300), item("A", 100), item("B", 200)]});
        let poller = HistoryPoller::new(Arc::new(StaticHistory(history)), Some("store-01".into()), 2);

        let messages = poller.poll_once().await.expect("poll");
        let ids: Vec<_> = messages.iter().map(|m| m.message.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
        assert_eq!(messages[0].message.instance.as_deref(), Some("store-01"));
    }

    #[tokio::test]
    async fn missing_gateway_surfaces_configuration_error() {
        let poller = HistoryPoller::new(Arc::new(crate::gateway::MissingGateway), None, 50);
        let err = poller.poll_once().await.expect_err("missing");
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
        // The in-flight guard is released after a failure.
        assert!(poller.poll_once().await.is_err());
    }
}
