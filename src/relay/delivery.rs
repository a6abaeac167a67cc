use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::DeliveryError;
use super::gateway::ChannelHandle;
use super::render::RenderedPayload;
use crate::config::{DeliveryConfig, DeliveryMode};
use crate::utils::retry::{RetryError, RetryPolicy, retry_with_backoff_when};
use crate::web::metrics::Metrics;

/// Failure of a single platform API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// Transport errors, rate limits and server errors are worth retrying.
    pub fn is_retriable(&self) -> bool {
        match self.status {
            Some(status) => status == 429 || status >= 500,
            None => true,
        }
    }
}

/// A webhook the bot owns, with the token-bearing execution URL.
#[derive(Debug, Clone)]
pub struct WebhookHandle {
    pub id: String,
    pub name: String,
    pub url: SecretString,
}

/// Raw platform calls used for delivery. Implemented over serenity's HTTP
/// client in production and by in-memory fakes in tests.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError>;

    /// Webhooks in the channel the bot can execute.
    async fn list_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookHandle>, ApiError>;

    async fn create_webhook(&self, channel_id: &str, name: &str) -> Result<WebhookHandle, ApiError>;

    async fn webhook_exists(&self, webhook: &WebhookHandle) -> Result<bool, ApiError>;

    async fn execute_webhook(
        &self,
        webhook: &WebhookHandle,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError>;
}

/// Webhooks keyed by destination channel id.
///
/// Lookups and inserts are not serialized across the network calls between
/// them, so two relays hitting a cold channel at once can both create a
/// webhook. The next miss finds one of them by name and the cache converges.
#[derive(Debug, Default)]
pub struct WebhookCache {
    entries: RwLock<HashMap<String, WebhookHandle>>,
    own_ids: RwLock<HashSet<String>>,
}

impl WebhookCache {
    pub fn get(&self, channel_id: &str) -> Option<WebhookHandle> {
        self.entries.read().get(channel_id).cloned()
    }

    pub fn insert(&self, channel_id: &str, webhook: WebhookHandle) {
        self.own_ids.write().insert(webhook.id.clone());
        self.entries.write().insert(channel_id.to_string(), webhook);
    }

    pub fn evict(&self, channel_id: &str) -> Option<WebhookHandle> {
        self.entries.write().remove(channel_id)
    }

    /// True for any webhook this process has used, including evicted ones.
    pub fn is_own_webhook(&self, webhook_id: &str) -> bool {
        self.own_ids.read().contains(webhook_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub struct DeliveryClient {
    api: Arc<dyn DiscordApi>,
    mode: DeliveryMode,
    webhook_name: String,
    policy: RetryPolicy,
    cache: Arc<WebhookCache>,
}

impl DeliveryClient {
    pub fn new(api: Arc<dyn DiscordApi>, config: &DeliveryConfig) -> Self {
        Self::with_policy(
            api,
            config.mode,
            &config.webhook_name,
            config.retry_policy(),
        )
    }

    pub fn with_policy(
        api: Arc<dyn DiscordApi>,
        mode: DeliveryMode,
        webhook_name: &str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            mode,
            webhook_name: webhook_name.to_string(),
            policy,
            cache: Arc::new(WebhookCache::default()),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn webhook_cache(&self) -> Arc<WebhookCache> {
        self.cache.clone()
    }

    /// Sends `payload` to `channel` and returns the posted message id.
    pub async fn deliver(
        &self,
        channel: &ChannelHandle,
        payload: &RenderedPayload,
    ) -> Result<String, DeliveryError> {
        match self.mode {
            DeliveryMode::Direct => self.send_direct(channel, payload).await,
            DeliveryMode::Webhook => match self.acquire_webhook(channel).await {
                Ok(webhook) => self.send_via_webhook(channel, &webhook, payload).await,
                Err(err) => {
                    warn!(
                        channel_id = %channel.id,
                        error = %err,
                        "webhook unavailable, falling back to direct send"
                    );
                    self.send_direct(channel, payload).await
                }
            },
        }
    }

    async fn send_direct(
        &self,
        channel: &ChannelHandle,
        payload: &RenderedPayload,
    ) -> Result<String, DeliveryError> {
        let operation = format!("send message to #{}", channel.name);
        let message_id = retry_with_backoff_when(
            &self.policy,
            &operation,
            || self.api.send_message(&channel.id, payload),
            ApiError::is_retriable,
        )
        .await
        .map_err(into_delivery_error)?;

        info!(channel_id = %channel.id, message_id = %message_id, "message delivered");
        Ok(message_id)
    }

    async fn send_via_webhook(
        &self,
        channel: &ChannelHandle,
        webhook: &WebhookHandle,
        payload: &RenderedPayload,
    ) -> Result<String, DeliveryError> {
        let operation = format!("execute webhook in #{}", channel.name);
        let result = retry_with_backoff_when(
            &self.policy,
            &operation,
            || self.api.execute_webhook(webhook, payload),
            ApiError::is_retriable,
        )
        .await;

        match result {
            Ok(message_id) => {
                info!(
                    channel_id = %channel.id,
                    message_id = %message_id,
                    webhook_id = %webhook.id,
                    "message delivered via webhook"
                );
                Ok(message_id)
            }
            Err(err) => {
                if !err.source.is_retriable() {
                    self.cache.evict(&channel.id);
                }
                Err(into_delivery_error(err))
            }
        }
    }

    /// Returns a usable webhook for `channel`: a cached one that still exists,
    /// else one found by name, else a newly created one.
    pub async fn acquire_webhook(
        &self,
        channel: &ChannelHandle,
    ) -> Result<WebhookHandle, DeliveryError> {
        if let Some(cached) = self.cache.get(&channel.id) {
            let exists = retry_with_backoff_when(
                &self.policy,
                "validate cached webhook",
                || self.api.webhook_exists(&cached),
                ApiError::is_retriable,
            )
            .await
            .map_err(into_delivery_error)?;

            if exists {
                Metrics::cache_hit();
                return Ok(cached);
            }

            debug!(channel_id = %channel.id, webhook_id = %cached.id, "cached webhook is gone, evicting");
            self.cache.evict(&channel.id);
        }

        Metrics::cache_miss();

        let existing = retry_with_backoff_when(
            &self.policy,
            "fetch channel webhooks",
            || self.api.list_webhooks(&channel.id),
            ApiError::is_retriable,
        )
        .await
        .map_err(into_delivery_error)?;

        let webhook = match existing.into_iter().find(|w| w.name == self.webhook_name) {
            Some(webhook) => webhook,
            None => {
                let created = retry_with_backoff_when(
                    &self.policy,
                    "create webhook",
                    || self.api.create_webhook(&channel.id, &self.webhook_name),
                    ApiError::is_retriable,
                )
                .await
                .map_err(into_delivery_error)?;
                info!(channel_id = %channel.id, webhook_id = %created.id, "created relay webhook");
                created
            }
        };

        self.cache.insert(&channel.id, webhook.clone());
        Ok(webhook)
    }
}

fn into_delivery_error(err: RetryError<ApiError>) -> DeliveryError {
    DeliveryError::new(err.to_string(), err.source.is_retriable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::FakeApi;

    fn channel(id: &str) -> ChannelHandle {
        ChannelHandle {
            id: id.to_string(),
            name: format!("name-{id}"),
            server_id: Some("2".to_string()),
        }
    }

    fn payload() -> RenderedPayload {
        RenderedPayload {
            content: "<@&R> **From Origin:**".to_string(),
            username: "Origin".to_string(),
            ..RenderedPayload::default()
        }
    }

    fn client(api: Arc<FakeApi>, mode: DeliveryMode) -> DeliveryClient {
        DeliveryClient::with_policy(api, mode, "Link Relay", RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn direct_send_retries_transient_failures() {
        let api = Arc::new(FakeApi::default());
        api.fail_sends("c3", 2, None);

        let id = client(api.clone(), DeliveryMode::Direct)
            .deliver(&channel("c3"), &payload())
            .await
            .unwrap();

        assert_eq!(api.send_attempts("c3"), 3);
        assert_eq!(api.direct_sends().len(), 1);
        assert_eq!(api.direct_sends()[0].id, id);
    }

    #[tokio::test]
    async fn exhausted_send_reports_operation_and_retriability() {
        let api = Arc::new(FakeApi::default());
        api.fail_sends("c3", 10, Some(503));

        let err = client(api.clone(), DeliveryMode::Direct)
            .deliver(&channel("c3"), &payload())
            .await
            .unwrap_err();

        assert_eq!(api.send_attempts("c3"), 3);
        assert!(err.retriable);
        assert!(err.reason.contains("send message to #name-c3"));
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let api = Arc::new(FakeApi::default());
        api.fail_sends("c3", 10, Some(403));

        let err = client(api.clone(), DeliveryMode::Direct)
            .deliver(&channel("c3"), &payload())
            .await
            .unwrap_err();

        assert_eq!(api.send_attempts("c3"), 1);
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn webhook_is_created_once_then_reused() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone(), DeliveryMode::Webhook);

        client.deliver(&channel("c3"), &payload()).await.unwrap();
        client.deliver(&channel("c3"), &payload()).await.unwrap();

        assert_eq!(api.created_webhooks(), 1);
        assert_eq!(api.webhook_sends().len(), 2);
        assert_eq!(api.webhook_sends()[0].payload.username, "Origin");
        assert!(api.direct_sends().is_empty());

        let cached = client.webhook_cache().get("c3").unwrap();
        assert!(client.webhook_cache().is_own_webhook(&cached.id));
    }

    #[tokio::test]
    async fn existing_webhook_is_found_by_name() {
        let api = Arc::new(FakeApi::default());
        let existing = api.seed_webhook("c3", "Link Relay");
        api.seed_webhook("c3", "Someone Else");

        let webhook = client(api.clone(), DeliveryMode::Webhook)
            .acquire_webhook(&channel("c3"))
            .await
            .unwrap();

        assert_eq!(webhook.id, existing.id);
        assert_eq!(api.created_webhooks(), 0);
    }

    #[tokio::test]
    async fn stale_cached_webhook_is_evicted_and_recreated() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone(), DeliveryMode::Webhook);

        let first = client.acquire_webhook(&channel("c3")).await.unwrap();
        api.delete_webhook(&first.id);

        let second = client.acquire_webhook(&channel("c3")).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(api.created_webhooks(), 2);
        assert_eq!(client.webhook_cache().get("c3").unwrap().id, second.id);
    }

    #[tokio::test]
    async fn concurrent_cold_lookups_converge_on_named_webhook() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone(), DeliveryMode::Webhook);
        let target = channel("c3");
        let payload = payload();

        let (first, second) = futures::future::join(
            client.deliver(&target, &payload),
            client.deliver(&target, &payload),
        )
        .await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        let created = api.created_webhooks();
        assert!((1..=2).contains(&created));

        client.webhook_cache().evict("c3");
        client.deliver(&target, &payload).await.unwrap();

        assert_eq!(api.created_webhooks(), created);
        assert_eq!(api.webhook_sends().len(), 3);
        assert!(api.direct_sends().is_empty());
    }

    #[tokio::test]
    async fn permanent_webhook_error_evicts_cache_entry() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone(), DeliveryMode::Webhook);

        let webhook = client.acquire_webhook(&channel("c3")).await.unwrap();
        api.delete_webhook(&webhook.id);

        let err = client
            .send_via_webhook(&channel("c3"), &webhook, &payload())
            .await
            .unwrap_err();

        assert!(!err.retriable);
        assert!(client.webhook_cache().get("c3").is_none());
        assert!(api.webhook_sends().is_empty());
    }

    #[tokio::test]
    async fn webhook_acquisition_failure_falls_back_to_direct() {
        let api = Arc::new(FakeApi::default());
        api.fail_webhook_creation();

        let client = client(api.clone(), DeliveryMode::Webhook);

        let id = client.deliver(&channel("c3"), &payload()).await.unwrap();

        assert!(api.webhook_sends().is_empty());
        assert_eq!(api.direct_sends().len(), 1);
        assert_eq!(api.direct_sends()[0].id, id);
        assert!(client.webhook_cache().is_empty());
    }

    #[test]
    fn api_error_retriability() {
        assert!(ApiError::new("timeout", None).is_retriable());
        assert!(ApiError::new("rate limited", Some(429)).is_retriable());
        assert!(ApiError::new("bad gateway", Some(502)).is_retriable());
        assert!(!ApiError::new("missing access", Some(403)).is_retriable());
        assert!(!ApiError::new("unknown webhook", Some(404)).is_retriable());
    }
}
