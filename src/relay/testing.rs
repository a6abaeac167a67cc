//! In-memory stand-ins for the platform, shared by the relay tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use secrecy::SecretString;

use super::delivery::{ApiError, DiscordApi, WebhookHandle};
use super::gateway::{ChannelHandle, Gateway};
use super::message::{InboundMessage, MessageAuthor, OriginServer};
use super::render::RenderedPayload;

#[derive(Debug, Clone)]
pub struct Sent {
    pub channel_id: String,
    pub id: String,
    pub payload: RenderedPayload,
}

#[derive(Debug, Default)]
pub struct FakeApi {
    next_id: AtomicU64,
    failures: Mutex<HashMap<String, (u32, Option<u16>)>>,
    attempts: Mutex<HashMap<String, u32>>,
    direct: Mutex<Vec<Sent>>,
    via_webhook: Mutex<Vec<Sent>>,
    webhooks: Mutex<HashMap<String, Vec<WebhookHandle>>>,
    deleted: Mutex<HashSet<String>>,
    created: AtomicU64,
    refuse_webhooks: Mutex<bool>,
}

impl FakeApi {
    fn next_id(&self) -> String {
        format!("{}", 9_000 + self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The next `count` sends to `channel_id` fail with `status`.
    pub fn fail_sends(&self, channel_id: &str, count: u32, status: Option<u16>) {
        self.failures
            .lock()
            .insert(channel_id.to_string(), (count, status));
    }

    pub fn fail_webhook_creation(&self) {
        *self.refuse_webhooks.lock() = true;
    }

    pub fn seed_webhook(&self, channel_id: &str, name: &str) -> WebhookHandle {
        let id = self.next_id();
        let webhook = WebhookHandle {
            url: SecretString::from(format!("https://discord.test/api/webhooks/{id}/token")),
            id,
            name: name.to_string(),
        };
        self.webhooks
            .lock()
            .entry(channel_id.to_string())
            .or_default()
            .push(webhook.clone());
        webhook
    }

    pub fn delete_webhook(&self, webhook_id: &str) {
        self.deleted.lock().insert(webhook_id.to_string());
        for hooks in self.webhooks.lock().values_mut() {
            hooks.retain(|w| w.id != webhook_id);
        }
    }

    pub fn send_attempts(&self, channel_id: &str) -> u32 {
        self.attempts.lock().get(channel_id).copied().unwrap_or(0)
    }

    pub fn direct_sends(&self) -> Vec<Sent> {
        self.direct.lock().clone()
    }

    pub fn webhook_sends(&self) -> Vec<Sent> {
        self.via_webhook.lock().clone()
    }

    pub fn created_webhooks(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    fn attempt(&self, channel_id: &str) -> Result<(), ApiError> {
        *self
            .attempts
            .lock()
            .entry(channel_id.to_string())
            .or_default() += 1;

        let mut failures = self.failures.lock();
        if let Some((remaining, status)) = failures.get_mut(channel_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ApiError::new(format!("send to {channel_id} failed"), *status));
        }
        Ok(())
    }

    fn channel_of(&self, webhook_id: &str) -> Option<String> {
        self.webhooks
            .lock()
            .iter()
            .find(|(_, hooks)| hooks.iter().any(|w| w.id == webhook_id))
            .map(|(channel, _)| channel.clone())
    }
}

#[async_trait]
impl DiscordApi for FakeApi {
    async fn send_message(
        &self,
        channel_id: &str,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError> {
        self.attempt(channel_id)?;
        let id = self.next_id();
        self.direct.lock().push(Sent {
            channel_id: channel_id.to_string(),
            id: id.clone(),
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn list_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookHandle>, ApiError> {
        tokio::task::yield_now().await;
        Ok(self
            .webhooks
            .lock()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> Result<WebhookHandle, ApiError> {
        if *self.refuse_webhooks.lock() {
            return Err(ApiError::new("Missing Permissions", Some(403)));
        }
        tokio::task::yield_now().await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.seed_webhook(channel_id, name))
    }

    async fn webhook_exists(&self, webhook: &WebhookHandle) -> Result<bool, ApiError> {
        Ok(!self.deleted.lock().contains(&webhook.id))
    }

    async fn execute_webhook(
        &self,
        webhook: &WebhookHandle,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError> {
        let channel_id = self
            .channel_of(&webhook.id)
            .ok_or_else(|| ApiError::new("Unknown Webhook", Some(404)))?;
        self.attempt(&channel_id)?;
        let id = self.next_id();
        self.via_webhook.lock().push(Sent {
            channel_id,
            id: id.clone(),
            payload: payload.clone(),
        });
        Ok(id)
    }
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    channels: HashMap<String, ChannelHandle>,
    servers: HashMap<String, OriginServer>,
    messages: HashMap<(String, String), InboundMessage>,
}

impl FakeGateway {
    pub fn with_server(mut self, id: &str, name: &str) -> Self {
        self.servers.insert(
            id.to_string(),
            OriginServer {
                id: id.to_string(),
                name: name.to_string(),
                icon_url: None,
            },
        );
        self
    }

    pub fn with_channel(mut self, id: &str, server_id: &str) -> Self {
        self.channels.insert(
            id.to_string(),
            ChannelHandle {
                id: id.to_string(),
                name: format!("channel-{id}"),
                server_id: Some(server_id.to_string()),
            },
        );
        self
    }

    pub fn with_message(mut self, message: InboundMessage) -> Self {
        self.messages
            .insert((message.channel_id.clone(), message.id.clone()), message);
        self
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn resolve_channel(&self, channel_id: &str) -> Option<ChannelHandle> {
        self.channels.get(channel_id).cloned()
    }

    async fn resolve_server(&self, server_id: &str) -> Option<OriginServer> {
        self.servers.get(server_id).cloned()
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Option<InboundMessage> {
        self.messages
            .get(&(channel_id.to_string(), message_id.to_string()))
            .cloned()
    }
}

/// A live-looking message posted in `channel_id` of server `server_id`.
pub fn inbound(id: &str, server_id: &str, channel_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        embeds: Vec::new(),
        attachments: Vec::new(),
        author: MessageAuthor {
            display_name: "alice".to_string(),
            avatar_url: None,
        },
        origin: OriginServer {
            id: server_id.to_string(),
            name: format!("Server {server_id}"),
            icon_url: None,
        },
        origin_channel_name: "alerts".to_string(),
        created_at: Utc::now(),
    }
}
