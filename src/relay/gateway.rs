use async_trait::async_trait;

use super::message::{InboundMessage, OriginServer};

/// A destination channel the bot can currently see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: String,
    pub name: String,
    pub server_id: Option<String>,
}

/// Live lookups against the chat platform. Every failure, including a
/// transport error, is reported as `None`.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn resolve_channel(&self, channel_id: &str) -> Option<ChannelHandle>;

    async fn resolve_server(&self, server_id: &str) -> Option<OriginServer>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Option<InboundMessage>;
}
