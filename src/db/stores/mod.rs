use async_trait::async_trait;

use super::DatabaseError;
use super::models::{ChannelBinding, RoleBinding};

/// Read side of the binding tables. The relay loads both lists in one batch at
/// startup and on refresh; nothing queries them per message.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn list_channel_bindings(&self) -> Result<Vec<ChannelBinding>, DatabaseError>;
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, DatabaseError>;
}
