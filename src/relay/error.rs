use thiserror::Error;

use crate::db::DatabaseError;
use crate::utils::retry::RetryError;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid channel binding for server {server_id}: {reason}")]
    InvalidBinding { server_id: String, reason: String },
    #[error("server {server_id} has more than one binding for category {category}")]
    DuplicateBinding { server_id: String, category: String },
    #[error("server {server_id} has more than one role for category {category}")]
    DuplicateRole { server_id: String, category: String },
    #[error("failed to load bindings: {0}")]
    Store(#[from] RetryError<DatabaseError>),
}

/// Terminal failure of one outbound delivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct DeliveryError {
    pub reason: String,
    pub retriable: bool,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>, retriable: bool) -> Self {
        Self {
            reason: reason.into(),
            retriable,
        }
    }
}

/// Per-target failure recorded in a relay report. None of these abort
/// sibling targets.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("no role configured for server {server_id} and category {category}")]
    MissingRole { server_id: String, category: String },
    #[error("channel unavailable: {channel_id}")]
    ChannelUnavailable { channel_id: String },
    #[error("server unavailable: {server_id}")]
    ServerUnavailable { server_id: String },
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl RelayError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, RelayError::Delivery(err) if err.retriable)
    }
}
