pub use self::delivery::{ApiError, DeliveryClient, DiscordApi, WebhookCache, WebhookHandle};
pub use self::error::{DeliveryError, RelayError, RoutingError};
pub use self::gateway::{ChannelHandle, Gateway};
pub use self::message::{Attachment, Embed, InboundMessage, OriginServer};
pub use self::render::{Provenance, RenderedPayload};
pub use self::report::{DeliveryResult, RelayOutcome, RelayReport};
pub use self::routing::{RoutingSnapshot, RoutingTable};

pub mod commands;
pub mod delivery;
pub mod embed;
pub mod error;
pub mod gateway;
pub mod link_detector;
pub mod message;
pub mod render;
pub mod report;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::db::ChannelBinding;
use crate::web::metrics::Metrics;

/// One destination of a fan-out, with its role already looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub server_id: String,
    pub channel_id: String,
    pub role_id: Option<String>,
}

/// Relays link-bearing messages to every other server bound to the same
/// category. Holds no per-message state; each call reads one routing snapshot.
pub struct RelayCore {
    routing: Arc<RoutingTable>,
    gateway: Arc<dyn Gateway>,
    delivery: Arc<DeliveryClient>,
}

impl RelayCore {
    pub fn new(
        routing: Arc<RoutingTable>,
        gateway: Arc<dyn Gateway>,
        delivery: Arc<DeliveryClient>,
    ) -> Self {
        Self {
            routing,
            gateway,
            delivery,
        }
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn delivery(&self) -> &Arc<DeliveryClient> {
        &self.delivery
    }

    /// Live path: relays `message` only if it carries a link. `None` means the
    /// link gate rejected it.
    pub async fn handle_inbound(&self, message: &InboundMessage) -> Option<RelayOutcome> {
        Metrics::message_seen();

        if !link_detector::contains_link(message) {
            debug!(message_id = %message.id, channel_id = %message.channel_id, "no links found, skipping");
            return None;
        }

        Metrics::message_with_link();
        Some(self.relay(message, &message.channel_id).await)
    }

    /// Relays `message` as if it had been posted in `channel_id`.
    pub async fn relay(&self, message: &InboundMessage, channel_id: &str) -> RelayOutcome {
        let snapshot = self.routing.snapshot();
        if snapshot.loaded_at().is_none() {
            warn!(message_id = %message.id, "routing table not loaded, refusing to relay");
            return RelayOutcome::NotReady;
        }

        let Some(binding) = snapshot.binding_for_input_channel(channel_id) else {
            debug!(channel_id, "channel is not an input channel");
            return RelayOutcome::NotConfigured {
                channel_id: channel_id.to_string(),
            };
        };

        self.relay_with_binding(&snapshot, message, &binding).await
    }

    /// Fans `message` out to every destination of `binding`'s category and
    /// waits for all of them, successful or not.
    pub async fn relay_with_binding(
        &self,
        snapshot: &RoutingSnapshot,
        message: &InboundMessage,
        binding: &ChannelBinding,
    ) -> RelayOutcome {
        let targets = plan_targets_in(snapshot, &message.origin.id, &binding.category);
        if targets.is_empty() {
            info!(
                message_id = %message.id,
                category = %binding.category,
                "no destinations for category"
            );
            return RelayOutcome::NoTargets {
                category: binding.category.clone(),
            };
        }

        Metrics::relay_started();
        let provenance = Provenance::forwarded(&message.origin.name);

        let deliveries = targets.iter().map(|target| {
            let span = info_span!(
                "relay_target",
                server_id = %target.server_id,
                channel_id = %target.channel_id
            );
            self.relay_to_target(message, target, &binding.category, &provenance)
                .instrument(span)
        });
        let report = RelayReport::from_results(join_all(deliveries).await);

        info!(
            message_id = %message.id,
            origin = %message.origin.name,
            category = %binding.category,
            successful = report.successful(),
            total = report.total(),
            failed_servers = ?report.failed_server_ids(),
            "relay finished"
        );

        RelayOutcome::Completed(report)
    }

    /// Destinations and roles for a message from `source_server_id`, without
    /// sending anything.
    pub fn plan_targets(&self, source_server_id: &str, category: &str) -> Vec<DeliveryTarget> {
        plan_targets_in(&self.routing.snapshot(), source_server_id, category)
    }

    pub fn render_for_target(
        &self,
        message: &InboundMessage,
        role_id: Option<&str>,
        provenance: &Provenance,
    ) -> RenderedPayload {
        render::render_payload(message, role_id, provenance)
    }

    pub async fn resolve_target_channel(&self, channel_id: &str) -> Result<ChannelHandle, RelayError> {
        self.gateway
            .resolve_channel(channel_id)
            .await
            .ok_or_else(|| RelayError::ChannelUnavailable {
                channel_id: channel_id.to_string(),
            })
    }

    pub async fn deliver_to_target(
        &self,
        channel: &ChannelHandle,
        payload: &RenderedPayload,
    ) -> Result<String, RelayError> {
        Ok(self.delivery.deliver(channel, payload).await?)
    }

    async fn relay_to_target(
        &self,
        message: &InboundMessage,
        target: &DeliveryTarget,
        category: &str,
        provenance: &Provenance,
    ) -> DeliveryResult {
        match self.try_relay_to_target(message, target, category, provenance).await {
            Ok(message_id) => {
                Metrics::delivery_succeeded();
                DeliveryResult::delivered(&target.server_id, &target.channel_id, message_id)
            }
            Err(err) => {
                Metrics::delivery_failed();
                match &err {
                    RelayError::Delivery(_) => error!(error = %err, "delivery exhausted"),
                    _ => warn!(error = %err, "target skipped"),
                }
                DeliveryResult::failed(&target.server_id, &target.channel_id, &err)
            }
        }
    }

    async fn try_relay_to_target(
        &self,
        message: &InboundMessage,
        target: &DeliveryTarget,
        category: &str,
        provenance: &Provenance,
    ) -> Result<String, RelayError> {
        let role_id = target
            .role_id
            .as_deref()
            .ok_or_else(|| RelayError::MissingRole {
                server_id: target.server_id.clone(),
                category: category.to_string(),
            })?;

        let channel = self.resolve_target_channel(&target.channel_id).await?;
        let payload = self.render_for_target(message, Some(role_id), provenance);
        self.deliver_to_target(&channel, &payload).await
    }
}

fn plan_targets_in(
    snapshot: &RoutingSnapshot,
    source_server_id: &str,
    category: &str,
) -> Vec<DeliveryTarget> {
    snapshot
        .destinations_for(source_server_id, category)
        .into_iter()
        .map(|binding| DeliveryTarget {
            role_id: snapshot
                .role_for(&binding.server_id, category)
                .map(|role| role.role_id),
            server_id: binding.server_id,
            channel_id: binding.output_channel_id,
        })
        .collect()
}
