use serde::Serialize;

use super::embed::{annotate_provenance, build_provenance_embed, copy_embed};
use super::message::{Attachment, Embed, InboundMessage};

/// Everything a destination needs to post one relayed copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
    /// Passed by reference: each url is already linked in `content` and
    /// nothing is uploaded.
    pub attachments: Vec<Attachment>,
    /// Display name used when the payload goes out through a webhook.
    pub username: String,
    pub avatar_url: Option<String>,
}

/// How a relayed copy credits its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    header: String,
    embed_label: String,
    footer_prefix: String,
}

impl Provenance {
    pub fn forwarded(origin_server_name: &str) -> Self {
        Self {
            header: format!("From {origin_server_name}"),
            embed_label: format!("Forwarded from {origin_server_name}"),
            footer_prefix: "Forwarded from".to_string(),
        }
    }

    pub fn target_test(origin_server_name: &str) -> Self {
        let label = format!("Target Test from {origin_server_name}");
        Self {
            header: label.clone(),
            embed_label: label,
            footer_prefix: "Target Test from".to_string(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }
}

pub fn role_mention(role_id: &str) -> String {
    format!("<@&{role_id}>")
}

/// Renders `message` for one destination. Source embeds are copied and the
/// first one gains a provenance footer; a message without embeds gets a
/// generated provenance embed instead.
pub fn render_payload(
    message: &InboundMessage,
    role_id: Option<&str>,
    provenance: &Provenance,
) -> RenderedPayload {
    let base = match role_id {
        Some(role_id) => format!("{} **{}:**", role_mention(role_id), provenance.header),
        None => format!("**{}:**", provenance.header),
    };

    let mut content = base;
    if message.has_text() {
        content.push('\n');
        content.push_str(&message.content);
    } else if !message.attachments.is_empty() {
        content.push_str(" *(Message with attachments)*");
    }
    for attachment in &message.attachments {
        content.push('\n');
        content.push_str(&attachment.url);
    }

    let embeds = if message.embeds.is_empty() {
        vec![build_provenance_embed(
            &message.author,
            &message.origin.name,
            &message.origin_channel_name,
            message.created_at,
            &provenance.footer_prefix,
        )]
    } else {
        annotate_provenance(
            message.embeds.iter().map(copy_embed).collect(),
            &provenance.embed_label,
        )
    };

    RenderedPayload {
        content,
        embeds,
        attachments: message.attachments.clone(),
        username: message.origin.name.clone(),
        avatar_url: message.origin.icon_url.clone(),
    }
}
