use chrono::{DateTime, Utc};

use super::message::{Embed, EmbedAuthor, EmbedFooter, EmbedMedia, MessageAuthor};

/// Discord blurple, used for the provenance embed.
pub const PROVENANCE_COLOR: u32 = 0x5865f2;

/// Copies an embed for forwarding. Empty strings are treated as absent so the
/// copy never carries placeholder values.
pub fn copy_embed(source: &Embed) -> Embed {
    Embed {
        title: non_empty(source.title.as_deref()),
        description: non_empty(source.description.as_deref()),
        url: non_empty(source.url.as_deref()),
        color: source.color,
        timestamp: source.timestamp,
        fields: source
            .fields
            .iter()
            .filter(|field| !(field.name.is_empty() && field.value.is_empty()))
            .cloned()
            .collect(),
        author: source.author.as_ref().and_then(|author| {
            let copy = EmbedAuthor {
                name: author.name.clone(),
                url: non_empty(author.url.as_deref()),
                icon_url: non_empty(author.icon_url.as_deref()),
            };
            (!copy.name.is_empty() || copy.url.is_some() || copy.icon_url.is_some()).then_some(copy)
        }),
        thumbnail: copy_media(source.thumbnail.as_ref()),
        image: copy_media(source.image.as_ref()),
        footer: source.footer.as_ref().and_then(|footer| {
            let copy = EmbedFooter {
                text: footer.text.clone(),
                icon_url: non_empty(footer.icon_url.as_deref()),
            };
            (!copy.text.is_empty() || copy.icon_url.is_some()).then_some(copy)
        }),
    }
}

/// Prefixes the first embed's footer with `label`. Other embeds pass through.
pub fn annotate_provenance(embeds: Vec<Embed>, label: &str) -> Vec<Embed> {
    embeds
        .into_iter()
        .enumerate()
        .map(|(index, mut embed)| {
            if index == 0 {
                let footer = embed.footer.get_or_insert_with(EmbedFooter::default);
                footer.text = if footer.text.is_empty() {
                    label.to_string()
                } else {
                    format!("{label} • {}", footer.text)
                };
            }
            embed
        })
        .collect()
}

/// Fallback embed for messages without embeds of their own, so the
/// destination still shows who posted and where.
pub fn build_provenance_embed(
    author: &MessageAuthor,
    origin_server_name: &str,
    origin_channel_name: &str,
    created_at: DateTime<Utc>,
    footer_prefix: &str,
) -> Embed {
    Embed {
        color: Some(PROVENANCE_COLOR),
        author: Some(EmbedAuthor {
            name: format!("{} in {}", author.display_name, origin_server_name),
            url: None,
            icon_url: author.avatar_url.clone(),
        }),
        timestamp: Some(created_at),
        footer: Some(EmbedFooter {
            text: format!("{footer_prefix} #{origin_channel_name}"),
            icon_url: None,
        }),
        ..Embed::default()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn copy_media(media: Option<&EmbedMedia>) -> Option<EmbedMedia> {
    media
        .filter(|m| !m.url.is_empty())
        .map(|m| EmbedMedia { url: m.url.clone() })
}
