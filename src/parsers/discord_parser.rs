use chrono::{DateTime, Utc};
use serenity::all::{
    CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, Embed as SerenityEmbed,
    Message as SerenityMessage, Timestamp,
};

use crate::relay::message::{
    Attachment, Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia, InboundMessage,
    MessageAuthor, OriginServer,
};

/// Converts a gateway message. Guild name and channel name are not carried
/// on the message itself, so the caller resolves them.
pub fn inbound_from_serenity(
    msg: &SerenityMessage,
    origin: OriginServer,
    channel_name: &str,
) -> InboundMessage {
    let display_name = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    InboundMessage {
        id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        content: msg.content.clone(),
        embeds: msg.embeds.iter().map(embed_from_serenity).collect(),
        attachments: msg
            .attachments
            .iter()
            .map(|attachment| Attachment {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
            })
            .collect(),
        author: MessageAuthor {
            display_name,
            avatar_url: msg.author.avatar_url(),
        },
        origin,
        origin_channel_name: channel_name.to_string(),
        created_at: to_chrono(&msg.timestamp).unwrap_or_else(Utc::now),
    }
}

pub fn embed_from_serenity(embed: &SerenityEmbed) -> Embed {
    Embed {
        title: embed.title.clone(),
        description: embed.description.clone(),
        url: embed.url.clone(),
        color: embed.colour.map(|colour| colour.0),
        timestamp: embed.timestamp.as_ref().and_then(to_chrono),
        fields: embed
            .fields
            .iter()
            .map(|field| EmbedField {
                name: field.name.clone(),
                value: field.value.clone(),
                inline: field.inline,
            })
            .collect(),
        author: embed.author.as_ref().map(|author| EmbedAuthor {
            name: author.name.clone(),
            url: author.url.clone(),
            icon_url: author.icon_url.clone(),
        }),
        thumbnail: embed.thumbnail.as_ref().map(|thumbnail| EmbedMedia {
            url: thumbnail.url.clone(),
        }),
        image: embed.image.as_ref().map(|image| EmbedMedia {
            url: image.url.clone(),
        }),
        footer: embed.footer.as_ref().map(|footer| EmbedFooter {
            text: footer.text.clone(),
            icon_url: footer.icon_url.clone(),
        }),
    }
}

/// Builds the outgoing embed. Absent fields are never set on the builder so
/// Discord does not receive empty placeholders.
pub fn embed_to_builder(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();

    if let Some(title) = &embed.title {
        builder = builder.title(title);
    }
    if let Some(description) = &embed.description {
        builder = builder.description(description);
    }
    if let Some(url) = &embed.url {
        builder = builder.url(url);
    }
    if let Some(color) = embed.color {
        builder = builder.color(color);
    }
    if let Some(timestamp) = embed
        .timestamp
        .and_then(|ts| Timestamp::from_unix_timestamp(ts.timestamp()).ok())
    {
        builder = builder.timestamp(timestamp);
    }
    for field in &embed.fields {
        builder = builder.field(&field.name, &field.value, field.inline);
    }
    if let Some(author) = &embed.author {
        let mut author_builder = CreateEmbedAuthor::new(&author.name);
        if let Some(url) = &author.url {
            author_builder = author_builder.url(url);
        }
        if let Some(icon_url) = &author.icon_url {
            author_builder = author_builder.icon_url(icon_url);
        }
        builder = builder.author(author_builder);
    }
    if let Some(thumbnail) = &embed.thumbnail {
        builder = builder.thumbnail(&thumbnail.url);
    }
    if let Some(image) = &embed.image {
        builder = builder.image(&image.url);
    }
    if let Some(footer) = &embed.footer {
        let mut footer_builder = CreateEmbedFooter::new(&footer.text);
        if let Some(icon_url) = &footer.icon_url {
            footer_builder = footer_builder.icon_url(icon_url);
        }
        builder = builder.footer(footer_builder);
    }

    builder
}

fn to_chrono(timestamp: &Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_embed() -> Embed {
        Embed {
            title: Some("Outage".to_string()),
            description: Some("https://status.example.com".to_string()),
            color: Some(0xff0000),
            author: Some(EmbedAuthor {
                name: "status-bot".to_string(),
                url: None,
                icon_url: None,
            }),
            fields: vec![EmbedField {
                name: "Region".to_string(),
                value: "eu-west".to_string(),
                inline: true,
            }],
            ..Embed::default()
        }
    }

    #[test]
    fn builder_copies_present_fields() {
        let json = serde_json::to_value(embed_to_builder(&sample_embed())).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object["title"], "Outage");
        assert_eq!(object["color"], 0xff0000);
        assert_eq!(object["fields"][0]["name"], "Region");
        assert_eq!(object["author"]["name"], "status-bot");
    }

    #[test]
    fn builder_carries_timestamp_at_second_precision() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let embed = Embed {
            timestamp: Some(at),
            ..Embed::default()
        };

        let json = serde_json::to_value(embed_to_builder(&embed)).unwrap();
        let rendered = json["timestamp"].as_str().unwrap();

        assert!(rendered.starts_with("2023-11-14T22:13:20"));
    }
}
