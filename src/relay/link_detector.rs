use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::message::{Embed, InboundMessage};

// Matches `scheme://...`, `www.*` and bare `label.tld[/path]` forms. The bare
// form has no leading word boundary, so `notexample.com` inside a longer word
// still matches; relay recall matters more than precision here.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([a-z][a-z0-9+.\-]*://[^\s<>]+|www\.[^\s<>]+|[a-z0-9][a-z0-9-]*[a-z0-9]*\.[a-z]{2,}(?:/[^\s<>]*)?)",
    )
    .unwrap_or_else(|err| panic!("invalid url pattern: {err}"))
});

/// Where in a message a link was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    Text,
    Embed { index: usize, field: EmbedPart },
    Attachment { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPart {
    Url,
    Title,
    Description,
    FieldName,
    FieldValue,
    FooterText,
    AuthorName,
    AuthorUrl,
}

impl fmt::Display for LinkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSource::Text => write!(f, "message content"),
            LinkSource::Embed { index, field } => write!(f, "embed {} {:?}", index + 1, field),
            LinkSource::Attachment { index } => write!(f, "attachment {} url", index + 1),
        }
    }
}

/// Anything the relay can scan for links.
pub trait LinkCandidate {
    fn link_sources(&self) -> Vec<LinkSource>;
}

pub fn matches_url(text: &str) -> bool {
    !text.is_empty() && URL_PATTERN.is_match(text)
}

pub fn contains_link<T: LinkCandidate + ?Sized>(input: &T) -> bool {
    !input.link_sources().is_empty()
}

impl LinkCandidate for str {
    fn link_sources(&self) -> Vec<LinkSource> {
        if matches_url(self) {
            vec![LinkSource::Text]
        } else {
            Vec::new()
        }
    }
}

impl LinkCandidate for String {
    fn link_sources(&self) -> Vec<LinkSource> {
        self.as_str().link_sources()
    }
}

impl LinkCandidate for InboundMessage {
    fn link_sources(&self) -> Vec<LinkSource> {
        let mut sources = Vec::new();

        if matches_url(&self.content) {
            sources.push(LinkSource::Text);
        }

        for (index, embed) in self.embeds.iter().enumerate() {
            sources.extend(
                embed_link_parts(embed)
                    .into_iter()
                    .map(|field| LinkSource::Embed { index, field }),
            );
        }

        for (index, attachment) in self.attachments.iter().enumerate() {
            if matches_url(&attachment.url) {
                sources.push(LinkSource::Attachment { index });
            }
        }

        debug!(
            message_id = %self.id,
            found = !sources.is_empty(),
            sources = ?sources.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "link detection result"
        );

        sources
    }
}

impl LinkCandidate for Embed {
    fn link_sources(&self) -> Vec<LinkSource> {
        embed_link_parts(self)
            .into_iter()
            .map(|field| LinkSource::Embed { index: 0, field })
            .collect()
    }
}

fn embed_link_parts(embed: &Embed) -> Vec<EmbedPart> {
    let check = |value: Option<&str>| value.is_some_and(matches_url);
    let mut parts = Vec::new();

    if check(embed.url.as_deref()) {
        parts.push(EmbedPart::Url);
    }
    if check(embed.title.as_deref()) {
        parts.push(EmbedPart::Title);
    }
    if check(embed.description.as_deref()) {
        parts.push(EmbedPart::Description);
    }
    for field in &embed.fields {
        if matches_url(&field.name) {
            parts.push(EmbedPart::FieldName);
        }
        if matches_url(&field.value) {
            parts.push(EmbedPart::FieldValue);
        }
    }
    if let Some(footer) = &embed.footer
        && matches_url(&footer.text)
    {
        parts.push(EmbedPart::FooterText);
    }
    if let Some(author) = &embed.author {
        if matches_url(&author.name) {
            parts.push(EmbedPart::AuthorName);
        }
        if check(author.url.as_deref()) {
            parts.push(EmbedPart::AuthorUrl);
        }
    }

    parts
}

/// Logs a field-by-field breakdown of a message at debug level.
pub fn log_message_analysis(message: &InboundMessage, label: &str) {
    const PREVIEW_CHARS: usize = 100;

    let preview: String = message.content.chars().take(PREVIEW_CHARS).collect();
    debug!(
        label,
        message_id = %message.id,
        author = %message.author.display_name,
        content_len = message.content.len(),
        content_preview = %preview,
        embeds = message.embeds.len(),
        attachments = message.attachments.len(),
        "message analysis"
    );

    for (index, embed) in message.embeds.iter().enumerate() {
        debug!(
            label,
            embed = index + 1,
            title = ?embed.title,
            url = ?embed.url,
            color = ?embed.color,
            fields = embed.fields.len(),
            author = ?embed.author.as_ref().map(|a| a.name.as_str()),
            thumbnail = ?embed.thumbnail.as_ref().map(|t| t.url.as_str()),
            image = ?embed.image.as_ref().map(|i| i.url.as_str()),
            footer = ?embed.footer.as_ref().map(|f| f.text.as_str()),
            has_links = contains_link(embed),
            "embed details"
        );
    }

    for (index, attachment) in message.attachments.iter().enumerate() {
        debug!(
            label,
            attachment = index + 1,
            filename = %attachment.filename,
            url = %attachment.url,
            "attachment details"
        );
    }

    debug!(label, has_links = contains_link(message), "overall link detection");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use test_case::test_case;

    use super::*;
    use crate::relay::message::{
        Attachment, EmbedAuthor, EmbedField, EmbedFooter, MessageAuthor, OriginServer,
    };

    fn message(content: &str, embeds: Vec<Embed>, attachments: Vec<Attachment>) -> InboundMessage {
        InboundMessage {
            id: "m1".to_string(),
            channel_id: "c1".to_string(),
            content: content.to_string(),
            embeds,
            attachments,
            author: MessageAuthor {
                display_name: "user".to_string(),
                avatar_url: None,
            },
            origin: OriginServer {
                id: "1".to_string(),
                name: "Origin".to_string(),
                icon_url: None,
            },
            origin_channel_name: "alerts".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test_case("see https://x.com" ; "https scheme")]
    #[test_case("ftp://files.example.net/a" ; "other scheme")]
    #[test_case("visit www.example.org" ; "www prefix")]
    #[test_case("check example.com/path?q=1 now" ; "bare domain with path")]
    #[test_case("HTTPS://EXAMPLE.COM" ; "upper case")]
    #[test_case("prefixexample.io" ; "bare domain inside a word")]
    fn detects_links(text: &str) {
        assert!(contains_link(text));
    }

    #[test_case("" ; "empty")]
    #[test_case("hello" ; "plain word")]
    #[test_case("version 1.2.3 released" ; "numeric dots")]
    #[test_case("<@&123456> ping" ; "role mention")]
    #[test_case("e.g. this" ; "single letter tld")]
    fn ignores_text_without_links(text: &str) {
        assert!(!contains_link(text));
    }

    #[test]
    fn plain_message_has_no_links() {
        let msg = message("hello", Vec::new(), Vec::new());
        assert!(!contains_link(&msg));
    }

    #[test]
    fn color_only_embed_has_no_links() {
        let embed = Embed {
            color: Some(0x5865f2),
            ..Embed::default()
        };
        let msg = message("", vec![embed], Vec::new());
        assert!(!contains_link(&msg));
    }

    #[test]
    fn embed_description_link_is_found() {
        let embed = Embed {
            title: Some("T".to_string()),
            description: Some("visit www.example.org".to_string()),
            ..Embed::default()
        };
        let msg = message("", vec![embed], Vec::new());

        assert_eq!(
            msg.link_sources(),
            vec![LinkSource::Embed {
                index: 0,
                field: EmbedPart::Description
            }]
        );
    }

    #[test]
    fn every_embed_part_is_examined() {
        let embed = Embed {
            url: Some("https://a.example".to_string()),
            fields: vec![EmbedField {
                name: "docs.rs".to_string(),
                value: "https://b.example".to_string(),
                inline: false,
            }],
            footer: Some(EmbedFooter {
                text: "www.footer.example".to_string(),
                icon_url: None,
            }),
            author: Some(EmbedAuthor {
                name: "plain".to_string(),
                url: Some("https://author.example".to_string()),
                icon_url: None,
            }),
            ..Embed::default()
        };
        let msg = message("", vec![Embed::default(), embed], Vec::new());

        let fields: Vec<EmbedPart> = msg
            .link_sources()
            .into_iter()
            .map(|source| match source {
                LinkSource::Embed { index, field } => {
                    assert_eq!(index, 1);
                    field
                }
                other => panic!("unexpected source {other:?}"),
            })
            .collect();

        assert_eq!(
            fields,
            vec![
                EmbedPart::Url,
                EmbedPart::FieldName,
                EmbedPart::FieldValue,
                EmbedPart::FooterText,
                EmbedPart::AuthorUrl,
            ]
        );
    }

    #[test]
    fn attachment_url_counts_as_link() {
        let attachment = Attachment {
            url: "https://cdn.discordapp.com/attachments/1/2/file.png".to_string(),
            filename: "file.png".to_string(),
        };
        let msg = message("no link here", Vec::new(), vec![attachment]);

        assert_eq!(msg.link_sources(), vec![LinkSource::Attachment { index: 0 }]);
    }

    #[test]
    fn adding_non_url_fields_never_flips_result() {
        let mut msg = message("hello", Vec::new(), Vec::new());
        assert!(!contains_link(&msg));

        msg.embeds.push(Embed {
            title: Some("Status".to_string()),
            color: Some(1),
            ..Embed::default()
        });
        assert!(!contains_link(&msg));

        msg.content = "see https://x.com".to_string();
        assert!(contains_link(&msg));

        msg.embeds.push(Embed {
            description: Some("nothing to see".to_string()),
            ..Embed::default()
        });
        assert!(contains_link(&msg));
    }
}
