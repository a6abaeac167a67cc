pub mod discord_parser;

pub use discord_parser::{embed_to_builder, inbound_from_serenity};
