use std::collections::HashMap;

use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandOptionType, CreateCommand,
    CreateCommandOption,
};

use crate::relay::commands::{RelayCommand, RetryRequest, TargetTestRequest, TestRequest};

/// Discord rejects interaction responses longer than this.
pub const MAX_RESPONSE_LENGTH: usize = 2000;

pub fn definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("retry")
            .description("Retry relaying a message that was missed")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "message_id",
                    "ID of the message to relay",
                )
                .required(true),
            ),
        CreateCommand::new("test")
            .description("Simulate relaying a message from an input channel")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "server_id", "Source server ID")
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "channel_id",
                    "Source input channel ID",
                )
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "message_content",
                "Message text (must contain a link)",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "dry_run",
                "Only list destinations (default: true)",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "test_embed",
                "Send an embed instead of plain text (default: false)",
            )),
        CreateCommand::new("target-test")
            .description("Send a test relay to one specific channel")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "from_server_id",
                    "Server the message pretends to come from",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "from_channel_id",
                    "Channel the message pretends to come from",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "target_channel_id",
                    "Channel to deliver to",
                )
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "message_content",
                "Message text (must contain a link)",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "test_embed",
                "Send an embed instead of plain text (default: false)",
            )),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgValue {
    Text(String),
    Flag(bool),
}

/// Option values of one invocation, keyed by option name.
#[derive(Debug, Default, Clone)]
pub struct CommandArgs {
    values: HashMap<String, ArgValue>,
}

impl CommandArgs {
    pub fn from_options(options: &[CommandDataOption]) -> Self {
        let mut args = Self::default();
        for option in options {
            match &option.value {
                CommandDataOptionValue::String(value) => args.insert_text(&option.name, value),
                CommandDataOptionValue::Boolean(value) => args.insert_flag(&option.name, *value),
                _ => {}
            }
        }
        args
    }

    pub fn insert_text(&mut self, name: &str, value: &str) {
        self.values
            .insert(name.to_string(), ArgValue::Text(value.trim().to_string()));
    }

    pub fn insert_flag(&mut self, name: &str, value: bool) {
        self.values.insert(name.to_string(), ArgValue::Flag(value));
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(ArgValue::Text(value)) if !value.is_empty() => Some(value.clone()),
            _ => None,
        }
    }

    fn required_text(&self, name: &str) -> Result<String, String> {
        self.text(name)
            .ok_or_else(|| format!("❌ Missing required option `{name}`."))
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(ArgValue::Flag(value)) => *value,
            _ => default,
        }
    }
}

/// Maps a slash command invocation onto a relay command. The error is the
/// reply shown to the user.
pub fn parse(name: &str, args: &CommandArgs, invoked_in: &str) -> Result<RelayCommand, String> {
    match name {
        "retry" => Ok(RelayCommand::Retry(RetryRequest {
            message_id: args.required_text("message_id")?,
            invoked_in: invoked_in.to_string(),
        })),
        "test" => Ok(RelayCommand::Test(TestRequest {
            server_id: args.required_text("server_id")?,
            channel_id: args.required_text("channel_id")?,
            message_content: args.text("message_content"),
            dry_run: args.flag("dry_run", true),
            test_embed: args.flag("test_embed", false),
        })),
        "target-test" => Ok(RelayCommand::TargetTest(TargetTestRequest {
            from_server_id: args.required_text("from_server_id")?,
            from_channel_id: args.required_text("from_channel_id")?,
            target_channel_id: args.required_text("target_channel_id")?,
            message_content: args.text("message_content"),
            test_embed: args.flag("test_embed", false),
        })),
        other => Err(format!("❌ Unknown command `{other}`.")),
    }
}

/// Cuts `text` to what an interaction response can hold, on a char boundary.
pub fn truncate_response(text: &str) -> String {
    if text.chars().count() <= MAX_RESPONSE_LENGTH {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_RESPONSE_LENGTH - 1).collect();
    truncated.push('…');
    truncated
}
