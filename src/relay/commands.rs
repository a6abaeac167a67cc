use std::fmt::Write as _;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::embed::PROVENANCE_COLOR;
use super::link_detector::{contains_link, log_message_analysis};
use super::message::{Embed, EmbedAuthor, EmbedFooter, InboundMessage, OriginServer};
use super::render::Provenance;
use super::report::{RelayOutcome, RelayReport};
use super::RelayCore;

pub const DEFAULT_TEST_CONTENT: &str = "Test message with link: https://example.com";
pub const DEFAULT_TARGET_TEST_CONTENT: &str = "Target test message with link: https://example.com";

static SNOWFLAKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{17,19}$").unwrap_or_else(|err| panic!("invalid snowflake pattern: {err}"))
});

pub fn is_snowflake(id: &str) -> bool {
    SNOWFLAKE.is_match(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub message_id: String,
    /// Channel the command was invoked in; searched first.
    pub invoked_in: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub server_id: String,
    pub channel_id: String,
    pub message_content: Option<String>,
    pub dry_run: bool,
    pub test_embed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTestRequest {
    pub from_server_id: String,
    pub from_channel_id: String,
    pub target_channel_id: String,
    pub message_content: Option<String>,
    pub test_embed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Retry(RetryRequest),
    Test(TestRequest),
    TargetTest(TargetTestRequest),
}

impl RelayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RelayCommand::Retry(_) => "retry",
            RelayCommand::Test(_) => "test",
            RelayCommand::TargetTest(_) => "target-test",
        }
    }
}

/// Runs a command and returns the reply text shown to the invoking user.
pub async fn execute(core: &RelayCore, command: RelayCommand) -> String {
    match command {
        RelayCommand::Retry(request) => retry(core, &request).await,
        RelayCommand::Test(request) => test(core, &request).await,
        RelayCommand::TargetTest(request) => target_test(core, &request).await,
    }
}

pub async fn retry(core: &RelayCore, request: &RetryRequest) -> String {
    if !is_snowflake(&request.message_id) {
        return "❌ Invalid message ID format. Please provide a valid Discord message ID.".to_string();
    }

    let Some((message, channel_id)) = find_message(core, request).await else {
        return "❌ Message not found. Make sure the message ID is correct.".to_string();
    };

    if core
        .routing()
        .binding_for_input_channel(&channel_id)
        .is_none()
    {
        return "❌ This message is not from a configured input channel.".to_string();
    }

    if !contains_link(&message) {
        return "❌ This message does not contain any links.".to_string();
    }

    let outcome = core.relay(&message, &channel_id).await;
    let report = outcome.report();
    info!(
        message_id = %message.id,
        successful = report.successful(),
        total = report.total(),
        "retry finished"
    );

    let mut response = match &outcome {
        RelayOutcome::Completed(_) => "✅ **Retry Complete**\n".to_string(),
        other => format!("⚠️ **Retry Skipped:** {}\n", describe_short_circuit(other)),
    };
    response.push_str(&format_summary(&report));
    response
}

async fn find_message(core: &RelayCore, request: &RetryRequest) -> Option<(InboundMessage, String)> {
    let gateway = core.gateway();

    if let Some(message) = gateway
        .fetch_message(&request.invoked_in, &request.message_id)
        .await
    {
        return Some((message, request.invoked_in.clone()));
    }

    let mut input_channels: Vec<String> = core
        .routing()
        .all_input_channel_ids()
        .into_iter()
        .filter(|id| *id != request.invoked_in)
        .collect();
    input_channels.sort();

    for channel_id in input_channels {
        if let Some(message) = gateway.fetch_message(&channel_id, &request.message_id).await {
            return Some((message, channel_id));
        }
    }

    None
}

pub async fn test(core: &RelayCore, request: &TestRequest) -> String {
    if !is_snowflake(&request.server_id) || !is_snowflake(&request.channel_id) {
        return "❌ Invalid server or channel ID format.".to_string();
    }

    let snapshot = core.routing().snapshot();
    let Some(binding) = snapshot.binding_for_input_channel(&request.channel_id) else {
        return format!(
            "❌ Channel {} is not configured as an input channel.",
            request.channel_id
        );
    };

    let Some(source) = core.gateway().resolve_server(&request.server_id).await else {
        return format!("❌ Could not fetch source server {}.", request.server_id);
    };

    let message = synthetic_message(
        source.clone(),
        &request.channel_id,
        "TestUser",
        request.message_content.as_deref().unwrap_or(DEFAULT_TEST_CONTENT),
        request.test_embed.then(|| sample_embed("Test")),
    );
    log_message_analysis(&message, "test command message");

    if !contains_link(&message) {
        return "❌ Test message does not contain any links.".to_string();
    }

    let targets = core.plan_targets(&source.id, &binding.category);
    if targets.is_empty() {
        return format!(
            "❌ No target servers found for category \"{}\".\n{}",
            binding.category,
            format_summary(&RelayReport::empty())
        );
    }

    let mut response = format!(
        "🧪 **Test Results** {}\n\n📤 **Source:** {} ({})\n📝 **Channel:** <#{}> ({})\n🎯 **Target Servers:** {}\n🔗 **Link Detection:** ✅ Passed\n\n",
        test_kind(request.test_embed),
        source.name,
        source.id,
        binding.input_channel_id,
        binding.category,
        targets.len(),
    );

    if request.dry_run {
        response.push_str("🔍 **DRY RUN**: no messages will be sent\n📋 **Target Server Details:**\n");
        let mut with_role = 0;
        for target in &targets {
            let server = match core.gateway().resolve_server(&target.server_id).await {
                Some(server) => format!("• {} ({})", server.name, target.server_id),
                None => format!("• Server {} ⚠️ (bot not in server)", target.server_id),
            };
            let role = match &target.role_id {
                Some(role_id) => {
                    with_role += 1;
                    format!("<@&{role_id}>")
                }
                None => "❌ no role found".to_string(),
            };
            let _ = writeln!(
                response,
                "{server}\n  └─ Channel: <#{}>\n  └─ Role: {role}",
                target.channel_id
            );
        }
        let _ = write!(
            response,
            "\n📊 **Summary:** {with_role}/{} targets ready\n💡 Use `dry_run: false` to actually send test messages.",
            targets.len()
        );
    } else {
        response.push_str("🚀 **LIVE TEST**: sending messages...\n\n");
        let outcome = core.relay_with_binding(&snapshot, &message, &binding).await;
        response.push_str(&format_summary(&outcome.report()));
    }

    response
}

pub async fn target_test(core: &RelayCore, request: &TargetTestRequest) -> String {
    let ids = [
        &request.from_server_id,
        &request.from_channel_id,
        &request.target_channel_id,
    ];
    if !ids.iter().all(|id| is_snowflake(id)) {
        return "❌ Invalid server or channel ID format. Please provide valid Discord IDs.".to_string();
    }

    let Some(source) = core.gateway().resolve_server(&request.from_server_id).await else {
        return format!(
            "❌ Could not fetch source server {}. Bot may not be in that server.",
            request.from_server_id
        );
    };

    let Ok(target) = core.resolve_target_channel(&request.target_channel_id).await else {
        return format!(
            "❌ Could not access target channel {}. Bot may not have access.",
            request.target_channel_id
        );
    };

    let mut response = String::new();
    let binding = core
        .routing()
        .binding_for_input_channel(&request.from_channel_id);
    if binding.is_none() {
        warn!(channel_id = %request.from_channel_id, "target test from unconfigured channel");
        let _ = writeln!(
            response,
            "⚠️ Channel {} is not configured as an input channel, proceeding anyway.",
            request.from_channel_id
        );
    }

    let message = synthetic_message(
        source.clone(),
        &request.from_channel_id,
        "TargetTestUser",
        request
            .message_content
            .as_deref()
            .unwrap_or(DEFAULT_TARGET_TEST_CONTENT),
        request.test_embed.then(|| sample_embed("Target Test")),
    );
    log_message_analysis(&message, "target test message");

    if !contains_link(&message) {
        response.push_str("❌ Test message does not contain any links. Link detection failed.");
        return response;
    }

    let role = match (&binding, &target.server_id) {
        (Some(binding), Some(server_id)) => core.routing().role_for(server_id, &binding.category),
        _ => None,
    };

    let payload = core.render_for_target(
        &message,
        role.as_ref().map(|r| r.role_id.as_str()),
        &Provenance::target_test(&source.name),
    );
    let result = core.deliver_to_target(&target, &payload).await;

    let title = if result.is_ok() { "Complete" } else { "Failed" };
    let _ = write!(
        response,
        "🎯 **Target Test {title}** {}\n\n📤 **Source:** {} ({})\n🎯 **Target:** {} ({})\n🔗 **Link Detection:** ✅ Passed\n\n",
        test_kind(request.test_embed),
        source.name,
        source.id,
        target.name,
        target.id,
    );

    let target_server = target.server_id.as_deref().unwrap_or("unknown");
    match result {
        Ok(message_id) => {
            let _ = write!(
                response,
                "📊 **Summary:** 1/1 successful\n📨 **Message ID:** {message_id}"
            );
        }
        Err(err) => {
            let _ = write!(
                response,
                "📊 **Summary:** 0/1 successful\n❌ **Failed Servers:**\n• {target_server}: {err}"
            );
        }
    }

    response
}

fn synthetic_message(
    origin: OriginServer,
    channel_id: &str,
    author: &str,
    content: &str,
    embed: Option<Embed>,
) -> InboundMessage {
    match embed {
        Some(embed) => InboundMessage::synthetic(
            origin,
            channel_id,
            author,
            "Test message with embed",
            vec![embed],
        ),
        None => InboundMessage::synthetic(origin, channel_id, author, content, Vec::new()),
    }
}

fn sample_embed(kind: &str) -> Embed {
    let slug = kind.to_lowercase().replace(' ', "-");
    Embed {
        title: Some(format!("{kind} Embed")),
        description: Some(format!(
            "This embed contains a test link: https://example.com/{slug}"
        )),
        url: Some(format!("https://example.com/{slug}")),
        color: Some(PROVENANCE_COLOR),
        timestamp: Some(Utc::now()),
        author: Some(EmbedAuthor {
            name: format!("{kind} Author"),
            url: Some("https://example.com/author".to_string()),
            icon_url: None,
        }),
        footer: Some(EmbedFooter {
            text: format!("{kind} Footer"),
            icon_url: None,
        }),
        ..Embed::default()
    }
}

fn test_kind(embed: bool) -> &'static str {
    if embed { "(Embed Test)" } else { "(Message Test)" }
}

fn describe_short_circuit(outcome: &RelayOutcome) -> String {
    match outcome {
        RelayOutcome::NotReady => "routing table is not loaded yet".to_string(),
        RelayOutcome::NotConfigured { channel_id } => {
            format!("channel {channel_id} is not an input channel")
        }
        RelayOutcome::NoTargets { category } => {
            format!("no target servers found for category \"{category}\"")
        }
        RelayOutcome::Completed(_) => "completed".to_string(),
    }
}

/// Counts plus every failing server with its error.
pub fn format_summary(report: &RelayReport) -> String {
    let mut summary = format!(
        "📊 **Summary:** {}/{} successful\n• Delivered: {} | Failed: {}",
        report.successful(),
        report.total(),
        report.successful(),
        report.failed()
    );

    if report.failed() > 0 {
        summary.push_str("\n❌ **Failed Servers:**");
        for failure in report.failures() {
            let _ = write!(summary, "\n• {}: {}", failure.server_id, failure.error);
        }
    }

    summary
}
