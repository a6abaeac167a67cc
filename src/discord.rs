use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, warn};

use serenity::all::{
    ChannelId, Client as SerenityClient, Command, Context as SerenityContext, CreateMessage,
    CreateWebhook, EditInteractionResponse, EventHandler as SerenityEventHandler,
    ExecuteWebhook, GatewayIntents, GuildId, Http, Interaction, Message as SerenityMessage,
    MessageId, Ready, UserId, Webhook, WebhookId,
};
use tokio::sync::{Mutex as AsyncMutex, RwLock, oneshot};

use crate::config::Config;
use crate::parsers::{embed_to_builder, inbound_from_serenity};
use crate::relay::message::{InboundMessage, OriginServer};
use crate::relay::{
    ApiError, ChannelHandle, DiscordApi, Gateway, RelayCore, RelayOutcome, RenderedPayload,
    WebhookHandle,
};

pub mod commands;

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT: Duration = Duration::from_secs(30);

type HttpSlot = Arc<RwLock<Option<Arc<Http>>>>;
type CoreSlot = Arc<RwLock<Option<Arc<RelayCore>>>>;

#[derive(Clone)]
pub struct DiscordClient {
    config: Arc<Config>,
    login_state: Arc<AsyncMutex<DiscordLoginState>>,
    core: CoreSlot,
    http: HttpSlot,
    own_user_id: Arc<OnceCell<UserId>>,
}

#[derive(Default)]
struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct RelayEventHandler {
    ready_sender: Arc<AsyncMutex<Option<oneshot::Sender<()>>>>,
    core: CoreSlot,
    own_user_id: Arc<OnceCell<UserId>>,
    commands_enabled: bool,
}

#[serenity::async_trait]
impl SerenityEventHandler for RelayEventHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        let _ = self.own_user_id.set(ready.user.id);

        if self.commands_enabled {
            match Command::set_global_commands(&ctx.http, commands::definitions()).await {
                Ok(registered) => info!("registered {} slash commands", registered.len()),
                Err(err) => error!("failed to register slash commands: {err}"),
            }
        }

        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn message(&self, ctx: SerenityContext, msg: SerenityMessage) {
        if self.own_user_id.get() == Some(&msg.author.id) {
            return;
        }

        let core = self.core.read().await.clone();
        let Some(core) = core else {
            debug!("ignoring discord message before relay binding");
            return;
        };

        if let Some(webhook_id) = msg.webhook_id
            && core
                .delivery()
                .webhook_cache()
                .is_own_webhook(&webhook_id.to_string())
        {
            debug!(
                "ignoring discord message from our own webhook webhook_id={} message_id={}",
                webhook_id, msg.id
            );
            return;
        }

        let Some(guild_id) = msg.guild_id else {
            return;
        };
        if !core
            .routing()
            .all_input_channel_ids()
            .contains(&msg.channel_id.to_string())
        {
            return;
        }

        let message = to_inbound(&ctx, &core, guild_id, &msg).await;
        match core.handle_inbound(&message).await {
            Some(RelayOutcome::Completed(report)) => info!(
                "relayed message {} from {}: {}/{} delivered, failed servers: {:?}",
                message.id,
                message.origin.name,
                report.successful(),
                report.total(),
                report.failed_server_ids()
            ),
            Some(other) => debug!("message {} not relayed: {:?}", message.id, other),
            None => {}
        }
    }

    async fn interaction_create(&self, ctx: SerenityContext, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        let core = self.core.read().await.clone();
        let Some(core) = core else {
            warn!("ignoring /{} before relay binding", command.data.name);
            return;
        };

        if let Err(err) = command.defer_ephemeral(&ctx.http).await {
            error!("failed to defer /{}: {err}", command.data.name);
            return;
        }

        let args = commands::CommandArgs::from_options(&command.data.options);
        let reply = match commands::parse(
            &command.data.name,
            &args,
            &command.channel_id.to_string(),
        ) {
            Ok(relay_command) => {
                info!(
                    "running /{} for user {}",
                    relay_command.name(),
                    command.user.id
                );
                crate::relay::commands::execute(&core, relay_command).await
            }
            Err(reply) => reply,
        };

        let response = EditInteractionResponse::new().content(commands::truncate_response(&reply));
        if let Err(err) = command.edit_response(&ctx.http, response).await {
            error!("failed to respond to /{}: {err}", command.data.name);
        }
    }
}

/// Builds the relay's view of a gateway message, preferring the cache for the
/// guild and channel names.
async fn to_inbound(
    ctx: &SerenityContext,
    core: &RelayCore,
    guild_id: GuildId,
    msg: &SerenityMessage,
) -> InboundMessage {
    let cached = ctx.cache.guild(guild_id).map(|guild| {
        let origin = OriginServer {
            id: guild_id.to_string(),
            name: guild.name.clone(),
            icon_url: guild.icon_url(),
        };
        let channel_name = guild.channels.get(&msg.channel_id).map(|c| c.name.clone());
        (origin, channel_name)
    });

    let (origin, channel_name) = match cached {
        Some((origin, Some(name))) => (origin, name),
        Some((origin, None)) => (origin, lookup_channel_name(core, msg.channel_id).await),
        None => {
            let origin = core
                .gateway()
                .resolve_server(&guild_id.to_string())
                .await
                .unwrap_or_else(|| OriginServer {
                    id: guild_id.to_string(),
                    name: "Unknown Server".to_string(),
                    icon_url: None,
                });
            (origin, lookup_channel_name(core, msg.channel_id).await)
        }
    };

    inbound_from_serenity(msg, origin, &channel_name)
}

async fn lookup_channel_name(core: &RelayCore, channel_id: ChannelId) -> String {
    core.gateway()
        .resolve_channel(&channel_id.to_string())
        .await
        .map(|channel| channel.name)
        .unwrap_or_else(|| "unknown-channel".to_string())
}

impl DiscordClient {
    pub fn new(config: Arc<Config>) -> Self {
        info!("initializing discord client");
        Self {
            config,
            login_state: Arc::new(AsyncMutex::new(DiscordLoginState::default())),
            core: Arc::new(RwLock::new(None)),
            http: Arc::new(RwLock::new(None)),
            own_user_id: Arc::new(OnceCell::new()),
        }
    }

    /// Raw API over the client's HTTP handle, usable once logged in.
    pub fn api(&self) -> Arc<SerenityApi> {
        Arc::new(SerenityApi {
            http: self.http.clone(),
        })
    }

    pub fn gateway(&self) -> Arc<SerenityGateway> {
        Arc::new(SerenityGateway {
            http: self.http.clone(),
        })
    }

    pub async fn set_core(&self, core: Arc<RelayCore>) {
        *self.core.write().await = Some(core);
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = if self.config.auth.use_privileged_intents {
            GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT
        } else {
            GatewayIntents::non_privileged()
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = RelayEventHandler {
            ready_sender: Arc::new(AsyncMutex::new(Some(ready_tx))),
            core: self.core.clone(),
            own_user_id: self.own_user_id.clone(),
            commands_enabled: self.config.commands.enabled,
        };

        let mut gateway_client =
            SerenityClient::builder(self.config.auth.bot_token.expose_secret(), intents)
                .event_handler(event_handler)
                .await
                .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        *self.http.write().await = Some(gateway_client.http.clone());

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!("discord gateway exited before receiving Ready event"))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }
}

/// Parses a snowflake. Zero is rejected since serenity's id types panic on it.
fn parse_id(id: &str) -> Option<u64> {
    id.parse::<u64>().ok().filter(|value| *value != 0)
}

fn api_error(err: serenity::Error) -> ApiError {
    let status = match &err {
        serenity::Error::Http(http_err) => http_err.status_code().map(|code| code.as_u16()),
        serenity::Error::Model(_) => Some(400),
        _ => None,
    };
    ApiError::new(err.to_string(), status)
}

async fn current_http(slot: &HttpSlot) -> Option<Arc<Http>> {
    slot.read().await.clone()
}

pub struct SerenityApi {
    http: HttpSlot,
}

impl SerenityApi {
    async fn http(&self) -> Result<Arc<Http>, ApiError> {
        current_http(&self.http)
            .await
            .ok_or_else(|| ApiError::new("discord http client not available", None))
    }
}

/// Splits `.../webhooks/{id}/{token}` into its id and token.
fn parse_webhook_url(url: &str) -> Option<(u64, &str)> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let token = segments.next().filter(|token| !token.is_empty())?;
    let id = parse_id(segments.next()?)?;
    (segments.next() == Some("webhooks")).then_some((id, token))
}

fn webhook_credentials(webhook: &WebhookHandle) -> Result<(WebhookId, &str), ApiError> {
    parse_webhook_url(webhook.url.expose_secret())
        .map(|(id, token)| (WebhookId::new(id), token))
        .ok_or_else(|| ApiError::new(format!("malformed url for webhook {}", webhook.id), Some(400)))
}

fn webhook_handle(webhook: &Webhook) -> Option<WebhookHandle> {
    let url = webhook.url().ok()?;
    Some(WebhookHandle {
        id: webhook.id.to_string(),
        name: webhook.name.clone().unwrap_or_default(),
        url: SecretString::from(url),
    })
}

#[async_trait]
impl DiscordApi for SerenityApi {
    async fn send_message(
        &self,
        channel_id: &str,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError> {
        let http = self.http().await?;
        let channel = parse_id(channel_id)
            .map(ChannelId::new)
            .ok_or_else(|| ApiError::new(format!("invalid channel id: {channel_id}"), Some(400)))?;

        let mut builder =
            CreateMessage::new().embeds(payload.embeds.iter().map(embed_to_builder).collect());
        if !payload.content.is_empty() {
            builder = builder.content(&payload.content);
        }

        let message = channel
            .send_message(&http, builder)
            .await
            .map_err(api_error)?;
        debug!("sent message directly to channel {}, message_id={}", channel_id, message.id);
        Ok(message.id.to_string())
    }

    async fn list_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookHandle>, ApiError> {
        let http = self.http().await?;
        let channel = parse_id(channel_id)
            .map(ChannelId::new)
            .ok_or_else(|| ApiError::new(format!("invalid channel id: {channel_id}"), Some(400)))?;

        let webhooks = channel.webhooks(&http).await.map_err(api_error)?;
        Ok(webhooks.iter().filter_map(webhook_handle).collect())
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> Result<WebhookHandle, ApiError> {
        let http = self.http().await?;
        let channel = parse_id(channel_id)
            .map(ChannelId::new)
            .ok_or_else(|| ApiError::new(format!("invalid channel id: {channel_id}"), Some(400)))?;

        let webhook = channel
            .create_webhook(&http, CreateWebhook::new(name))
            .await
            .map_err(api_error)?;
        webhook_handle(&webhook)
            .ok_or_else(|| ApiError::new("created webhook has no token", Some(400)))
    }

    async fn webhook_exists(&self, webhook: &WebhookHandle) -> Result<bool, ApiError> {
        let http = self.http().await?;
        let (webhook_id, token) = webhook_credentials(webhook)?;
        match http.get_webhook_with_token(webhook_id, token).await {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = api_error(err);
                if err.status == Some(404) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn execute_webhook(
        &self,
        webhook: &WebhookHandle,
        payload: &RenderedPayload,
    ) -> Result<String, ApiError> {
        let http = self.http().await?;
        let (webhook_id, token) = webhook_credentials(webhook)?;

        let mut builder = ExecuteWebhook::new()
            .username(&payload.username)
            .embeds(payload.embeds.iter().map(embed_to_builder).collect());
        if !payload.content.is_empty() {
            builder = builder.content(&payload.content);
        }
        if let Some(avatar_url) = &payload.avatar_url {
            builder = builder.avatar_url(avatar_url);
        }

        let message = http
            .execute_webhook(webhook_id, None, token, true, Vec::new(), &builder)
            .await
            .map_err(api_error)?
            .ok_or_else(|| ApiError::new("webhook execution returned no message", None))?;
        debug!("sent message via webhook {}, message_id={}", webhook.id, message.id);
        Ok(message.id.to_string())
    }
}

pub struct SerenityGateway {
    http: HttpSlot,
}

#[async_trait]
impl Gateway for SerenityGateway {
    async fn resolve_channel(&self, channel_id: &str) -> Option<ChannelHandle> {
        let http = current_http(&self.http).await?;
        let channel = ChannelId::new(parse_id(channel_id)?);

        match channel.to_channel(&http).await {
            Ok(channel) => Some(match channel.guild() {
                Some(guild_channel) => ChannelHandle {
                    id: channel_id.to_string(),
                    name: guild_channel.name.clone(),
                    server_id: Some(guild_channel.guild_id.to_string()),
                },
                None => ChannelHandle {
                    id: channel_id.to_string(),
                    name: channel_id.to_string(),
                    server_id: None,
                },
            }),
            Err(err) => {
                debug!("failed to resolve channel {}: {err}", channel_id);
                None
            }
        }
    }

    async fn resolve_server(&self, server_id: &str) -> Option<OriginServer> {
        let http = current_http(&self.http).await?;
        let guild = GuildId::new(parse_id(server_id)?);

        match guild.to_partial_guild(&http).await {
            Ok(guild) => Some(OriginServer {
                id: server_id.to_string(),
                name: guild.name.clone(),
                icon_url: guild.icon_url(),
            }),
            Err(err) => {
                debug!("failed to resolve server {}: {err}", server_id);
                None
            }
        }
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Option<InboundMessage> {
        let http = current_http(&self.http).await?;
        let channel = ChannelId::new(parse_id(channel_id)?);
        let message_id = MessageId::new(parse_id(message_id)?);

        let message = match channel.message(&http, message_id).await {
            Ok(message) => message,
            Err(err) => {
                debug!("message {} not found in channel {}: {err}", message_id, channel_id);
                return None;
            }
        };

        let handle = self.resolve_channel(channel_id).await?;
        let origin = self.resolve_server(handle.server_id.as_deref()?).await?;
        Some(inbound_from_serenity(&message, origin, &handle.name))
    }
}
