//! Discord destination dispatcher using Serenity
//!
//! Implements the engine's dispatcher trait over Discord's HTTP API. A
//! gateway client runs alongside purely for presence and connection
//! logging; all mirroring goes through `Http`. The channel lookup carries
//! the documented quirk: when several guild channels share a display name,
//! the first enumerated wins and the rest are invisible to the relay.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serenity::builder::{
    CreateAttachment, CreateChannel, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreateMessage, CreateThread, EditChannel, EditMessage, EditThread,
};
use serenity::gateway::ActivityData;
use serenity::http::Http;
use serenity::model::channel::{AutoArchiveDuration, Channel, ChannelType, GuildChannel};
use serenity::model::colour::Colour;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use serenity::model::timestamp::Timestamp;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Client, Context, EventHandler};
use slackcord_core::card::Card;
use slackcord_core::dispatcher::{ChannelMetadata, DispatchTarget, Dispatcher};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Gateway handler: presence only, the relay consumes no Discord events.
struct RelayHandler;

#[serenity::async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
        ctx.set_presence(
            Some(ActivityData::listening("Slack Messages")),
            OnlineStatus::Online,
        );
    }
}

/// Discord destination dispatcher
pub struct DiscordDispatcher {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordDispatcher {
    /// Authenticate, locate the logging guild and spawn the presence
    /// client. Failing either lookup is fatal: the relay cannot mirror
    /// anywhere without them.
    pub async fn connect(token: &str, guild_id: u64) -> Result<Self> {
        info!("Starting Discord dispatcher");

        let mut client = Client::builder(token, GatewayIntents::empty())
            .event_handler(RelayHandler)
            .await
            .context("Failed to create Discord client")?;
        let http = client.http.clone();

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!("Discord gateway client stopped: {}", e);
            }
        });

        let user = http
            .get_current_user()
            .await
            .context("Discord authentication failed")?;
        info!("Logged in as {}", user.name);

        let guild_id = GuildId::new(guild_id);
        let guild = http
            .get_guild(guild_id)
            .await
            .context("Failed to locate the logging server")?;
        info!("Mirroring into guild {} ({})", guild.name, guild.id);

        Ok(Self { http, guild_id })
    }

    /// Bring an archived thread back before operating inside it.
    async fn ensure_thread_active(&self, target: &DispatchTarget) {
        let DispatchTarget::Thread(id) = target else {
            return;
        };
        let Ok(channel_id) = parse_channel(id) else {
            return;
        };
        let Ok(Channel::Guild(channel)) = self.http.get_channel(channel_id).await else {
            return;
        };
        if channel
            .thread_metadata
            .map(|meta| meta.archived)
            .unwrap_or(false)
        {
            debug!("Unarchiving thread {} for an incoming event", id);
            if let Err(e) = channel_id
                .edit_thread(
                    &self.http,
                    EditThread::new()
                        .archived(false)
                        .audit_log_reason("Unarchived thread for incoming Slack events"),
                )
                .await
            {
                warn!("Could not unarchive thread {}: {}", id, e);
            }
        }
    }
}

#[async_trait]
impl Dispatcher for DiscordDispatcher {
    async fn create_or_fetch_channel(&self, name: &str) -> Result<String> {
        let channels = self
            .http
            .get_channels(self.guild_id)
            .await
            .context("Failed to list guild channels")?;

        // First name match among text channels wins
        if let Some(existing) = channels
            .iter()
            .find(|ch| ch.kind == ChannelType::Text && ch.name == name)
        {
            debug!("Reusing Discord channel #{} ({})", name, existing.id);
            return Ok(existing.id.to_string());
        }

        let reason = format!("#{} created for new Slack Messages", name);
        let created: GuildChannel = self
            .guild_id
            .create_channel(
                &self.http,
                CreateChannel::new(name)
                    .kind(ChannelType::Text)
                    .audit_log_reason(&reason),
            )
            .await
            .with_context(|| format!("Channel #{} could not be created", name))?;
        info!("Created Discord channel #{} ({})", name, created.id);
        Ok(created.id.to_string())
    }

    async fn channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata> {
        match self.http.get_channel(parse_channel(channel_id)?).await? {
            Channel::Guild(channel) => Ok(ChannelMetadata {
                name: channel.name.clone(),
                topic: channel.topic.clone().unwrap_or_default(),
            }),
            other => Err(anyhow!("{} is not a guild channel ({:?})", channel_id, other)),
        }
    }

    async fn send_card(&self, target: &DispatchTarget, card: &Card) -> Result<String> {
        self.ensure_thread_active(target).await;

        let mut message = CreateMessage::new();
        if card.has_embed() {
            message = message.embed(build_embed(card));
        }
        if let Some(attachment) = &card.attachment {
            let data = tokio::fs::read(&attachment.path)
                .await
                .with_context(|| format!("Could not read upload {:?}", attachment.path))?;
            // Uploaded under the original name so inline embeds can
            // reference it, regardless of how it is stored locally
            message = message.add_file(CreateAttachment::bytes(data, attachment.file_name.clone()));
        }

        let sent = parse_channel(target.id())?
            .send_message(&self.http, message)
            .await
            .context("Failed to send Discord message")?;
        Ok(sent.id.to_string())
    }

    async fn edit_card(
        &self,
        target: &DispatchTarget,
        message_id: &str,
        card: &Card,
    ) -> Result<()> {
        self.ensure_thread_active(target).await;
        parse_channel(target.id())?
            .edit_message(
                &self.http,
                parse_message(message_id)?,
                EditMessage::new().embed(build_embed(card)),
            )
            .await
            .context("Failed to edit Discord message")?;
        Ok(())
    }

    async fn delete_message(&self, target: &DispatchTarget, message_id: &str) -> Result<()> {
        self.ensure_thread_active(target).await;
        self.http
            .delete_message(
                parse_channel(target.id())?,
                parse_message(message_id)?,
                Some("Deleted from Slack"),
            )
            .await
            .context("Failed to delete Discord message")?;
        Ok(())
    }

    async fn pin_message(
        &self,
        target: &DispatchTarget,
        message_id: &str,
        reason: &str,
    ) -> Result<()> {
        self.ensure_thread_active(target).await;
        self.http
            .pin_message(
                parse_channel(target.id())?,
                parse_message(message_id)?,
                Some(reason),
            )
            .await
            .context("Failed to pin Discord message")?;
        Ok(())
    }

    async fn unpin_message(&self, target: &DispatchTarget, message_id: &str) -> Result<()> {
        self.ensure_thread_active(target).await;
        self.http
            .unpin_message(
                parse_channel(target.id())?,
                parse_message(message_id)?,
                Some("Unpinned from Slack"),
            )
            .await
            .context("Failed to unpin Discord message")?;
        Ok(())
    }

    async fn create_or_fetch_thread(
        &self,
        channel_id: &str,
        root_message_id: &str,
        title: &str,
    ) -> Result<String> {
        let root = parse_message(root_message_id)?;

        // A thread spawned from a message shares the message's id; if one
        // already exists there, reuse it.
        if let Ok(Channel::Guild(existing)) = self.http.get_channel(ChannelId::new(root.get())).await
            && existing.thread_metadata.is_some()
        {
            debug!("Reusing existing thread {}", existing.id);
            let target = DispatchTarget::Thread(existing.id.to_string());
            self.ensure_thread_active(&target).await;
            return Ok(existing.id.to_string());
        }

        let thread = parse_channel(channel_id)?
            .create_thread_from_message(
                &self.http,
                root,
                CreateThread::new(title)
                    .auto_archive_duration(AutoArchiveDuration::OneDay)
                    .audit_log_reason("Mirroring thread started on Slack"),
            )
            .await
            .context("Failed to create Discord thread")?;
        info!("Created Discord thread {} ({})", title, thread.id);
        Ok(thread.id.to_string())
    }

    async fn rename_channel(&self, channel_id: &str, name: &str, reason: &str) -> Result<()> {
        parse_channel(channel_id)?
            .edit(
                &self.http,
                EditChannel::new().name(name).audit_log_reason(reason),
            )
            .await
            .context("Failed to rename Discord channel")?;
        Ok(())
    }

    async fn set_topic(&self, channel_id: &str, topic: &str, reason: &str) -> Result<()> {
        parse_channel(channel_id)?
            .edit(
                &self.http,
                EditChannel::new().topic(topic).audit_log_reason(reason),
            )
            .await
            .context("Failed to set Discord channel topic")?;
        Ok(())
    }

    async fn fetch_message_text(
        &self,
        target: &DispatchTarget,
        message_id: &str,
    ) -> Result<Option<String>> {
        let message = self
            .http
            .get_message(parse_channel(target.id())?, parse_message(message_id)?)
            .await
            .context("Failed to fetch Discord message")?;
        Ok(message.embeds.first().and_then(|e| e.description.clone()))
    }

    fn message_link(&self, channel_id: &str, message_id: &str) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            self.guild_id.get(),
            channel_id,
            message_id
        )
    }
}

fn parse_channel(id: &str) -> Result<ChannelId> {
    let raw = id
        .parse::<u64>()
        .with_context(|| format!("Invalid Discord channel id '{}'", id))?;
    Ok(ChannelId::new(raw))
}

fn parse_message(id: &str) -> Result<MessageId> {
    let raw = id
        .parse::<u64>()
        .with_context(|| format!("Invalid Discord message id '{}'", id))?;
    Ok(MessageId::new(raw))
}

/// Render a card as a Discord embed.
fn build_embed(card: &Card) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .colour(Colour::new(card.color))
        .description(card.body.clone());

    if !card.author_name.is_empty() {
        let mut author = CreateEmbedAuthor::new(&card.author_name);
        if !card.author_icon_url.is_empty() {
            author = author.icon_url(&card.author_icon_url);
        }
        embed = embed.author(author);
    }
    if let Some(title) = &card.title {
        embed = embed.title(title);
    }
    if let Some(url) = &card.title_url {
        embed = embed.url(url);
    }
    if let Some(footer) = &card.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(image) = &card.image_url {
        embed = embed.image(image);
    }
    if let Some(seconds) = card.timestamp
        && let Ok(timestamp) = Timestamp::from_unix_timestamp(seconds as i64)
    {
        embed = embed.timestamp(timestamp);
    }

    embed
}
