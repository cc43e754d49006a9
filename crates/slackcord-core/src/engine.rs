//! Reconciliation engine
//!
//! For every canonical event this component decides what destination action
//! to take and which mapping rows to record. Each event passes through
//! `resolve-channel -> resolve-thread (optional) -> action -> record`;
//! there is no cross-event state. Consistency across events comes entirely
//! from the mapping store being consulted and updated within each event's
//! processing, so concurrent events may race on channel/thread creation and
//! the store's idempotent inserts decide the winner.

use crate::card::{Card, CardPolicy};
use crate::dispatcher::{DispatchTarget, Dispatcher};
use crate::event::{
    ChannelEvent, ChannelInfo, DeleteEvent, EditEvent, MessageEvent, PinEvent, RelayEvent,
};
use anyhow::{anyhow, Context, Result};
use slackcord_store::{MappingStore, MAIN_THREAD};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Title given to a thread whose root message has no rendered text.
const THREAD_TITLE_FALLBACK: &str = "No Text Content";
/// Maximum thread title length before truncation.
const THREAD_TITLE_MAX: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub card: CardPolicy,
    /// Keep locally stored files even after they were delivered inline
    pub keep_files: bool,
}

/// The engine. Holds its collaborators explicitly; construct one at startup
/// and share it across in-flight event tasks.
pub struct ReconciliationEngine {
    store: Arc<MappingStore>,
    dispatcher: Arc<dyn Dispatcher>,
    opts: EngineOptions,
}

/// Result of delivering one message's worth of cards.
struct SentBatch {
    target: DispatchTarget,
    message_ids: Vec<String>,
}

/// Result of resolving the destination thread for a threaded message.
struct ThreadResolution {
    thread_id: String,
    /// Jump link to the mirrored thread root, prefixed onto replies
    root_link: Option<String>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<MappingStore>,
        dispatcher: Arc<dyn Dispatcher>,
        opts: EngineOptions,
    ) -> Self {
        Self {
            store,
            dispatcher,
            opts,
        }
    }

    /// Process one canonical event to completion.
    pub async fn process(&self, event: RelayEvent) -> Result<()> {
        debug!(
            "Processing {} event for channel {}",
            event.action(),
            event.channel().id
        );
        match event {
            RelayEvent::Send(msg) => self.handle_send(&msg).await.map(|_| ()),
            RelayEvent::Edit(edit) => self.handle_edit(&edit).await,
            RelayEvent::Delete(del) => self.handle_delete(&del).await,
            RelayEvent::PinSet(pin) => self.handle_pin(&pin, true).await,
            RelayEvent::PinClear(pin) => self.handle_pin(&pin, false).await,
            RelayEvent::ChannelUpdate(ev) => self.handle_channel_update(&ev).await,
        }
    }

    /// Map the source channel to its destination channel, creating the
    /// mapping (and possibly the channel) on first sight. Creation failure
    /// is fatal to the event, not to the process.
    async fn resolve_channel(&self, channel: &ChannelInfo) -> Result<String> {
        if let Some(id) = self.store.find_channel_mapping(&channel.id)? {
            return Ok(id);
        }

        let discord_id = self
            .dispatcher
            .create_or_fetch_channel(&channel.name)
            .await
            .with_context(|| {
                format!("Channel #{} could not be found or created", channel.name)
            })?;

        if self
            .store
            .record_channel_mapping(&channel.id, &discord_id)?
            .is_new()
        {
            info!(
                "Mapped Slack channel {} to Discord channel {}",
                channel.id, discord_id
            );
            Ok(discord_id)
        } else {
            // Lost a concurrent race for this channel; converge on the row
            // that won. The destination channel we just obtained may be a
            // duplicate, which is a documented limitation.
            let stored = self.store.find_channel_mapping(&channel.id)?;
            Ok(stored.unwrap_or(discord_id))
        }
    }

    /// Map the source thread to a destination thread, creating one rooted at
    /// the mirrored thread root. A reply whose root was never mirrored gets
    /// a synthesized placeholder root first.
    async fn resolve_thread(
        &self,
        msg: &MessageEvent,
        channel_id: &str,
    ) -> Result<ThreadResolution> {
        let thread_key = msg
            .thread_key()
            .ok_or_else(|| anyhow!("message carries no thread context"))?;

        if let Some(thread_id) = self.store.find_thread_mapping(&thread_key)? {
            let root_link = self.store.find_primary_mapping(&thread_key)?.map(|row| {
                self.dispatcher
                    .message_link(&row.discord_channel_id, &row.discord_message_id)
            });
            return Ok(ThreadResolution {
                thread_id,
                root_link,
            });
        }

        let root = match self.store.find_primary_mapping(&thread_key)? {
            Some(row) => row,
            None => {
                // The reply arrived before its root was ever mirrored.
                warn!(
                    "Thread {} is missing. Creating placeholder root message",
                    thread_key
                );
                let root_ts = msg
                    .thread
                    .as_ref()
                    .map(|t| t.root_ts.clone())
                    .unwrap_or_default();
                let skeleton = MessageEvent::thread_placeholder(&msg.channel, &root_ts);
                Box::pin(self.handle_send(&skeleton)).await?;
                self.store
                    .find_primary_mapping(&thread_key)?
                    .ok_or_else(|| {
                        anyhow!("placeholder root for thread {} was not recorded", thread_key)
                    })?
            }
        };

        let root_text = self
            .dispatcher
            .fetch_message_text(
                &DispatchTarget::Channel(channel_id.to_string()),
                &root.discord_message_id,
            )
            .await
            .unwrap_or_default();
        let title = thread_title(root_text.as_deref());

        let thread_id = self
            .dispatcher
            .create_or_fetch_thread(channel_id, &root.discord_message_id, &title)
            .await
            .with_context(|| format!("Could not open destination thread for {}", thread_key))?;

        let thread_id = if self
            .store
            .record_thread_mapping(&thread_key, &thread_id)?
            .is_new()
        {
            info!(
                "Mapped Slack thread {} to Discord thread {}",
                thread_key, thread_id
            );
            thread_id
        } else {
            self.store
                .find_thread_mapping(&thread_key)?
                .unwrap_or(thread_id)
        };

        Ok(ThreadResolution {
            thread_id,
            root_link: Some(
                self.dispatcher
                    .message_link(channel_id, &root.discord_message_id),
            ),
        })
    }

    /// Deliver one message: primary card first, then attachment and
    /// link-preview cards in source order, recording a mapping row per
    /// delivered card.
    async fn handle_send(&self, msg: &MessageEvent) -> Result<SentBatch> {
        let channel_id = self.resolve_channel(&msg.channel).await?;
        let thread = match &msg.thread {
            Some(_) => Some(self.resolve_thread(msg, &channel_id).await?),
            None => None,
        };
        let target = match &thread {
            Some(t) => DispatchTarget::Thread(t.thread_id.clone()),
            None => DispatchTarget::Channel(channel_id.clone()),
        };

        let mut primary = Card::from_message(msg);
        if let Some(link) = thread.as_ref().and_then(|t| t.root_link.as_ref()) {
            primary.body = format!("[<Replied to This Message>]({})\n{}", link, primary.body);
        }

        let mut secondary = Vec::new();
        for file in &msg.files {
            secondary.push((Card::from_file(file, msg, &self.opts.card), Some(file)));
        }
        for embed in &msg.link_embeds {
            secondary.push((Card::from_link_embed(embed), None));
        }
        if !secondary.is_empty() {
            primary.append_footer(&Card::additional_note(secondary.len()));
        }

        let source_key = msg.source_key();
        let slack_thread_id = msg.thread_key().unwrap_or_else(|| MAIN_THREAD.to_string());
        let discord_thread_id = thread
            .as_ref()
            .map(|t| t.thread_id.clone())
            .unwrap_or_else(|| MAIN_THREAD.to_string());

        let primary_id = self
            .dispatcher
            .send_card(&target, &primary)
            .await
            .with_context(|| format!("Failed to deliver primary card for {}", source_key))?;
        self.store.record_message_mapping(
            &source_key,
            &primary_id,
            &slack_thread_id,
            &discord_thread_id,
            &msg.channel.id,
            &channel_id,
            true,
        )?;
        let mut message_ids = vec![primary_id];

        // One secondary card failing is reported but does not abort the
        // rest; only delivered cards get mapping rows.
        for (card, file) in &secondary {
            match self.dispatcher.send_card(&target, card).await {
                Ok(id) => {
                    self.store.record_message_mapping(
                        &source_key,
                        &id,
                        &slack_thread_id,
                        &discord_thread_id,
                        &msg.channel.id,
                        &channel_id,
                        false,
                    )?;
                    if let Some(file) = file
                        && !file.id.is_empty()
                    {
                        self.store.record_file_mapping(&file.id, &id)?;
                    }
                    message_ids.push(id);
                }
                Err(e) => {
                    error!(
                        "Failed to deliver attachment card for {}: {:#}",
                        source_key, e
                    );
                }
            }
        }

        self.cleanup_files(msg).await;

        Ok(SentBatch {
            target,
            message_ids,
        })
    }

    /// Remove locally stored files that were small enough to be delivered
    /// inline. Oversized files stay on disk for continued serving.
    async fn cleanup_files(&self, msg: &MessageEvent) {
        if self.opts.keep_files {
            return;
        }
        for file in &msg.files {
            if file.failed || !self.opts.card.is_inlineable(file) {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                warn!("Could not remove delivered file {:?}: {}", file.path, e);
            }
        }
    }

    /// Reflect an edit onto the primary text carrier. An edit whose original
    /// was never mirrored is reported and skipped, not retried.
    async fn handle_edit(&self, edit: &EditEvent) -> Result<()> {
        let channel_id = self.resolve_channel(&edit.channel).await?;
        let target_key = edit.target_key();
        let primary = self.store.find_primary_mapping(&target_key)?;

        match &primary {
            None => {
                warn!(
                    "Unable to edit message: original message not found for {}",
                    target_key
                );
            }
            Some(row) if edit.text_changed => {
                let target = DispatchTarget::for_mapping(row);
                self.dispatcher
                    .edit_card(&target, &row.discord_message_id, &Card::from_edit(edit))
                    .await
                    .with_context(|| {
                        format!("Failed to edit mirrored message for {}", target_key)
                    })?;
                info!("Updated mirrored text for {}", target_key);
            }
            Some(_) => debug!("Edit for {} did not change the text", target_key),
        }

        // Link previews that appeared with this edit are mirrored only when
        // the prior revision had none. Attachments added to a message that
        // already had attachments are not detected.
        if !edit.prior_had_embeds && !edit.link_embeds.is_empty() {
            let (target, slack_tid, discord_tid) = match &primary {
                Some(row) => (
                    DispatchTarget::for_mapping(row),
                    row.slack_thread_id.clone(),
                    row.discord_thread_id.clone(),
                ),
                None => (
                    DispatchTarget::Channel(channel_id.clone()),
                    MAIN_THREAD.to_string(),
                    MAIN_THREAD.to_string(),
                ),
            };
            let event_key = edit.event_key();
            for embed in &edit.link_embeds {
                match self
                    .dispatcher
                    .send_card(&target, &Card::from_link_embed(embed))
                    .await
                {
                    Ok(id) => {
                        self.store.record_message_mapping(
                            &event_key,
                            &id,
                            &slack_tid,
                            &discord_tid,
                            &edit.channel.id,
                            &channel_id,
                            false,
                        )?;
                    }
                    Err(e) => {
                        error!(
                            "Failed to deliver link-preview card for {}: {:#}",
                            event_key, e
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Delete every mirrored message for the deletion target. Deleting one
    /// source attachment among several removes the entire mirrored set.
    /// Each deletion is attempted independently.
    async fn handle_delete(&self, del: &DeleteEvent) -> Result<()> {
        self.resolve_channel(&del.channel).await?;
        let key = del.target_key();
        let rows = self.store.find_message_mappings(&key)?;
        if rows.is_empty() {
            warn!("Message maps not found for [{}]", key);
            return Ok(());
        }

        info!("Deleting {} mirrored messages for {}", rows.len(), key);
        for row in &rows {
            let target = DispatchTarget::for_mapping(row);
            if let Err(e) = self
                .dispatcher
                .delete_message(&target, &row.discord_message_id)
                .await
            {
                warn!(
                    "Unable to delete message {} ({}): {:#}",
                    row.discord_message_id, key, e
                );
            }
        }
        Ok(())
    }

    /// Pin or unpin every mirrored message for the item. Absence of a
    /// mapping is tolerated silently.
    async fn handle_pin(&self, pin: &PinEvent, set: bool) -> Result<()> {
        self.resolve_channel(&pin.channel).await?;
        let key = pin.target_key();
        let rows = self.store.find_message_mappings(&key)?;
        if rows.is_empty() {
            debug!("No mirrored messages to update pins on for {}", key);
            return Ok(());
        }

        let reason = format!("Pinned on Slack by {}", pin.actor);
        for row in &rows {
            let target = DispatchTarget::for_mapping(row);
            let outcome = if set {
                self.dispatcher
                    .pin_message(&target, &row.discord_message_id, &reason)
                    .await
            } else {
                self.dispatcher
                    .unpin_message(&target, &row.discord_message_id)
                    .await
            };
            if let Err(e) = outcome {
                warn!(
                    "Unable to update pin on message {} ({}): {:#}",
                    row.discord_message_id, key, e
                );
            }
        }
        Ok(())
    }

    /// Mirror a channel metadata change: pin the triggering notice, then
    /// rename and/or re-topic the destination channel, touching only fields
    /// that actually differ.
    async fn handle_channel_update(&self, ev: &ChannelEvent) -> Result<()> {
        let channel_id = self.resolve_channel(&ev.channel).await?;

        if let Some(notice) = &ev.notice {
            let batch = self.handle_send(notice).await?;
            for id in &batch.message_ids {
                if let Err(e) = self
                    .dispatcher
                    .pin_message(&batch.target, id, "Channel Metadata Change")
                    .await
                {
                    warn!("Could not pin channel metadata notice {}: {:#}", id, e);
                }
            }
        }

        let current = self.dispatcher.channel_metadata(&channel_id).await?;
        let purpose = if ev.channel.purpose.is_empty() {
            "Archive Channel"
        } else {
            ev.channel.purpose.as_str()
        };
        let desired_topic = format!("{} | {}", ev.channel.topic, purpose);

        if current.name != ev.channel.name {
            info!("Renaming #{} to #{}", current.name, ev.channel.name);
            self.dispatcher
                .rename_channel(&channel_id, &ev.channel.name, "Channel name changed from Slack")
                .await?;
        }
        if current.topic != desired_topic {
            self.dispatcher
                .set_topic(&channel_id, &desired_topic, "Channel topic changed from Slack")
                .await?;
        }
        Ok(())
    }
}

/// Bounded prefix of the thread root's rendered text.
fn thread_title(text: Option<&str>) -> String {
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => THREAD_TITLE_FALLBACK,
    };
    if text.chars().count() > THREAD_TITLE_MAX {
        let prefix: String = text.chars().take(THREAD_TITLE_MAX - 1).collect();
        format!("{}…", prefix)
    } else {
        text.to_string()
    }
}
