//! Destination dispatcher trait
//!
//! The engine never talks to Discord directly; it issues calls through this
//! trait and records mappings from the identifiers handed back. The real
//! implementation lives in slackcord-channels; tests substitute mocks.

use crate::card::Card;
use anyhow::Result;
use async_trait::async_trait;
use slackcord_store::MessageMapping;

/// Where a card is delivered: a persistent text channel or a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Channel(String),
    Thread(String),
}

impl DispatchTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Channel(id) | Self::Thread(id) => id,
        }
    }

    /// The target a previously mapped message lives in.
    pub fn for_mapping(row: &MessageMapping) -> Self {
        if row.in_thread() {
            Self::Thread(row.discord_thread_id.clone())
        } else {
            Self::Channel(row.discord_channel_id.clone())
        }
    }
}

/// Current destination-side channel metadata, for change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub name: String,
    pub topic: String,
}

/// The destination platform's surface, as consumed by the engine.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Find a persistent text channel with this display name, or create one.
    /// If several destination channels share the name, the first enumerated
    /// wins; the rest are invisible to the relay.
    async fn create_or_fetch_channel(&self, name: &str) -> Result<String>;

    /// Current name/topic of a destination channel.
    async fn channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata>;

    /// Deliver one card; returns the created destination message id.
    async fn send_card(&self, target: &DispatchTarget, card: &Card) -> Result<String>;

    /// Replace the rendering of an existing destination message.
    async fn edit_card(&self, target: &DispatchTarget, message_id: &str, card: &Card)
        -> Result<()>;

    async fn delete_message(&self, target: &DispatchTarget, message_id: &str) -> Result<()>;

    async fn pin_message(
        &self,
        target: &DispatchTarget,
        message_id: &str,
        reason: &str,
    ) -> Result<()>;

    async fn unpin_message(&self, target: &DispatchTarget, message_id: &str) -> Result<()>;

    /// Open the thread rooted at a message, reusing an existing one.
    async fn create_or_fetch_thread(
        &self,
        channel_id: &str,
        root_message_id: &str,
        title: &str,
    ) -> Result<String>;

    async fn rename_channel(&self, channel_id: &str, name: &str, reason: &str) -> Result<()>;

    async fn set_topic(&self, channel_id: &str, topic: &str, reason: &str) -> Result<()>;

    /// Rendered text of a mirrored message, used to title threads.
    async fn fetch_message_text(
        &self,
        target: &DispatchTarget,
        message_id: &str,
    ) -> Result<Option<String>>;

    /// A jump link to a mirrored message.
    fn message_link(&self, channel_id: &str, message_id: &str) -> String;
}
