//! Canonical event model shared by the source adapter and the engine
//!
//! Each inbound Slack activity is normalized into exactly one [`RelayEvent`]
//! variant, consumed once by the reconciliation engine, then discarded.
//! Nothing in here is persisted; durable state lives in slackcord-store.

use std::path::PathBuf;

/// Author fallback used when the Slack user lookup fails or the event has no
/// user attached.
pub const FALLBACK_AUTHOR_NAME: &str = "Unknown Pupper";
pub const FALLBACK_AVATAR_URL: &str = "https://media.giphy.com/media/S8aEKUGKXHl8WEsDD9/giphy.gif";
/// Accent color used when the author has none set.
pub const DEFAULT_ACCENT: u32 = 0x407ABA;

/// Identity of the synthesized root message created when a thread reply
/// arrives before its root was ever mirrored.
pub const THREAD_PLACEHOLDER_AUTHOR: &str = "Unknown Thread Handler";
pub const THREAD_PLACEHOLDER_TEXT: &str = "[Thread Not Found: Some Messages May Be Missing]";
pub const THREAD_PLACEHOLDER_ACCENT: u32 = 0xDD2020;

/// Rendered in place of an empty message body.
pub const EMPTY_MESSAGE_TEXT: &str = "[No Message Content]";

/// The composite Slack-side message key. Slack timestamps are only unique
/// within a channel, so mappings are keyed on both.
pub fn composite_id(channel_id: &str, ts: &str) -> String {
    format!("{}/{}", channel_id, ts)
}

/// Parse a Slack timestamp ("1618033988.000200") into seconds.
pub fn ts_seconds(ts: &str) -> Option<f64> {
    ts.parse::<f64>().ok()
}

/// One normalized inbound activity, discriminated by action.
///
/// Each variant carries only the fields relevant to it; there is no shared
/// base with silently-inherited defaults.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Send(MessageEvent),
    Edit(EditEvent),
    Delete(DeleteEvent),
    PinSet(PinEvent),
    PinClear(PinEvent),
    ChannelUpdate(ChannelEvent),
}

impl RelayEvent {
    /// Short action name, used in logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::Edit(_) => "edit",
            Self::Delete(_) => "delete",
            Self::PinSet(_) => "pin-set",
            Self::PinClear(_) => "pin-clear",
            Self::ChannelUpdate(_) => "channel-update",
        }
    }

    /// The source channel this event belongs to.
    pub fn channel(&self) -> &ChannelInfo {
        match self {
            Self::Send(e) => &e.channel,
            Self::Edit(e) => &e.channel,
            Self::Delete(e) => &e.channel,
            Self::PinSet(e) | Self::PinClear(e) => &e.channel,
            Self::ChannelUpdate(e) => &e.channel,
        }
    }
}

/// Source channel metadata resolved by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub purpose: String,
}

impl ChannelInfo {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Display identity of the message author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorProfile {
    pub name: String,
    pub avatar_url: String,
    pub color: u32,
}

impl Default for AuthorProfile {
    fn default() -> Self {
        Self {
            name: FALLBACK_AUTHOR_NAME.to_string(),
            avatar_url: FALLBACK_AVATAR_URL.to_string(),
            color: DEFAULT_ACCENT,
        }
    }
}

/// Thread context: the timestamp of the thread's root message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    pub root_ts: String,
}

/// An attachment already pulled down to local storage by the file manager.
#[derive(Debug, Clone, Default)]
pub struct StoredFile {
    /// Slack file id (for the file->message mapping)
    pub id: String,
    /// Original file name as shown on Slack
    pub name: String,
    pub title: String,
    /// Where the file landed locally
    pub path: PathBuf,
    /// The (possibly disambiguated) name it is stored under
    pub stored_as: String,
    pub size_bytes: u64,
    /// Slack's private download URL, kept as a fallback reference
    pub remote_url: String,
    /// Public re-hosting URL, if the file server is enabled
    pub public_url: Option<String>,
    /// The download failed; only the remote reference is usable
    pub failed: bool,
}

impl StoredFile {
    /// Lowercased file extension, empty if there is none.
    pub fn extension(&self) -> String {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_lowercase())
            .unwrap_or_default()
    }
}

/// A link preview (Slack "attachment") carried on a message, mirrored as its
/// own card.
#[derive(Debug, Clone, Default)]
pub struct LinkEmbed {
    pub author_name: Option<String>,
    pub author_icon: Option<String>,
    pub author_link: Option<String>,
    pub title: Option<String>,
    pub title_url: Option<String>,
    pub text: String,
    pub footer: Option<String>,
    pub image_url: Option<String>,
    pub color: Option<u32>,
}

/// New content to mirror (plain sends, file shares, /me messages and
/// thread broadcasts all normalize to this).
#[derive(Debug, Clone, Default)]
pub struct MessageEvent {
    pub channel: ChannelInfo,
    /// Slack timestamp of this message; string-comparable ordering key
    pub ts: String,
    pub author: AuthorProfile,
    /// Body text, already markdown-translated; may be empty
    pub body: String,
    /// The in-place-italicized send variant (/me)
    pub italicize: bool,
    pub thread: Option<ThreadInfo>,
    pub files: Vec<StoredFile>,
    pub link_embeds: Vec<LinkEmbed>,
}

impl MessageEvent {
    /// The composite mapping key for this message.
    pub fn source_key(&self) -> String {
        composite_id(&self.channel.id, &self.ts)
    }

    /// The composite mapping key of the thread root, if threaded.
    pub fn thread_key(&self) -> Option<String> {
        self.thread
            .as_ref()
            .map(|t| composite_id(&self.channel.id, &t.root_ts))
    }

    /// Skeleton event used to synthesize a thread root that was never
    /// mirrored. Carries the thread root's timestamp so the resulting
    /// mapping rows claim the root's identity.
    pub fn thread_placeholder(channel: &ChannelInfo, root_ts: &str) -> Self {
        Self {
            channel: channel.clone(),
            ts: root_ts.to_string(),
            author: AuthorProfile {
                name: THREAD_PLACEHOLDER_AUTHOR.to_string(),
                avatar_url: FALLBACK_AVATAR_URL.to_string(),
                color: THREAD_PLACEHOLDER_ACCENT,
            },
            body: THREAD_PLACEHOLDER_TEXT.to_string(),
            ..Default::default()
        }
    }
}

/// Content superseded: the text and/or link previews of a prior message
/// changed.
#[derive(Debug, Clone, Default)]
pub struct EditEvent {
    pub channel: ChannelInfo,
    /// Timestamp of the edit event itself
    pub ts: String,
    /// Timestamp of the message being edited; the mapping key
    pub target_ts: String,
    pub author: AuthorProfile,
    /// New body text, already markdown-translated
    pub new_text: String,
    /// Whether the text actually differs from the prior revision
    pub text_changed: bool,
    /// Link previews present after the edit
    pub link_embeds: Vec<LinkEmbed>,
    /// Whether the prior revision already carried link previews
    pub prior_had_embeds: bool,
}

impl EditEvent {
    /// Mapping key of the message being edited.
    pub fn target_key(&self) -> String {
        composite_id(&self.channel.id, &self.target_ts)
    }

    /// Mapping key of the edit event itself; newly appeared link-preview
    /// cards are recorded under this key.
    pub fn event_key(&self) -> String {
        composite_id(&self.channel.id, &self.ts)
    }
}

/// Content removed. The event and the thing being deleted carry different
/// timestamps; the mapping key is built from the latter.
#[derive(Debug, Clone, Default)]
pub struct DeleteEvent {
    pub channel: ChannelInfo,
    pub deleted_ts: String,
}

impl DeleteEvent {
    pub fn target_key(&self) -> String {
        composite_id(&self.channel.id, &self.deleted_ts)
    }
}

/// A pin was added to or removed from a message.
#[derive(Debug, Clone, Default)]
pub struct PinEvent {
    pub channel: ChannelInfo,
    /// Timestamp of the pinned/unpinned message
    pub item_ts: String,
    /// Slack user id of whoever toggled the pin, cited in the audit reason
    pub actor: String,
}

impl PinEvent {
    pub fn target_key(&self) -> String {
        composite_id(&self.channel.id, &self.item_ts)
    }
}

/// Channel metadata changed (name/topic/purpose/membership). The triggering
/// system notice, when present, is mirrored and pinned.
#[derive(Debug, Clone, Default)]
pub struct ChannelEvent {
    pub channel: ChannelInfo,
    pub notice: Option<MessageEvent>,
}
