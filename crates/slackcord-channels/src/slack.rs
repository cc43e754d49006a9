//! Slack source adapter
//!
//! Receives raw Slack Events API payloads (delivered by the gateway) and
//! normalizes them into canonical relay events. Classification is a total
//! match over Slack's subtype strings: unrecognized subtypes are logged and
//! dropped, never allowed to take down the relay. Author and channel
//! metadata are resolved through the Web API behind bounded caches, with
//! fixed fallbacks when a lookup fails.

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use slackcord_core::event::{
    AuthorProfile, ChannelEvent, ChannelInfo, DeleteEvent, EditEvent, LinkEmbed, MessageEvent,
    PinEvent, RelayEvent, StoredFile, ThreadInfo, DEFAULT_ACCENT,
};
use slackcord_core::markdown;
use slackcord_files::FileStore;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Fallback channel name when conversations.info yields nothing usable.
const UNKNOWN_CHANNEL_NAME: &str = "unknown_channel_name";
const USER_CACHE_SIZE: usize = 512;

// <@U12345678> / <@W12345678901>
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([UW][A-Z0-9]{8,11})>").expect("mention regex"));
// <#C12345678> or <#C12345678|general>
static CHANNEL_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(C[A-Z0-9]+)(?:\|([^>]*))?>").expect("channel ref regex"));

/// The relay's own Slack identity, used for echo suppression.
#[derive(Debug, Clone, Default)]
struct BotIdentity {
    user_id: String,
    bot_id: String,
}

/// Slack source adapter
pub struct SlackSource {
    bot_token: String,
    client: reqwest::Client,
    files: Arc<FileStore>,
    identity: RwLock<Option<BotIdentity>>,
    user_cache: Mutex<LruCache<String, AuthorProfile>>,
    channel_cache: DashMap<String, ChannelInfo>,
}

impl SlackSource {
    pub fn new(bot_token: String, files: Arc<FileStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for Slack")?;
        let cache_size = NonZeroUsize::new(USER_CACHE_SIZE)
            .ok_or_else(|| anyhow!("user cache size must be non-zero"))?;
        Ok(Self {
            bot_token,
            client,
            files,
            identity: RwLock::new(None),
            user_cache: Mutex::new(LruCache::new(cache_size)),
            channel_cache: DashMap::new(),
        })
    }

    /// Call a Slack Web API method
    async fn api_call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("https://slack.com/api/{}", method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bot_token)
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Slack API HTTP error: {}", response.status()));
        }

        let body: Value = response.json().await?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(anyhow!("Slack API error: {}", err));
        }

        Ok(body)
    }

    /// Call a Slack Web API method that requires a POST body
    async fn api_post(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("https://slack.com/api/{}", method);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;

        let result: Value = response.json().await?;

        if result.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = result
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(anyhow!("Slack {} error: {}", method, err));
        }

        Ok(result)
    }

    /// Authenticate and optionally join every public channel so message
    /// events start flowing. Authentication failure is fatal: without an
    /// identity no useful work can proceed.
    pub async fn start(&self, join_channels: bool) -> Result<()> {
        info!("Starting Slack source adapter");

        if self.bot_token.is_empty() {
            return Err(anyhow!("Slack bot token is empty"));
        }

        let auth = self
            .api_call("auth.test", &[])
            .await
            .context("Slack authentication failed")?;
        let identity = BotIdentity {
            user_id: auth
                .get("user_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            bot_id: auth
                .get("bot_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        };
        info!("Slack bot authenticated as user_id: {}", identity.user_id);
        {
            let mut id = self.identity.write().await;
            *id = Some(identity);
        }

        if join_channels {
            let convos = self
                .api_call("conversations.list", &[("limit", "200")])
                .await
                .context("Failed to list Slack channels")?;
            if let Some(channels) = convos.get("channels").and_then(|v| v.as_array()) {
                let mut joined = 0usize;
                for ch in channels {
                    let is_channel = ch.get("is_channel").and_then(|v| v.as_bool()) == Some(true);
                    let is_member = ch.get("is_member").and_then(|v| v.as_bool()) == Some(true);
                    let ch_id = ch.get("id").and_then(|v| v.as_str()).unwrap_or("");
                    if is_channel && !is_member && !ch_id.is_empty() {
                        match self
                            .api_post("conversations.join", serde_json::json!({"channel": ch_id}))
                            .await
                        {
                            Ok(_) => joined += 1,
                            Err(e) => warn!("Could not join Slack channel {}: {:#}", ch_id, e),
                        }
                    }
                }
                info!("Joined {} Slack channels", joined);
            }
        }

        info!("Slack source adapter started");
        Ok(())
    }

    /// Normalize one raw Events API payload into a canonical relay event.
    /// Returns `None` for events the relay deliberately ignores.
    pub async fn normalize(&self, raw: &Value) -> Result<Option<RelayEvent>> {
        let event_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match event_type {
            "message" => self.normalize_message(raw).await,
            "pin_added" => self.normalize_pin(raw, true).await,
            "pin_removed" => self.normalize_pin(raw, false).await,
            other => {
                debug!("Ignoring unhandled Slack event type '{}'", other);
                Ok(None)
            }
        }
    }

    async fn normalize_message(&self, raw: &Value) -> Result<Option<RelayEvent>> {
        if self.is_own_message(raw).await {
            debug!("Suppressing echo of the relay's own message");
            return Ok(None);
        }

        let channel_id = match raw.get("channel").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => {
                warn!("Dropping Slack message event without a channel id");
                return Ok(None);
            }
        };
        let subtype = raw.get("subtype").and_then(|v| v.as_str());

        match subtype {
            None | Some("file_share") | Some("me_message") | Some("thread_broadcast") => {
                let channel = self.resolve_channel(channel_id).await;
                let msg = self.build_message(raw, channel, subtype).await;
                Ok(Some(RelayEvent::Send(msg)))
            }
            Some("message_changed") => {
                let channel = self.resolve_channel(channel_id).await;
                Ok(Some(RelayEvent::Edit(self.build_edit(raw, channel).await)))
            }
            Some("message_deleted") => {
                let channel = self.resolve_channel(channel_id).await;
                let deleted_ts = raw
                    .get("deleted_ts")
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        raw.get("previous_message")
                            .and_then(|m| m.get("ts"))
                            .and_then(|v| v.as_str())
                    })
                    .unwrap_or_default()
                    .to_string();
                Ok(Some(RelayEvent::Delete(DeleteEvent {
                    channel,
                    deleted_ts,
                })))
            }
            Some(
                sub @ ("channel_topic" | "channel_purpose" | "channel_name" | "channel_join"
                | "channel_leave" | "channel_archive" | "channel_unarchive"),
            ) => {
                let mut channel = self.refresh_channel(channel_id).await;
                // The fresh lookup may lag the event itself
                if sub == "channel_topic"
                    && let Some(topic) = raw.get("topic").and_then(|v| v.as_str())
                {
                    channel.topic = topic.to_string();
                }
                if sub == "channel_name"
                    && let Some(name) = raw.get("name").and_then(|v| v.as_str())
                {
                    info!("Slack channel renamed to #{}", name);
                    channel.name = name.to_string();
                }
                let notice = self.build_message(raw, channel.clone(), subtype).await;
                Ok(Some(RelayEvent::ChannelUpdate(ChannelEvent {
                    channel,
                    notice: Some(notice),
                })))
            }
            Some("bot_message") => {
                warn!("Bot message received; not mirrored");
                Ok(None)
            }
            Some("message_replied") => {
                // Thread replies are detected via thread_ts on the message
                // itself; this subtype carries nothing extra.
                debug!("Ignoring message_replied event");
                Ok(None)
            }
            Some(other) => {
                warn!("Unknown message subtype '{}'; event ignored", other);
                Ok(None)
            }
        }
    }

    async fn normalize_pin(&self, raw: &Value, added: bool) -> Result<Option<RelayEvent>> {
        let item = raw.get("item").cloned().unwrap_or(Value::Null);
        let channel_id = match item.get("channel").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => {
                warn!("Dropping pin event without an item channel");
                return Ok(None);
            }
        };
        let item_ts = item
            .get("message")
            .and_then(|m| m.get("ts"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if item_ts.is_empty() {
            warn!("Dropping pin event without a message timestamp");
            return Ok(None);
        }

        let pin = PinEvent {
            channel: self.resolve_channel(channel_id).await,
            item_ts,
            actor: raw
                .get("user")
                .and_then(|v| v.as_str())
                .unwrap_or("an unknown user")
                .to_string(),
        };
        Ok(Some(if added {
            RelayEvent::PinSet(pin)
        } else {
            RelayEvent::PinClear(pin)
        }))
    }

    async fn build_message(
        &self,
        raw: &Value,
        channel: ChannelInfo,
        subtype: Option<&str>,
    ) -> MessageEvent {
        let ts = raw
            .get("ts")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let author = match raw.get("user").and_then(|v| v.as_str()) {
            Some(user_id) => self.resolve_user(user_id).await,
            None => AuthorProfile::default(),
        };
        let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let body = self.render_text(text).await;
        let thread = raw
            .get("thread_ts")
            .and_then(|v| v.as_str())
            .map(|root_ts| ThreadInfo {
                root_ts: root_ts.to_string(),
            });

        let files = if subtype == Some("file_share") {
            self.materialize_files(raw.get("files").and_then(|v| v.as_array()))
                .await
        } else {
            Vec::new()
        };

        let link_embeds = raw
            .get("attachments")
            .and_then(|v| v.as_array())
            .map(|attachments| attachments.iter().map(unwrap_attachment).collect())
            .unwrap_or_default();

        MessageEvent {
            channel,
            ts,
            author,
            body,
            italicize: subtype == Some("me_message"),
            thread,
            files,
            link_embeds,
        }
    }

    async fn build_edit(&self, raw: &Value, channel: ChannelInfo) -> EditEvent {
        let message = raw.get("message").cloned().unwrap_or(Value::Null);
        let previous = raw.get("previous_message").cloned().unwrap_or(Value::Null);

        let new_text_raw = message.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let prev_text = previous.get("text").and_then(|v| v.as_str()).unwrap_or("");
        // Carried over as-is: an empty attachments array on the prior
        // revision still counts as "had previews".
        let prior_had_embeds = previous
            .get("attachments")
            .map(|v| v.is_array())
            .unwrap_or(false);

        let link_embeds = if prior_had_embeds {
            Vec::new()
        } else {
            message
                .get("attachments")
                .and_then(|v| v.as_array())
                .map(|attachments| attachments.iter().map(unwrap_attachment).collect())
                .unwrap_or_default()
        };

        let author = match message.get("user").and_then(|v| v.as_str()) {
            Some(user_id) => self.resolve_user(user_id).await,
            None => AuthorProfile::default(),
        };

        EditEvent {
            channel,
            ts: raw
                .get("ts")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            target_ts: previous
                .get("ts")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            author,
            new_text: self.render_text(new_text_raw).await,
            text_changed: new_text_raw != prev_text,
            link_embeds,
            prior_had_embeds,
        }
    }

    /// Pull every shared file down to local storage. A single failed
    /// download degrades to a descriptor marked failed; the message itself
    /// still goes out.
    async fn materialize_files(&self, files: Option<&Vec<Value>>) -> Vec<StoredFile> {
        let mut stored = Vec::new();
        let Some(files) = files else {
            return stored;
        };
        for file in files {
            let name = file
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed")
                .to_string();
            let remote_url = file
                .get("url_private")
                .or_else(|| file.get("url_private_download"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let download_url = file
                .get("url_private_download")
                .and_then(|v| v.as_str())
                .unwrap_or(&remote_url);

            let download = self.files.download(&name, download_url).await;
            stored.push(StoredFile {
                id: file
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                title: file
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&name)
                    .to_string(),
                public_url: self.files.public_url(&download.stored_as),
                name,
                path: download.path,
                stored_as: download.stored_as,
                size_bytes: download.size_bytes,
                remote_url,
                failed: download.failed,
            });
        }
        stored
    }

    /// Substitute mention/channel references, then translate the markdown
    /// dialect.
    async fn render_text(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let text = self.resolve_mentions(text).await;
        let text = self.resolve_channel_refs(&text).await;
        markdown::translate(&text)
    }

    async fn resolve_mentions(&self, text: &str) -> String {
        let mut resolved = text.to_string();
        let ids: Vec<String> = MENTION_RE
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect();
        for id in ids {
            let profile = self.resolve_user(&id).await;
            resolved = resolved.replace(&format!("<@{}>", id), &format!("[{}]", profile.name));
        }
        resolved
    }

    async fn resolve_channel_refs(&self, text: &str) -> String {
        let mut resolved = text.to_string();
        let refs: Vec<(String, Option<String>)> = CHANNEL_REF_RE
            .captures_iter(text)
            .map(|c| (c[1].to_string(), c.get(2).map(|m| m.as_str().to_string())))
            .collect();
        for (id, label) in refs {
            let name = match label.filter(|l| !l.trim().is_empty()) {
                Some(label) => label,
                None => self.resolve_channel(&id).await.name,
            };
            let pattern_plain = format!("<#{}>", id);
            let pattern_labeled_start = format!("<#{}|", id);
            let replacement = format!("[#{}]", name);
            resolved = resolved.replace(&pattern_plain, &replacement);
            // Labeled form: replace the whole <#C..|label> token
            if let Some(start) = resolved.find(&pattern_labeled_start)
                && let Some(end) = resolved[start..].find('>')
            {
                resolved.replace_range(start..start + end + 1, &replacement);
            }
        }
        resolved
    }

    /// Resolve a Slack user into display metadata, with fixed fallbacks when
    /// the lookup fails. Results are cached.
    pub async fn resolve_user(&self, user_id: &str) -> AuthorProfile {
        {
            let mut cache = self.user_cache.lock().await;
            if let Some(profile) = cache.get(user_id) {
                return profile.clone();
            }
        }

        let profile = match self.api_call("users.info", &[("user", user_id)]).await {
            Ok(body) => profile_from_user(body.get("user").unwrap_or(&Value::Null)),
            Err(e) => {
                warn!("Slack users.info failed for {}: {:#}", user_id, e);
                AuthorProfile::default()
            }
        };

        let mut cache = self.user_cache.lock().await;
        cache.put(user_id.to_string(), profile.clone());
        profile
    }

    /// Resolve a Slack channel into metadata, with a fallback name when the
    /// lookup fails. Results are cached until a channel-update event.
    pub async fn resolve_channel(&self, channel_id: &str) -> ChannelInfo {
        if let Some(info) = self.channel_cache.get(channel_id) {
            return info.clone();
        }
        self.refresh_channel(channel_id).await
    }

    /// Fresh conversations.info lookup, falling back to the cached value
    /// (then to a placeholder) on failure.
    async fn refresh_channel(&self, channel_id: &str) -> ChannelInfo {
        match self
            .api_call("conversations.info", &[("channel", channel_id)])
            .await
        {
            Ok(body) => {
                let info = channel_from_info(channel_id, body.get("channel").unwrap_or(&Value::Null));
                self.channel_cache
                    .insert(channel_id.to_string(), info.clone());
                info
            }
            Err(e) => {
                warn!(
                    "Slack conversations.info failed for {}: {:#}",
                    channel_id, e
                );
                self.channel_cache
                    .get(channel_id)
                    .map(|entry| entry.clone())
                    .unwrap_or_else(|| ChannelInfo {
                        id: channel_id.to_string(),
                        name: UNKNOWN_CHANNEL_NAME.to_string(),
                        ..Default::default()
                    })
            }
        }
    }

    async fn is_own_message(&self, raw: &Value) -> bool {
        let identity = self.identity.read().await;
        let Some(identity) = identity.as_ref() else {
            return false;
        };
        let bot_id = raw.get("bot_id").and_then(|v| v.as_str()).unwrap_or("");
        let user = raw.get("user").and_then(|v| v.as_str()).unwrap_or("");
        (!identity.bot_id.is_empty() && bot_id == identity.bot_id)
            || (!identity.user_id.is_empty() && user == identity.user_id)
    }
}

/// A more readable identity than a bare user id.
fn user_identify(user: &Value) -> Option<String> {
    let real_name = user.get("real_name").and_then(|v| v.as_str())?;
    let id = user.get("id").and_then(|v| v.as_str())?;
    Some(format!("{}@{}", real_name, id))
}

fn profile_from_user(user: &Value) -> AuthorProfile {
    let fallback = AuthorProfile::default();
    AuthorProfile {
        name: user_identify(user).unwrap_or(fallback.name),
        avatar_url: user
            .get("profile")
            .and_then(|p| p.get("image_512"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(fallback.avatar_url),
        color: user
            .get("color")
            .and_then(|v| v.as_str())
            .and_then(parse_color)
            .unwrap_or(DEFAULT_ACCENT),
    }
}

fn channel_from_info(channel_id: &str, channel: &Value) -> ChannelInfo {
    let text_of = |key: &str| -> String {
        channel
            .get(key)
            .and_then(|v| {
                // topic/purpose arrive as {"value": "..."} objects
                v.get("value").or(Some(v))
            })
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let name = channel
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN_CHANNEL_NAME)
        .to_string();
    ChannelInfo {
        id: channel_id.to_string(),
        name,
        topic: text_of("topic"),
        purpose: text_of("purpose"),
    }
}

/// Convert a Slack link-preview attachment into a canonical link embed.
fn unwrap_attachment(attachment: &Value) -> LinkEmbed {
    let str_of = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| attachment.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
    };
    LinkEmbed {
        author_name: str_of(&["service_name", "author_name"]),
        author_icon: str_of(&["service_icon", "author_icon"]),
        author_link: str_of(&["original_url", "author_link"]),
        title: str_of(&["title"]),
        title_url: str_of(&["title_link"]),
        text: str_of(&["text", "fallback"]).unwrap_or_default(),
        footer: str_of(&["footer"]),
        image_url: str_of(&["image_url"]),
        color: attachment
            .get("color")
            .and_then(|v| v.as_str())
            .and_then(parse_color),
    }
}

/// "#RRGGBB" or "RRGGBB" into a packed color value.
fn parse_color(s: &str) -> Option<u32> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn source() -> (SlackSource, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let files = Arc::new(
            FileStore::new(dir.path().to_path_buf(), "xoxb-test".into(), None, false).unwrap(),
        );
        let src = SlackSource::new("xoxb-test".into(), files).unwrap();
        // Seed the channel cache so classification never touches the network
        src.channel_cache.insert(
            "C1".into(),
            ChannelInfo::named("C1", "general"),
        );
        (src, dir)
    }

    async fn seed_identity(src: &SlackSource, user_id: &str, bot_id: &str) {
        let mut id = src.identity.write().await;
        *id = Some(BotIdentity {
            user_id: user_id.into(),
            bot_id: bot_id.into(),
        });
    }

    async fn seed_user(src: &SlackSource, id: &str, name: &str) {
        let mut cache = src.user_cache.lock().await;
        cache.put(
            id.to_string(),
            AuthorProfile {
                name: name.to_string(),
                ..Default::default()
            },
        );
    }

    #[tokio::test]
    async fn plain_message_classifies_as_send() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "channel": "C1",
                "ts": "100.1",
                "text": "hello"
            }))
            .await
            .unwrap();

        match event {
            Some(RelayEvent::Send(msg)) => {
                assert_eq!(msg.source_key(), "C1/100.1");
                assert_eq!(msg.body, "hello");
                assert_eq!(msg.channel.name, "general");
                assert!(msg.thread.is_none());
                assert!(!msg.italicize);
            }
            other => panic!("expected send, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn me_message_is_marked_italic() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "me_message",
                "channel": "C1",
                "ts": "100.1",
                "text": "waves"
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::Send(msg)) => assert!(msg.italicize),
            other => panic!("expected send, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn threaded_message_carries_thread_root() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "channel": "C1",
                "ts": "100.5",
                "thread_ts": "90.0",
                "text": "a reply"
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::Send(msg)) => {
                assert_eq!(msg.thread.unwrap().root_ts, "90.0");
            }
            other => panic!("expected send, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn message_changed_classifies_as_edit() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "message_changed",
                "channel": "C1",
                "ts": "200.2",
                "message": {"ts": "100.1", "text": "hello world"},
                "previous_message": {"ts": "100.1", "text": "hello"}
            }))
            .await
            .unwrap();

        match event {
            Some(RelayEvent::Edit(edit)) => {
                assert_eq!(edit.target_key(), "C1/100.1");
                assert_eq!(edit.event_key(), "C1/200.2");
                assert_eq!(edit.new_text, "hello world");
                assert!(edit.text_changed);
                assert!(!edit.prior_had_embeds);
            }
            other => panic!("expected edit, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn unchanged_text_is_flagged() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "message_changed",
                "channel": "C1",
                "ts": "200.2",
                "message": {"ts": "100.1", "text": "same", "attachments": [{"text": "preview"}]},
                "previous_message": {"ts": "100.1", "text": "same"}
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::Edit(edit)) => {
                assert!(!edit.text_changed);
                assert_eq!(edit.link_embeds.len(), 1);
            }
            other => panic!("expected edit, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn new_previews_suppressed_when_prior_had_some() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "message_changed",
                "channel": "C1",
                "ts": "200.2",
                "message": {"ts": "100.1", "text": "t", "attachments": [{"text": "new"}]},
                "previous_message": {"ts": "100.1", "text": "t", "attachments": [{"text": "old"}]}
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::Edit(edit)) => {
                assert!(edit.prior_had_embeds);
                assert!(edit.link_embeds.is_empty());
            }
            other => panic!("expected edit, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn message_deleted_uses_deleted_ts() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "message_deleted",
                "channel": "C1",
                "ts": "300.3",
                "deleted_ts": "100.1"
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::Delete(del)) => assert_eq!(del.target_key(), "C1/100.1"),
            other => panic!("expected delete, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn unknown_subtype_is_dropped_not_fatal() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "some_future_subtype",
                "channel": "C1",
                "ts": "100.1"
            }))
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn unknown_event_type_is_dropped() {
        let (src, _dir) = source();
        assert!(src
            .normalize(&json!({"type": "reaction_added"}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bot_messages_are_dropped() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "bot_message",
                "channel": "C1",
                "ts": "100.1",
                "text": "beep"
            }))
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn own_messages_are_suppressed() {
        let (src, _dir) = source();
        seed_identity(&src, "URELAY", "BRELAY").await;

        let by_user = src
            .normalize(&json!({
                "type": "message",
                "channel": "C1",
                "ts": "100.1",
                "user": "URELAY",
                "text": "echo"
            }))
            .await
            .unwrap();
        assert!(by_user.is_none());

        let by_bot = src
            .normalize(&json!({
                "type": "message",
                "channel": "C1",
                "ts": "100.2",
                "bot_id": "BRELAY",
                "text": "echo"
            }))
            .await
            .unwrap();
        assert!(by_bot.is_none());
    }

    #[tokio::test]
    async fn pin_added_classifies_with_actor() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "pin_added",
                "user": "U42",
                "item": {"channel": "C1", "message": {"ts": "100.1"}}
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::PinSet(pin)) => {
                assert_eq!(pin.target_key(), "C1/100.1");
                assert_eq!(pin.actor, "U42");
            }
            other => panic!("expected pin-set, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn pin_removed_classifies_as_clear() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "pin_removed",
                "user": "U42",
                "item": {"channel": "C1", "message": {"ts": "100.1"}}
            }))
            .await
            .unwrap();
        assert!(matches!(event, Some(RelayEvent::PinClear(_))));
    }

    #[tokio::test]
    async fn channel_topic_classifies_as_update_with_notice() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "channel_topic",
                "channel": "C1",
                "ts": "100.1",
                "topic": "new topic",
                "text": "Ada set the channel topic: new topic"
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::ChannelUpdate(update)) => {
                assert_eq!(update.channel.topic, "new topic");
                let notice = update.notice.unwrap();
                assert!(notice.body.contains("set the channel topic"));
            }
            other => panic!("expected channel-update, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn channel_rename_overrides_name() {
        let (src, _dir) = source();
        let event = src
            .normalize(&json!({
                "type": "message",
                "subtype": "channel_name",
                "channel": "C1",
                "ts": "100.1",
                "old_name": "general",
                "name": "general-renamed",
                "text": "Ada renamed the channel"
            }))
            .await
            .unwrap();
        match event {
            Some(RelayEvent::ChannelUpdate(update)) => {
                assert_eq!(update.channel.name, "general-renamed");
            }
            other => panic!("expected channel-update, got {:?}", other.map(|e| e.action())),
        }
    }

    #[tokio::test]
    async fn mentions_are_substituted_from_cache() {
        let (src, _dir) = source();
        seed_user(&src, "U1234ABCD", "Ada Lovelace@U1234ABCD").await;
        let rendered = src.render_text("ping <@U1234ABCD> please").await;
        assert_eq!(rendered, "ping [Ada Lovelace@U1234ABCD] please");
    }

    #[tokio::test]
    async fn labeled_channel_refs_use_the_label() {
        let (src, _dir) = source();
        let rendered = src.render_text("see <#C1|general> for details").await;
        assert_eq!(rendered, "see [#general] for details");
    }

    #[tokio::test]
    async fn plain_channel_refs_resolve_from_cache() {
        let (src, _dir) = source();
        let rendered = src.render_text("see <#C1> for details").await;
        assert_eq!(rendered, "see [#general] for details");
    }

    #[test]
    fn color_parsing() {
        assert_eq!(parse_color("#407ABA"), Some(0x407ABA));
        assert_eq!(parse_color("9f1e3d"), Some(0x9F1E3D));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color(""), None);
    }

    #[test]
    fn attachment_unwrapping_prefers_service_fields() {
        let embed = unwrap_attachment(&json!({
            "service_name": "GitHub",
            "author_name": "octocat",
            "title": "some repo",
            "title_link": "https://github.com/x",
            "text": "preview",
            "footer": "starred 5 times",
            "color": "#24292f"
        }));
        assert_eq!(embed.author_name.as_deref(), Some("GitHub"));
        assert_eq!(embed.title_url.as_deref(), Some("https://github.com/x"));
        assert_eq!(embed.color, Some(0x24292F));
    }

    #[test]
    fn attachment_falls_back_to_fallback_text() {
        let embed = unwrap_attachment(&json!({"fallback": "plain summary"}));
        assert_eq!(embed.text, "plain summary");
        assert!(embed.author_name.is_none());
    }

    #[test]
    fn user_profile_fallbacks() {
        let profile = profile_from_user(&json!({}));
        assert_eq!(profile.name, AuthorProfile::default().name);

        let full = profile_from_user(&json!({
            "id": "U1",
            "real_name": "Ada",
            "color": "9f1e3d",
            "profile": {"image_512": "https://example.com/ada.png"}
        }));
        assert_eq!(full.name, "Ada@U1");
        assert_eq!(full.color, 0x9F1E3D);
        assert_eq!(full.avatar_url, "https://example.com/ada.png");
    }

    #[test]
    fn channel_info_unwraps_topic_objects() {
        let info = channel_from_info(
            "C9",
            &json!({
                "name": "random",
                "topic": {"value": "off topic"},
                "purpose": {"value": "chatter"}
            }),
        );
        assert_eq!(info.name, "random");
        assert_eq!(info.topic, "off topic");
        assert_eq!(info.purpose, "chatter");
    }
}
