//! Card model: one unit of destination content
//!
//! Mirroring one Slack message produces one primary card (the text carrier)
//! plus zero or more secondary cards: one per file attachment and one per
//! link preview. The dispatcher renders a card as a Discord embed, with an
//! uploaded file when the card carries one.

use crate::event::{
    ts_seconds, EditEvent, LinkEmbed, MessageEvent, StoredFile, DEFAULT_ACCENT, EMPTY_MESSAGE_TEXT,
    FALLBACK_AUTHOR_NAME, FALLBACK_AVATAR_URL,
};
use std::path::PathBuf;

/// Attachment sizing/format policy for secondary cards.
#[derive(Debug, Clone)]
pub struct CardPolicy {
    /// Files at or above this size are link-referenced instead of uploaded
    pub inline_limit_bytes: u64,
    /// Extensions Discord renders inline inside an embed. Audio/video embed
    /// themselves (and then fail to load), and gif does not work in embeds,
    /// so only plain raster images are listed.
    pub attachable_formats: Vec<String>,
}

impl Default for CardPolicy {
    fn default() -> Self {
        Self {
            inline_limit_bytes: 8 * 1024 * 1024,
            attachable_formats: vec!["png".into(), "jpg".into(), "jpeg".into()],
        }
    }
}

impl CardPolicy {
    pub fn is_inlineable(&self, file: &StoredFile) -> bool {
        file.size_bytes < self.inline_limit_bytes
    }

    pub fn is_displayable(&self, file: &StoredFile) -> bool {
        self.attachable_formats.contains(&file.extension())
    }
}

/// A local file uploaded alongside a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAttachment {
    pub file_name: String,
    pub path: PathBuf,
}

/// One unit of destination content.
#[derive(Debug, Clone, Default)]
pub struct Card {
    pub author_name: String,
    pub author_icon_url: String,
    pub color: u32,
    pub body: String,
    pub title: Option<String>,
    pub title_url: Option<String>,
    pub footer: Option<String>,
    pub image_url: Option<String>,
    /// Embed timestamp, seconds since the epoch
    pub timestamp: Option<f64>,
    /// Local file to upload with this card
    pub attachment: Option<CardAttachment>,
    /// Render the uploaded file inline as the embed image
    pub attachment_inline: bool,
}

impl Card {
    /// The primary content card for a message: author, text, color, timestamp.
    pub fn from_message(msg: &MessageEvent) -> Self {
        let mut body = if msg.body.is_empty() {
            EMPTY_MESSAGE_TEXT.to_string()
        } else {
            msg.body.clone()
        };
        if msg.italicize {
            body = format!("*{}*", body);
        }
        Self {
            author_name: msg.author.name.clone(),
            author_icon_url: msg.author.avatar_url.clone(),
            color: msg.author.color,
            body,
            timestamp: ts_seconds(&msg.ts),
            ..Default::default()
        }
    }

    /// The replacement rendering applied when a message is edited. Targets
    /// the primary carrier; secondary cards are never rewritten.
    pub fn from_edit(edit: &EditEvent) -> Self {
        let body = if edit.new_text.is_empty() {
            EMPTY_MESSAGE_TEXT.to_string()
        } else {
            edit.new_text.clone()
        };
        Self {
            author_name: edit.author.name.clone(),
            author_icon_url: edit.author.avatar_url.clone(),
            color: edit.author.color,
            body,
            timestamp: ts_seconds(&edit.target_ts),
            ..Default::default()
        }
    }

    /// A secondary card for one stored attachment.
    ///
    /// Small displayable files become image cards with the file uploaded;
    /// small non-displayable files are uploaded bare; everything else turns
    /// into a link card pointing at the re-hosted copy with the Slack
    /// private URL as fallback.
    pub fn from_file(file: &StoredFile, origin: &MessageEvent, policy: &CardPolicy) -> Self {
        let mut card = Self {
            color: origin.author.color,
            timestamp: ts_seconds(&origin.ts),
            ..Default::default()
        };

        if file.failed {
            card.title = Some(file.name.clone());
            card.body = format!(
                "[File Download Failed: Original Copy on Slack]({})",
                file.remote_url
            );
            return card;
        }

        if policy.is_inlineable(file) {
            card.attachment = Some(CardAttachment {
                file_name: file.name.clone(),
                path: file.path.clone(),
            });
            if policy.is_displayable(file) {
                card.attachment_inline = true;
                card.image_url = Some(format!("attachment://{}", file.name));
            }
            return card;
        }

        card.title = Some(file.name.clone());
        let mut body = format!("[File Too Large to Send]({})", file.remote_url);
        body.push_str(&format!("[Copy Saved on Server as: /{}]", file.stored_as));
        if let Some(url) = &file.public_url {
            body.push_str(&format!("\n({})", url));
        }
        card.body = body;
        card
    }

    /// A secondary card for one link preview.
    pub fn from_link_embed(embed: &LinkEmbed) -> Self {
        Self {
            author_name: embed
                .author_name
                .clone()
                .unwrap_or_else(|| FALLBACK_AUTHOR_NAME.to_string()),
            author_icon_url: embed
                .author_icon
                .clone()
                .unwrap_or_else(|| FALLBACK_AVATAR_URL.to_string()),
            color: embed.color.unwrap_or(DEFAULT_ACCENT),
            body: embed.text.clone(),
            title: embed.title.clone(),
            title_url: embed.title_url.clone(),
            footer: embed.footer.clone(),
            image_url: embed.image_url.clone(),
            ..Default::default()
        }
    }

    /// Footer line announcing how many secondary cards follow the primary.
    pub fn additional_note(count: usize) -> String {
        format!(
            "↓ Message Includes {} Additional Attachment{} Below ↓",
            count,
            if count == 1 { "" } else { "s" }
        )
    }

    /// Append a line to the footer without overwriting prior footer content.
    pub fn append_footer(&mut self, extra: &str) {
        self.footer = Some(match self.footer.take() {
            Some(existing) => format!("{}\n{}", existing, extra),
            None => extra.to_string(),
        });
    }

    /// Whether this card carries any embed-worthy content, or is a bare file
    /// upload.
    pub fn has_embed(&self) -> bool {
        !self.body.is_empty()
            || self.title.is_some()
            || self.attachment_inline
            || self.attachment.is_none()
    }
}
