//! Slack mrkdwn to Discord markdown translation
//!
//! A pure string transform applied to message bodies before they reach the
//! engine. Known limitations, inherited and accepted: markdown escaped on
//! Slack is translated as if it was never escaped, emphasis markers glued to
//! punctuation are left untouched, and ```lang code fences are passed
//! through (Discord reads the first word as a language tag).

use regex::Regex;
use std::sync::LazyLock;

// <http://url> or <http://url|label>
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(https?://[^>|]+)(?:\|([^>]*))?>").expect("url regex")
});

/// Translate a Slack mrkdwn body into Discord markdown.
pub fn translate(text: &str) -> String {
    let mut out = rewrite_links(text);
    // Literal ~~ would read as strikethrough on Discord
    out = out.replace("~~", "\\~\\~");
    out = rewrite_emphasis(&out);
    unescape_entities(&out)
}

/// `<url>` and `<url|label>` into `[label](url)`.
fn rewrite_links(text: &str) -> String {
    URL_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let url = &caps[1];
            let label = caps
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|l| !l.is_empty())
                .unwrap_or(url);
            format!("[{}]({})", label, url)
        })
        .into_owned()
}

/// Whitespace-delimited `~strike~` into `~~strike~~` and `_italic_` into
/// `*italic*`. Bold `*` markers are shared by both dialects and pass
/// through as-is.
fn rewrite_emphasis(text: &str) -> String {
    text.split_inclusive(|c: char| c.is_whitespace())
        .map(|chunk| {
            let word_len = chunk.trim_end_matches(|c: char| c.is_whitespace()).len();
            let (word, ws) = chunk.split_at(word_len);
            let mut rewritten = rewrite_word(word);
            rewritten.push_str(ws);
            rewritten
        })
        .collect()
}

fn rewrite_word(word: &str) -> String {
    if let Some(inner) = word.strip_prefix('~').and_then(|w| w.strip_suffix('~'))
        && !inner.is_empty()
        && !inner.contains('~')
        && !inner.contains('\\')
    {
        return format!("~~{}~~", inner);
    }
    if let Some(inner) = word.strip_prefix('_').and_then(|w| w.strip_suffix('_'))
        && !inner.is_empty()
        && !inner.contains('_')
    {
        return format!("*{}*", inner);
    }
    word.to_string()
}

/// Slack's API HTML-escapes angle brackets and ampersands in message text.
fn unescape_entities(text: &str) -> String {
    text.replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}
