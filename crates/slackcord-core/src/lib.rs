//! slackcord-core - The identity and reconciliation engine of the relay
//!
//! This crate provides:
//! - The canonical, platform-agnostic event model (one tagged variant per action)
//! - The card model: one unit of Discord content produced while mirroring
//! - Slack mrkdwn to Discord markdown translation
//! - The destination dispatcher trait consumed by the engine
//! - The reconciliation engine that decides, per event, what destination
//!   action to take and what mappings to record

pub mod card;
pub mod dispatcher;
pub mod engine;
pub mod event;
pub mod markdown;

// Re-export main types for convenience
pub use card::{Card, CardAttachment, CardPolicy};
pub use dispatcher::{ChannelMetadata, DispatchTarget, Dispatcher};
pub use engine::{EngineOptions, ReconciliationEngine};
pub use event::{
    AuthorProfile, ChannelEvent, ChannelInfo, DeleteEvent, EditEvent, LinkEmbed, MessageEvent,
    PinEvent, RelayEvent, StoredFile, ThreadInfo,
};
