//! Persistent identity mapping store for the slackcord relay
//!
//! This crate owns the only durable state in the system: the tables that
//! correlate Slack message/thread/channel/file identifiers with the Discord
//! objects they were mirrored into. Every other component treats these
//! mappings as the single source of truth for "what did we already mirror."

pub mod mapping;

pub use mapping::{
    InsertOutcome, MappingStore, MessageMapping, StoreError, StoreStats, MAIN_THREAD,
};
