//! HTTP server for the slackcord relay
//!
//! One Axum server carries both outward-facing duties: the Slack Events API
//! endpoint (signature-verified, challenge-answering, ack-first) and the
//! public file listing/serving for re-hosted attachments.

pub mod server;
pub mod signature;

pub use server::{GatewayConfig, RelayGateway};
pub use signature::verify_slack_signature;
