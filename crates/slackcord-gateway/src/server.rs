//! Axum server: Slack event intake + attachment re-hosting
//!
//! `POST /slack/events` verifies the request signature, answers
//! url_verification challenges, and forwards the inner event into the relay
//! through an mpsc channel, acking Slack immediately. `GET /files` and
//! `GET /files/{name}` expose the downloads directory; both can be disabled
//! by configuration.

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::signature::verify_slack_signature;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub signing_secret: String,
    pub downloads_dir: PathBuf,
    /// Serve stored files at all
    pub serve_files: bool,
    /// Allow listing the downloads directory
    pub list_files: bool,
}

#[derive(Clone)]
struct GatewayState {
    signing_secret: String,
    downloads_dir: PathBuf,
    serve_files: bool,
    list_files: bool,
    events: mpsc::Sender<Value>,
}

/// The relay's HTTP server.
pub struct RelayGateway {
    config: GatewayConfig,
    events: mpsc::Sender<Value>,
}

impl RelayGateway {
    pub fn new(config: GatewayConfig, events: mpsc::Sender<Value>) -> Self {
        Self { config, events }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let state = GatewayState {
            signing_secret: self.config.signing_secret.clone(),
            downloads_dir: self.config.downloads_dir.clone(),
            serve_files: self.config.serve_files,
            list_files: self.config.list_files,
            events: self.events.clone(),
        };
        Router::new()
            .route("/slack/events", post(slack_events_handler))
            .route("/files", get(list_handler))
            .route("/files/{name}", get(file_handler))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Start the server (blocks until shutdown)
    pub async fn run(self) -> anyhow::Result<()> {
        let bind = self.config.bind;
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("Gateway listening on {}", bind);
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn slack_events_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let timestamp = header_str(&headers, "x-slack-request-timestamp");
    let signature = header_str(&headers, "x-slack-signature");

    if let Err(e) = verify_slack_signature(
        &state.signing_secret,
        timestamp,
        &body,
        signature,
        chrono::Utc::now().timestamp(),
    ) {
        warn!("Rejected Slack request: {}", e);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Unparseable Slack event payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match payload.get("type").and_then(|v| v.as_str()) {
        Some("url_verification") => {
            info!("Answering Slack url_verification challenge");
            let challenge = payload.get("challenge").cloned().unwrap_or(Value::Null);
            Json(json!({ "challenge": challenge })).into_response()
        }
        Some("event_callback") => {
            match payload.get("event") {
                Some(event) => {
                    // Ack immediately; processing happens behind the queue
                    if let Err(e) = state.events.send(event.clone()).await {
                        warn!("Event queue closed; dropping Slack event: {}", e);
                    }
                }
                None => warn!("event_callback payload without an inner event"),
            }
            StatusCode::OK.into_response()
        }
        other => {
            debug!("Ignoring Slack payload of type {:?}", other);
            StatusCode::OK.into_response()
        }
    }
}

async fn list_handler(State(state): State<GatewayState>) -> Response {
    if !state.serve_files {
        return file_server_disabled();
    }
    if !state.list_files {
        return (
            StatusCode::OK,
            "The file list is private. Individual files are still \
             accessible through their own URLs.",
        )
            .into_response();
    }

    match std::fs::read_dir(&state.downloads_dir) {
        Ok(entries) => {
            let mut listing = String::from("Download Folder Contents:\n");
            for entry in entries.flatten() {
                listing.push_str(&entry.file_name().to_string_lossy());
                listing.push('\n');
            }
            (StatusCode::OK, listing).into_response()
        }
        Err(e) => {
            warn!("Error reading downloads folder: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error reading downloads folder",
            )
                .into_response()
        }
    }
}

async fn file_handler(
    State(state): State<GatewayState>,
    AxumPath(name): AxumPath<String>,
    RawQuery(query): RawQuery,
) -> Response {
    if !state.serve_files {
        return file_server_disabled();
    }
    if !is_safe_name(&name) {
        warn!("Attempt to access {:?} denied", name);
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.downloads_dir.join(&name);
    debug!("Serving {:?}", path);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Error reading file from downloads: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    let disposition = if query
        .map(|q| q.to_lowercase().contains("download"))
        .unwrap_or(false)
    {
        "attachment"
    } else {
        "inline"
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition.to_string()),
        ],
        data,
    )
        .into_response()
}

fn file_server_disabled() -> Response {
    (
        StatusCode::FORBIDDEN,
        "The file server is set to private and disabled.\n\
         Your files are most likely still stored on the relay, so ask the \
         operator if you need one!",
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Served names must stay inside the downloads directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("image.png"));
        assert!(is_safe_name("my file (1).png"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("../secrets"));
        assert!(!is_safe_name("a/b.png"));
        assert!(!is_safe_name("a\\b.png"));
    }

    #[test]
    fn router_builds() {
        let (tx, _rx) = mpsc::channel(8);
        let gateway = RelayGateway::new(
            GatewayConfig {
                bind: "127.0.0.1:0".parse().unwrap(),
                signing_secret: "secret".into(),
                downloads_dir: PathBuf::from("/tmp"),
                serve_files: true,
                list_files: true,
            },
            tx,
        );
        let _router = gateway.router();
    }

    #[tokio::test]
    async fn event_callback_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: PathBuf::from("/tmp"),
            serve_files: true,
            list_files: true,
            events: tx,
        };

        let body_json = json!({
            "type": "event_callback",
            "event": {"type": "message", "channel": "C1", "ts": "100.1", "text": "hi"}
        });
        let body = serde_json::to_vec(&body_json).unwrap();
        let now = chrono::Utc::now().timestamp().to_string();
        let signature = crate::signature::sign("secret", &now, &body);

        let mut headers = HeaderMap::new();
        headers.insert("x-slack-request-timestamp", now.parse().unwrap());
        headers.insert("x-slack-signature", signature.parse().unwrap());

        let response =
            slack_events_handler(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded["channel"], "C1");
    }

    #[tokio::test]
    async fn unsigned_requests_are_rejected() {
        let (tx, mut rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: PathBuf::from("/tmp"),
            serve_files: true,
            list_files: true,
            events: tx,
        };

        let body = br#"{"type":"event_callback","event":{}}"#.to_vec();
        let response =
            slack_events_handler(State(state), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let (tx, _rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: PathBuf::from("/tmp"),
            serve_files: true,
            list_files: true,
            events: tx,
        };

        let body_json = json!({"type": "url_verification", "challenge": "abc123"});
        let body = serde_json::to_vec(&body_json).unwrap();
        let now = chrono::Utc::now().timestamp().to_string();
        let signature = crate::signature::sign("secret", &now, &body);

        let mut headers = HeaderMap::new();
        headers.insert("x-slack-request-timestamp", now.parse().unwrap());
        headers.insert("x-slack-signature", signature.parse().unwrap());

        let response =
            slack_events_handler(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn disabled_file_server_denies_requests() {
        let (tx, _rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: PathBuf::from("/tmp"),
            serve_files: false,
            list_files: true,
            events: tx,
        };
        let response = file_handler(
            State(state),
            AxumPath("image.png".to_string()),
            RawQuery(None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stored_files_are_served_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: dir.path().to_path_buf(),
            serve_files: true,
            list_files: true,
            events: tx,
        };

        let response = file_handler(
            State(state.clone()),
            AxumPath("hello.txt".to_string()),
            RawQuery(None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "inline"
        );

        let download = file_handler(
            State(state),
            AxumPath("hello.txt".to_string()),
            RawQuery(Some("download".to_string())),
        )
        .await;
        assert_eq!(
            download.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment"
        );
    }

    #[tokio::test]
    async fn listing_can_be_disabled() {
        let (tx, _rx) = mpsc::channel(8);
        let state = GatewayState {
            signing_secret: "secret".into(),
            downloads_dir: PathBuf::from("/tmp"),
            serve_files: true,
            list_files: false,
            events: tx,
        };
        let response = list_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
