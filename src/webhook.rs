//! WhatsApp (Twilio) webhook adapter.
//!
//! A thin layer over [`ManifestExtractor::process`]: read the media fields of
//! the inbound form, run the pipeline, answer with a TwiML message. Signature
//! validation of inbound requests is not performed, so `MediaUrl0` is
//! untrusted: only HTTP(S) URLs are accepted, and the acquirer refuses hosts
//! outside [`ExtractorConfig::media_hosts`](crate::ExtractorConfig::media_hosts).
//!
//! Routes:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET  | `/`                 | `Manifiestos Bot OK` |
//! | GET  | `/healthz`          | `ok` |
//! | POST | `/whatsapp-webhook` | TwiML reply |

use crate::config::ServerConfig;
use crate::extract::{confirmation_message, ManifestExtractor, NO_MEDIA_MESSAGE};
use crate::pipeline::acquire::is_url;
use crate::record::MediaReference;
use crate::sink::RecordSink;
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state for the webhook handlers.
pub struct AppState {
    pub extractor: Arc<ManifestExtractor>,
    pub sink: Arc<dyn RecordSink>,
}

/// The subset of Twilio's inbound-message form the bot reads.
#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "NumMedia", default)]
    pub num_media: String,
    #[serde(rename = "MediaUrl0")]
    pub media_url: Option<String>,
    #[serde(rename = "MediaContentType0")]
    pub media_content_type: Option<String>,
}

impl InboundMessage {
    /// The first attached media, if the message carries one.
    ///
    /// Anything but an HTTP(S) URL counts as no media.
    pub fn media(&self) -> Option<MediaReference> {
        let count: u32 = self.num_media.trim().parse().unwrap_or(0);
        if count < 1 {
            return None;
        }
        let url = self.media_url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        if !is_url(url) {
            warn!("Ignoring MediaUrl0 that is not an http(s) URL");
            return None;
        }
        let mut media = MediaReference::new(url);
        if let Some(ref ct) = self.media_content_type {
            media = media.with_content_type(ct.clone());
        }
        Some(media)
    }
}

/// Build the webhook router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Manifiestos Bot OK" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/whatsapp-webhook", post(whatsapp_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C.
pub async fn run_server(
    config: ServerConfig,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    Form(msg): Form<InboundMessage>,
) -> impl IntoResponse {
    info!("Inbound message from {} ({} media)", msg.from, msg.num_media);
    let reply = reply_for(&state, &msg).await;
    twiml(&reply)
}

/// Compute the reply text for one inbound message.
pub async fn reply_for(state: &AppState, msg: &InboundMessage) -> String {
    let Some(media) = msg.media() else {
        return NO_MEDIA_MESSAGE.to_string();
    };

    match state.extractor.process(&media, state.sink.as_ref()).await {
        Ok(record) => confirmation_message(&record),
        Err(e) => {
            error!("Processing failed for {}: {}", media.url, e);
            state.extractor.failure_message(&e)
        }
    }
}

fn twiml(message: &str) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        format!(
            "<Response><Message>{}</Message></Response>",
            escape_xml(message)
        ),
    )
}

/// Escape the five XML special characters.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::error::ManifestError;
    use crate::model::VisionModel;
    use crate::pipeline::encode::EncodedImage;
    use crate::config::MediaCredentials;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use std::io::Write;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct UnreachableModel;

    #[async_trait]
    impl VisionModel for UnreachableModel {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn complete(&self, _: &str, _: &EncodedImage) -> Result<String, ManifestError> {
            Err(ManifestError::model_api(Some(400), "should not be called"))
        }
    }

    fn state(sink: Arc<MemorySink>) -> AppState {
        let config = ExtractorConfig::builder()
            .media_auth_required(false)
            .build()
            .unwrap();
        state_with(config, sink)
    }

    fn state_with(config: ExtractorConfig, sink: Arc<MemorySink>) -> AppState {
        AppState {
            extractor: Arc::new(ManifestExtractor::with_model(config, Arc::new(UnreachableModel))),
            sink,
        }
    }

    #[test]
    fn media_requires_count_and_url() {
        let mut msg = InboundMessage {
            num_media: "0".into(),
            media_url: Some("https://api.twilio.com/x".into()),
            ..Default::default()
        };
        assert!(msg.media().is_none());

        msg.num_media = "1".into();
        msg.media_content_type = Some("image/jpeg".into());
        let media = msg.media().unwrap();
        assert_eq!(media.url, "https://api.twilio.com/x");
        assert_eq!(media.content_type_hint.as_deref(), Some("image/jpeg"));

        msg.media_url = None;
        assert!(msg.media().is_none());

        msg.num_media = "abc".into();
        assert!(msg.media().is_none());

        msg.num_media = "1".into();
        msg.media_url = Some("/etc/passwd".into());
        assert!(msg.media().is_none());
        msg.media_url = Some("file:///etc/passwd".into());
        assert!(msg.media().is_none());
    }

    #[test]
    fn xml_escaping() {
        assert_eq!(
            escape_xml(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&apos;&lt;/a&gt;"
        );
    }

    #[tokio::test]
    async fn no_media_reply_skips_pipeline() {
        let sink = Arc::new(MemorySink::new());
        let reply = reply_for(&state(sink.clone()), &InboundMessage::default()).await;
        assert_eq!(reply, NO_MEDIA_MESSAGE);
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn local_path_media_is_never_read() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"server-side file").unwrap();

        let sink = Arc::new(MemorySink::new());
        let msg = InboundMessage {
            num_media: "1".into(),
            media_url: Some(tmp.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let reply = reply_for(&state(sink.clone()), &msg).await;
        assert_eq!(reply, NO_MEDIA_MESSAGE);
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn foreign_host_media_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .expect(0)
            .mount(&server)
            .await;

        let config = ExtractorConfig::builder()
            .media_credentials(MediaCredentials::new("AC1", "secret"))
            .build()
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let msg = InboundMessage {
            num_media: "1".into(),
            media_url: Some(format!("{}/steal", server.uri())),
            ..Default::default()
        };
        let reply = reply_for(&state_with(config, sink.clone()), &msg).await;
        assert!(reply.starts_with("❌"), "got {reply}");
        assert!(!reply.contains("127.0.0.1"), "got {reply}");
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn routes_respond() {
        let app = router(Arc::new(state(Arc::new(MemorySink::new()))));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let root = client.get(format!("http://{addr}/")).send().await.unwrap();
        assert_eq!(root.text().await.unwrap(), "Manifiestos Bot OK");

        let health = client.get(format!("http://{addr}/healthz")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let resp = client
            .post(format!("http://{addr}/whatsapp-webhook"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body("From=whatsapp%3A%2B5491100000000&NumMedia=0")
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("content-type").unwrap().to_str().unwrap(),
            "text/xml"
        );
        let body = resp.text().await.unwrap();
        assert!(body.starts_with("<Response><Message>No recibí ninguna foto"));
        assert!(body.contains("&quot;ver una vez&quot;"));
    }
}
