//! Pipeline orchestration: one photo in, one normalised record out.
//!
//! [`ManifestExtractor`] owns everything shared across invocations (the
//! immutable config, one pooled `reqwest::Client`, the model backend and the
//! decoder) and nothing mutable. Wrap it in an `Arc` and call
//! [`ManifestExtractor::extract`] concurrently for distinct documents.
//!
//! The orchestrator adds no retries of its own; the model stage already
//! retries transient failures, and re-running the whole pipeline is the
//! caller's decision.

use crate::config::ExtractorConfig;
use crate::error::{truncate_chars, ManifestError};
use crate::model::{build_backend, VisionModel};
use crate::pipeline::decode::{LenientJsonDecoder, ResponseDecoder};
use crate::pipeline::{acquire, encode, enhance, invoke, normalize};
use crate::prompts::EXTRACTION_PROMPT;
use crate::record::{MediaReference, NormalizedRecord};
use crate::sink::RecordSink;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Reply when an inbound message carries no photo. Sent by the caller; the
/// pipeline is never started for such messages.
pub const NO_MEDIA_MESSAGE: &str =
    "No recibí ninguna foto 📷. Mandala como *foto normal* (no \"ver una vez\").";

/// Reply when the model stayed rate-limited through every retry.
pub const RATE_LIMITED_MESSAGE: &str =
    "⏳ El servicio de lectura está saturado. Probá mandar la foto de nuevo en unos minutos.";

/// Runs the extraction pipeline.
pub struct ManifestExtractor {
    config: ExtractorConfig,
    client: reqwest::Client,
    model: Arc<dyn VisionModel>,
    decoder: Box<dyn ResponseDecoder>,
}

impl ManifestExtractor {
    /// Build an extractor with the backend selected by `config` and the
    /// lenient JSON decoder.
    pub fn new(config: ExtractorConfig) -> Result<Self, ManifestError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ManifestError::Internal(format!("HTTP client: {e}")))?;
        let model = build_backend(&config, client.clone())?;
        Ok(Self {
            config,
            client,
            model,
            decoder: Box::new(LenientJsonDecoder),
        })
    }

    /// Build an extractor around an explicit model backend.
    pub fn with_model(config: ExtractorConfig, model: Arc<dyn VisionModel>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            model,
            decoder: Box::new(LenientJsonDecoder),
        }
    }

    /// Replace the response decoder.
    pub fn with_decoder(mut self, decoder: Box<dyn ResponseDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Run acquire → enhance → invoke → decode → normalize for one photo.
    ///
    /// # Errors
    /// The first failing stage's error, unchanged. No partial record is
    /// ever produced.
    pub async fn extract(&self, media: &MediaReference) -> Result<NormalizedRecord, ManifestError> {
        let start = Instant::now();
        info!("Starting extraction: {}", media.url);

        // ── Step 1: Acquire ──────────────────────────────────────────────
        let raw = acquire::fetch(&self.client, media, &self.config).await?;
        debug!("Acquired {} bytes ({})", raw.len(), raw.content_type);

        // ── Step 2: Enhance ──────────────────────────────────────────────
        let enhanced = enhance::enhance(raw, self.config.max_image_width).await?;

        // ── Step 3: Encode + invoke ──────────────────────────────────────
        let image = encode::encode_image(enhanced);
        let prompt = self.config.prompt.as_deref().unwrap_or(EXTRACTION_PROMPT);
        let output = invoke::invoke(
            self.model.as_ref(),
            &image,
            prompt,
            &self.config.retry_policy(),
        )
        .await?;

        // ── Step 4: Decode ───────────────────────────────────────────────
        let fields = self.decoder.decode(&output)?;

        // ── Step 5: Normalize ────────────────────────────────────────────
        let record = normalize::normalize(fields);

        info!(
            "Extraction complete: manifiesto {:?} in {}ms",
            record.manifiesto_n,
            start.elapsed().as_millis()
        );
        Ok(record)
    }

    /// [`extract`](Self::extract), then append the record to `sink` exactly
    /// once.
    pub async fn process(
        &self,
        media: &MediaReference,
        sink: &dyn RecordSink,
    ) -> Result<NormalizedRecord, ManifestError> {
        let record = self.extract(media).await?;
        sink.append(&record.to_row()).await?;
        Ok(record)
    }

    /// User-facing reply for a failed invocation, bounded by
    /// [`ExtractorConfig::user_message_max_len`].
    pub fn failure_message(&self, err: &ManifestError) -> String {
        failure_message(err, self.config.user_message_max_len)
    }
}

/// How a failure is presented to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The model stayed rate-limited; the sender should retry later.
    RateLimited,
    /// Anything else; a short diagnostic is shown.
    Generic,
}

impl FailureKind {
    pub fn classify(err: &ManifestError) -> Self {
        if err.is_rate_limited() {
            FailureKind::RateLimited
        } else {
            FailureKind::Generic
        }
    }
}

/// Reply text for `err`. The diagnostic part of a generic failure is cut to
/// `max_len` characters.
pub fn failure_message(err: &ManifestError, max_len: usize) -> String {
    match FailureKind::classify(err) {
        FailureKind::RateLimited => RATE_LIMITED_MESSAGE.to_string(),
        FailureKind::Generic => format!(
            "❌ Error procesando el manifiesto: {}",
            truncate_chars(&user_diagnostic(err), max_len)
        ),
    }
}

/// Diagnostic shown to the sender. Acquisition errors carry media URLs
/// (with the account SID in the path) and host names, so they get a fixed
/// text instead.
fn user_diagnostic(err: &ManifestError) -> String {
    match err {
        ManifestError::Acquisition { .. } => "no se pudo obtener la foto".to_string(),
        ManifestError::Transport { .. } => "no se pudo descargar la foto".to_string(),
        ManifestError::DownloadTimeout { secs, .. } => {
            format!("la descarga de la foto tardó más de {secs}s")
        }
        other => other.to_string(),
    }
}

/// Confirmation reply for a stored record.
pub fn confirmation_message(record: &NormalizedRecord) -> String {
    let numero = if record.manifiesto_n.is_empty() {
        "(sin número)"
    } else {
        record.manifiesto_n.as_str()
    };
    let cantidad = match (record.cantidad.is_empty(), record.unidad.is_empty()) {
        (true, _) => "cantidad no legible".to_string(),
        (false, true) => record.cantidad.clone(),
        (false, false) => format!("{} {}", record.cantidad, record.unidad),
    };
    format!("✅ Manifiesto {numero} registrado: {cantidad}.")
}
