//! # manifiestos-bot
//!
//! Read waste-transport manifests from phone photos with a Vision Language
//! Model and append the result to a spreadsheet.
//!
//! ## Why this crate?
//!
//! Drivers photograph paper manifests and send them over WhatsApp. Classic
//! OCR struggles with skewed, glare-heavy pictures of half-handwritten forms
//! and gives back a bag of words rather than fields. Here each photo is
//! cleaned up, handed to a VLM that answers with a fixed 14-key JSON object,
//! and the answer is normalised by deterministic rules so the sheet stays
//! consistent no matter how the model phrased a unit or a date.
//!
//! ## Pipeline Overview
//!
//! ```text
//! MediaReference
//!  │
//!  ├─ 1. Acquire    download with basic auth (or read a local file)
//!  ├─ 2. Enhance    EXIF orientation, grayscale, levels, sharpen, resize (spawn_blocking)
//!  ├─ 3. Invoke     base64 PNG → VLM at temperature 0, exponential-backoff retry
//!  ├─ 4. Decode     direct JSON parse, else first balanced {…} in the text
//!  ├─ 5. Normalize  whitespace, waste class, quantity, unit, dates
//!  └─ 6. Sink       one 14-column row appended to Google Sheets
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use manifiestos_bot::{ExtractorConfig, ManifestExtractor, MediaReference};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // OPENAI_API_KEY, TWILIO_SID and TWILIO_AUTH_TOKEN from the environment / .env
//!     let config = ExtractorConfig::from_env()?;
//!     let extractor = ManifestExtractor::new(config)?;
//!     let record = extractor
//!         .extract(&MediaReference::new("https://api.twilio.com/.../Media/ME123"))
//!         .await?;
//!     println!("{} {} {}", record.manifiesto_n, record.cantidad, record.unidad);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `manifiestos` binary (clap + anyhow + tracing-subscriber) |
//! | `server` | on      | Enables the WhatsApp webhook ([`webhook`], axum + tower-http) |
//!
//! Disable both when embedding only the pipeline:
//! ```toml
//! manifiestos-bot = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod sink;
#[cfg(feature = "server")]
pub mod webhook;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractorConfig, ExtractorConfigBuilder, MediaCredentials, ServerConfig, SheetsConfig};
pub use error::ManifestError;
pub use extract::{confirmation_message, failure_message, FailureKind, ManifestExtractor, NO_MEDIA_MESSAGE};
pub use model::VisionModel;
pub use record::{ManifestFieldSet, MediaReference, MediaSource, NormalizedRecord, RawImageBytes};
pub use sink::{MemorySink, RecordSink, SheetsSink};
