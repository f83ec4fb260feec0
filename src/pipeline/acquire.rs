//! Media acquisition: fetch the photographed manifest as raw bytes.
//!
//! ## Why basic auth?
//!
//! Messaging providers (Twilio in particular) serve inbound media from URLs
//! that require the account SID and auth token as HTTP basic-auth
//! credentials. The URL is therefore private, which is also why the image is
//! later sent to the model inline rather than by reference.
//!
//! Credentials only ever travel to the configured media hosts. While
//! credentials are required, a URL on any other host is refused before a
//! request is made.
//!
//! There is no retry here: a failed download ends the invocation and the
//! sender is asked to resend. Local files are read only for references built
//! with [`MediaReference::local`], which the CLI does and the webhook never
//! does.

use crate::config::ExtractorConfig;
use crate::error::ManifestError;
use crate::record::{MediaReference, MediaSource, RawImageBytes};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content type used when neither the response nor the reference says.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Fetch the media behind `media` as raw bytes.
///
/// Remote references must be HTTP(S) URLs and are downloaded with `client`.
/// Local-file references are read from disk.
pub async fn fetch(
    client: &reqwest::Client,
    media: &MediaReference,
    config: &ExtractorConfig,
) -> Result<RawImageBytes, ManifestError> {
    match media.source {
        MediaSource::Remote if is_url(&media.url) => download(client, media, config).await,
        MediaSource::Remote => Err(ManifestError::Acquisition {
            reason: "media reference is not an http(s) URL".into(),
        }),
        MediaSource::LocalFile => read_local(media).await,
    }
}

async fn download(
    client: &reqwest::Client,
    media: &MediaReference,
    config: &ExtractorConfig,
) -> Result<RawImageBytes, ManifestError> {
    let url = media.url.as_str();
    let parsed = reqwest::Url::parse(url).map_err(|e| ManifestError::Acquisition {
        reason: format!("invalid media URL: {e}"),
    })?;
    let host = parsed.host_str().unwrap_or_default();
    let trusted = config.is_media_host(&parsed);

    if config.media_auth_required {
        if !trusted {
            warn!("Refusing media from unconfigured host '{}'", host);
            return Err(ManifestError::Acquisition {
                reason: format!("'{host}' is not a configured media host"),
            });
        }
        if config.media_credentials.is_none() {
            return Err(ManifestError::Acquisition {
                reason: format!("media host '{host}' requires credentials but none are configured"),
            });
        }
    }

    info!("Downloading media from: {}", url);

    let mut request = client
        .get(parsed)
        .timeout(Duration::from_secs(config.download_timeout_secs));
    if let Some(creds) = config.media_credentials.as_ref().filter(|_| trusted) {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ManifestError::DownloadTimeout {
                url: url.to_string(),
                secs: config.download_timeout_secs,
            }
        } else {
            ManifestError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ManifestError::Transport {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| media.content_type_hint.clone())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

    let bytes = response.bytes().await.map_err(|e| ManifestError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if bytes.is_empty() {
        return Err(ManifestError::Transport {
            url: url.to_string(),
            reason: "empty response body".into(),
        });
    }

    debug!("Downloaded {} bytes ({})", bytes.len(), content_type);
    Ok(RawImageBytes::new(bytes.to_vec(), content_type))
}

async fn read_local(media: &MediaReference) -> Result<RawImageBytes, ManifestError> {
    let path = PathBuf::from(&media.url);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ManifestError::Acquisition {
            reason: format!("cannot read '{}': {}", path.display(), e),
        })?;

    if bytes.is_empty() {
        return Err(ManifestError::Acquisition {
            reason: format!("'{}' is empty", path.display()),
        });
    }

    let content_type = media
        .content_type_hint
        .clone()
        .unwrap_or_else(|| guess_content_type(&path).to_string());

    debug!("Read local media: {} ({} bytes)", path.display(), bytes.len());
    Ok(RawImageBytes::new(bytes, content_type))
}

fn guess_content_type(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => FALLBACK_CONTENT_TYPE,
    }
}
