//! Configuration types for manifest extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractorConfig`], built via
//! its [`ExtractorConfigBuilder`]. The config is an immutable value handed to
//! [`crate::ManifestExtractor::new`]; no pipeline stage reads the process
//! environment on its own. [`ExtractorConfig::from_env`] exists for the
//! binary, which is the only place ambient state is consulted.
//!
//! Sink and server settings live in their own small structs
//! ([`SheetsConfig`], [`ServerConfig`]) because the core never needs them.

use crate::error::ManifestError;
use crate::pipeline::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use once_cell::sync::Lazy;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default OpenAI-compatible API base.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Host that serves Twilio inbound media.
pub const DEFAULT_MEDIA_HOST: &str = "api.twilio.com";

// `.env` is read at most once per process.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

/// Load `.env` (if present) into the process environment.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

/// Basic-auth credentials for the media host.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaCredentials {
    pub username: String,
    pub password: String,
}

impl MediaCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for MediaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the extraction pipeline.
///
/// # Example
/// ```rust
/// use manifiestos_bot::ExtractorConfig;
///
/// let config = ExtractorConfig::builder()
///     .api_key("sk-test")
///     .model("gpt-4o")
///     .max_attempts(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct ExtractorConfig {
    /// API key for the OpenAI-compatible endpoint.
    pub api_key: Option<String>,

    /// Optional `OpenAI-Organization` header value.
    pub organization: Option<String>,

    /// Base URL of the OpenAI-compatible API. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// Vision model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Provider name routed through `edgequake_llm::ProviderFactory`
    /// (e.g. "anthropic", "gemini"). When set, the direct OpenAI client is
    /// not used.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum tokens the model may generate. Default: 1024.
    ///
    /// The JSON object for 14 short fields rarely exceeds 400 tokens.
    pub max_tokens: usize,

    /// Total model attempts, including the first. Default: 4.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds; doubles after each
    /// attempt. Default: 1000 (1 s → 2 s → 4 s).
    pub retry_backoff_ms: u64,

    /// Custom extraction prompt. If None, uses
    /// [`crate::prompts::EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Width in pixels the enhanced image is resized to. Default: 1600.
    ///
    /// Phone photos of an A4 manifest are usually 3000–4000 px wide; 1600 px
    /// keeps handwriting legible while staying inside the model's high-detail
    /// tile budget. Smaller photos are upscaled.
    pub max_image_width: u32,

    /// Basic-auth credentials for the media host.
    pub media_credentials: Option<MediaCredentials>,

    /// Refuse to download media without credentials. Default: true.
    ///
    /// Twilio media URLs answer 401 without basic auth; failing early gives a
    /// clearer error than the remote status.
    pub media_auth_required: bool,

    /// Hosts that receive the media credentials. Default: `api.twilio.com`.
    ///
    /// A host matches itself and its subdomains. While
    /// `media_auth_required` is set, URLs on any other host are refused
    /// without a request.
    pub media_hosts: Vec<String>,

    /// Download timeout for the media URL in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Maximum length of the diagnostic part of a user-facing failure
    /// message. Default: 300.
    pub user_message_max_len: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            provider: None,
            max_tokens: 1024,
            max_attempts: 4,
            retry_backoff_ms: 1000,
            prompt: None,
            max_image_width: 1600,
            media_credentials: None,
            media_auth_required: true,
            media_hosts: vec![DEFAULT_MEDIA_HOST.to_string()],
            download_timeout_secs: 30,
            api_timeout_secs: 60,
            user_message_max_len: 300,
        }
    }
}

impl fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("organization", &self.organization)
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_image_width", &self.max_image_width)
            .field("media_credentials", &self.media_credentials)
            .field("media_auth_required", &self.media_auth_required)
            .field("media_hosts", &self.media_hosts)
            .finish()
    }
}

impl ExtractorConfig {
    /// Create a new builder for `ExtractorConfig`.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from the environment (after loading `.env`).
    ///
    /// Unset or unparsable numeric variables fall back to the defaults.
    pub fn from_env() -> Result<Self, ManifestError> {
        init_dotenv();
        let mut b = Self::builder();

        if let Some(key) = non_empty_var("OPENAI_API_KEY") {
            b = b.api_key(key);
        }
        if let Some(org) = non_empty_var("OPENAI_ORG_ID") {
            b = b.organization(org);
        }
        if let Some(url) = non_empty_var("OPENAI_BASE_URL") {
            b = b.api_base_url(url);
        }
        if let Some(model) = non_empty_var("OPENAI_MODEL") {
            b = b.model(model);
        }
        if let Some(provider) = non_empty_var("LLM_PROVIDER") {
            b = b.provider_name(provider);
        }
        if let (Some(user), Some(pass)) = (
            non_empty_var("TWILIO_SID"),
            non_empty_var("TWILIO_AUTH_TOKEN"),
        ) {
            b = b.media_credentials(MediaCredentials::new(user, pass));
        }
        if let Some(n) = parsed_var("MODEL_MAX_ATTEMPTS") {
            b = b.max_attempts(n);
        }
        if let Some(ms) = parsed_var("MODEL_RETRY_BACKOFF_MS") {
            b = b.retry_backoff_ms(ms);
        }
        if let Some(px) = parsed_var("IMAGE_MAX_WIDTH") {
            b = b.max_image_width(px);
        }
        if let Some(v) = parsed_var("MEDIA_AUTH_REQUIRED") {
            b = b.media_auth_required(v);
        }
        if let Some(hosts) = non_empty_var("MEDIA_HOSTS") {
            b = b.media_hosts(hosts.split(','));
        }

        b.build()
    }

    /// Whether `url` lives on one of [`media_hosts`](Self::media_hosts).
    pub fn is_media_host(&self, url: &reqwest::Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.media_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Retry policy for the model stage.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_backoff_ms))
    }
}

/// Builder for [`ExtractorConfig`].
#[derive(Debug)]
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.config.organization = Some(org.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(64);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_image_width(mut self, px: u32) -> Self {
        self.config.max_image_width = px.clamp(256, 4096);
        self
    }

    pub fn media_credentials(mut self, credentials: MediaCredentials) -> Self {
        self.config.media_credentials = Some(credentials);
        self
    }

    pub fn media_auth_required(mut self, v: bool) -> Self {
        self.config.media_auth_required = v;
        self
    }

    /// Replace the media host list. Entries are trimmed and lowercased;
    /// blank ones are dropped.
    pub fn media_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.media_hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn user_message_max_len(mut self, n: usize) -> Self {
        self.config.user_message_max_len = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractorConfig, ManifestError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ManifestError::InvalidConfig("Model id must not be empty".into()));
        }
        if !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://")) {
            return Err(ManifestError::InvalidConfig(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

/// Target spreadsheet for [`crate::sink::SheetsSink`].
#[derive(Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    /// A1-notation range rows are appended to. Default: `Manifiestos!A:N`.
    pub range: String,
    /// OAuth2 bearer token with the spreadsheets scope.
    pub access_token: String,
    /// Default: `https://sheets.googleapis.com`.
    pub api_base_url: String,
    /// Timeout for one append request in seconds. Default: 30.
    pub timeout_secs: u64,
}

impl SheetsConfig {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            range: "Manifiestos!A:N".to_string(),
            access_token: access_token.into(),
            api_base_url: "https://sheets.googleapis.com".to_string(),
            timeout_secs: 30,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    /// Read `SHEET_ID`, `GOOGLE_ACCESS_TOKEN` and optional `SHEET_RANGE`.
    pub fn from_env() -> Result<Self, ManifestError> {
        init_dotenv();
        let id = non_empty_var("SHEET_ID")
            .ok_or_else(|| ManifestError::InvalidConfig("SHEET_ID is not set".into()))?;
        let token = non_empty_var("GOOGLE_ACCESS_TOKEN").ok_or_else(|| {
            ManifestError::InvalidConfig("GOOGLE_ACCESS_TOKEN is not set".into())
        })?;
        let mut config = Self::new(id, token);
        if let Some(range) = non_empty_var("SHEET_RANGE") {
            config = config.with_range(range);
        }
        if let Some(secs) = parsed_var("SHEET_TIMEOUT_SECS") {
            config = config.with_timeout_secs(secs);
        }
        Ok(config)
    }
}

impl fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("range", &self.range)
            .field("access_token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Bind address for the webhook server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Read `HOST` and `PORT`, falling back to `0.0.0.0:3000`.
    pub fn from_env() -> Self {
        init_dotenv();
        let default = Self::default();
        Self {
            host: non_empty_var("HOST").unwrap_or(default.host),
            port: parsed_var("PORT").unwrap_or(default.port),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_var(name).and_then(|v| v.trim().parse().ok())
}
