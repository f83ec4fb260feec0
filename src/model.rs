//! Vision model backends.
//!
//! The pipeline talks to a model only through [`VisionModel`]: one prompt,
//! one inline image, one text answer. Two backends exist:
//!
//! * [`OpenAiVisionClient`] calls an OpenAI-compatible `/chat/completions`
//!   endpoint directly. The HTTP status of a failure is preserved, which is
//!   what the retry predicate needs to tell a 429 from a 400.
//! * [`ProviderVisionModel`] wraps any `edgequake_llm::LLMProvider`
//!   (Anthropic, Gemini, Ollama, …). Provider errors arrive as text, so the
//!   status is recovered from the message by [`classify_provider_error`].
//!
//! [`build_backend`] picks one from an [`ExtractorConfig`], from most
//! specific to least specific: pre-built provider, named provider, then the
//! direct OpenAI client.

use crate::config::ExtractorConfig;
use crate::error::ManifestError;
use crate::pipeline::encode::{EncodedImage, IMAGE_DETAIL};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A model that reads an image and answers a text prompt.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Send `prompt` with `image` as a single user turn and return the raw
    /// text answer. Decoding is always at temperature 0.
    async fn complete(&self, prompt: &str, image: &EncodedImage) -> Result<String, ManifestError>;
}

/// Instantiate the backend described by `config`.
pub fn build_backend(
    config: &ExtractorConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn VisionModel>, ManifestError> {
    // 1) Caller-built provider
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderVisionModel::new(
            "custom",
            Arc::clone(provider),
            config.max_tokens,
        )));
    }

    // 2) Named provider through edgequake-llm
    if let Some(ref name) = config.provider_name {
        let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            ManifestError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        return Ok(Arc::new(ProviderVisionModel::new(
            name.clone(),
            provider,
            config.max_tokens,
        )));
    }

    // 3) Direct OpenAI-compatible endpoint
    Ok(Arc::new(OpenAiVisionClient::from_config(config, client)?))
}

// ── OpenAI-compatible client ─────────────────────────────────────────────

/// Direct client for an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    model: String,
    max_tokens: usize,
    timeout: Duration,
}

impl OpenAiVisionClient {
    pub fn from_config(
        config: &ExtractorConfig,
        client: reqwest::Client,
    ) -> Result<Self, ManifestError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ManifestError::ProviderNotConfigured {
                provider: "openai".to_string(),
                hint: "Set OPENAI_API_KEY or configure LLM_PROVIDER.".to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            api_key,
            organization: config.organization.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, image: &EncodedImage) -> Result<String, ManifestError> {
        let body = build_request_body(&self.model, prompt, image, self.max_tokens);

        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body);
        if let Some(ref org) = self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await.map_err(|e| ManifestError::ModelTransport {
            reason: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ManifestError::ModelTransport {
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ManifestError::model_api(Some(status.as_u16()), text));
        }

        parse_completion(&text).ok_or_else(|| {
            ManifestError::model_api(Some(status.as_u16()), format!("no message content in response: {text}"))
        })
    }
}

/// Build the chat-completions JSON body: one user turn, text + inline image.
pub fn build_request_body(
    model: &str,
    prompt: &str,
    image: &EncodedImage,
    max_tokens: usize,
) -> serde_json::Value {
    json!({
        "model": model,
        "temperature": 0,
        "max_tokens": max_tokens,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": image.data_url(), "detail": IMAGE_DETAIL }
                }
            ]
        }]
    })
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Extract `choices[0].message.content` from a completion response body.
pub fn parse_completion(body: &str) -> Option<String> {
    let parsed: CompletionResponse = serde_json::from_str(body).ok()?;
    parsed.choices.into_iter().next()?.message.content
}

// ── edgequake-llm adapter ────────────────────────────────────────────────

/// Adapter exposing an `edgequake_llm::LLMProvider` as a [`VisionModel`].
pub struct ProviderVisionModel {
    name: String,
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl ProviderVisionModel {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>, max_tokens: usize) -> Self {
        Self {
            name: name.into(),
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl VisionModel for ProviderVisionModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, image: &EncodedImage) -> Result<String, ManifestError> {
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![image.to_image_data()],
        )];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.name, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_provider_error(&e.to_string())),
        }
    }
}

static RE_HTTP_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

/// Map a provider error message onto [`ManifestError`], recovering the HTTP
/// status where the text allows it.
pub fn classify_provider_error(message: &str) -> ManifestError {
    let lower = message.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("ratelimit")
        || lower.contains("too many requests")
    {
        return ManifestError::model_api(Some(429), message);
    }
    if lower.contains("overloaded") || lower.contains("service unavailable") {
        return ManifestError::model_api(Some(503), message);
    }
    if let Some(caps) = RE_HTTP_STATUS.captures(message) {
        if let Ok(status) = caps[1].parse::<u16>() {
            return ManifestError::model_api(Some(status), message);
        }
    }
    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
    {
        return ManifestError::ModelTransport {
            reason: message.to_string(),
        };
    }
    ManifestError::model_api(None, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image() -> EncodedImage {
        EncodedImage {
            mime_type: "image/png".into(),
            base64: "iVBORw0KGgo=".into(),
        }
    }

    fn client_for(server: &MockServer, org: Option<&str>) -> OpenAiVisionClient {
        let mut b = ExtractorConfig::builder()
            .api_key("sk-test")
            .api_base_url(format!("{}/v1", server.uri()));
        if let Some(org) = org {
            b = b.organization(org);
        }
        OpenAiVisionClient::from_config(&b.build().unwrap(), reqwest::Client::new()).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn request_body_shape() {
        let body = build_request_body("gpt-4o-mini", "extraé", &image(), 1024);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "extraé");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
        assert_eq!(content[1]["image_url"]["detail"], "high");
    }

    #[test]
    fn parse_completion_variants() {
        assert_eq!(
            parse_completion(&completion("{}").to_string()).as_deref(),
            Some("{}")
        );
        assert_eq!(parse_completion(r#"{"choices":[]}"#), None);
        assert_eq!(parse_completion("not json"), None);
    }

    #[test]
    fn missing_api_key_is_not_configured() {
        let err = OpenAiVisionClient::from_config(&ExtractorConfig::default(), reqwest::Client::new())
            .err()
            .expect("should fail");
        assert!(matches!(err, ManifestError::ProviderNotConfigured { .. }));
    }

    #[tokio::test]
    async fn returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("OpenAI-Organization", "org-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"cantidad\":\"5\"}")))
            .expect(1)
            .mount(&server)
            .await;

        let out = client_for(&server, Some("org-42"))
            .complete("prompt", &image())
            .await
            .unwrap();
        assert_eq!(out, "{\"cantidad\":\"5\"}");
    }

    #[tokio::test]
    async fn error_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete("prompt", &image())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bad_request_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid image"))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete("prompt", &image())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalid image"));
    }

    #[test]
    fn classify_provider_errors() {
        assert_eq!(classify_provider_error("Rate limit exceeded").status(), Some(429));
        assert_eq!(classify_provider_error("API error: 503 Service Unavailable").status(), Some(503));
        assert_eq!(classify_provider_error("Anthropic overloaded").status(), Some(503));
        assert_eq!(classify_provider_error("HTTP 401 Unauthorized").status(), Some(401));
        assert!(matches!(
            classify_provider_error("request timed out"),
            ManifestError::ModelTransport { .. }
        ));
        let other = classify_provider_error("content filtered");
        assert_eq!(other.status(), None);
        assert!(!other.is_transient());
    }
}
