//! Gemini provider for litgraph structured LLM calls
//!
//! Implements [`StructuredLlm`] over the generateContent API, asking for JSON
//! output constrained by the supplied schema. Key selection is per call: an
//! `api_key_override` (decrypted tenant key) takes precedence over the
//! configured platform key.

use async_trait::async_trait;
use litgraph_core::errors::LlmError;
use litgraph_core::traits::{GenerateOptions, GenerationOutcome, StructuredLlm, TokenUsage};
use reqwest::Client;
use tracing::debug;

mod config;
mod models;

pub use config::GeminiConfig;
use models::*;

/// Gemini implementation of StructuredLlm
pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn request_url(&self, model: &str, api_key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base.trim_end_matches('/'),
            model,
            api_key
        )
    }
}

#[async_trait]
impl StructuredLlm for GeminiProvider {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerateOptions,
    ) -> Result<GenerationOutcome, LlmError> {
        let api_key = options
            .api_key_override
            .as_deref()
            .unwrap_or(&self.config.api_key);
        if api_key.is_empty() {
            return Err(LlmError::ConfigError("no API key configured".to_string()));
        }

        let request = ContentRequest {
            contents: vec![Content::new_user(prompt)],
            generation_config: Some(GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema.clone()),
            }),
        };

        let mut builder = self
            .client
            .post(self.request_url(model, api_key))
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let content_response: ContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParseError(format!("Failed to parse response: {}", e)))?;

        let finish_reason = content_response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());
        let text = content_response
            .candidates
            .iter()
            .flat_map(|c| &c.content.parts)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return Err(LlmError::ResponseParseError("No content in response".to_string()));
        }

        let usage = content_response
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        debug!(
            "Gemini call to {} returned {} chars ({:?})",
            model,
            text.len(),
            finish_reason
        );
        Ok(GenerationOutcome {
            text,
            usage,
            finish_reason,
        })
    }

    fn provider(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn success_body() -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "{\"entities\": []}"}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 30,
                "totalTokenCount": 150
            }
        })
    }

    async fn provider_for(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(GeminiConfig::new("platform-key").with_api_base(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_generate_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "platform-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let outcome = provider
            .generate(
                "gemini-2.0-flash",
                "extract entities",
                &json!({"type": "object"}),
                &GenerateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "{\"entities\": []}");
        assert_eq!(outcome.usage.input_tokens, 120);
        assert_eq!(outcome.usage.output_tokens, 30);
        assert_eq!(outcome.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_api_key_override_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("key", "tenant-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let options = GenerateOptions {
            api_key_override: Some("tenant-key".to_string()),
            ..Default::default()
        };
        let outcome = provider
            .generate("gemini-2.0-flash", "p", &json!({"type": "object"}), &options)
            .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_request_carries_response_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(move |request: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                let config = &body["generationConfig"];
                assert_eq!(config["responseMimeType"], "application/json");
                assert_eq!(config["responseSchema"]["type"], "object");
                ResponseTemplate::new(200).set_body_json(success_body())
            })
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        provider
            .generate(
                "gemini-2.0-flash",
                "p",
                &json!({"type": "object"}),
                &GenerateOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string("{\"error\": {\"status\": \"RESOURCE_EXHAUSTED\"}}"),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .generate(
                "gemini-2.0-flash",
                "p",
                &json!({"type": "object"}),
                &GenerateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiError(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let provider = GeminiProvider::new(GeminiConfig::default()).unwrap();
        let err = provider
            .generate(
                "gemini-2.0-flash",
                "p",
                &json!({"type": "object"}),
                &GenerateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigError(_)));
    }
}
