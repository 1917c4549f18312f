//! Configuration for the Gemini provider

use serde::{Deserialize, Serialize};

/// Gemini API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Platform API key; tenant keys override per call
    pub api_key: String,
    /// API base URL
    pub api_base: String,
    /// HTTP-level timeout in milliseconds (the runner races its own)
    pub timeout_ms: u64,
}

impl GeminiConfig {
    /// Create a new Gemini config with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_ms: 180_000,
        }
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set the HTTP timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self::new("")
    }
}
