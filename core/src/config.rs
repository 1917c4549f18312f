//! Process configuration for litgraph
//!
//! All environment-driven knobs are gathered into one immutable [`Config`]
//! acquired at startup; nothing in the hot path reads environment variables.

use crate::errors::CoreError;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Immutable runtime configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Whether the reasoning stage runs at all
    pub reasoning_enabled: bool,
    /// Load the whole tenant graph for reasoning instead of a bounded subgraph
    pub reason_full_graph: bool,
    /// Re-ingest papers that already exist (global override of the idempotency gate)
    pub force_reingest: bool,
    /// Maximum pipeline jobs per tenant within the 60s rolling window
    pub rate_limit_max: u32,
    /// Redirect hops allowed during URL ingestion
    pub url_fetch_max_redirects: u32,
    /// Body size cap for URL ingestion, in bytes
    pub url_fetch_max_bytes: u64,
    /// Timeout for URL ingestion, in seconds
    pub url_fetch_timeout_secs: u64,
    /// Print validation confidence distributions
    pub validation_debug: bool,
    /// Concurrent LLM calls allowed through the gemini_llm semaphore
    pub llm_concurrency: usize,
    /// Retries per agent call after the first attempt
    pub llm_max_retries: u32,
    /// Hosted execution markup over provider price (0.10 = +10%)
    pub hosted_markup: f64,
    /// Model used for all agents unless a tenant overrides it
    pub default_model: String,
    /// Platform API key for hosted execution
    pub platform_api_key: Option<String>,
    /// Master secret used to unseal tenant API keys
    pub master_key: Option<String>,
    /// Tenants for which processing is disabled
    pub demo_tenants: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reasoning_enabled: true,
            reason_full_graph: false,
            force_reingest: false,
            rate_limit_max: 10,
            url_fetch_max_redirects: 3,
            url_fetch_max_bytes: 10 * 1024 * 1024,
            url_fetch_timeout_secs: 15,
            validation_debug: false,
            llm_concurrency: 4,
            llm_max_retries: 2,
            hosted_markup: 0.10,
            default_model: "gemini-2.0-flash".to_string(),
            platform_api_key: None,
            master_key: None,
            demo_tenants: vec!["demo".to_string(), "playground".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from defaults merged with `LITGRAPH_`-prefixed
    /// environment variables (e.g. `LITGRAPH_RATE_LIMIT_MAX=5`).
    pub fn from_env() -> Result<Self, CoreError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("LITGRAPH_"))
            .extract()
            .map_err(|e| CoreError::Configuration(format!("Failed to parse configuration: {}", e)))
    }

    /// True when the tenant is on the demo blocklist
    pub fn is_demo_tenant(&self, tenant: &str) -> bool {
        self.demo_tenants.iter().any(|t| t == tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit_max, 10);
        assert_eq!(config.url_fetch_max_redirects, 3);
        assert_eq!(config.url_fetch_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.url_fetch_timeout_secs, 15);
        assert!(config.reasoning_enabled);
        assert!(!config.reason_full_graph);
    }

    #[test]
    fn test_demo_tenant_check() {
        let config = Config::default();
        assert!(config.is_demo_tenant("demo"));
        assert!(!config.is_demo_tenant("acme"));
    }
}
