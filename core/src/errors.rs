//! Error types for litgraph core operations

use thiserror::Error;

/// Main error type for litgraph core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Graph storage error: {0}")]
    Storage(#[from] GraphError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the paper-processing pipeline and its orchestrator.
///
/// Each variant carries the payload a caller needs to act on it; admission
/// rejections additionally expose a stable machine code via [`PipelineError::code`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Agent {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("Agent {agent} output failed schema validation after {attempts} attempts: {details}")]
    SchemaValidation {
        agent: String,
        details: String,
        attempts: u32,
    },

    #[error("Agent {agent} execution failed: {cause}")]
    AgentExecution { agent: String, cause: String },

    #[error("Pipeline job rate limit exceeded for tenant")]
    RateLimited,

    #[error("Usage limit exceeded: {0}")]
    UsageLimitExceeded(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tenant context required")]
    TenantRequired,

    #[error("Processing is disabled for demo accounts")]
    DemoBlocked,

    #[error("Graph storage error: {0}")]
    Storage(#[from] GraphError),
}

impl PipelineError {
    /// Stable machine code surfaced to callers alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Timeout { .. } => "AGENT_TIMEOUT",
            PipelineError::SchemaValidation { .. } => "SCHEMA_VALIDATION",
            PipelineError::AgentExecution { .. } => "AGENT_EXECUTION",
            PipelineError::RateLimited => "RATE_LIMIT",
            PipelineError::UsageLimitExceeded(_) => "USAGE_LIMIT",
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::TenantRequired => "TENANT_REQUIRED",
            PipelineError::DemoBlocked => "DEMO_BLOCKED",
            PipelineError::Storage(_) => "STORAGE",
        }
    }
}

/// Errors related to graph storage operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Tenant isolation violation: {0}")]
    TenantIsolationViolation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Errors related to LLM provider calls
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error from LLM provider: {0}")]
    ApiError(String),

    #[error("Timeout during LLM call")]
    Timeout,

    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    #[error("Embedding computation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Internal provider error: {0}")]
    InternalError(String),
}

/// Errors related to URL ingestion
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Host resolves to a private or disallowed address: {0}")]
    PrivateAddress(String),

    #[error("Hostname resolution failed for {0}")]
    ResolutionFailed(String),

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(u32),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("Fetch timed out after {0}s")]
    Timeout(u64),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Document parsing failed: {0}")]
    ParseFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl FetchError {
    /// Stable machine code for HTTP-facing callers
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::UnsupportedContentType(_) => "UNSUPPORTED_CONTENT_TYPE",
            FetchError::PrivateAddress(_) | FetchError::ResolutionFailed(_) => "PRIVATE_ADDRESS",
            FetchError::UnsupportedScheme(_) | FetchError::InvalidUrl(_) => "INVALID_URL",
            FetchError::TooManyRedirects(_) => "TOO_MANY_REDIRECTS",
            FetchError::BodyTooLarge(_) => "BODY_TOO_LARGE",
            FetchError::Timeout(_) => "FETCH_TIMEOUT",
            FetchError::ParseFailed(_) => "PARSE_FAILED",
            FetchError::NetworkError(_) => "NETWORK",
        }
    }
}

/// Errors from API key sealing and unsealing
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid sealed blob: {0}")]
    InvalidBlob(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_codes() {
        assert_eq!(PipelineError::RateLimited.code(), "RATE_LIMIT");
        assert_eq!(
            PipelineError::UsageLimitExceeded("monthly cost".into()).code(),
            "USAGE_LIMIT"
        );
        assert_eq!(PipelineError::DemoBlocked.code(), "DEMO_BLOCKED");
    }

    #[test]
    fn test_fetch_error_codes() {
        assert_eq!(
            FetchError::UnsupportedContentType("image/png".into()).code(),
            "UNSUPPORTED_CONTENT_TYPE"
        );
        assert_eq!(FetchError::BodyTooLarge(10).code(), "BODY_TOO_LARGE");
    }

    #[test]
    fn test_timeout_display() {
        let err = PipelineError::Timeout {
            agent: "reasoning".into(),
            timeout_ms: 120_000,
        };
        assert!(err.to_string().contains("reasoning"));
        assert!(err.to_string().contains("120000"));
    }
}
