//! Agent runner: structured LLM calls with caching, retries, and metering
//!
//! Every agent invocation flows through [`AgentRunner::run`]: cache lookup,
//! concurrency gating, a timeout raced against the provider call, layered
//! parse-then-schema validation with error feedback on retry, the compression
//! ladder for the relationship extractor, usage metering, and a cache write
//! for clean first-mode results.

use crate::agents::{relationship_core, AgentSpec};
use crate::cache::{CachedCall, CallCache, CallCacheKey};
use crate::errors::{LlmError, PipelineError};
use crate::traits::{GenerateOptions, StructuredLlm, TokenUsage};
use crate::types::{ExecutionMode, TenantId, UsageEvent};
use crate::usage::{estimate_cost, UsageLedger};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the global LLM concurrency gate
pub const LLM_SEMAPHORE_NAME: &str = "gemini_llm";

/// Retry modes for structured output, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    Normal,
    Compact,
    Minimal,
}

impl RetryMode {
    fn as_str(&self) -> &'static str {
        match self {
            RetryMode::Normal => "normal",
            RetryMode::Compact => "compact",
            RetryMode::Minimal => "minimal",
        }
    }

    fn next(&self) -> RetryMode {
        match self {
            RetryMode::Normal => RetryMode::Compact,
            RetryMode::Compact | RetryMode::Minimal => RetryMode::Minimal,
        }
    }
}

/// Per-call context threaded from the pipeline driver
#[derive(Debug, Clone)]
pub struct RunContext {
    pub tenant: TenantId,
    pub job_id: Option<Uuid>,
    pub execution_mode: ExecutionMode,
    /// Decrypted tenant key for byo_key execution
    pub api_key: Option<String>,
    pub model: String,
}

/// Result of one agent run, with cache observability for job stats
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub value: T,
    pub cache_hit: bool,
}

/// Runs agents against a structured LLM provider
pub struct AgentRunner {
    llm: Arc<dyn StructuredLlm>,
    call_cache: Arc<dyn CallCache>,
    ledger: Arc<dyn UsageLedger>,
    /// Global gate bounding concurrent provider calls (gemini_llm)
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    hosted_markup: f64,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn StructuredLlm>,
        call_cache: Arc<dyn CallCache>,
        ledger: Arc<dyn UsageLedger>,
        llm_concurrency: usize,
        max_retries: u32,
        hosted_markup: f64,
    ) -> Self {
        Self {
            llm,
            call_cache,
            ledger,
            semaphore: Arc::new(Semaphore::new(llm_concurrency.max(1))),
            max_retries,
            hosted_markup,
        }
    }

    /// Execute one agent over the given input and deserialize its output.
    ///
    /// A cache hit returns without touching the provider or the ledger.
    pub async fn run<T: DeserializeOwned>(
        &self,
        spec: &AgentSpec,
        input: &Value,
        ctx: &RunContext,
    ) -> Result<RunOutcome<T>, PipelineError> {
        let cache_key = CallCacheKey::derive(
            spec.name,
            &ctx.model,
            self.llm.provider(),
            spec.prompt_version,
            spec.schema_version,
            input,
            &ctx.tenant,
        );

        if let Some(cached) = self.call_cache.get(&cache_key).await {
            debug!("Cache hit for agent {} (tenant {})", spec.name, ctx.tenant);
            let value = serde_json::from_value(cached.value).map_err(|e| {
                PipelineError::AgentExecution {
                    agent: spec.name.to_string(),
                    cause: format!("cached value no longer deserializes: {}", e),
                }
            })?;
            return Ok(RunOutcome {
                value,
                cache_hit: true,
            });
        }

        let normal_schema = (spec.schema)();
        let mut mode = RetryMode::Normal;
        let mut feedback: Vec<String> = Vec::new();
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let schema = match (spec.adaptive_compression, mode) {
                (true, RetryMode::Compact) => {
                    relationship_core::compact_schema(relationship_core::MAX_RELATIONSHIPS)
                }
                (true, RetryMode::Minimal) => {
                    relationship_core::compact_schema(relationship_core::MINIMAL_MODE_MAX_EDGES)
                }
                _ => normal_schema.clone(),
            };
            let prompt = self.build_prompt(spec, input, mode, &feedback)?;

            let started = Instant::now();
            let outcome = {
                let _permit = self.semaphore.acquire().await.map_err(|_| {
                    PipelineError::AgentExecution {
                        agent: spec.name.to_string(),
                        cause: format!("{} semaphore closed", LLM_SEMAPHORE_NAME),
                    }
                })?;
                let options = GenerateOptions {
                    max_output_tokens: Some(spec.max_output_tokens),
                    temperature: Some(0.1),
                    timeout: Some(spec.timeout),
                    api_key_override: ctx.api_key.clone(),
                };
                match tokio::time::timeout(
                    spec.timeout,
                    self.llm.generate(&ctx.model, &prompt, &schema, &options),
                )
                .await
                {
                    Err(_) => {
                        return Err(PipelineError::Timeout {
                            agent: spec.name.to_string(),
                            timeout_ms: spec.timeout.as_millis() as u64,
                        })
                    }
                    Ok(Err(LlmError::Timeout)) => {
                        return Err(PipelineError::Timeout {
                            agent: spec.name.to_string(),
                            timeout_ms: spec.timeout.as_millis() as u64,
                        })
                    }
                    Ok(Err(e)) => {
                        return Err(PipelineError::AgentExecution {
                            agent: spec.name.to_string(),
                            cause: e.to_string(),
                        })
                    }
                    Ok(Ok(outcome)) => outcome,
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match self.parse_and_validate(&outcome.text, &schema) {
                Ok(value) => {
                    let typed: T = serde_json::from_value(value.clone()).map_err(|e| {
                        PipelineError::SchemaValidation {
                            agent: spec.name.to_string(),
                            details: format!("deserialization: {}", e),
                            attempts: attempt + 1,
                        }
                    })?;

                    self.meter(spec, ctx, &outcome.usage, duration_ms, mode).await;

                    // Degraded-mode results are not representative of the
                    // normal schema, so only clean runs are cached.
                    if mode == RetryMode::Normal {
                        self.call_cache
                            .put(
                                cache_key,
                                CachedCall {
                                    value,
                                    prompt_version: spec.prompt_version.to_string(),
                                    schema_version: spec.schema_version.to_string(),
                                    duration_ms,
                                    finish_reason: outcome.finish_reason.clone(),
                                },
                            )
                            .await;
                    }

                    return Ok(RunOutcome {
                        value: typed,
                        cache_hit: false,
                    });
                }
                Err(parse_error) => {
                    warn!(
                        "Agent {} attempt {}/{} failed validation in {} mode: {}",
                        spec.name,
                        attempt + 1,
                        attempts,
                        mode.as_str(),
                        parse_error
                    );
                    last_error = parse_error.clone();
                    // The compression ladder reacts to truncated or
                    // unparseable output; schema-shape misses retry in place.
                    let truncated = is_truncated(&outcome.text);
                    let parse_failed = serde_json::from_str::<Value>(
                        strip_markdown_fences(&outcome.text),
                    )
                    .is_err();
                    if spec.adaptive_compression && (truncated || parse_failed) {
                        mode = mode.next();
                    }
                    feedback.push(parse_error);
                }
            }
        }

        Err(PipelineError::SchemaValidation {
            agent: spec.name.to_string(),
            details: last_error,
            attempts,
        })
    }

    fn build_prompt(
        &self,
        spec: &AgentSpec,
        input: &Value,
        mode: RetryMode,
        feedback: &[String],
    ) -> Result<String, PipelineError> {
        let input_text =
            serde_json::to_string(input).map_err(|e| PipelineError::AgentExecution {
                agent: spec.name.to_string(),
                cause: format!("input serialization: {}", e),
            })?;
        let mut prompt = format!("{}\n\nInput:\n{}", spec.system_prompt, input_text);

        match (spec.adaptive_compression, mode) {
            (true, RetryMode::Compact) => {
                prompt.push_str("\n\n");
                prompt.push_str(relationship_core::COMPACT_MODE_NUDGE);
            }
            (true, RetryMode::Minimal) => {
                prompt.push_str("\n\n");
                prompt.push_str(relationship_core::MINIMAL_MODE_NUDGE);
            }
            _ => {}
        }

        if !feedback.is_empty() {
            if !spec.adaptive_compression {
                prompt.push_str(
                    "\n\nYour previous response was invalid. Return valid JSON only, \
                     with no prose and no markdown fences.",
                );
            }
            for error in feedback {
                prompt.push_str("\nPrevious attempt error: ");
                prompt.push_str(error);
            }
        }

        Ok(prompt)
    }

    /// Strip fences, parse, and validate against the JSON Schema
    fn parse_and_validate(&self, text: &str, schema: &Value) -> Result<Value, String> {
        let cleaned = strip_markdown_fences(text);
        let value: Value = serde_json::from_str(cleaned)
            .map_err(|e| format!("json parse error: {}", e))?;

        let validator = jsonschema::validator_for(schema)
            .map_err(|e| format!("schema compilation error: {}", e))?;
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        if !errors.is_empty() {
            return Err(format!("schema validation: {}", errors.join("; ")));
        }
        Ok(value)
    }

    async fn meter(
        &self,
        spec: &AgentSpec,
        ctx: &RunContext,
        usage: &TokenUsage,
        duration_ms: u64,
        mode: RetryMode,
    ) {
        let provider = self.llm.provider().to_string();
        let cost = estimate_cost(
            &provider,
            &ctx.model,
            usage,
            ctx.execution_mode,
            self.hosted_markup,
        );
        let event = UsageEvent {
            tenant_id: ctx.tenant.clone(),
            user_id: None,
            pipeline_stage: spec.stage.as_str().to_string(),
            agent_name: Some(spec.name.to_string()),
            model: ctx.model.clone(),
            provider,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            estimated_cost_usd: cost,
            execution_mode: ctx.execution_mode,
            job_id: ctx.job_id,
            metadata: serde_json::json!({
                "duration_ms": duration_ms,
                "retry_mode": mode.as_str(),
            }),
            timestamp: Utc::now(),
        };
        // Metering must never fail the call that produced it
        if let Err(e) = self.ledger.record(event).await {
            warn!("Failed to record usage for agent {}: {}", spec.name, e);
        }
    }
}

/// True when the response looks cut off: the trailing character closes
/// neither an object nor an array.
pub fn is_truncated(text: &str) -> bool {
    match strip_markdown_fences(text).trim_end().chars().last() {
        Some('}') | Some(']') => false,
        _ => true,
    }
}

/// Remove markdown code fences models sometimes wrap JSON in
pub fn strip_markdown_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
