//! Usage metering and admission limits
//!
//! Every LLM call appends one [`UsageEvent`] to the ledger; the limiter
//! queries the ledger and the job table to gate new work.

use crate::errors::{GraphError, PipelineError};
use crate::tenant::TenantSettings;
use crate::traits::{GraphStore, TokenUsage};
use crate::types::{ExecutionMode, TenantId, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Append-only per-tenant ledger of LLM calls
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record(&self, event: UsageEvent) -> Result<(), GraphError>;

    /// Aggregate events recorded at or after `since`
    async fn stats_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<UsageStats, GraphError>;
}

/// Aggregated usage over a window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub total_calls: u64,
    pub cost_by_stage: HashMap<String, f64>,
    pub tokens_by_model: HashMap<String, u64>,
}

impl UsageStats {
    /// Fold one event into the aggregate
    pub fn absorb(&mut self, event: &UsageEvent) {
        self.total_cost_usd += event.estimated_cost_usd;
        self.total_tokens += event.total_tokens();
        self.total_calls += 1;
        *self
            .cost_by_stage
            .entry(event.pipeline_stage.clone())
            .or_insert(0.0) += event.estimated_cost_usd;
        *self
            .tokens_by_model
            .entry(event.model.clone())
            .or_insert(0) += event.total_tokens();
    }
}

/// Per-1k-token prices for one model
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Static price table per (provider, model) with a default fallback
pub fn pricing_for(provider: &str, model: &str) -> ModelPricing {
    match (provider, model) {
        ("gemini", "gemini-2.0-flash") => ModelPricing {
            input_per_1k: 0.000_10,
            output_per_1k: 0.000_40,
        },
        ("gemini", "gemini-1.5-pro") => ModelPricing {
            input_per_1k: 0.001_25,
            output_per_1k: 0.005_00,
        },
        ("gemini", "gemini-1.5-flash") => ModelPricing {
            input_per_1k: 0.000_075,
            output_per_1k: 0.000_30,
        },
        _ => ModelPricing {
            input_per_1k: 0.001_25,
            output_per_1k: 0.003_75,
        },
    }
}

/// Estimate the billed cost of one call.
///
/// Hosted execution applies the platform markup on top of the provider
/// price; BYO records the unmarked provider cost.
pub fn estimate_cost(
    provider: &str,
    model: &str,
    usage: &TokenUsage,
    mode: ExecutionMode,
    hosted_markup: f64,
) -> f64 {
    let pricing = pricing_for(provider, model);
    let provider_cost = (usage.input_tokens as f64 / 1000.0) * pricing.input_per_1k
        + (usage.output_tokens as f64 / 1000.0) * pricing.output_per_1k;
    match mode {
        ExecutionMode::Hosted => provider_cost * (1.0 + hosted_markup),
        ExecutionMode::ByoKey => provider_cost,
    }
}

/// Where a tenant stands against one ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitState {
    /// Below 80% of the ceiling
    Ok,
    /// At or above 80%
    Warning,
    /// At or above 100%; blocks admission
    Exceeded,
}

/// Classify current consumption against a ceiling
pub fn limit_state(current: f64, limit: f64) -> LimitState {
    if limit <= 0.0 {
        return LimitState::Exceeded;
    }
    let ratio = current / limit;
    if ratio >= 1.0 {
        LimitState::Exceeded
    } else if ratio >= 0.8 {
        LimitState::Warning
    } else {
        LimitState::Ok
    }
}

/// Start of the current UTC day
pub fn day_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Start of the current UTC month
pub fn month_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Enforces per-tenant admission limits: the 60s job-rate window and the
/// daily/monthly cost and token ceilings.
pub struct Limiter {
    store: Arc<dyn GraphStore>,
    ledger: Arc<dyn UsageLedger>,
    rate_limit_max: u32,
}

impl Limiter {
    pub fn new(store: Arc<dyn GraphStore>, ledger: Arc<dyn UsageLedger>, rate_limit_max: u32) -> Self {
        Self {
            store,
            ledger,
            rate_limit_max,
        }
    }

    /// Reject when the tenant created too many jobs in the last 60 seconds
    pub async fn check_rate(&self, tenant: &TenantId) -> Result<(), PipelineError> {
        let since = Utc::now() - Duration::seconds(60);
        let recent = self.store.count_pipeline_jobs_since(tenant, since).await?;
        if recent >= self.rate_limit_max as u64 {
            warn!(
                "Rate limit hit for tenant {}: {} jobs in the last 60s",
                tenant, recent
            );
            return Err(PipelineError::RateLimited);
        }
        Ok(())
    }

    /// Check daily and monthly cost/token ceilings.
    ///
    /// Exceeded ceilings reject; warning-level ceilings are returned as
    /// messages for the caller to surface.
    pub async fn check_usage(
        &self,
        tenant: &TenantId,
        settings: &TenantSettings,
    ) -> Result<Vec<String>, PipelineError> {
        let now = Utc::now();
        let mut warnings = Vec::new();

        let periods = [
            ("daily", day_window_start(now), settings.daily_cost_limit, settings.daily_token_limit),
            (
                "monthly",
                month_window_start(now),
                settings.monthly_cost_limit,
                settings.monthly_token_limit,
            ),
        ];

        for (period, since, cost_limit, token_limit) in periods {
            if cost_limit.is_none() && token_limit.is_none() {
                continue;
            }
            let stats = self.ledger.stats_since(tenant, since).await?;

            if let Some(limit) = cost_limit {
                match limit_state(stats.total_cost_usd, limit) {
                    LimitState::Exceeded => {
                        return Err(PipelineError::UsageLimitExceeded(format!(
                            "{} cost limit reached: ${:.4} of ${:.4}",
                            period, stats.total_cost_usd, limit
                        )));
                    }
                    LimitState::Warning => warnings.push(format!(
                        "{} cost at {:.0}% of limit",
                        period,
                        stats.total_cost_usd / limit * 100.0
                    )),
                    LimitState::Ok => {}
                }
            }

            if let Some(limit) = token_limit {
                match limit_state(stats.total_tokens as f64, limit as f64) {
                    LimitState::Exceeded => {
                        return Err(PipelineError::UsageLimitExceeded(format!(
                            "{} token limit reached: {} of {}",
                            period, stats.total_tokens, limit
                        )));
                    }
                    LimitState::Warning => warnings.push(format!(
                        "{} tokens at {:.0}% of limit",
                        period,
                        stats.total_tokens as f64 / limit as f64 * 100.0
                    )),
                    LimitState::Ok => {}
                }
            }
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_state_boundaries() {
        assert_eq!(limit_state(0.79, 1.0), LimitState::Ok);
        assert_eq!(limit_state(0.80, 1.0), LimitState::Warning);
        assert_eq!(limit_state(0.99, 1.0), LimitState::Warning);
        assert_eq!(limit_state(1.0, 1.0), LimitState::Exceeded);
        assert_eq!(limit_state(1.5, 1.0), LimitState::Exceeded);
    }

    #[test]
    fn test_zero_limit_is_exceeded() {
        assert_eq!(limit_state(0.0, 0.0), LimitState::Exceeded);
    }

    #[test]
    fn test_hosted_markup_applied() {
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 1000,
        };
        let byo = estimate_cost("gemini", "gemini-2.0-flash", &usage, ExecutionMode::ByoKey, 0.10);
        let hosted = estimate_cost("gemini", "gemini-2.0-flash", &usage, ExecutionMode::Hosted, 0.10);
        assert!((byo - 0.0005).abs() < 1e-9);
        assert!((hosted - byo * 1.10).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_default_pricing() {
        let p = pricing_for("openai", "gpt-x");
        assert!((p.input_per_1k - 0.00125).abs() < 1e-9);
    }

    #[test]
    fn test_stats_absorb() {
        let mut stats = UsageStats::default();
        let event = UsageEvent {
            tenant_id: TenantId::new("t1"),
            user_id: None,
            pipeline_stage: "entity_extraction".to_string(),
            agent_name: Some("entity_extraction".to_string()),
            model: "gemini-2.0-flash".to_string(),
            provider: "gemini".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            estimated_cost_usd: 0.01,
            execution_mode: ExecutionMode::Hosted,
            job_id: None,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        };
        stats.absorb(&event);
        stats.absorb(&event);
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_tokens, 300);
        assert!((stats.cost_by_stage["entity_extraction"] - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_window_starts() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 0).unwrap();
        assert_eq!(
            day_window_start(now),
            Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            month_window_start(now),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
        );
    }
}
