//! # litgraph core
//!
//! Core types, traits, and the paper-processing pipeline for the litgraph
//! knowledge graph system: LLM-driven extraction stages reconciled by
//! deterministic validation before any graph mutation, under per-tenant
//! rate and usage limits.

pub mod agents;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod fetch;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod runner;
pub mod subgraph;
pub mod tenant;
pub mod traits;
pub mod types;
pub mod usage;
pub mod validation;

// Re-export commonly used types and traits
pub use config::Config;
pub use errors::{CoreError, GraphError, LlmError, PipelineError};
pub use tenant::TenantSettings;
pub use traits::{AliasResolver, EmbeddingProvider, GraphStore, StructuredLlm};
pub use types::{GraphEdge, GraphNode, Paper, PipelineJob, TenantId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CallCache, DerivedCache};
    pub use crate::errors::*;
    pub use crate::tenant::TenantSettings;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use crate::usage::UsageLedger;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
