//! Job orchestration: admission, persistence, and asynchronous execution
//!
//! `submit` admits a job (demo blocklist, rate window, usage ceilings, URL
//! guards), persists the `pending` row, and returns its id before any work
//! starts. The job body runs on a background task that always lands the row
//! on `completed` or `failed`.

use crate::config::Config;
use crate::errors::{PipelineError, PipelineResult};
use crate::fetch::{ensure_public, kind_for_extension, validate_url, UrlFetcher};
use crate::pipeline::{PaperInput, PipelineDriver, PipelineOptions, PipelineRunResult};
use crate::traits::{DocumentParser, GraphStore, ProgressSink};
use crate::types::{
    JobProgress, JobResult, JobStatus, PipelineJob, StageMarker, TenantId,
};
use crate::usage::Limiter;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One admissible paper source
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Raw text with a caller-supplied paper id
    RawText {
        paper_id: String,
        title: Option<String>,
        text: String,
        metadata: Option<serde_json::Value>,
    },
    /// An uploaded file, dispatched by extension
    File { file_name: String, bytes: Vec<u8> },
    /// A remote document, fetched under SSRF guards
    Url { url: String },
}

/// What `submit` returns on admission
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Schedules and executes pipeline jobs.
///
/// Cheap to clone: every field is shared behind an Arc, and the background
/// job body runs on a clone of the whole orchestrator.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn GraphStore>,
    driver: Arc<PipelineDriver>,
    limiter: Arc<Limiter>,
    fetcher: Arc<UrlFetcher>,
    parser: Arc<dyn DocumentParser>,
    config: Arc<Config>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        driver: Arc<PipelineDriver>,
        limiter: Arc<Limiter>,
        fetcher: Arc<UrlFetcher>,
        parser: Arc<dyn DocumentParser>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            driver,
            limiter,
            fetcher,
            parser,
            config,
        }
    }

    /// Admit a job and start it in the background.
    ///
    /// Returns immediately after the `pending` row is written; failures after
    /// that point are only observable through [`JobOrchestrator::status`].
    pub async fn submit(&self, tenant: &TenantId, source: JobSource) -> PipelineResult<JobTicket> {
        if tenant.as_str().is_empty() {
            return Err(PipelineError::TenantRequired);
        }
        if self.config.is_demo_tenant(tenant.as_str()) {
            return Err(PipelineError::DemoBlocked);
        }

        self.limiter.check_rate(tenant).await?;
        let settings = self.store.get_tenant_settings(tenant).await?;
        let usage_warnings = self.limiter.check_usage(tenant, &settings).await?;
        for warning in &usage_warnings {
            warn!("Usage warning for tenant {}: {}", tenant, warning);
        }

        // Source-specific admission checks, before any row is written
        let paper_id_hint = match &source {
            JobSource::RawText { paper_id, text, .. } => {
                if paper_id.trim().is_empty() {
                    return Err(PipelineError::InvalidInput("paper_id is required".to_string()));
                }
                if text.trim().is_empty() {
                    return Err(PipelineError::InvalidInput("text is required".to_string()));
                }
                Some(paper_id.clone())
            }
            JobSource::File { file_name, bytes } => {
                if bytes.is_empty() {
                    return Err(PipelineError::InvalidInput("empty file".to_string()));
                }
                kind_for_extension(file_name)
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                None
            }
            JobSource::Url { url } => {
                let parsed =
                    validate_url(url).map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                ensure_public(&parsed)
                    .await
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                None
            }
        };

        let job_id = Uuid::new_v4();
        let job = PipelineJob::pending(job_id, paper_id_hint);
        self.store.create_pipeline_job(tenant, job).await?;
        info!("Admitted pipeline job {} for tenant {}", job_id, tenant);

        // Fire and forget: the job row is the only durable handoff
        let orchestrator = self.clone();
        let tenant = tenant.clone();
        tokio::spawn(async move {
            orchestrator.execute(tenant, job_id, source).await;
        });

        Ok(JobTicket {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// Latest persisted job state, verbatim
    pub async fn status(&self, tenant: &TenantId, job_id: Uuid) -> PipelineResult<PipelineJob> {
        self.store
            .get_pipeline_job(tenant, job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", job_id)))
    }

    /// Page through the tenant's jobs
    pub async fn list(
        &self,
        tenant: &TenantId,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> PipelineResult<Vec<PipelineJob>> {
        Ok(self.store.list_pipeline_jobs(tenant, page, limit, status).await?)
    }

    /// Mark `processing` jobs older than the cutoff as failed.
    ///
    /// Recovery boundary for process restarts: rows left in `processing` by a
    /// dead worker would otherwise never terminate.
    pub async fn reap_stale_jobs(
        &self,
        tenant: &TenantId,
        older_than: Duration,
    ) -> PipelineResult<u64> {
        let cutoff = Utc::now() - older_than;
        let stale = self
            .store
            .list_processing_jobs_older_than(tenant, cutoff)
            .await?;
        let mut reaped = 0u64;
        for mut job in stale {
            job.status = JobStatus::Failed;
            job.error = Some("stale processing job reaped after recovery boundary".to_string());
            job.updated_at = Utc::now();
            self.store.update_pipeline_job(tenant, job).await?;
            reaped += 1;
        }
        if reaped > 0 {
            info!("Reaped {} stale jobs for tenant {}", reaped, tenant);
        }
        Ok(reaped)
    }

    /// Background job body. Never returns an error: every outcome is written
    /// to the job row.
    async fn execute(&self, tenant: TenantId, job_id: Uuid, source: JobSource) {
        let outcome = self.execute_inner(&tenant, job_id, source).await;
        match outcome {
            Ok((paper_id, result)) => {
                self.finish_job(&tenant, job_id, Some(paper_id), Ok(result)).await;
            }
            Err(e) => {
                error!("Pipeline job {} failed for tenant {}: {}", job_id, tenant, e);
                self.finish_job(&tenant, job_id, None, Err(e)).await;
            }
        }
    }

    async fn execute_inner(
        &self,
        tenant: &TenantId,
        job_id: Uuid,
        source: JobSource,
    ) -> PipelineResult<(String, PipelineRunResult)> {
        let input = self.resolve_source(source).await?;
        let settings = self.store.get_tenant_settings(tenant).await?;
        let progress = JobProgressSink {
            store: Arc::clone(&self.store),
            tenant: tenant.clone(),
            job_id,
        };
        let options = PipelineOptions::default();
        let result = self
            .driver
            .run(tenant, &input, &settings, &options, Some(job_id), &progress)
            .await?;
        Ok((input.paper_id, result))
    }

    /// Turn a job source into pipeline input, fetching and parsing as needed
    async fn resolve_source(&self, source: JobSource) -> PipelineResult<PaperInput> {
        match source {
            JobSource::RawText {
                paper_id,
                title,
                text,
                metadata,
            } => Ok(PaperInput {
                paper_id,
                title,
                raw_text: text,
                metadata: metadata.unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            }),
            JobSource::File { file_name, bytes } => {
                let kind = kind_for_extension(&file_name)
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                let doc = self
                    .parser
                    .parse(kind, &bytes, None)
                    .await
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                let paper_id = doc
                    .paper_id
                    .unwrap_or_else(|| slugify(file_name.rsplit('/').next().unwrap_or(&file_name)));
                Ok(PaperInput {
                    paper_id,
                    title: doc.title,
                    raw_text: doc.text,
                    metadata: doc.metadata,
                })
            }
            JobSource::Url { url } => {
                let fetched = self
                    .fetcher
                    .fetch(&url)
                    .await
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                let doc = self
                    .parser
                    .parse(fetched.kind, &fetched.bytes, Some(&fetched.final_url))
                    .await
                    .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
                let paper_id = doc.paper_id.unwrap_or_else(|| slugify(&url));
                let mut metadata = doc.metadata;
                if let serde_json::Value::Object(ref mut map) = metadata {
                    map.insert(
                        "resolved_url".to_string(),
                        serde_json::Value::String(fetched.final_url.clone()),
                    );
                }
                Ok(PaperInput {
                    paper_id,
                    title: doc.title,
                    raw_text: doc.text,
                    metadata,
                })
            }
        }
    }

    async fn finish_job(
        &self,
        tenant: &TenantId,
        job_id: Uuid,
        paper_id: Option<String>,
        outcome: PipelineResult<PipelineRunResult>,
    ) {
        let existing = match self.store.get_pipeline_job(tenant, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!("Job {} vanished before terminal write", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to load job {} for terminal write: {}", job_id, e);
                return;
            }
        };

        let mut job = existing;
        if let Some(paper_id) = paper_id {
            job.paper_id = Some(paper_id);
        }
        job.updated_at = Utc::now();
        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.result = Some(JobResult {
                    progress: JobProgress {
                        stage: StageMarker::Completed.as_str().to_string(),
                    },
                    stats: Some(result.stats),
                    warnings: result.warnings,
                });
                job.error = None;
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        if let Err(e) = self.store.update_pipeline_job(tenant, job).await {
            error!("Failed to write terminal state for job {}: {}", job_id, e);
        }
    }
}

/// Progress sink that persists stage markers onto the job row
struct JobProgressSink {
    store: Arc<dyn GraphStore>,
    tenant: TenantId,
    job_id: Uuid,
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn on_stage(&self, stage: StageMarker) {
        let job = match self.store.get_pipeline_job(&self.tenant, self.job_id).await {
            Ok(Some(job)) => job,
            _ => return,
        };
        let mut job = job;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
        }
        let warnings = job.result.take().map(|r| r.warnings).unwrap_or_default();
        job.result = Some(JobResult {
            progress: JobProgress {
                stage: stage.as_str().to_string(),
            },
            stats: None,
            warnings,
        });
        job.updated_at = Utc::now();
        if let Err(e) = self.store.update_pipeline_job(&self.tenant, job).await {
            warn!("Progress write failed for job {}: {}", self.job_id, e);
        }
    }
}

/// Derive a filesystem- and id-safe slug from a file name or URL
fn slugify(raw: &str) -> String {
    let mut slug: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Paper (v2).pdf"), "my-paper-v2-.pdf");
        assert_eq!(slugify("https://example.com/abs/1234"), "https-example.com-abs-1234");
    }
}
