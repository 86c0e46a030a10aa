//! Tool dispatcher: the fixed set of operations behind every transport.
//!
//! Each operation validates its input, calls the upstream client or the
//! manifest cache, and returns a typed result or a [`ToolError`]. The MCP
//! handler and the CLI both go through [`Gateway`].

use async_trait::async_trait;
use poomconf::{PlayerConfig, PoomConfig};
use poomproto::{
    CreatePoomParams, JobListing, OpenRunPlayerParams, PipelineJob, PlayerPayload, PoomOverview,
    PoomStatus, PoomStatusParams, Quiz, QuizScore, RunCard, RunListing, RunReference, RunsResult,
    SegmentQuizParams, SubmitSegmentQuizParams, ToolEnvelope, ToolError,
};
use poomwatch::StatusPort;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::CacheStats;
use crate::manifest::ManifestCache;
use crate::player;
use crate::upstream::{UpstreamClient, UpstreamRequest, UpstreamSetupError};

/// Names accepted by [`Gateway::dispatch`].
pub const TOOL_NAMES: &[&str] = &[
    "list_runs",
    "list_pooms",
    "create_poom",
    "get_poom_status",
    "open_run_player",
    "get_segment_quiz",
    "submit_segment_quiz",
];

struct GatewayInner {
    upstream: Arc<UpstreamClient>,
    manifests: ManifestCache,
    refs: RunReference,
    default_run_id: Option<String>,
}

/// Service instance owning the upstream client and manifest cache.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(upstream: Arc<UpstreamClient>, manifests: ManifestCache, player: &PlayerConfig) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                upstream,
                manifests,
                refs: RunReference::new(player.reference_scheme.trim()),
                default_run_id: player.default_run().map(String::from),
            }),
        }
    }

    pub fn from_config(config: &PoomConfig) -> Result<Self, UpstreamSetupError> {
        let upstream = Arc::new(UpstreamClient::from_config(&config.upstream)?);
        let manifests = ManifestCache::new(upstream.clone(), config.cache.manifest_ttl());
        Ok(Self::new(upstream, manifests, &config.player))
    }

    pub fn upstream_bases(&self) -> Vec<String> {
        self.inner.upstream.bases().to_strings()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.manifests.stats()
    }

    pub fn manifest_ttl(&self) -> Duration {
        self.inner.manifests.ttl()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn list_runs(&self) -> Result<RunsResult, ToolError> {
        Ok(RunsResult {
            runs: self.run_cards().await?,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_pooms(&self) -> Result<PoomOverview, ToolError> {
        let (runs, listing) = tokio::try_join!(self.run_cards(), async {
            let value = self
                .inner
                .upstream
                .call(&UpstreamRequest::get(["pipeline", "jobs"]))
                .await?;
            decode::<JobListing>(value, "job list")
        })?;

        let jobs = listing
            .jobs
            .into_iter()
            .filter(|job| !job.is_terminal())
            .collect();
        Ok(PoomOverview { runs, jobs })
    }

    /// Start a walkthrough job. Not idempotent, so never retried here.
    #[tracing::instrument(skip(self, params), fields(source_url = %params.source_url))]
    pub async fn create_poom(&self, params: CreatePoomParams) -> Result<PipelineJob, ToolError> {
        let source_url = validate_source_url(&params.source_url)?;

        let mut body = serde_json::json!({ "source_url": source_url });
        if let Some(run_id) = params.run_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            body["run_id"] = Value::String(run_id.to_string());
            // The run is about to be rebuilt under this id.
            self.inner.manifests.invalidate(run_id);
        }

        let value = self
            .inner
            .upstream
            .call(&UpstreamRequest::post(["pipeline", "jobs"], body))
            .await?;
        let job = job_from_reply(value, "create_poom")?;

        info!(job.id = %job.job_id, status = %job.status, "pipeline job created");
        Ok(job)
    }

    #[tracing::instrument(skip(self, params), fields(job.id = %params.job_id))]
    pub async fn get_poom_status(&self, params: PoomStatusParams) -> Result<PoomStatus, ToolError> {
        let job_id = params.job_id.trim();
        if job_id.is_empty() {
            return Err(ToolError::invalid_argument("job_id must not be empty"));
        }

        let (job, runs) = tokio::try_join!(
            async {
                let value = self
                    .inner
                    .upstream
                    .call(&UpstreamRequest::get(["pipeline", "jobs", job_id]))
                    .await?;
                job_from_reply(value, "get_poom_status")
            },
            self.run_cards()
        )?;

        debug!(status = %job.status, "job status fetched");
        Ok(PoomStatus { job, runs })
    }

    #[tracing::instrument(skip(self))]
    pub async fn open_run_player(
        &self,
        params: OpenRunPlayerParams,
    ) -> Result<PlayerPayload, ToolError> {
        let run_id = match player::requested_run_id(&params, &self.inner.refs)? {
            Some(run_id) => run_id,
            None => match &self.inner.default_run_id {
                Some(run_id) => run_id.clone(),
                None => self
                    .run_cards()
                    .await?
                    .into_iter()
                    .next()
                    .map(|card| card.run_id)
                    .ok_or_else(|| ToolError::run_not_found("no runs available to open"))?,
            },
        };

        let manifest = self.inner.manifests.get(&run_id).await?;
        let payload = player::build_payload(&run_id, &manifest, &self.inner.refs)?;

        info!(run.id = %run_id, chapters = payload.chapters.len(), "player payload ready");
        Ok(payload)
    }

    #[tracing::instrument(skip(self, params), fields(run.id = %params.run_id, segment.id = %params.segment_id))]
    pub async fn get_segment_quiz(&self, params: SegmentQuizParams) -> Result<Quiz, ToolError> {
        let (run_id, segment_id) = quiz_target(&params.run_id, &params.segment_id)?;
        let value = self
            .inner
            .upstream
            .call(&UpstreamRequest::get(["quiz", run_id, segment_id]))
            .await?;

        let mut quiz: Quiz = decode(value, "quiz")?;
        if quiz.run_id.is_empty() {
            quiz.run_id = run_id.to_string();
        }
        if quiz.segment_id.is_empty() {
            quiz.segment_id = segment_id.to_string();
        }
        Ok(quiz)
    }

    #[tracing::instrument(skip(self, params), fields(run.id = %params.run_id, segment.id = %params.segment_id))]
    pub async fn submit_segment_quiz(
        &self,
        params: SubmitSegmentQuizParams,
    ) -> Result<QuizScore, ToolError> {
        let (run_id, segment_id) = quiz_target(&params.run_id, &params.segment_id)?;
        let body = serde_json::json!({ "answers": params.answers });
        let value = self
            .inner
            .upstream
            .call(&UpstreamRequest::post(
                ["quiz", run_id, segment_id, "score"],
                body,
            ))
            .await?;
        decode(value, "quiz score")
    }

    // ------------------------------------------------------------------
    // JSON boundary
    // ------------------------------------------------------------------

    /// Run a tool by name with raw JSON arguments. Always returns an envelope.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolEnvelope {
        debug!(tool = %name, "dispatching tool call");
        match name {
            "list_runs" => ToolEnvelope::from_result(self.list_runs().await),
            "list_pooms" => ToolEnvelope::from_result(self.list_pooms().await),
            "create_poom" => match parse_args::<CreatePoomParams>(args) {
                Ok(p) => ToolEnvelope::from_result(self.create_poom(p).await),
                Err(e) => ToolEnvelope::failure(e),
            },
            "get_poom_status" => match parse_args::<PoomStatusParams>(args) {
                Ok(p) => ToolEnvelope::from_result(self.get_poom_status(p).await),
                Err(e) => ToolEnvelope::failure(e),
            },
            "open_run_player" => match parse_args::<OpenRunPlayerParams>(args) {
                Ok(p) => ToolEnvelope::from_result(self.open_run_player(p).await),
                Err(e) => ToolEnvelope::failure(e),
            },
            "get_segment_quiz" => match parse_args::<SegmentQuizParams>(args) {
                Ok(p) => ToolEnvelope::from_result(self.get_segment_quiz(p).await),
                Err(e) => ToolEnvelope::failure(e),
            },
            "submit_segment_quiz" => match parse_args::<SubmitSegmentQuizParams>(args) {
                Ok(p) => ToolEnvelope::from_result(self.submit_segment_quiz(p).await),
                Err(e) => ToolEnvelope::failure(e),
            },
            other => ToolEnvelope::failure(ToolError::unknown_tool(other)),
        }
    }

    async fn run_cards(&self) -> Result<Vec<RunCard>, ToolError> {
        let value = self
            .inner
            .upstream
            .call(&UpstreamRequest::get(["runs"]))
            .await?;
        let listing: RunListing = decode(value, "run list")?;
        Ok(listing
            .runs
            .into_iter()
            .map(|info| RunCard::project(info, &self.inner.refs))
            .collect())
    }
}

/// The job watcher polls through the same tool the MCP host uses.
#[async_trait]
impl StatusPort for Gateway {
    async fn job_status(&self, job_id: &str) -> Result<PipelineJob, ToolError> {
        let status = self
            .get_poom_status(PoomStatusParams {
                job_id: job_id.to_string(),
            })
            .await?;
        Ok(status.job)
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| ToolError::invalid_argument(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ToolError> {
    serde_json::from_value(value)
        .map_err(|e| ToolError::upstream_format(format!("malformed {} from upstream: {}", what, e)))
}

/// Accept a bare job or `{"job": {...}}`; either way a job id is required.
fn job_from_reply(value: Value, operation: &str) -> Result<PipelineJob, ToolError> {
    let job_value = match value.get("job") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    };

    let job: PipelineJob = serde_json::from_value(job_value).map_err(|e| {
        ToolError::upstream_format(format!("{} reply has no usable job: {}", operation, e))
    })?;
    if job.job_id.trim().is_empty() {
        return Err(ToolError::upstream_format(format!(
            "{} reply has an empty job id",
            operation
        )));
    }
    Ok(job)
}

fn validate_source_url(raw: &str) -> Result<String, ToolError> {
    let trimmed = raw.trim();
    let url = reqwest::Url::parse(trimmed).map_err(|e| {
        ToolError::invalid_argument(format!("source_url {:?} is not a URL: {}", trimmed, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ToolError::invalid_argument(format!(
            "source_url must be an absolute http(s) URL, got {:?}",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

fn quiz_target<'a>(run_id: &'a str, segment_id: &'a str) -> Result<(&'a str, &'a str), ToolError> {
    let run_id = run_id.trim();
    let segment_id = segment_id.trim();
    if run_id.is_empty() || segment_id.is_empty() {
        return Err(ToolError::invalid_argument(
            "run_id and segment_id must not be empty",
        ));
    }
    Ok((run_id, segment_id))
}
