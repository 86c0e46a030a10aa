//! Typed HTTP client for the pipeline API.
//!
//! Every call walks an ordered list of candidate bases. Per base, a 502/503
//! is retried once; transport failures and retryable errors then fail over
//! to the next base. Non-retryable errors surface immediately.

use poomconf::UpstreamConfig;
use poomproto::ToolError;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Correlation id header sent with every attempt.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Extra tries on the same base for 502/503 before failover is considered.
const SAME_BASE_RETRIES: u32 = 1;

/// Errors building the client from configuration.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamSetupError {
    #[error("no upstream base URLs configured")]
    NoBases,

    #[error("invalid upstream base {base}: {message}")]
    InvalidBase { base: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Ordered, deduplicated candidate origins. Never empty.
#[derive(Debug, Clone)]
pub struct UpstreamBases {
    bases: Vec<Url>,
}

impl UpstreamBases {
    /// Parse and dedupe. URLs compare in their parsed form (host lowercased,
    /// default port dropped, trailing slash trimmed) and the first occurrence
    /// keeps its position.
    pub fn new<I, S>(bases: I) -> Result<Self, UpstreamSetupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut parsed = Vec::new();

        for base in bases {
            let raw = base.as_ref().trim();
            if raw.is_empty() {
                continue;
            }

            let url = Url::parse(raw).map_err(|e| UpstreamSetupError::InvalidBase {
                base: raw.to_string(),
                message: e.to_string(),
            })?;
            if url.cannot_be_a_base() {
                return Err(UpstreamSetupError::InvalidBase {
                    base: raw.to_string(),
                    message: "not a hierarchical URL".to_string(),
                });
            }

            let key = url.as_str().trim_end_matches('/').to_string();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            parsed.push(url);
        }

        if parsed.is_empty() {
            return Err(UpstreamSetupError::NoBases);
        }
        Ok(Self { bases: parsed })
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.bases.iter()
    }

    /// Bases as display strings, in failover order.
    pub fn to_strings(&self) -> Vec<String> {
        self.bases
            .iter()
            .map(|u| u.as_str().trim_end_matches('/').to_string())
            .collect()
    }
}

/// One logical upstream call. Path segments are percent-encoded individually
/// when the URL is built, so ids may contain any character.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    method: Method,
    segments: Vec<String>,
    body: Option<Value>,
}

impl UpstreamRequest {
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::GET,
            segments: segments.into_iter().map(Into::into).collect(),
            body: None,
        }
    }

    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::POST,
            segments: segments.into_iter().map(Into::into).collect(),
            body: Some(body),
        }
    }

    /// `GET /runs/r1/manifest`, for logs and error messages.
    pub fn describe(&self) -> String {
        format!("{} /{}", self.method, self.segments.join("/"))
    }
}

/// Outcome of one attempt against one base.
enum AttemptFailure {
    /// Connect error, timeout, or broken body. Always fails over.
    Transport(ToolError),
    /// Non-2xx response, already classified.
    Status { status: StatusCode, error: ToolError },
}

#[derive(Deserialize)]
struct EmbeddedError {
    error: ToolError,
}

/// HTTP client over [`UpstreamBases`] with per-attempt timeout.
pub struct UpstreamClient {
    http: reqwest::Client,
    bases: UpstreamBases,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(bases: UpstreamBases, timeout: Duration) -> Result<Self, UpstreamSetupError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            bases,
            timeout,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamSetupError> {
        let bases = UpstreamBases::new(&config.bases)?;
        Self::new(bases, config.timeout())
    }

    pub fn bases(&self) -> &UpstreamBases {
        &self.bases
    }

    /// Perform a call with retry and failover. 2xx bodies that are empty or
    /// not JSON come back as `{}`.
    pub async fn call(&self, request: &UpstreamRequest) -> Result<Value, ToolError> {
        let mut last_error = None;

        for (index, base) in self.bases.iter().enumerate() {
            let mut attempt = 0;
            loop {
                match self.attempt(base, request, index, attempt).await {
                    Ok(value) => return Ok(value),
                    Err(AttemptFailure::Status { status, .. })
                        if is_gateway_hiccup(status) && attempt < SAME_BASE_RETRIES =>
                    {
                        debug!(
                            upstream.base = %base,
                            attempt,
                            status = status.as_u16(),
                            "retrying same upstream base"
                        );
                        attempt += 1;
                    }
                    Err(AttemptFailure::Transport(error)) => {
                        last_error = Some(error);
                        break;
                    }
                    Err(AttemptFailure::Status { error, .. }) => {
                        if !error.retryable {
                            return Err(error);
                        }
                        last_error = Some(error);
                        break;
                    }
                }
            }

            if index + 1 < self.bases.len() {
                warn!(
                    upstream.base = %base,
                    upstream.index = index,
                    request = %request.describe(),
                    "failing over to next upstream base"
                );
            }
        }

        Err(last_error
            .unwrap_or_else(|| ToolError::internal("no upstream bases to try")))
    }

    async fn attempt(
        &self,
        base: &Url,
        request: &UpstreamRequest,
        index: usize,
        attempt: u32,
    ) -> Result<Value, AttemptFailure> {
        let url = build_url(base, &request.segments).map_err(AttemptFailure::Transport)?;
        let request_id = Uuid::new_v4().to_string();

        debug!(
            upstream.base = %base,
            upstream.index = index,
            attempt,
            request_id = %request_id,
            request = %request.describe(),
            "upstream attempt"
        );

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(REQUEST_ID_HEADER, &request_id)
            .timeout(self.timeout);

        if let Some(tp) = current_traceparent() {
            builder = builder.header("traceparent", tp);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptFailure::Transport(classify_transport(&e, request, base)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::Transport(classify_transport(&e, request, base)))?;

        if status.is_success() {
            return Ok(parse_body(&body));
        }

        let error = classify_status(status, &body, request);
        warn!(
            upstream.base = %base,
            attempt,
            request_id = %request_id,
            status = status.as_u16(),
            code = %error.code,
            "upstream returned error status"
        );
        Err(AttemptFailure::Status { status, error })
    }
}

fn is_gateway_hiccup(status: StatusCode) -> bool {
    status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE
}

fn build_url(base: &Url, segments: &[String]) -> Result<Url, ToolError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ToolError::internal(format!("cannot append path to {}", base)))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn classify_transport(error: &reqwest::Error, request: &UpstreamRequest, base: &Url) -> ToolError {
    let what = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "could not connect"
    } else {
        "failed"
    };
    ToolError::upstream_timeout(
        format!("{} {} via {}: {}", request.describe(), what, base, error),
        true,
    )
}

fn classify_status(status: StatusCode, body: &[u8], request: &UpstreamRequest) -> ToolError {
    if let Ok(embedded) = serde_json::from_slice::<EmbeddedError>(body) {
        return embedded.error;
    }

    if status == StatusCode::NOT_FOUND {
        return ToolError::run_not_found(format!("{} returned 404", request.describe()));
    }

    ToolError::upstream_timeout(
        format!("{} returned {}", request.describe(), status.as_u16()),
        status.is_server_error(),
    )
}

/// W3C traceparent for the current span, when it carries a valid context.
fn current_traceparent() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();
    let ctx_span = context.span();
    let span_context = ctx_span.span_context();

    if span_context.is_valid() {
        let flags = if span_context.is_sampled() { "01" } else { "00" };
        Some(format!(
            "00-{}-{}-{}",
            span_context.trace_id(),
            span_context.span_id(),
            flags
        ))
    } else {
        None
    }
}
