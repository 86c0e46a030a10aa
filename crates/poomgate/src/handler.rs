//! MCP server handler.
//!
//! Thin rmcp adapter over [`Gateway`]: every tool returns the JSON envelope
//! as text content, with `isError` set when the envelope carries an error.

use poomproto::{
    CreatePoomParams, OpenRunPlayerParams, PoomStatusParams, SegmentQuizParams,
    SubmitSegmentQuizParams, ToolEnvelope, ToolError,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Serialize;

use crate::dispatch::Gateway;

#[derive(Clone)]
pub struct PoomHandler {
    gateway: Gateway,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PoomHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List completed walkthrough runs with their reference URLs")]
    async fn list_runs(&self) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.list_runs().await))
    }

    #[tool(description = "List completed runs together with pipeline jobs still in progress")]
    async fn list_pooms(&self) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.list_pooms().await))
    }

    #[tool(
        description = "Start a narrated walkthrough job for a source video URL. Returns the job; poll it with get_poom_status"
    )]
    async fn create_poom(
        &self,
        Parameters(params): Parameters<CreatePoomParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.create_poom(params).await))
    }

    #[tool(description = "Get the current status of a walkthrough job plus the current run list")]
    async fn get_poom_status(
        &self,
        Parameters(params): Parameters<PoomStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.get_poom_status(params).await))
    }

    #[tool(
        description = "Open a run in the player. Resolves run_id, then reference, then the configured default, then the newest run"
    )]
    async fn open_run_player(
        &self,
        Parameters(params): Parameters<OpenRunPlayerParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.open_run_player(params).await))
    }

    #[tool(description = "Fetch the quiz for one segment of a run")]
    async fn get_segment_quiz(
        &self,
        Parameters(params): Parameters<SegmentQuizParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.get_segment_quiz(params).await))
    }

    #[tool(description = "Submit answers for a segment quiz and get the score")]
    async fn submit_segment_quiz(
        &self,
        Parameters(params): Parameters<SubmitSegmentQuizParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(to_call_result(self.gateway.submit_segment_quiz(params).await))
    }
}

/// Tool errors stay in-band as `isError` results, never protocol errors.
pub fn to_call_result<T: Serialize>(result: Result<T, ToolError>) -> CallToolResult {
    envelope_to_call_result(ToolEnvelope::from_result(result))
}

pub fn envelope_to_call_result(envelope: ToolEnvelope) -> CallToolResult {
    let text = envelope.to_json().to_string();
    if envelope.ok {
        CallToolResult::success(vec![Content::text(text)])
    } else {
        CallToolResult::error(vec![Content::text(text)])
    }
}

#[tool_handler]
impl ServerHandler for PoomHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "poom bridge - narrated video walkthroughs\n\n\
                Create a walkthrough with create_poom(source_url), poll get_poom_status(job_id) \
                until the job is completed or failed, then open_run_player(run_id) to get the \
                player payload (master video URL, chapters, segments). list_runs and list_pooms \
                show what exists. Segment quizzes: get_segment_quiz and submit_segment_quiz.\n\n\
                Every tool returns {\"ok\": true, \"result\": ...} or \
                {\"ok\": false, \"error\": {\"code\", \"message\", \"retryable\"}}."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
