//! Tool parameter types with JSON Schema derivation
//!
//! The gateway's MCP handler uses these to publish tool input schemas, and the
//! dispatcher deserializes raw JSON arguments into them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::domain::QuizAnswer;

// ============================================================================
// Pipeline Tools
// ============================================================================

/// Parameters for create_poom tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreatePoomParams {
    /// Absolute http(s) URL of the source video
    pub source_url: String,
    /// Run id to assign to the result (optional, backend picks one otherwise)
    #[serde(default)]
    pub run_id: Option<String>,
}

/// Parameters for get_poom_status tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PoomStatusParams {
    /// Job id returned by create_poom
    pub job_id: String,
}

// ============================================================================
// Player Tools
// ============================================================================

/// Parameters for open_run_player tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OpenRunPlayerParams {
    /// Run id to open (takes priority over reference)
    #[serde(default)]
    pub run_id: Option<String>,
    /// Run reference URL, e.g. poom://run/<run_id>
    #[serde(default)]
    pub reference: Option<String>,
}

// ============================================================================
// Quiz Tools
// ============================================================================

/// Parameters for get_segment_quiz tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SegmentQuizParams {
    /// Run containing the segment
    pub run_id: String,
    /// Segment to fetch the quiz for
    pub segment_id: String,
}

/// Parameters for submit_segment_quiz tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitSegmentQuizParams {
    /// Run containing the segment
    pub run_id: String,
    /// Segment the quiz belongs to
    pub segment_id: String,
    /// One answer per question
    #[serde(default)]
    pub answers: Vec<QuizAnswer>,
}
