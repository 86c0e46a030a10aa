//! poomproto - Protocol types for the poom bridge
//!
//! Shared by the gateway (`poomgate`) and the job watcher (`poomwatch`):
//!
//! - [`error`]: the single [`ToolError`] shape and the `{ok, result | error}` envelope
//! - [`domain`]: runs, pipeline jobs, manifests, player payloads and quizzes
//! - [`params`]: tool input types deriving `JsonSchema` for MCP tool listings
//! - [`reference`]: `<scheme>://run/<run_id>` reference URLs

pub mod domain;
pub mod error;
pub mod params;
pub mod reference;

pub use domain::{
    Chapter, JobError, JobListing, JobStatus, Manifest, ManifestSegment, MasterMedia,
    PipelineJob, PlayerPayload, PlayerSegment, PoomOverview, PoomStatus, Quiz, QuizAnswer,
    QuizQuestion, QuizResult, QuizScore, RunCard, RunInfo, RunListing, RunsResult,
};
pub use error::{codes, ToolEnvelope, ToolError};
pub use params::{
    CreatePoomParams, OpenRunPlayerParams, PoomStatusParams, SegmentQuizParams,
    SubmitSegmentQuizParams,
};
pub use reference::RunReference;
