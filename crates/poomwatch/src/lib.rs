//! poomwatch - drives walkthrough jobs from creation to a terminal state.
//!
//! [`machine`] is the pure state machine (`idle → polling → completed |
//! failed | polling_error`). [`driver`] runs it on tokio timers against a
//! [`StatusPort`], which the gateway implements with its `get_poom_status`
//! tool.

pub mod driver;
pub mod machine;

pub use driver::{spawn, StatusPort, WatchHandle, WatchUpdate};
pub use machine::{
    describe, JobWatcher, RecentJobs, WatchEffect, WatchEvent, WatchOutcome, WatchState,
    WatchTiming,
};
