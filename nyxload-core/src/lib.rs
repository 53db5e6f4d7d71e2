//! Virtual-user load engine.
//!
//! A [`Scenario`] describes one iteration of work; the engine runs it on a
//! growing and shrinking pool of virtual users following a [`RampProfile`],
//! aggregates what each VU observes and evaluates [`Thresholds`] at the end.

use std::sync::Arc;
use std::time::Duration;

mod context;
mod error;
mod metrics;
mod response;
mod runner;
mod scenario;
mod stages;
mod stats;
mod summary;
mod thresholds;

pub use context::{Check, VuContext};
pub use error::*;
pub use metrics::{Aggregation, Metric, MetricKind, MetricValue};
pub use response::Response;
pub use runner::RunOutcome;
pub use scenario::Scenario;
pub use stages::{RampProfile, Stage, format_duration, parse_duration};
pub use stats::{CheckStats, StatsSnapshot};
pub use summary::{CheckSummary, MetricSummary, Summary};
pub use thresholds::{ThresholdExpr, ThresholdResult, Thresholds};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Prefix for relative request paths.
    pub base_url: String,
    pub stages: RampProfile,
    pub thresholds: Thresholds,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How long VUs may keep running their current iteration once the last
    /// stage ends before they are interrupted.
    pub graceful_stop: Duration,
}

impl RunConfig {
    pub fn new(base_url: impl Into<String>, stages: RampProfile) -> Self {
        Self {
            base_url: base_url.into(),
            stages,
            thresholds: Thresholds::new(),
            timeout: DEFAULT_TIMEOUT,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }
}

pub async fn run<S, F>(
    config: RunConfig,
    scenario: Arc<S>,
    on_progress: Option<F>,
) -> error::Result<RunOutcome>
where
    S: Scenario,
    F: FnMut(&StatsSnapshot),
{
    runner::run(config, scenario, on_progress).await
}

pub async fn run_once<S: Scenario>(
    config: RunConfig,
    scenario: Arc<S>,
) -> error::Result<RunOutcome> {
    runner::run_once(config, scenario).await
}
