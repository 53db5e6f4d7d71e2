use crate::context::VuContext;
use crate::scenario::Scenario;
use crate::stats::{Stats, StatsSnapshot};
use crate::thresholds::{ThresholdResult, Thresholds};
use crate::{RunConfig, error::*};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_millis(100);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub snapshot: StatsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
    pub aborted: bool,
}

impl RunOutcome {
    fn new(snapshot: StatsSnapshot, thresholds: &Thresholds, aborted: bool) -> Self {
        let thresholds = thresholds.evaluate(&snapshot);
        Self {
            snapshot,
            thresholds,
            aborted,
        }
    }

    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }
}

fn build_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        // One connection per VU: single idle slot and no cross-VU pooling
        .pool_max_idle_per_host(1)
        .tcp_nodelay(true)
        .no_proxy()
        .timeout(request_timeout)
        .build()
        .map_err(Error::HttpError)
}

fn log_join(res: std::result::Result<(), JoinError>) {
    if let Err(e) = res {
        if !e.is_cancelled() {
            warn!("VU task failed: {}", e);
        }
    }
}

pub async fn run<S, F>(
    config: RunConfig,
    scenario: Arc<S>,
    mut on_progress: Option<F>,
) -> Result<RunOutcome>
where
    S: Scenario,
    F: FnMut(&StatsSnapshot),
{
    let stats = Arc::new(Stats::new()?);
    let base_url: Arc<str> = Arc::from(config.base_url.as_str());
    let total = config.stages.total_duration();
    let kill = CancellationToken::new();
    let mut set = JoinSet::new();
    // Stop tokens of running VUs, oldest first
    let mut active: Vec<CancellationToken> = Vec::new();
    let mut next_vu_id = 1;
    let mut aborted = false;

    info!(
        stages = config.stages.stages().len(),
        max_vus = config.stages.max_target(),
        duration = ?total,
        "starting run against {}",
        config.base_url
    );

    let start_time = Instant::now();
    let mut last_progress = start_time;

    loop {
        let elapsed = start_time.elapsed();
        if elapsed >= total {
            break;
        }

        let target = config.stages.vus_at(elapsed) as usize;
        while active.len() < target {
            let stop = CancellationToken::new();
            let client = build_client(config.timeout)?;
            let ctx = VuContext::new(client, base_url.clone(), stats.clone(), next_vu_id)?;
            set.spawn(run_vu(
                scenario.clone(),
                ctx,
                stats.clone(),
                stop.clone(),
                kill.clone(),
            ));
            active.push(stop);
            next_vu_id += 1;
        }
        while active.len() > target {
            if let Some(stop) = active.pop() {
                stop.cancel();
            }
        }

        while let Some(res) = set.try_join_next() {
            log_join(res);
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            last_progress = Instant::now();
            let snapshot = stats.snapshot(start_time.elapsed());
            if let Some(ref mut cb) = on_progress {
                cb(&snapshot);
            }
            if config.thresholds.abort_on_fail() {
                let results = config.thresholds.evaluate(&snapshot);
                if let Some(failed) = results.iter().find(|r| !r.passed) {
                    warn!(
                        "threshold {} on {} crossed (actual {:.4}), aborting run",
                        failed.expression, failed.metric, failed.actual
                    );
                    aborted = true;
                    break;
                }
            }
        }

        sleep(TICK).await;
    }

    for stop in active.drain(..) {
        stop.cancel();
    }

    let drained = timeout(config.graceful_stop, async {
        while let Some(res) = set.join_next().await {
            log_join(res);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "VUs still running after graceful stop of {:?}, interrupting",
            config.graceful_stop
        );
        kill.cancel();
        while let Some(res) = set.join_next().await {
            log_join(res);
        }
    }

    let snapshot = stats.snapshot(start_time.elapsed());
    if let Some(ref mut cb) = on_progress {
        cb(&snapshot);
    }

    info!(
        requests = snapshot.total_requests,
        iterations = snapshot.iterations,
        "run finished in {:.2}s",
        snapshot.elapsed.as_secs_f64()
    );

    Ok(RunOutcome::new(snapshot, &config.thresholds, aborted))
}

/// Single VU, single iteration. Errors from the iteration are returned.
pub async fn run_once<S: Scenario>(config: RunConfig, scenario: Arc<S>) -> Result<RunOutcome> {
    let stats = Arc::new(Stats::new()?);
    let start = Instant::now();

    let client = build_client(config.timeout)?;
    let mut ctx = VuContext::new(client, Arc::from(config.base_url.as_str()), stats.clone(), 1)?;

    stats.vu_started();
    scenario.iteration(&mut ctx).await?;
    ctx.record_iteration(start.elapsed());
    ctx.flush_stats();
    stats.vu_stopped();

    let snapshot = stats.snapshot(start.elapsed());
    Ok(RunOutcome::new(snapshot, &config.thresholds, false))
}

async fn run_vu<S: Scenario>(
    scenario: Arc<S>,
    mut ctx: VuContext,
    stats: Arc<Stats>,
    stop: CancellationToken,
    kill: CancellationToken,
) {
    stats.vu_started();
    debug!(vu = ctx.vu_id(), "VU started");

    while !stop.is_cancelled() {
        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = kill.cancelled() => None,
            res = scenario.iteration(&mut ctx) => Some(res),
        };

        match outcome {
            None => {
                stats.record_interrupted();
                break;
            }
            Some(Ok(())) => ctx.record_iteration(start.elapsed()),
            Some(Err(e)) => {
                debug!(vu = ctx.vu_id(), error = %e, "iteration failed");
                ctx.record_error(e.to_string());
                ctx.record_iteration(start.elapsed());
            }
        }

        ctx.maybe_flush();
    }

    ctx.flush_stats();
    stats.vu_stopped();
    debug!(vu = ctx.vu_id(), iterations = ctx.iteration(), "VU stopped");
}
