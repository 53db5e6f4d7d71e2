use serde::Serialize;
use std::collections::BTreeMap;

use crate::metrics::{Aggregation, Metric, MetricValue};
use crate::runner::RunOutcome;
use crate::stats::CheckStats;
use crate::thresholds::ThresholdResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
    pub pass_rate: f64,
}

impl From<&CheckStats> for CheckSummary {
    fn from(c: &CheckStats) -> Self {
        let total = c.passes + c.fails;
        Self {
            name: c.name.clone(),
            passes: c.passes,
            fails: c.fails,
            pass_rate: if total > 0 {
                c.passes as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter {
        count: u64,
        rate: f64,
    },
    Rate {
        rate: f64,
        passes: u64,
        fails: u64,
    },
    /// Milliseconds.
    Trend {
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        #[serde(rename = "p(90)")]
        p90: f64,
        #[serde(rename = "p(95)")]
        p95: f64,
    },
    Gauge {
        value: u64,
    },
}

impl MetricSummary {
    fn from_value(value: MetricValue<'_>) -> Self {
        let agg = |a: Aggregation| value.aggregate(a).unwrap_or(0.0);
        match value {
            MetricValue::Counter { count, per_sec } => MetricSummary::Counter {
                count,
                rate: per_sec,
            },
            MetricValue::Rate { trues, total } => MetricSummary::Rate {
                rate: agg(Aggregation::Rate),
                passes: trues,
                fails: total.saturating_sub(trues),
            },
            MetricValue::Trend(_) => MetricSummary::Trend {
                avg: agg(Aggregation::Avg),
                min: agg(Aggregation::Min),
                med: agg(Aggregation::Med),
                max: agg(Aggregation::Max),
                p90: agg(Aggregation::Percentile(90.0)),
                p95: agg(Aggregation::Percentile(95.0)),
            },
            MetricValue::Gauge(value) => MetricSummary::Gauge { value },
        }
    }
}

/// End-of-run report, serialisable as the JSON summary.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub elapsed_secs: f64,
    pub aborted: bool,
    pub thresholds_passed: bool,
    pub checks: Vec<CheckSummary>,
    pub metrics: BTreeMap<&'static str, MetricSummary>,
    pub thresholds: Vec<ThresholdResult>,
    pub errors: BTreeMap<String, u64>,
    pub interrupted_iterations: u64,
}

impl From<&RunOutcome> for Summary {
    fn from(outcome: &RunOutcome) -> Self {
        let snap = &outcome.snapshot;
        Self {
            elapsed_secs: snap.elapsed.as_secs_f64(),
            aborted: outcome.aborted,
            thresholds_passed: outcome.thresholds_passed(),
            checks: snap.checks.iter().map(CheckSummary::from).collect(),
            metrics: Metric::ALL
                .into_iter()
                .map(|m| (m.name(), MetricSummary::from_value(snap.metric(m))))
                .collect(),
            thresholds: outcome.thresholds.clone(),
            errors: snap.errors.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            interrupted_iterations: snap.interrupted_iterations,
        }
    }
}

impl Summary {
    pub fn thresholds_for<'a>(
        &'a self,
        metric: &'a str,
    ) -> impl Iterator<Item = &'a ThresholdResult> + 'a {
        self.thresholds.iter().filter(move |t| t.metric == metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use crate::thresholds::Thresholds;
    use std::time::Duration;

    fn outcome() -> RunOutcome {
        let mut snap = Stats::new().unwrap().snapshot(Duration::from_secs(2));
        snap.total_requests = 4;
        snap.failed_requests = 1;
        snap.checks = vec![CheckStats {
            name: "status is 200".into(),
            passes: 3,
            fails: 1,
        }];
        snap.req_duration.record(10_000).unwrap();

        let mut thresholds = Thresholds::new();
        thresholds.set("http_req_failed", &["rate<0.6"]).unwrap();
        RunOutcome {
            thresholds: thresholds.evaluate(&snap),
            snapshot: snap,
            aborted: false,
        }
    }

    #[test]
    fn summarises_outcome() {
        let summary = Summary::from(&outcome());
        assert!(summary.thresholds_passed);
        assert_eq!(summary.checks[0].pass_rate, 0.75);
        assert_eq!(
            summary.metrics["http_reqs"],
            MetricSummary::Counter { count: 4, rate: 2.0 }
        );
        assert_eq!(
            summary.metrics["http_req_failed"],
            MetricSummary::Rate { rate: 0.25, passes: 1, fails: 3 }
        );
        assert_eq!(summary.thresholds_for("http_req_failed").count(), 1);
        assert_eq!(summary.thresholds_for("http_req_duration").count(), 0);
    }

    #[test]
    fn serialises_trend_percentile_keys() {
        let json = serde_json::to_value(Summary::from(&outcome())).unwrap();
        let trend = &json["metrics"]["http_req_duration"];
        assert_eq!(trend["type"], "trend");
        assert!(trend.get("p(95)").is_some());
        assert_eq!(json["checks"][0]["name"], "status is 200");
    }

    #[test]
    fn rate_fails_saturate_at_zero() {
        let mut snap = Stats::new().unwrap().snapshot(Duration::from_secs(1));
        snap.total_requests = 2;
        snap.failed_requests = 3;
        let outcome = RunOutcome {
            thresholds: Vec::new(),
            snapshot: snap,
            aborted: false,
        };

        let summary = Summary::from(&outcome);
        let MetricSummary::Rate { passes, fails, .. } = summary.metrics["http_req_failed"] else {
            panic!("http_req_failed is not a rate");
        };
        assert_eq!((passes, fails), (3, 0));
    }
}
