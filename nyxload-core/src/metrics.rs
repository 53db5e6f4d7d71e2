use hdrhistogram::Histogram;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::stats::StatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
    Gauge,
}

/// Built-in metrics collected by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Checks,
    DataReceived,
    DataSent,
    HttpReqDuration,
    HttpReqFailed,
    HttpReqs,
    IterationDuration,
    Iterations,
    Vus,
    VusMax,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Checks,
        Metric::DataReceived,
        Metric::DataSent,
        Metric::HttpReqDuration,
        Metric::HttpReqFailed,
        Metric::HttpReqs,
        Metric::IterationDuration,
        Metric::Iterations,
        Metric::Vus,
        Metric::VusMax,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Checks => "checks",
            Metric::DataReceived => "data_received",
            Metric::DataSent => "data_sent",
            Metric::HttpReqDuration => "http_req_duration",
            Metric::HttpReqFailed => "http_req_failed",
            Metric::HttpReqs => "http_reqs",
            Metric::IterationDuration => "iteration_duration",
            Metric::Iterations => "iterations",
            Metric::Vus => "vus",
            Metric::VusMax => "vus_max",
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            Metric::HttpReqs | Metric::Iterations | Metric::DataReceived | Metric::DataSent => {
                MetricKind::Counter
            }
            Metric::HttpReqFailed | Metric::Checks => MetricKind::Rate,
            Metric::HttpReqDuration | Metric::IterationDuration => MetricKind::Trend,
            Metric::Vus | Metric::VusMax => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown metric '{}'", s))
    }
}

/// How a metric is reduced to a single number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Count,
    Rate,
    Value,
    Avg,
    Min,
    Med,
    Max,
    Percentile(f64),
}

impl Aggregation {
    pub fn supported_by(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricKind::Rate => matches!(self, Aggregation::Rate),
            MetricKind::Gauge => matches!(self, Aggregation::Value),
            MetricKind::Trend => matches!(
                self,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Med
                    | Aggregation::Max
                    | Aggregation::Percentile(_)
            ),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

/// Borrowed view of one metric inside a snapshot.
#[derive(Debug, Clone, Copy)]
pub enum MetricValue<'a> {
    Counter { count: u64, per_sec: f64 },
    Rate { trues: u64, total: u64 },
    Trend(&'a Histogram<u64>),
    Gauge(u64),
}

impl MetricValue<'_> {
    /// Reduces the metric. Trends are reported in milliseconds. Empty
    /// metrics reduce to zero. `None` when the aggregation does not apply to
    /// this kind of metric.
    pub fn aggregate(&self, agg: Aggregation) -> Option<f64> {
        match (self, agg) {
            (MetricValue::Counter { count, .. }, Aggregation::Count) => Some(*count as f64),
            (MetricValue::Counter { per_sec, .. }, Aggregation::Rate) => Some(*per_sec),
            (MetricValue::Rate { trues, total }, Aggregation::Rate) => Some(if *total > 0 {
                *trues as f64 / *total as f64
            } else {
                0.0
            }),
            (MetricValue::Gauge(v), Aggregation::Value) => Some(*v as f64),
            (MetricValue::Trend(h), agg) => {
                if h.is_empty() {
                    return agg.supported_by(MetricKind::Trend).then_some(0.0);
                }
                let micros = match agg {
                    Aggregation::Avg => h.mean(),
                    Aggregation::Min => h.min() as f64,
                    Aggregation::Med => h.value_at_quantile(0.5) as f64,
                    Aggregation::Max => h.max() as f64,
                    Aggregation::Percentile(p) => h.value_at_quantile(p / 100.0) as f64,
                    _ => return None,
                };
                Some(micros / 1000.0)
            }
            _ => None,
        }
    }
}

impl StatsSnapshot {
    pub fn metric(&self, metric: Metric) -> MetricValue<'_> {
        let secs = self.elapsed.as_secs_f64();
        let counter = |count: u64| MetricValue::Counter {
            count,
            per_sec: if secs > 0.0 { count as f64 / secs } else { 0.0 },
        };

        match metric {
            Metric::HttpReqs => counter(self.total_requests),
            Metric::Iterations => counter(self.iterations),
            Metric::DataReceived => counter(self.bytes_received),
            Metric::DataSent => counter(self.bytes_sent),
            Metric::HttpReqFailed => MetricValue::Rate {
                trues: self.failed_requests,
                total: self.total_requests,
            },
            Metric::Checks => {
                let (passes, fails) = self.check_totals();
                MetricValue::Rate {
                    trues: passes,
                    total: passes + fails,
                }
            }
            Metric::HttpReqDuration => MetricValue::Trend(&self.req_duration),
            Metric::IterationDuration => MetricValue::Trend(&self.iteration_duration),
            Metric::Vus => MetricValue::Gauge(self.vus),
            Metric::VusMax => MetricValue::Gauge(self.vus_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use std::time::Duration;

    #[test]
    fn metric_names_round_trip() {
        for m in Metric::ALL {
            assert_eq!(m.name().parse::<Metric>().unwrap(), m);
        }
        assert!("http_req_waiting".parse::<Metric>().is_err());
    }

    #[test]
    fn aggregations_follow_metric_kind() {
        assert!(Aggregation::Rate.supported_by(MetricKind::Rate));
        assert!(!Aggregation::Avg.supported_by(MetricKind::Rate));
        assert!(Aggregation::Percentile(95.0).supported_by(MetricKind::Trend));
        assert!(!Aggregation::Count.supported_by(MetricKind::Trend));
        assert!(Aggregation::Rate.supported_by(MetricKind::Counter));
        assert!(Aggregation::Value.supported_by(MetricKind::Gauge));
    }

    #[test]
    fn trend_reports_milliseconds() {
        let mut h = Histogram::<u64>::new(3).unwrap();
        for micros in [1_000u64, 2_000, 3_000, 4_000] {
            h.record(micros).unwrap();
        }
        let trend = MetricValue::Trend(&h);
        assert!((trend.aggregate(Aggregation::Avg).unwrap() - 2.5).abs() < 0.01);
        assert!((trend.aggregate(Aggregation::Max).unwrap() - 4.0).abs() < 0.01);
        assert!((trend.aggregate(Aggregation::Min).unwrap() - 1.0).abs() < 0.01);
        assert_eq!(trend.aggregate(Aggregation::Count), None);
    }

    #[test]
    fn empty_metrics_reduce_to_zero() {
        let snap = Stats::new().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snap.metric(Metric::HttpReqFailed).aggregate(Aggregation::Rate), Some(0.0));
        assert_eq!(
            snap.metric(Metric::HttpReqDuration).aggregate(Aggregation::Percentile(95.0)),
            Some(0.0)
        );
        assert_eq!(snap.metric(Metric::HttpReqs).aggregate(Aggregation::Rate), Some(0.0));
    }
}
