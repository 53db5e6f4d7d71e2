use humanize_bytes::humanize_bytes_binary;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nyxload_core::{Aggregation, Metric, MetricSummary, StatsSnapshot, Summary};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::cli::OutputFormat;

const NAME_WIDTH: usize = 30;

/// One line of `--output json` progress.
#[derive(Debug, Serialize)]
pub struct ProgressLine {
    pub elapsed_secs: u64,
    pub vus: u64,
    pub requests_per_sec: f64,
    pub total_requests: u64,
    pub failed_rate: f64,
    pub latency_p95_ms: f64,
    pub checks_rate: f64,
    pub errors: HashMap<String, u64>,
}

/// Live progress: a bar plus one line per distinct error in text mode, JSON
/// lines otherwise.
pub struct ProgressReporter {
    format: OutputFormat,
    mp: Option<MultiProgress>,
    bar: Option<ProgressBar>,
    error_bars: HashMap<String, ProgressBar>,
    last_requests: u64,
    last_elapsed: Duration,
}

impl ProgressReporter {
    pub fn new(format: OutputFormat, total: Duration, quiet: bool) -> Self {
        let (mp, bar) = if format == OutputFormat::Text && !quiet {
            let mp = MultiProgress::new();
            let bar = mp.add(ProgressBar::new(total.as_secs()));
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}]",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            );
            (Some(mp), Some(bar))
        } else {
            (None, None)
        };

        Self {
            format,
            mp,
            bar,
            error_bars: HashMap::new(),
            last_requests: 0,
            last_elapsed: Duration::ZERO,
        }
    }

    pub fn update(&mut self, p: &StatsSnapshot) {
        let interval_secs = p.elapsed.saturating_sub(self.last_elapsed).as_secs_f64();
        let current_rps = if interval_secs > 0.0 {
            p.total_requests.saturating_sub(self.last_requests) as f64 / interval_secs
        } else {
            0.0
        };
        self.last_requests = p.total_requests;
        self.last_elapsed = p.elapsed;

        match self.format {
            OutputFormat::Text => {
                let (Some(bar), Some(mp)) = (&self.bar, &self.mp) else {
                    return;
                };
                bar.set_position(p.elapsed.as_secs());
                bar.set_message(format!(
                    "VUs: {} | RPS: {:.0} | Reqs: {} | Recv: {}",
                    p.vus,
                    current_rps,
                    p.total_requests,
                    humanize_bytes_binary!(p.bytes_received),
                ));

                for (err, count) in &p.errors {
                    let err_bar = self.error_bars.entry(err.clone()).or_insert_with(|| {
                        let b = mp.insert(0, ProgressBar::new(0));
                        b.set_style(
                            ProgressStyle::with_template("{msg}")
                                .unwrap_or_else(|_| ProgressStyle::default_bar()),
                        );
                        b
                    });
                    err_bar.set_message(format!("Error: {} - {}", err, count));
                }
            }
            OutputFormat::Json => {
                // Skip output if no requests have been made yet (avoids empty first line)
                if p.total_requests == 0 {
                    return;
                }
                let line = ProgressLine {
                    elapsed_secs: p.elapsed.as_secs(),
                    vus: p.vus,
                    requests_per_sec: current_rps,
                    total_requests: p.total_requests,
                    failed_rate: rate(p, Metric::HttpReqFailed),
                    latency_p95_ms: p
                        .metric(Metric::HttpReqDuration)
                        .aggregate(Aggregation::Percentile(95.0))
                        .unwrap_or(0.0),
                    checks_rate: rate(p, Metric::Checks),
                    errors: p.errors.clone(),
                };
                match serde_json::to_string(&line) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::warn!("failed to encode progress: {}", e),
                }
            }
        }
    }

    pub fn finish(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message("Done!");
        }
        for bar in self.error_bars.values() {
            bar.finish_and_clear();
        }
    }
}

fn rate(p: &StatsSnapshot, metric: Metric) -> f64 {
    p.metric(metric).aggregate(Aggregation::Rate).unwrap_or(0.0)
}

pub fn fmt_ms(ms: f64) -> String {
    if ms >= 1_000.0 {
        format!("{:.2}s", ms / 1_000.0)
    } else if ms >= 1.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}us", ms * 1_000.0)
    }
}

fn mark(passed: bool) -> char {
    if passed { '✓' } else { '✗' }
}

fn dotted(name: &str) -> String {
    let dots = NAME_WIDTH.saturating_sub(name.len());
    format!("{}{}", name, ".".repeat(dots))
}

fn metric_value(name: &str, metric: &MetricSummary) -> String {
    match metric {
        MetricSummary::Counter { count, rate } if name.starts_with("data_") => format!(
            "{} {}/s",
            humanize_bytes_binary!(*count),
            humanize_bytes_binary!(*rate as u64)
        ),
        MetricSummary::Counter { count, rate } => format!("{} {:.2}/s", count, rate),
        MetricSummary::Rate { rate, passes, fails } => {
            format!("{:.2}% ✓ {} ✗ {}", rate * 100.0, passes, fails)
        }
        MetricSummary::Trend {
            avg,
            min,
            med,
            max,
            p90,
            p95,
        } => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={}",
            fmt_ms(*avg),
            fmt_ms(*min),
            fmt_ms(*med),
            fmt_ms(*max),
            fmt_ms(*p90),
            fmt_ms(*p95)
        ),
        MetricSummary::Gauge { value } => value.to_string(),
    }
}

/// End-of-run text report.
pub fn render_text(summary: &Summary) -> String {
    let mut out = String::new();

    let _ = writeln!(out);
    for check in &summary.checks {
        let _ = writeln!(out, "     {} {}", mark(check.fails == 0), check.name);
        if check.passes > 0 && check.fails > 0 {
            let _ = writeln!(
                out,
                "      ↳  {:.0}% - ✓ {} / ✗ {}",
                check.pass_rate * 100.0,
                check.passes,
                check.fails
            );
        }
    }
    if !summary.checks.is_empty() {
        let _ = writeln!(out);
    }

    for (name, metric) in &summary.metrics {
        let mut thresholds = summary.thresholds_for(name).peekable();
        let prefix = if thresholds.peek().is_some() {
            format!("{} ", mark(thresholds.all(|t| t.passed)))
        } else {
            "  ".to_owned()
        };
        let _ = writeln!(out, "   {}{}: {}", prefix, dotted(name), metric_value(name, metric));
    }

    if !summary.thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  thresholds");
        for t in &summary.thresholds {
            let _ = writeln!(
                out,
                "     {} {}: {} (actual {:.4})",
                mark(t.passed),
                t.metric,
                t.expression,
                t.actual
            );
        }
    }

    if !summary.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  errors");
        for (err, count) in &summary.errors {
            let _ = writeln!(out, "     {}: {}", err, count);
        }
    }

    let _ = writeln!(out);
    let _ = write!(out, "  run finished in {:.2}s", summary.elapsed_secs);
    if summary.interrupted_iterations > 0 {
        let _ = write!(out, ", {} interrupted iterations", summary.interrupted_iterations);
    }
    let _ = writeln!(out);

    if summary.aborted {
        let _ = writeln!(out, "  run aborted: a threshold was crossed");
    }
    if !summary.thresholds_passed {
        let crossed: Vec<&str> = summary
            .thresholds
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.metric.as_str())
            .collect();
        let _ = writeln!(
            out,
            "  thresholds on metrics '{}' have been crossed",
            crossed.join("', '")
        );
    }

    out
}
