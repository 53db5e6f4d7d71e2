use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::*;
use crate::metrics::{Aggregation, Metric};
use crate::stats::StatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

/// A single predicate such as `p(95)<2000`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub source: String,
    pub aggregation: Aggregation,
    pub op: Operator,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        let s = source.trim();
        let (aggregation, rest) = parse_aggregation(s)?;
        let rest = rest.trim_start();

        // Longest operators first
        let (op, rest) = [
            ("===", Operator::Eq),
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ]
        .into_iter()
        .find_map(|(tok, op)| rest.strip_prefix(tok).map(|r| (op, r)))
        .ok_or_else(|| "missing comparison operator".to_owned())?;

        let value: f64 = rest
            .trim()
            .parse()
            .map_err(|_| format!("invalid threshold value '{}'", rest.trim()))?;

        Ok(Self {
            source: s.to_owned(),
            aggregation,
            op,
            value,
        })
    }

    pub fn evaluate(&self, actual: f64) -> bool {
        self.op.apply(actual, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_aggregation(s: &str) -> std::result::Result<(Aggregation, &str), String> {
    if let Some(rest) = s.strip_prefix("p(") {
        let close = rest.find(')').ok_or_else(|| "unclosed percentile".to_owned())?;
        let p: f64 = rest[..close]
            .trim()
            .parse()
            .map_err(|_| format!("invalid percentile '{}'", &rest[..close]))?;
        if !(p > 0.0 && p <= 100.0) {
            return Err(format!("percentile {} out of range", p));
        }
        return Ok((Aggregation::Percentile(p), &rest[close + 1..]));
    }

    let name_len = s
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let agg = match &s[..name_len] {
        "count" => Aggregation::Count,
        "rate" => Aggregation::Rate,
        "value" => Aggregation::Value,
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "med" => Aggregation::Med,
        "max" => Aggregation::Max,
        other => return Err(format!("unknown aggregation '{}'", other)),
    };
    Ok((agg, &s[name_len..]))
}

/// Thresholds grouped by metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    by_metric: BTreeMap<Metric, Vec<ThresholdExpr>>,
    abort_on_fail: bool,
}

impl Thresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the expressions for `metric`, replacing any earlier set. Unknown
    /// metrics and aggregations the metric can't provide are rejected here so
    /// a bad declaration fails before the run starts.
    pub fn set(&mut self, metric: &str, exprs: &[&str]) -> Result<()> {
        let invalid = |expr: &str, reason: String| Error::InvalidThreshold {
            metric: metric.to_owned(),
            expr: expr.to_owned(),
            reason,
        };

        let parsed_metric: Metric = metric
            .parse()
            .map_err(|reason| invalid(&exprs.join(", "), reason))?;

        let mut parsed = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let t = ThresholdExpr::parse(expr).map_err(|reason| invalid(expr, reason))?;
            if !t.aggregation.supported_by(parsed_metric.kind()) {
                return Err(invalid(
                    expr,
                    format!(
                        "{} is not available on a {:?} metric",
                        t.aggregation,
                        parsed_metric.kind()
                    ),
                ));
            }
            parsed.push(t);
        }

        self.by_metric.insert(parsed_metric, parsed);
        Ok(())
    }

    /// Parses `metric=expr` as given on the command line.
    pub fn set_from_arg(&mut self, arg: &str) -> Result<()> {
        let (metric, expr) = arg.split_once('=').ok_or_else(|| Error::InvalidThreshold {
            metric: String::new(),
            expr: arg.to_owned(),
            reason: "expected <metric>=<expression>".to_owned(),
        })?;
        let exprs: Vec<&str> = expr.split(',').collect();
        self.set(metric.trim(), &exprs)
    }

    pub fn with_abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    pub fn abort_on_fail(&self) -> bool {
        self.abort_on_fail
    }

    pub fn is_empty(&self) -> bool {
        self.by_metric.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &ThresholdExpr)> {
        self.by_metric
            .iter()
            .flat_map(|(m, exprs)| exprs.iter().map(move |e| (*m, e)))
    }

    pub fn evaluate(&self, snapshot: &StatsSnapshot) -> Vec<ThresholdResult> {
        self.iter()
            .map(|(metric, expr)| {
                let actual = snapshot
                    .metric(metric)
                    .aggregate(expr.aggregation)
                    .unwrap_or(f64::NAN);
                ThresholdResult {
                    metric: metric.name().to_owned(),
                    expression: expr.source.clone(),
                    actual,
                    passed: expr.evaluate(actual),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub actual: f64,
    pub passed: bool,
}
