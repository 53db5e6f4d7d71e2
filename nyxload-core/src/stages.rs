use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::*;

/// One ramp segment: move linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

impl FromStr for Stage {
    type Err = Error;

    /// Parses `10s:5` style stage declarations.
    fn from_str(s: &str) -> Result<Self> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidStage(s.to_owned()))?;
        let duration = parse_duration(duration)?;
        let target = target
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::InvalidStage(s.to_owned()))?;
        Ok(Self { duration, target })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", format_duration(self.duration), self.target)
    }
}

/// Ordered list of stages. Concurrency starts at zero and is interpolated
/// from one stage's target to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    stages: Vec<Stage>,
}

impl RampProfile {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::Config(
                "ramp profile needs at least one stage".to_owned(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Interpolated VU count at `elapsed`. Past the last stage the final
    /// target is held.
    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let mut from = 0.0;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let to = stage.target as f64;
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into = (elapsed - stage_start).as_secs_f64();
                let progress = into / stage.duration.as_secs_f64();
                return from + (to - from) * progress;
            }
            from = to;
            stage_start = stage_end;
        }

        from
    }

    /// Whole number of VUs that should be running at `elapsed`.
    pub fn vus_at(&self, elapsed: Duration) -> u64 {
        // Small epsilon so float error at stage boundaries doesn't lose a VU
        (self.target_at(elapsed) + 1e-9).floor().max(0.0) as u64
    }
}

/// Parses durations like `500ms`, `10s`, `2m`, `1h` and concatenations such
/// as `1m30s`. A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidDuration(s.to_owned()));
    }
    if let Ok(secs) = s.parse::<f64>() {
        return secs_to_duration(secs).ok_or_else(|| Error::InvalidDuration(s.to_owned()));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::InvalidDuration(s.to_owned()))?;
        if num_len == 0 {
            return Err(Error::InvalidDuration(s.to_owned()));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| Error::InvalidDuration(s.to_owned()))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(Error::InvalidDuration(s.to_owned())),
        };
        rest = &rest[unit_len..];

        total += secs_to_duration(value * multiplier)
            .ok_or_else(|| Error::InvalidDuration(s.to_owned()))?;
    }

    Ok(total)
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{}s", s));
    }
    out
}
