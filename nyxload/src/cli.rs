use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use nyxload_core::Stage;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Driver configuration as KEY=VALUE (e.g. API_ENDPOINT=https://...),
    /// takes precedence over the environment
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Ramp stage as DURATION:TARGET (e.g. "30s:10"). Repeat to replace the default profile
    #[arg(short, long = "stage")]
    pub stages: Vec<Stage>,

    /// Threshold as METRIC=EXPR[,EXPR...] (e.g. "http_req_duration=p(95)<2000").
    /// Replaces the defaults for that metric
    #[arg(long = "threshold")]
    pub thresholds: Vec<String>,

    /// Drop every threshold, including the defaults
    #[arg(long, conflicts_with = "thresholds")]
    pub no_thresholds: bool,

    /// Stop the run as soon as a threshold is crossed
    #[arg(long)]
    pub abort_on_fail: bool,

    /// Per-request timeout
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Time VUs get to finish their iteration after the last stage
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub graceful_stop: Duration,

    /// Run a single iteration on a single VU and exit
    #[arg(long)]
    pub once: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Also write the JSON summary to this file
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Value for `key`, from `--env` first and `env` second.
    pub fn lookup<E>(&self, key: &str, env: E) -> Option<String>
    where
        E: Fn(&str) -> Option<String>,
    {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| env(key))
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    nyxload_core::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["nyxload"]).unwrap();
        assert!(args.stages.is_empty());
        assert!(args.thresholds.is_empty());
        assert_eq!(args.timeout, Duration::from_secs(60));
        assert_eq!(args.graceful_stop, Duration::from_secs(30));
        assert_eq!(args.output, OutputFormat::Text);
        assert!(!args.once);
    }

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "nyxload",
            "-e",
            "API_ENDPOINT=http://localhost:3000",
            "-e",
            "API_ENDPOINT=http://localhost:4000",
            "--stage",
            "5s:2",
            "-s",
            "1m:4",
            "--threshold",
            "http_req_failed=rate<0.1",
            "--timeout",
            "500ms",
            "-o",
            "json",
        ])
        .unwrap();

        let env = |_: &str| Some("http://from-env:5000".to_owned());
        assert_eq!(
            args.lookup("API_ENDPOINT", env).as_deref(),
            Some("http://localhost:4000")
        );
        assert_eq!(
            args.lookup("OTHER", env).as_deref(),
            Some("http://from-env:5000")
        );
        assert_eq!(
            args.stages,
            vec![
                Stage::new(Duration::from_secs(5), 2),
                Stage::new(Duration::from_secs(60), 4)
            ]
        );
        assert_eq!(args.thresholds, vec!["http_req_failed=rate<0.1"]);
        assert_eq!(args.timeout, Duration::from_millis(500));
        assert_eq!(args.output, OutputFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Args::try_parse_from(["nyxload", "-e", "API_ENDPOINT"]).is_err());
        assert!(Args::try_parse_from(["nyxload", "--stage", "10s"]).is_err());
        assert!(Args::try_parse_from(["nyxload", "--timeout", "soon"]).is_err());
        assert!(
            Args::try_parse_from([
                "nyxload",
                "--no-thresholds",
                "--threshold",
                "vus=value<3",
            ])
            .is_err()
        );
    }
}
