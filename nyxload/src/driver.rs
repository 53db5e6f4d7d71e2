use async_trait::async_trait;
use nyxload_core::{Check, RampProfile, RunConfig, Scenario, Stage, Thresholds, VuContext};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::*;

pub const ENDPOINT_KEY: &str = "API_ENDPOINT";
pub const PROCESS_PATH: &str = "/process";
pub const ITERATION_PAUSE: Duration = Duration::from_millis(500);
const ID_LEN: usize = 8;

pub const CHECKS: &[Check] = &[
    Check::new("status is 200", |r| r.status() == 200),
    Check::new("status is 500 (chaos state)", |r| r.status() == 500),
];

pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(Duration::from_secs(10), 5),
        Stage::new(Duration::from_secs(30), 10),
        Stage::new(Duration::from_secs(10), 0),
    ]
}

pub fn default_thresholds() -> Result<Thresholds> {
    let mut thresholds = Thresholds::new();
    thresholds.set("http_req_failed", &["rate<0.6"])?;
    thresholds.set("http_req_duration", &["p(95)<2000"])?;
    Ok(thresholds)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub endpoint: String,
}

impl DriverConfig {
    /// Resolves the endpoint through `lookup`. A missing or empty value is
    /// fatal so that no traffic is generated against a half-configured run.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(ENDPOINT_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or(Error::EnvVarError(ENDPOINT_KEY))?;
        let endpoint = raw.trim().trim_end_matches('/').to_owned();

        let invalid = |reason: String| Error::InvalidEndpoint {
            key: ENDPOINT_KEY,
            value: raw.clone(),
            reason,
        };
        let url = Url::parse(&endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }

        Ok(Self { endpoint })
    }
}

/// Body of a synthetic upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadPayload {
    pub filename: String,
    pub content: String,
}

impl UploadPayload {
    pub fn generate() -> Self {
        Self::with_rng(chrono::Utc::now().timestamp_millis(), &mut rand::thread_rng())
    }

    fn with_rng<R: Rng>(timestamp_ms: i64, rng: &mut R) -> Self {
        let id: String = rng
            .sample_iter(&Alphanumeric)
            .take(ID_LEN)
            .map(char::from)
            .collect();
        Self {
            filename: format!("load-{}.txt", id),
            content: format!("Load test data {}", timestamp_ms),
        }
    }
}

/// Posts one synthetic upload per iteration to `<endpoint>/process`.
#[derive(Debug, Clone)]
pub struct LoadDriver {
    config: DriverConfig,
}

impl LoadDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Run shape declared by the driver: default stages and thresholds.
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::new(self.endpoint(), RampProfile::new(default_stages())?);
        config.thresholds = default_thresholds()?;
        Ok(config)
    }
}

#[async_trait]
impl Scenario for LoadDriver {
    async fn iteration(&self, ctx: &mut VuContext) -> nyxload_core::Result<()> {
        let payload = UploadPayload::generate();
        let res = ctx.post_json(PROCESS_PATH, &payload).await?;
        if let Some(err) = res.error() {
            debug!(vu = ctx.vu_id(), file = %payload.filename, "upload failed: {}", err);
        }
        ctx.check(&res, CHECKS);
        ctx.sleep(ITERATION_PAUSE).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyxload_core::{CheckStats, RunOutcome};
    use regex::Regex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn from_vars(vars: &[(&str, &str)]) -> Result<DriverConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DriverConfig::from_lookup(|k| vars.get(k).cloned())
    }

    async fn run_one_against(server: &MockServer) -> RunOutcome {
        let config = from_vars(&[(ENDPOINT_KEY, server.uri().as_str())]).unwrap();
        let driver = LoadDriver::new(config);
        let run_config = driver.run_config().unwrap();
        nyxload_core::run_once(run_config, Arc::new(driver)).await.unwrap()
    }

    fn check(outcome: &RunOutcome, name: &str) -> CheckStats {
        outcome
            .snapshot
            .checks
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .unwrap()
    }

    #[test]
    fn missing_endpoint_is_fatal() {
        let err = from_vars(&[]).unwrap_err();
        assert!(matches!(err, Error::EnvVarError(ENDPOINT_KEY)));
        assert!(err.to_string().contains("API_ENDPOINT"));

        let err = from_vars(&[(ENDPOINT_KEY, "  ")]).unwrap_err();
        assert!(matches!(err, Error::EnvVarError(_)));
    }

    #[test]
    fn rejects_unusable_endpoints() {
        assert!(matches!(
            from_vars(&[(ENDPOINT_KEY, "not a url")]),
            Err(Error::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            from_vars(&[(ENDPOINT_KEY, "ftp://example.com")]),
            Err(Error::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn trims_trailing_slash() {
        let config =
            from_vars(&[(ENDPOINT_KEY, "https://api.example.com/dev/")]).unwrap();
        assert_eq!(config.endpoint, "https://api.example.com/dev");
    }

    #[test]
    fn declares_default_run_shape() {
        let driver = LoadDriver::new(DriverConfig {
            endpoint: "http://localhost:3000".into(),
        });
        let config = driver.run_config().unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.stages.total_duration(), Duration::from_secs(50));
        assert_eq!(config.stages.vus_at(Duration::from_secs(10)), 5);
        assert_eq!(config.stages.vus_at(Duration::from_secs(40)), 10);
        let declared: Vec<String> = config
            .thresholds
            .iter()
            .map(|(m, e)| format!("{}:{}", m, e))
            .collect();
        assert_eq!(
            declared,
            vec!["http_req_duration:p(95)<2000", "http_req_failed:rate<0.6"]
        );
    }

    #[test]
    fn payload_shape() {
        let filename = Regex::new(r"^load-[A-Za-z0-9]{8}\.txt$").unwrap();
        let content = Regex::new(r"^Load test data (\d+)$").unwrap();

        let mut last = 0u64;
        for _ in 0..50 {
            let p = UploadPayload::generate();
            assert!(filename.is_match(&p.filename), "{}", p.filename);
            let ts: u64 = content.captures(&p.content).unwrap()[1].parse().unwrap();
            assert!(ts >= last);
            last = ts;
        }

        let json = serde_json::to_value(UploadPayload::generate()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("filename") && obj.contains_key("content"));
    }

    #[test]
    fn identifiers_vary() {
        let mut rng = rand::thread_rng();
        let a = UploadPayload::with_rng(1, &mut rng);
        let b = UploadPayload::with_rng(1, &mut rng);
        assert_ne!(a.filename, b.filename);
        assert_eq!(a.content, "Load test data 1");
    }

    #[tokio::test]
    async fn iteration_posts_once_and_pauses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let started = Instant::now();
        let outcome = run_one_against(&server).await;
        assert!(started.elapsed() >= ITERATION_PAUSE);

        assert_eq!(outcome.snapshot.total_requests, 1);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["filename"].as_str().unwrap().starts_with("load-"));
        assert!(body["content"].as_str().unwrap().starts_with("Load test data "));

        let iteration_ms = outcome.snapshot.iteration_duration.max() / 1000;
        assert!(iteration_ms >= 500);
    }

    #[tokio::test]
    async fn status_200_passes_success_check_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = run_one_against(&server).await;
        assert_eq!(check(&outcome, "status is 200").passes, 1);
        assert_eq!(check(&outcome, "status is 500 (chaos state)").fails, 1);
        assert_eq!(outcome.snapshot.failed_requests, 0);
    }

    #[tokio::test]
    async fn status_500_passes_chaos_check_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = run_one_against(&server).await;
        assert_eq!(check(&outcome, "status is 200").fails, 1);
        assert_eq!(check(&outcome, "status is 500 (chaos state)").passes, 1);
        assert_eq!(outcome.snapshot.failed_requests, 1);
    }

    #[tokio::test]
    async fn other_status_fails_both_checks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = run_one_against(&server).await;
        assert_eq!(check(&outcome, "status is 200").fails, 1);
        assert_eq!(check(&outcome, "status is 500 (chaos state)").fails, 1);
        assert_eq!(outcome.snapshot.check_totals(), (0, 2));
    }
}
