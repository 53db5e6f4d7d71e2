use crate::error::*;
use crate::response::Response;
use crate::stats::{LocalStats, Stats};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Named boolean assertion over a response.
#[derive(Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    pub predicate: fn(&Response) -> bool,
}

impl Check {
    pub const fn new(name: &'static str, predicate: fn(&Response) -> bool) -> Self {
        Self { name, predicate }
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// State owned by a single virtual user. Nothing in here is shared with other
/// VUs except the run-wide [`Stats`] it flushes into.
pub struct VuContext {
    vu_id: u64,
    iteration: u64,
    client: Client,
    base_url: Arc<str>,
    stats: Arc<Stats>,
    local_stats: LocalStats,
    last_flush: Instant,
}

impl VuContext {
    pub(crate) fn new(
        client: Client,
        base_url: Arc<str>,
        stats: Arc<Stats>,
        vu_id: u64,
    ) -> Result<Self> {
        Ok(Self {
            vu_id,
            iteration: 0,
            client,
            base_url,
            stats,
            local_stats: LocalStats::new()?,
            last_flush: Instant::now(),
        })
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based index of the iteration currently running on this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    pub async fn get(&mut self, path: &str) -> Response {
        let req = self.client.get(self.url(path));
        self.send(req, 0).await
    }

    /// POSTs `body` as JSON. Only serialization can fail; every network
    /// outcome comes back as a [`Response`].
    pub async fn post_json<T>(&mut self, path: &str, body: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        let sent = payload.len();
        let req = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload);
        Ok(self.send(req, sent).await)
    }

    async fn send(&mut self, req: RequestBuilder, body_len: usize) -> Response {
        let start = Instant::now();
        let result = req.send().await;

        let local = &mut self.local_stats;
        local.requests += 1;
        local.bytes_sent += body_len as u64;

        let response = match result {
            Ok(r) => {
                let response = Response::new(r, start).await;
                local.bytes_received += response.total_size() as u64;
                if let Some(err) = response.error() {
                    tracing::debug!(
                        vu = self.vu_id,
                        status = response.status(),
                        error = err,
                        "failed to read response body"
                    );
                    local.record_error(err);
                }
                if response.is_failed() {
                    local.record_error("Non 2xx and non 3xx status code");
                }
                response
            }
            Err(e) => {
                let msg = if e.is_timeout() {
                    "Request timeout".to_owned()
                } else {
                    format!("Request error: {}", e)
                };
                tracing::debug!(vu = self.vu_id, error = %e, "request failed");
                local.record_error(msg.clone());
                Response::failed(msg, start.elapsed())
            }
        };

        if response.is_failed() {
            local.failed_requests += 1;
        }
        let _ = local.req_duration.record(response.duration().as_micros() as u64);

        response
    }

    /// Evaluates every check against `response`, records each outcome and
    /// returns whether all of them passed. Never fails the iteration.
    pub fn check(&mut self, response: &Response, checks: &[Check]) -> bool {
        let mut all = true;
        for check in checks {
            let passed = (check.predicate)(response);
            self.local_stats.checks.push((check.name, passed));
            all &= passed;
        }
        all
    }

    pub async fn sleep(&self, duration: Duration) {
        sleep(duration).await;
    }

    pub(crate) fn record_iteration(&mut self, elapsed: Duration) {
        self.local_stats.iterations += 1;
        let _ = self
            .local_stats
            .iteration_duration
            .record(elapsed.as_micros() as u64);
        self.iteration += 1;
    }

    pub(crate) fn record_error(&mut self, error: String) {
        self.local_stats.record_error(error);
    }

    pub(crate) fn maybe_flush(&mut self) {
        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush_stats();
        }
    }

    pub(crate) fn flush_stats(&mut self) {
        self.stats.merge(&mut self.local_stats);
        self.last_flush = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHECKS: &[Check] = &[
        Check::new("is 200", |r| r.status() == 200),
        Check::new("is 500", |r| r.status() == 500),
    ];

    fn ctx(base_url: &str, stats: Arc<Stats>) -> VuContext {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        VuContext::new(client, Arc::from(base_url), stats, 1).unwrap()
    }

    #[tokio::test]
    async fn post_json_records_failed_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let stats = Arc::new(Stats::new().unwrap());
        let mut ctx = ctx(&server.uri(), stats.clone());
        let res = ctx
            .post_json("/process", &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(res.status(), 500);
        assert!(!ctx.check(&res, CHECKS));
        ctx.flush_stats();

        let snap = stats.snapshot(Duration::from_secs(1));
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.bytes_sent, 7);
        assert_eq!(snap.errors.get("Non 2xx and non 3xx status code"), Some(&1));
        assert_eq!(snap.check_totals(), (1, 1));
    }

    #[tokio::test]
    async fn transport_error_becomes_status_zero() {
        // Nothing listens on the discard port
        let stats = Arc::new(Stats::new().unwrap());
        let mut ctx = ctx("http://127.0.0.1:9", stats.clone());
        let res = ctx.get("/process").await;
        assert_eq!(res.status(), 0);
        assert!(res.error().is_some());
        assert!(res.is_failed());
        assert!(!ctx.check(&res, CHECKS));
        ctx.flush_stats();

        let snap = stats.snapshot(Duration::from_secs(1));
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.check_totals(), (0, 2));
    }

    #[tokio::test]
    async fn absolute_urls_bypass_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let stats = Arc::new(Stats::new().unwrap());
        let mut ctx = ctx("http://127.0.0.1:9", stats);
        let res = ctx.get(&format!("{}/health", server.uri())).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.text(), "OK");
        assert!(!res.is_failed());
    }

    #[tokio::test]
    async fn truncated_body_keeps_status() {
        // Promises 100 bytes of body, sends 3 and hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\n\r\nabc")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let stats = Arc::new(Stats::new().unwrap());
        let mut ctx = ctx(&format!("http://{}", addr), stats.clone());
        let res = ctx.get("/process").await;
        assert_eq!(res.status(), 500);
        assert!(res.is_failed());
        let error = res.error().unwrap().to_owned();
        assert!(error.starts_with("Response processing error"), "{}", error);
        assert!(!ctx.check(&res, CHECKS));
        ctx.flush_stats();

        let snap = stats.snapshot(Duration::from_secs(1));
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.errors.get(&error), Some(&1));
        assert_eq!(snap.errors.get("Non 2xx and non 3xx status code"), Some(&1));
        // "is 500" holds, "is 200" does not
        assert_eq!(snap.check_totals(), (1, 1));
    }
}
