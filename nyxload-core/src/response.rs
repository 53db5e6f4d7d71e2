use bytes::Bytes;
use std::time::Duration;

/// Outcome of one HTTP request. Transport failures are represented as a
/// response with status 0 and an error message rather than as an `Err`.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Bytes,
    headers_size: usize,
    duration: Duration,
    error: Option<String>,
}

impl Response {
    /// Reads the body of `res`. A body that cannot be read keeps the
    /// received status and headers; the read error is carried in `error`.
    pub(crate) async fn new(res: reqwest::Response, start: tokio::time::Instant) -> Self {
        let status = res.status().as_u16();
        let headers_size = res
            .headers()
            .iter()
            .map(|(k, v)| k.as_str().len() + v.len() + 4)
            .sum::<usize>()
            + 12;
        let (body, error) = match res.bytes().await {
            Ok(body) => (body, None),
            Err(e) => (Bytes::new(), Some(format!("Response processing error: {}", e))),
        };
        Self {
            status,
            body,
            headers_size,
            duration: start.elapsed(),
            error,
        }
    }

    pub(crate) fn failed(error: String, duration: Duration) -> Self {
        Self {
            status: 0,
            body: Bytes::new(),
            headers_size: 0,
            duration,
            error: Some(error),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Transport error or a status outside 200..=399.
    pub fn is_failed(&self) -> bool {
        !(200..400).contains(&self.status)
    }

    /// Returns total response size (body + headers + status line approximation)
    pub fn total_size(&self) -> usize {
        self.body.len() + self.headers_size
    }
}
