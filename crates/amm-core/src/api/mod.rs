//! API clients for external market-data services.

pub mod binance;
pub mod subgraph;

pub use binance::BinanceClient;
pub use subgraph::SubgraphClient;

use crate::{Error, Result};
use reqwest::StatusCode;
use std::time::Duration as StdDuration;
use tracing::warn;

/// Outcome of advancing a pagination cursor after a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Request the next page from this position.
    Next(i64),
    /// The window is exhausted.
    Done,
    /// The page did not move the cursor forward; paging further would loop.
    Stalled,
}

pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(StdDuration::from_secs(30))
        .connect_timeout(StdDuration::from_secs(10))
        .build()?)
}

/// How a response status is handled by [`send_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Accept,
    /// Server error; retry on the normal schedule.
    Retry,
    /// HTTP 429; retry on the slower schedule.
    RateLimited,
    /// Any other client error.
    Fail,
}

impl RetryAction {
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Accept
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited
        } else if status.is_server_error() {
            Self::Retry
        } else {
            Self::Fail
        }
    }
}

/// Attempt budget and exponential backoff for API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: StdDuration,
    pub rate_limit_backoff: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: StdDuration::from_millis(500),
            rate_limit_backoff: StdDuration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Pause after the zero-based `attempt` failed with `action`.
    pub fn delay(&self, action: RetryAction, attempt: u32) -> StdDuration {
        let base = match action {
            RetryAction::RateLimited => self.rate_limit_backoff,
            _ => self.backoff,
        };
        base * 2u32.saturating_pow(attempt)
    }
}

/// Send a request, retrying server errors, rate limits and transport
/// failures under `policy`. Other client errors fail on the first response.
pub(crate) async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response> {
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        let Some(attempt_request) = request.try_clone() else {
            // Streaming bodies cannot be replayed.
            return Ok(request.send().await?.error_for_status()?);
        };

        let (action, error) = match attempt_request.send().await {
            Ok(response) => {
                let status = response.status();
                let action = RetryAction::for_status(status);
                let error = Error::Api {
                    message: format!("{} returned {}", response.url(), status),
                    status: Some(status.as_u16()),
                };
                match action {
                    RetryAction::Accept => return Ok(response),
                    RetryAction::Fail => return Err(error),
                    RetryAction::Retry | RetryAction::RateLimited => {
                        warn!(
                            attempt = attempt + 1,
                            status = %status,
                            url = %response.url(),
                            rate_limited = action == RetryAction::RateLimited,
                            "Retryable API error, backing off"
                        );
                        (action, error)
                    }
                }
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "HTTP request failed, backing off");
                (RetryAction::Retry, Error::Http(e))
            }
        };

        last_error = Some(error);
        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.delay(action, attempt)).await;
        }
    }

    Err(last_error.unwrap_or(Error::Api {
        message: "No attempts allowed by retry policy".to_string(),
        status: None,
    }))
}

/// Minimal HTTP/1.1 responder for client tests. Each accepted connection gets
/// the next canned response and is then closed.
#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    pub(crate) type RequestLog = Arc<Mutex<Vec<String>>>;

    /// Start serving `responses` in order. Returns the base URL and a log of
    /// every received request as `"<request line> <body>"`.
    pub(crate) async fn serve(responses: Vec<(u16, String)>) -> (String, RequestLog) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let log: RequestLog = Arc::default();
        let seen = log.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, log)
    }

    /// A URL nothing listens on.
    pub(crate) async fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
                let body_len = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + body_len {
                    let line = head.lines().next().unwrap_or_default().to_string();
                    let body = String::from_utf8_lossy(&buf[head_end + 4..head_end + 4 + body_len]);
                    return format!("{} {}", line, body);
                }
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}
