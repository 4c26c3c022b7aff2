//! HTTP retry with exponential backoff.
//!
//! Every request to the remote index goes through [`send_json`]. The
//! request closure is invoked once per attempt because a
//! [`reqwest::RequestBuilder`] is consumed by `send()`.

use std::time::Duration;

use crate::FetchError;

/// Retries after the first attempt for connection errors, 429 and 5xx.
///
/// Backoff doubles from one second (1s, 2s, 4s), so a request that keeps
/// failing gives up after roughly seven seconds of waiting on top of the
/// per-request timeouts.
const MAX_RETRIES: u32 = 3;

/// Full re-fetches when a 2xx body is truncated or not valid JSON.
const MAX_BODY_RETRIES: u32 = 2;

/// Longest slice of an undecodable body quoted in logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends a request and decodes the body as JSON.
///
/// 4xx responses other than 429 are permanent and returned immediately as
/// [`FetchError::Status`], which lets callers treat a 404 as "nothing
/// here" rather than a failure.
///
/// # Errors
///
/// Returns [`FetchError`] once retries are exhausted or on a permanent
/// status.
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut body_attempt = 0;

    loop {
        let response = send_inner(&build_request).await?;
        let url = response.url().to_string();
        let status = response.status();

        let outcome = match response.text().await {
            Ok(text) => serde_json::from_str::<serde_json::Value>(&text).map_err(|e| {
                let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
                log::debug!("Undecodable body from {url} ({status}): {preview}");
                FetchError::Json(e)
            }),
            Err(e) => Err(FetchError::Http(e)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                let delay = backoff(body_attempt);
                log::warn!(
                    "Bad response body from {url} (body retry {body_attempt}/{MAX_BODY_RETRIES}) in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("Giving up on {url} after {MAX_BODY_RETRIES} body retries: {e}");
                return Err(e);
            }
        }
    }
}

async fn send_inner<F>(build_request: &F) -> Result<reqwest::Response, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = backoff(attempt);
            log::warn!("  retry {attempt}/{MAX_RETRIES} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < MAX_RETRIES {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(FetchError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                let retryable =
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

                if retryable && attempt < MAX_RETRIES {
                    log::warn!("  HTTP {status} from {}", response.url());
                    attempt += 1;
                    continue;
                }

                return Err(FetchError::Status {
                    url: response.url().to_string(),
                    status: status.as_u16(),
                });
            }
        }
    }
}

const fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
