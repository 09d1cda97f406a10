//! Uniform retry/backoff envelope around every Graph API call
//!
//! Every call made through [`execute_with_retry`] is classified into the
//! taxonomy below; only the `Transient` class is retried here. Everything
//! else is reported upward unchanged so callers can branch on it.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::response::ResponseHolder;

/// Base delay for exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling; no sleep ever exceeds this.
pub const BACKOFF_CAP: Duration = Duration::from_secs(120);
/// Fixed sleep applied to 503/504 responses.
pub const SERVER_BUSY_SLEEP: Duration = Duration::from_secs(30);
/// Retry ceiling: with a 120s cap and per-call data timeout this is roughly
/// a year of wall clock before the call gives up and turns fatal.
pub const MAX_ATTEMPTS: u32 = 175_200;

/// The reasons a call can fail, as surfaced to callers above the retry
/// wrapper. Only [`ApiError::Transient`] is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credentials missing/expired and silent refresh failed.
    #[error("authentication required")]
    AuthRequired,

    /// 400/401 on a token exchange using a refresh token; fatal, needs a
    /// fresh interactive login.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// 408/429/503/504 or a transport-level failure. Recovered internally
    /// by the retry loop; surfaces only once the retry ceiling is hit, at
    /// which point it has already been downgraded to [`ApiError::Timeout`].
    #[error("transient failure: {0}")]
    Transient(String),

    /// The retry ceiling (`MAX_ATTEMPTS`) was exceeded.
    #[error("exceeded retry ceiling")]
    Timeout,

    /// Any other non-2xx/3xx-accepted status, propagated for domain-
    /// specific handling by the caller (404 = not present, 412 = ETag
    /// mismatch, 416 = range unsatisfiable, ...).
    #[error("API error {status}: {reason}")]
    Api {
        status: u16,
        reason: String,
        body: Option<String>,
    },

    /// I/O failure reading the upload body or writing the download sink.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// The CA bundle could not be read; fatal, must abort the process.
    #[error("SSL/CA error: {0}")]
    IntegritySsl(String),

    /// Detected at transport init time when available disk space is zero.
    #[error("disk full")]
    DiskFull,
}

/// Outcome of classifying one HTTP status code.
#[derive(Debug, PartialEq, Eq)]
pub enum Classification {
    Success,
    AuthNeeded,
    RateLimited,
    ServerBusy,
    NoResponse,
    Other,
}

/// Classifies a status code per the taxonomy table. Does not itself sleep
/// or retry; [`execute_with_retry`] acts on the result.
pub fn classify(status: u16) -> Classification {
    match status {
        0 => Classification::Success,
        s if (100..300).contains(&s) => Classification::Success,
        301 | 302 | 304 | 307 | 308 => Classification::Success,
        400 | 401 => Classification::AuthNeeded,
        408 | 429 => Classification::RateLimited,
        503 | 504 => Classification::ServerBusy,
        _ => Classification::Other,
    }
}

/// `delay = min(2^attempt * base, cap)`, guarding against integer overflow
/// for very large attempt counts by clamping straight to the cap.
pub fn backoff_delay(attempt: u32) -> Duration {
    match 2u64.checked_pow(attempt.min(63)) {
        Some(factor) => match factor.checked_mul(BACKOFF_BASE.as_secs().max(1)) {
            Some(secs) => Duration::from_secs(secs).min(BACKOFF_CAP),
            None => BACKOFF_CAP,
        },
        None => BACKOFF_CAP,
    }
}

/// Parses a `Retry-After` header value, which is either an integer number
/// of seconds or an HTTP-date. Falls back to `default` on anything else.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Ok(when) = httpdate::parse_http_date(value.trim()) {
        if let Ok(remaining) = when.duration_since(std::time::SystemTime::now()) {
            return remaining;
        }
        return Duration::from_secs(0);
    }
    default
}

/// One attempt's raw outcome, as reported by the caller's closure.
pub enum AttemptOutcome<T> {
    /// The transport returned a status; `T` is whatever the caller parsed
    /// from the body for a successful/accepted status.
    Responded { status: u16, value: Option<T> },
    /// The transport failed before populating a status (DNS, connect,
    /// TLS, timeout). Retried with backoff; an SSL-CA error is fatal.
    TransportError { message: String, ssl_ca_fatal: bool },
    /// The transport returned without a status at all.
    NoResponse,
}

/// Drives one retry-wrapped call. `attempt` takes ownership of a freshly
/// reset response holder, performs a single try, and hands the holder back
/// alongside the outcome (so its status/headers survive for the caller to
/// inspect even on the final, returned attempt). `on_retry` is invoked
/// before every sleep so the caller can set the engine's `fresh_connect`
/// flag per the cross-cutting contract.
pub async fn execute_with_retry<T, F, Fut, R>(
    mut attempt: F,
    mut on_retry: R,
) -> (ResponseHolder, Result<T, ApiError>)
where
    F: FnMut(ResponseHolder) -> Fut,
    Fut: std::future::Future<Output = (ResponseHolder, AttemptOutcome<T>)>,
    R: FnMut(),
{
    let mut holder = ResponseHolder::new();
    let mut had_retry = false;

    for attempt_no in 0..MAX_ATTEMPTS {
        holder.reset();
        let (returned_holder, outcome) = attempt(holder).await;
        holder = returned_holder;
        match outcome {
            AttemptOutcome::Responded { status, value } => {
                match classify(status) {
                    Classification::Success => {
                        if had_retry {
                            info!("Internet connectivity restored");
                        }
                        let result = value.ok_or_else(|| ApiError::Api {
                            status,
                            reason: holder.reason().to_string(),
                            body: None,
                        });
                        return (holder, result);
                    }
                    Classification::AuthNeeded => {
                        warn!(status, "authorization needed");
                        return (holder, Err(ApiError::AuthRequired));
                    }
                    Classification::RateLimited => {
                        let retry_after = holder
                            .retry_after()
                            .map(|v| parse_retry_after(v, backoff_delay(attempt_no)))
                            .unwrap_or_else(|| backoff_delay(attempt_no));
                        debug!(status, ?retry_after, attempt = attempt_no, "rate limited, backing off");
                        had_retry = true;
                        on_retry();
                        tokio::time::sleep(retry_after).await;
                        continue;
                    }
                    Classification::ServerBusy => {
                        debug!(status, attempt = attempt_no, "transient server error, sleeping 30s");
                        had_retry = true;
                        on_retry();
                        tokio::time::sleep(SERVER_BUSY_SLEEP).await;
                        continue;
                    }
                    Classification::NoResponse => unreachable!("status implies a response"),
                    Classification::Other => {
                        let result = Err(ApiError::Api {
                            status,
                            reason: holder.reason().to_string(),
                            body: std::str::from_utf8(holder.raw()).ok().map(|s| s.to_string()),
                        });
                        return (holder, result);
                    }
                }
            }
            AttemptOutcome::TransportError { message, ssl_ca_fatal } => {
                if ssl_ca_fatal {
                    return (holder, Err(ApiError::IntegritySsl(message)));
                }
                let delay = backoff_delay(attempt_no);
                warn!(attempt = attempt_no, error = %message, ?delay, "transport error, retrying");
                had_retry = true;
                on_retry();
                tokio::time::sleep(delay).await;
                continue;
            }
            AttemptOutcome::NoResponse => {
                warn!(attempt = attempt_no, "transport returned without a status, synthetic 506");
                let result = Err(ApiError::Api {
                    status: 506,
                    reason: "No Response".to_string(),
                    body: None,
                });
                return (holder, result);
            }
        }
    }

    (holder, Err(ApiError::Timeout))
}

mod httpdate {
    use std::time::SystemTime;

    /// Minimal RFC 2822 / HTTP-date parser for `Retry-After` headers that
    /// carry a date instead of a delta-seconds value.
    pub fn parse_http_date(value: &str) -> Result<SystemTime, ()> {
        chrono::DateTime::parse_from_rfc2822(value)
            .map(|dt| SystemTime::from(dt.with_timezone(&chrono::Utc)))
            .map_err(|_| ())
    }
}
