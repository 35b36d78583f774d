//! Request-level retry policy.
//!
//! Classifies a failed completion request as rate-limited, retryable, or
//! final, and computes the exponential backoff between attempts. Tool-call
//! failures inside a stream are handled by the session controller, not here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Status codes that indicate a transient server-side failure.
const RETRYABLE_STATUSES: [u16; 5] = [500, 502, 503, 504, 529];

const RATE_LIMIT_PHRASES: [&str; 4] =
    ["rate limit", "rate_limit", "too many requests", "rate-limit"];

const TRANSIENT_PHRASES: [&str; 7] = [
    "overload",
    "timeout",
    "timed out",
    "gateway",
    "service unavailable",
    "internal server error",
    "connection reset",
];

/// Suggested wait for a rate-limited request that names no retry-after hint.
const RATE_LIMIT_FALLBACK_DELAY: Duration = Duration::from_secs(5);

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the exponential delay.
    pub jitter_ratio: f64,
    /// Surfaced failure messages are truncated to this many characters.
    pub max_message_chars: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter_ratio: 0.2,
            max_message_chars: 300,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1 = first retry), with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let fraction = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter_ratio)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, fraction)
    }

    /// Deterministic core of [`delay_for`](Self::delay_for).
    ///
    /// `jitter_fraction` is clamped to `[0, jitter_ratio]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let exponential = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let fraction = jitter_fraction.clamp(0.0, self.jitter_ratio.max(0.0));
        let jitter = (exponential as f64 * fraction).round() as u64;
        Duration::from_millis(exponential.saturating_add(jitter).min(self.max_delay_ms))
    }
}

/// Backoff for retry `attempt` under the default policy (500 ms doubling, 20% jitter, 5 s cap).
pub fn backoff_delay(attempt: u32) -> Duration {
    RetryPolicy::default().delay_for(attempt)
}

// ─── Wrapped status extraction ───────────────────────────────────────────────

/// Pull the real HTTP status out of a wrapped remote error message.
///
/// Tool-server connection failures reach us as a generic outer error (for
/// example a 400 `invalid_request_error`) whose message text embeds the
/// downstream response as `"... HTTP 500 ..."`, sometimes inside a JSON
/// envelope. This is the only place that understands that convention.
pub fn extract_wrapped_status(message: &str) -> Option<u16> {
    for inner in envelope_messages(message) {
        if let Some(status) = scan_http_status(&inner) {
            return Some(status);
        }
    }
    scan_http_status(message)
}

/// Whether the message wraps a downstream HTTP failure.
pub fn is_wrapped_connection_error(message: &str) -> bool {
    extract_wrapped_status(message).is_some()
}

/// Collect `message` strings from a JSON envelope embedded in `text`.
fn envelope_messages(text: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    collect_messages(&value, &mut found);
    found
}

fn collect_messages(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                match v {
                    serde_json::Value::String(s) if key == "message" => {
                        // Envelopes nest: the inner message may itself be JSON.
                        out.extend(envelope_messages(s));
                        out.push(s.clone());
                    }
                    _ => collect_messages(v, out),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_messages(item, out);
            }
        }
        _ => {}
    }
}

/// Find `HTTP <3 digits>` (case-insensitive) and return the code.
fn scan_http_status(text: &str) -> Option<u16> {
    let lower = text.to_ascii_lowercase();
    for (idx, _) in lower.match_indices("http") {
        let rest = lower[idx + 4..].trim_start_matches([' ', ':', '/']);
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() == 3 {
            if let Ok(code) = digits.parse::<u16>() {
                if (100..600).contains(&code) {
                    return Some(code);
                }
            }
        }
    }
    None
}

// ─── Classification ──────────────────────────────────────────────────────────

/// True for an explicit 429 or a rate-limit phrase in the message.
pub fn is_rate_limited(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lower = message.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p))
}

/// True for transient server failures. Rate limits are never retried here.
pub fn is_retryable(status: Option<u16>, message: &str) -> bool {
    if is_rate_limited(status, message) {
        return false;
    }
    if status.is_some_and(|s| RETRYABLE_STATUSES.contains(&s)) {
        return true;
    }
    let lower = message.to_lowercase();
    TRANSIENT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Request-level failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    RetryableTransient,
    NonRetryable,
}

/// A failed request reduced to the two facts the policy looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    /// Outer status as reported by the transport.
    pub status: Option<u16>,
    pub message: String,
}

impl RequestFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from a transport error.
    ///
    /// The message is the remote's error text when there is one, so an
    /// `HTTP ddd` found in it is always a wrapped downstream status and never
    /// the outer status echoed back by `Display`.
    pub fn from_error(err: &InferenceError) -> Self {
        let message = match err.error_body() {
            Some(body) => body.to_string(),
            None => err.to_string(),
        };
        Self {
            status: err.status(),
            message,
        }
    }

    /// The embedded downstream status when wrapped, else the outer status.
    pub fn effective_status(&self) -> Option<u16> {
        extract_wrapped_status(&self.message).or(self.status)
    }

    pub fn is_wrapped_connection_error(&self) -> bool {
        is_wrapped_connection_error(&self.message)
    }

    pub fn is_rate_limited(&self) -> bool {
        is_rate_limited(self.effective_status(), &self.message)
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable(self.effective_status(), &self.message)
    }

    pub fn kind(&self) -> FailureKind {
        if self.is_rate_limited() {
            FailureKind::RateLimit
        } else if self.is_retryable() {
            FailureKind::RetryableTransient
        } else {
            FailureKind::NonRetryable
        }
    }

    /// How long the caller should wait before trying again, if at all.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.kind() {
            FailureKind::RateLimit => {
                Some(parse_retry_after(&self.message).unwrap_or(RATE_LIMIT_FALLBACK_DELAY))
            }
            FailureKind::RetryableTransient => Some(backoff_delay(1)),
            FailureKind::NonRetryable => None,
        }
    }
}

/// Parse `retry after N` / `retry-after: N` seconds out of a message.
fn parse_retry_after(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let idx = lower.find("retry after").or_else(|| lower.find("retry-after"))?;
    let rest = lower[idx + "retry after".len()..].trim_start_matches([' ', ':']);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let secs = digits.parse::<u64>().ok().filter(|s| *s > 0)?;
    Some(Duration::from_secs(secs))
}

/// What the caller sees once retries are exhausted or pointless.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request failed ({kind:?}): {message}")]
pub struct ClassifiedFailure {
    /// Effective status (embedded downstream status when wrapped).
    pub status: Option<u16>,
    /// Raw message, truncated for display.
    pub message: String,
    pub kind: FailureKind,
    pub retry_after: Option<Duration>,
}

impl ClassifiedFailure {
    pub fn from_failure(failure: &RequestFailure, max_message_chars: usize) -> Self {
        Self {
            status: failure.effective_status(),
            message: truncate_message(&failure.message, max_message_chars),
            kind: failure.kind(),
            retry_after: failure.suggested_retry_delay(),
        }
    }
}

/// Cut `message` to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let kept: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

// ─── Retry loop ──────────────────────────────────────────────────────────────

/// Run `op` until it succeeds, retrying transient failures with backoff.
///
/// `op` receives the zero-based attempt index. Rate-limited and
/// non-retryable failures return immediately; transient failures are retried
/// up to `policy.max_attempts` times.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ClassifiedFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let failure = RequestFailure::from_error(&err);
                let kind = failure.kind();
                if kind != FailureKind::RetryableTransient || attempt >= policy.max_attempts {
                    tracing::warn!(
                        attempt,
                        ?kind,
                        status = ?failure.effective_status(),
                        error = %err,
                        "request failed, not retrying"
                    );
                    return Err(ClassifiedFailure::from_failure(
                        &failure,
                        policy.max_message_chars,
                    ));
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    status = ?failure.effective_status(),
                    wrapped = failure.is_wrapped_connection_error(),
                    error = %err,
                    "transient request failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn wrapped(inner_status: u16) -> RequestFailure {
        let message = format!(
            r#"400 {{"type":"error","error":{{"type":"invalid_request_error","message":"Error connecting to MCP server 'store': HTTP {inner_status}: upstream said no"}}}}"#
        );
        RequestFailure::new(Some(400), message)
    }

    fn no_delay_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_wrapped_500_is_wrapped_and_retryable() {
        let failure = wrapped(500);
        assert!(failure.is_wrapped_connection_error());
        assert_eq!(failure.effective_status(), Some(500));
        assert!(failure.is_retryable());
        assert_eq!(failure.kind(), FailureKind::RetryableTransient);
    }

    #[test]
    fn test_wrapped_403_not_retryable() {
        let failure = wrapped(403);
        assert!(failure.is_wrapped_connection_error());
        assert!(!failure.is_retryable());
        assert!(!failure.is_rate_limited());
        assert!(failure.suggested_retry_delay().is_none());
    }

    #[test]
    fn test_wrapped_429_rate_limited_with_delay() {
        let failure = wrapped(429);
        assert!(failure.is_rate_limited());
        assert!(!failure.is_retryable());
        let delay = failure.suggested_retry_delay().unwrap();
        assert!(delay > Duration::ZERO);
    }

    #[test]
    fn test_unwrapped_outer_status_used() {
        let failure = RequestFailure::new(Some(400), "invalid_request_error: bad field");
        assert!(!failure.is_wrapped_connection_error());
        assert_eq!(failure.effective_status(), Some(400));
        assert_eq!(failure.kind(), FailureKind::NonRetryable);
    }

    #[test]
    fn test_plain_text_body_wrapping_500_is_retryable() {
        let err = InferenceError::HttpError {
            status: 400,
            body: "invalid_request_error: Error connecting to MCP server 'store': HTTP 500 Internal"
                .into(),
        };
        let failure = RequestFailure::from_error(&err);
        assert!(failure.is_wrapped_connection_error());
        assert_eq!(failure.effective_status(), Some(500));
        assert_eq!(failure.kind(), FailureKind::RetryableTransient);
    }

    #[test]
    fn test_plain_http_error_is_not_wrapped() {
        let err = InferenceError::HttpError {
            status: 401,
            body: "invalid x-api-key".into(),
        };
        let failure = RequestFailure::from_error(&err);
        assert!(!failure.is_wrapped_connection_error());
        assert_eq!(failure.effective_status(), Some(401));
        assert_eq!(failure.kind(), FailureKind::NonRetryable);
    }

    #[test]
    fn test_local_errors_keep_display_text() {
        let failure = RequestFailure::from_error(&InferenceError::Timeout { duration_secs: 180 });
        assert_eq!(failure.status, None);
        assert_eq!(failure.message, "inference timeout after 180s");
        assert_eq!(failure.kind(), FailureKind::RetryableTransient);
    }

    #[test]
    fn test_rate_limit_phrase_without_status() {
        assert!(is_rate_limited(None, "Rate limit exceeded for org"));
        assert!(!is_retryable(Some(503), "Too Many Requests"));
    }

    #[test]
    fn test_retryable_statuses_and_phrases() {
        for status in RETRYABLE_STATUSES {
            assert!(is_retryable(Some(status), ""), "{status} should retry");
        }
        assert!(is_retryable(None, "Overloaded"));
        assert!(is_retryable(None, "504 Gateway Timeout"));
        assert!(!is_retryable(Some(404), "not found"));
    }

    #[test]
    fn test_retry_after_hint_parsed() {
        let failure = RequestFailure::new(Some(429), "rate limited, retry after 12 seconds");
        assert_eq!(failure.suggested_retry_delay(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_millis(500));
        assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_with_jitter(3, 0.0), Duration::from_millis(2_000));
        assert_eq!(policy.delay_with_jitter(1, 0.2), Duration::from_millis(600));
        assert_eq!(policy.delay_with_jitter(10, 0.2), Duration::from_millis(5_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        for _ in 0..50 {
            let delay = backoff_delay(2);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_200));
        }
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        let long = "x".repeat(50);
        let cut = truncate_message(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&no_delay_policy(), |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(InferenceError::HttpError {
                        status: 503,
                        body: "unavailable".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&no_delay_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(InferenceError::HttpError {
                    status: 401,
                    body: "invalid x-api-key".into(),
                })
            }
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::NonRetryable);
        assert_eq!(failure.status, Some(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_and_truncates() {
        let policy = RetryPolicy {
            max_attempts: 2,
            max_message_chars: 20,
            ..no_delay_policy()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(InferenceError::HttpError {
                    status: 529,
                    body: "overloaded ".repeat(10),
                })
            }
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.kind, FailureKind::RetryableTransient);
        assert_eq!(failure.message.chars().count(), 20);
    }

    #[tokio::test]
    async fn test_rate_limit_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&no_delay_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(InferenceError::HttpError {
                    status: 429,
                    body: "slow down".into(),
                })
            }
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::RateLimit);
        assert!(failure.retry_after.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
