//! Rate-limit detector.
//!
//! The agent reports usage-limit backpressure with a sentinel line of the form
//! `Claude AI usage limit reached|<unix-seconds>`, on stdout or stderr. It is
//! the only signal that turns a failure into a scheduled automatic resume.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    pub is_rate_limited: bool,
    /// Epoch-ms when the limit resets
    pub reset_time_ms: Option<i64>,
}

impl RateLimitInfo {
    fn not_limited() -> Self {
        Self::default()
    }
}

fn sentinel() -> &'static Regex {
    static SENTINEL: OnceLock<Regex> = OnceLock::new();
    SENTINEL.get_or_init(|| Regex::new(r"Claude AI usage limit reached\|(\d+)").unwrap())
}

/// Look for the sentinel in a single piece of failure text.
pub fn detect(text: &str) -> RateLimitInfo {
    let Some(caps) = sentinel().captures(text) else {
        return RateLimitInfo::not_limited();
    };
    let reset_ms = caps[1]
        .parse::<i64>()
        .ok()
        .and_then(|secs| secs.checked_mul(1000));
    match reset_ms {
        Some(ms) => RateLimitInfo {
            is_rate_limited: true,
            reset_time_ms: Some(ms),
        },
        None => RateLimitInfo::not_limited(),
    }
}

/// Check both streams; stderr wins when both carry a sentinel.
pub fn detect_in_output(stdout: &str, stderr: &str) -> RateLimitInfo {
    let info = detect(stderr);
    if info.is_rate_limited {
        return info;
    }
    detect(stdout)
}
