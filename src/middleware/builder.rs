use crate::backend::{Backend, Verdict};
use crate::engine::Limiter;
use crate::error::{format_reset, reset_after, RateLimitExceeded};
use crate::middleware::{DeniedResponse, RateLimiter};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimiterBuilder<B> {
    limiter: Limiter<B>,
    fail_open: bool,
    informational_headers: bool,
    denied_response: Rc<DeniedResponse>,
}

impl<B: Backend + 'static> RateLimiterBuilder<B> {
    pub(super) fn new(limiter: Limiter<B>) -> Self {
        Self {
            limiter,
            fail_open: false,
            informational_headers: false,
            denied_response: Rc::new(|rejection: &RateLimitExceeded| rejection.error_response()),
        }
    }

    /// Choose whether to allow a request if the backend returns a failure.
    ///
    /// Default is false.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Also set the following headers on admitted responses:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (timestamp at which the window resets)
    ///
    /// Rejected responses always carry them. Default is false.
    pub fn informational_headers(mut self, enabled: bool) -> Self {
        self.informational_headers = enabled;
        self
    }

    /// In the event that the request is rejected, configure the [HttpResponse] returned.
    ///
    /// Defaults to the [RateLimitExceeded] response: status 429, rate limit headers and a JSON
    /// body with the `RATE_LIMIT_EXCEEDED` code.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&RateLimitExceeded) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<B> {
        RateLimiter {
            limiter: self.limiter,
            fail_open: self.fail_open,
            informational_headers: self.informational_headers,
            denied_response: self.denied_response,
        }
    }
}

pub(crate) fn insert_informational_headers(map: &mut HeaderMap, limit: u64, verdict: Verdict) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(verdict.remaining_points()),
    );
    let reset = reset_after(Utc::now(), verdict.ms_before_next());
    if let Ok(value) = HeaderValue::from_str(&format_reset(reset)) {
        map.insert(X_RATELIMIT_RESET.clone(), value);
    }
}
