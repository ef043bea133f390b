use crate::middleware::builder::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use crate::policy::InvalidPolicy;
use crate::profile::{Profile, ProfileName};
use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid quota policy for the {profile} profile: {source}")]
    InvalidPolicy {
        profile: ProfileName,
        #[source]
        source: InvalidPolicy,
    },
    #[error("Custom profile {0} is registered more than once")]
    DuplicateProfile(String),
}

/// The client facing failure for a rejected request.
///
/// Every profile produces the same shape, only the header values and the message differ.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RateLimitExceeded {
    /// The point quota of the profile that rejected the request.
    pub limit: u64,
    /// Milliseconds until another request may be admitted.
    pub ms_before_next: u64,
    /// Absolute time at which another request may be admitted.
    pub reset: DateTime<Utc>,
    pub message: Cow<'static, str>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
    status_code: u16,
}

impl RateLimitExceeded {
    pub fn new(profile: &Profile, ms_before_next: u64) -> Self {
        Self::at(profile, ms_before_next, Utc::now())
    }

    pub fn at(profile: &Profile, ms_before_next: u64, now: DateTime<Utc>) -> Self {
        Self {
            limit: profile.policy().points(),
            ms_before_next,
            reset: reset_after(now, ms_before_next),
            message: Cow::Borrowed(profile.message()),
        }
    }

    /// Seconds a client should wait (rounded upwards, so that the limit is guaranteed to be
    /// reset after waiting for the duration), never less than one.
    pub fn retry_after(&self) -> u64 {
        self.ms_before_next.div_ceil(1000).max(1)
    }

    /// The reset time as an RFC 3339 UTC timestamp with millisecond precision.
    pub fn reset_timestamp(&self) -> String {
        format_reset(self.reset)
    }
}

/// `now + ms`, saturating at the latest representable time.
pub(crate) fn reset_after(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn format_reset(reset: DateTime<Utc>) -> String {
    reset.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ResponseError for RateLimitExceeded {
    fn status_code(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code()).json(ErrorBody {
            success: false,
            error: ErrorDetail {
                code: RATE_LIMIT_EXCEEDED,
                message: &self.message,
                status_code: self.status_code().as_u16(),
            },
        });
        let map = response.headers_mut();
        map.insert(RETRY_AFTER, HeaderValue::from(self.retry_after()));
        map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(self.limit));
        map.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u64));
        if let Ok(reset) = HeaderValue::from_str(&self.reset_timestamp()) {
            map.insert(X_RATELIMIT_RESET.clone(), reset);
        }
        response
    }
}
