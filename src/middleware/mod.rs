pub mod builder;
#[cfg(test)]
mod tests;

use crate::backend::{Backend, Verdict};
use crate::engine::Limiter;
use crate::error::RateLimitExceeded;
use crate::profile::RequestDescriptor;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{HttpResponse, ResponseError};
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

type DeniedResponse = dyn Fn(&RateLimitExceeded) -> HttpResponse;

/// Admission middleware for a single limiter profile.
///
/// Derives the profile's key from each request, consumes a point and either forwards the request
/// or answers with a 429; the wrapped service never runs for a rejected request.
pub struct RateLimiter<B> {
    limiter: Limiter<B>,
    fail_open: bool,
    informational_headers: bool,
    denied_response: Rc<DeniedResponse>,
}

impl<B: Clone> Clone for RateLimiter<B> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            fail_open: self.fail_open,
            informational_headers: self.informational_headers,
            denied_response: self.denied_response.clone(),
        }
    }
}

impl<B: Backend + 'static> RateLimiter<B> {
    /// # Arguments
    ///
    /// * `limiter`: The profile (and backend) to enforce, usually taken from a
    ///   [LimiterRegistry](crate::LimiterRegistry).
    pub fn builder(limiter: Limiter<B>) -> RateLimiterBuilder<B> {
        RateLimiterBuilder::new(limiter)
    }
}

impl<S, Bd, B> Transform<S, ServiceRequest> for RateLimiter<B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<Bd>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    Bd: 'static,
    B: Backend + 'static,
{
    type Response = ServiceResponse<EitherBody<Bd>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, B>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            fail_open: self.fail_open,
            informational_headers: self.informational_headers,
            denied_response: self.denied_response.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, B> {
    service: Rc<S>,
    limiter: Limiter<B>,
    fail_open: bool,
    informational_headers: bool,
    denied_response: Rc<DeniedResponse>,
}

impl<S, Bd, B> Service<ServiceRequest> for RateLimiterMiddleware<S, B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<Bd>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    Bd: 'static,
    B: Backend + 'static,
{
    type Response = ServiceResponse<EitherBody<Bd>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let fail_open = self.fail_open;
        let informational_headers = self.informational_headers;
        let denied_response = self.denied_response.clone();

        Box::pin(async move {
            let profile = limiter.profile();
            let descriptor = RequestDescriptor::from_request(&req);
            let key = match profile.derive_key(&descriptor) {
                Ok(key) => key,
                Err(e) => {
                    log::error!("Rate limiter key derivation failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            // The point stays consumed even if the request is cancelled from here on.
            let verdict = match limiter.consume(&key).await {
                Ok(verdict) => Some(verdict),
                Err(e) => {
                    if fail_open {
                        log::warn!("Rate limiter failed: {e}, allowing the request anyway");
                        None
                    } else {
                        log::error!("Rate limiter failed: {e}");
                        return Ok(req.into_response(e.error_response()).map_into_right_body());
                    }
                }
            };

            if let Some(Verdict::Rejected { ms_before_next }) = verdict {
                log::warn!(
                    "{} rate limit exceeded for {} on {} {}",
                    profile.name(),
                    descriptor.client_address.as_deref().unwrap_or("unknown"),
                    descriptor.method,
                    req.path()
                );
                let rejection = RateLimitExceeded::new(profile, ms_before_next);
                let response = (denied_response)(&rejection);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let limit = profile.policy().points();
            let mut service_response = service.call(req).await?;

            if let (true, Some(verdict)) = (informational_headers, verdict) {
                builder::insert_informational_headers(
                    service_response.headers_mut(),
                    limit,
                    verdict,
                );
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
