//! Rate limiting middleware.

use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::Error;
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::{HeaderName, HeaderValue};
use futures::future::LocalBoxFuture;

use floodgate_core::domain::RequestIdentity;
use floodgate_core::gate::LimiterGate;

use super::error::rejection_response;

/// Rate limiting middleware factory.
///
/// Puts every route behind the gate: requests are admitted or rejected
/// before the inner service runs, and admitted responses carry
/// `X-RateLimit-*` headers whenever the counter store answered.
pub struct RateLimit {
    gate: Arc<LimiterGate>,
}

impl RateLimit {
    pub fn new(gate: Arc<LimiterGate>) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service: Rc::new(service),
            gate: self.gate.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    gate: Arc<LimiterGate>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let gate = self.gate.clone();

        // Identity is derived once from transport metadata. The scope
        // label is the matched route pattern, so each endpoint gets its
        // own budget.
        let source_ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or_default()
            .to_string();
        let scope = req
            .match_pattern()
            .unwrap_or_else(|| req.path().to_string());
        let identity = RequestIdentity::new(source_ip, scope);

        Box::pin(async move {
            match gate.check(&identity).await {
                Ok(admission) => {
                    let res = service.call(req).await?;
                    let mut res = res.map_into_left_body();

                    if !admission.degraded {
                        if let Some(remaining) = admission.remaining {
                            let headers = res.headers_mut();
                            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                                headers.insert(
                                    HeaderName::from_static("x-ratelimit-remaining"),
                                    value,
                                );
                            }
                            if let Ok(value) =
                                HeaderValue::from_str(&gate.config().limit.to_string())
                            {
                                headers
                                    .insert(HeaderName::from_static("x-ratelimit-limit"), value);
                            }
                        }
                    }

                    Ok(res)
                }
                Err(err) => {
                    tracing::debug!(error = %err, "request rejected before handler");
                    let response = rejection_response(&err);
                    let (http_req, _payload) = req.into_parts();
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                }
            }
        })
    }
}
