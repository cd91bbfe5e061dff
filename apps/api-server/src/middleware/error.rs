//! HTTP responses for gate rejections (RFC 7807 problem bodies).

use actix_web::HttpResponse;
use floodgate_core::GateError;
use serde::Serialize;

/// RFC 7807 Problem Details body.
#[derive(Debug, Serialize)]
pub struct ProblemBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemBody {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            error_type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Map a gate rejection to its HTTP response.
///
/// Missing identity and bad configuration are the caller's fault (400);
/// an exhausted budget is surfaced as 408 Request Timeout with the usual
/// rate limit headers.
pub fn rejection_response(err: &GateError) -> HttpResponse {
    match err {
        GateError::MissingIdentity => HttpResponse::BadRequest().json(
            ProblemBody::new(400, "Bad Request")
                .with_detail("request carries no source address"),
        ),
        GateError::InvalidWindow(secs) => HttpResponse::BadRequest().json(
            ProblemBody::new(400, "Bad Request")
                .with_detail(format!("invalid rate limit window: {secs}s")),
        ),
        GateError::LimitExceeded {
            limit, retry_after, ..
        } => HttpResponse::RequestTimeout()
            .insert_header(("Retry-After", retry_after.as_secs().to_string()))
            .insert_header(("X-RateLimit-Limit", limit.to_string()))
            .insert_header(("X-RateLimit-Remaining", "0"))
            .json(ProblemBody::new(408, "Request Timeout").with_detail(format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after.as_secs()
            ))),
    }
}
