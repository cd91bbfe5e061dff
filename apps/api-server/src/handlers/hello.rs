//! Demo endpoint sitting behind the rate limiter.

use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

#[derive(Serialize)]
pub struct HelloResponse {
    pub message: String,
}

/// GET /api/hello
pub async fn hello(req: HttpRequest) -> HttpResponse {
    let who = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("anonymous")
        .to_string();

    HttpResponse::Ok().json(HelloResponse {
        message: format!("hello, {who}"),
    })
}
