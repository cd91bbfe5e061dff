//! HTTP route handlers.

mod health;
mod hello;

use actix_web::web;

/// Register all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .route("/hello", web::get().to(hello::hello)),
    );
}
