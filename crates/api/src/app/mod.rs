//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: catalog/tracker/verifier wiring and background dispatch
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router, error_handling::HandleErrorLayer, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, build_services};

/// Hard cap on one request, body buffering and signature check included.
///
/// Handlers acknowledge before any catalog call, so this only trips on a
/// stalled client or a wedged handler.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: AppServices) -> Router {
    let signature_state = middleware::SignatureState {
        verifier: services.verifier.clone(),
    };
    let services = Arc::new(services);

    // Signed routes: every webhook passes signature verification first.
    let webhooks = routes::webhooks::router().layer(axum::middleware::from_fn_with_state(
        signature_state,
        middleware::signature_middleware,
    ));

    let router = Router::new()
        .route("/", get(routes::system::status))
        .route("/health", get(routes::system::health))
        .merge(webhooks)
        .layer(Extension(services));

    with_request_timeout(router, REQUEST_TIMEOUT)
}

fn with_request_timeout(router: Router, timeout: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(errors::handle_layer_error))
            .timeout(timeout),
    )
}
