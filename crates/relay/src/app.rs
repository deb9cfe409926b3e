use std::time::Instant;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::context::RelayContext;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, RelayError,
};
use crate::ws;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(context: RelayContext) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(Router::new().route("/readyz", get(readyz)).with_state(context.clone()))
            .merge(ws::router(context))
            .fallback(not_found),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn readyz(State(context): State<RelayContext>) -> Response {
    match context.messages.ping().await {
        Ok(()) => (StatusCode::OK, "ready").into_response(),
        Err(store_error) => {
            error!(error = %store_error, "readiness check failed");
            RelayError::from(store_error).into_response()
        }
    }
}

async fn not_found() -> Response {
    RelayError::from_code(ErrorCode::NotFound).into_response()
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use courier_common::protocol::ws::EchoMode;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, MAX_REQUEST_BODY_BYTES};
    use crate::{
        auth::jwt::JwtAuthenticator,
        context::RelayContext,
        store::{FaultSwitch, InjectedFault},
    };

    fn test_router(faults: FaultSwitch) -> Router {
        let authenticator = Arc::new(
            JwtAuthenticator::new(b"courier_test_secret_that_is_definitely_long_enough", None)
                .expect("test authenticator should initialize"),
        );
        build_router(RelayContext::in_memory(
            authenticator,
            EchoMode::Raw,
            Duration::from_millis(50),
            faults,
        ))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request should build")
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router(FaultSwitch::default())
            .oneshot(get_request("/healthz"))
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let response = test_router(FaultSwitch::default())
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-abc")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-abc")
        );
    }

    #[tokio::test]
    async fn readiness_reflects_store_reachability() {
        let faults = FaultSwitch::default();
        let app = test_router(faults.clone());

        let ready = app.clone().oneshot(get_request("/readyz")).await.expect("readyz response");
        assert_eq!(ready.status(), StatusCode::OK);

        faults.set(Some(InjectedFault::Unreachable));
        let down = app.oneshot(get_request("/readyz")).await.expect("readyz response");
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(down.into_body(), usize::MAX).await.expect("body");
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(parsed["error"]["code"], "STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn unknown_routes_return_structured_not_found() {
        let response = test_router(FaultSwitch::default())
            .oneshot(get_request("/nope"))
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(get_request("/panic"))
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
