use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub const HEALTH_PATH: &str = "/health";
pub const READINESS_PATH: &str = "/ready";

/// Process-wide readiness flag reported on `/ready`.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn ready(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

pub fn build_router(readiness: Readiness) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(READINESS_PATH, get(ready))
        .with_state(readiness)
}

/// Bind the health server on `port` and serve until `token` is cancelled.
pub async fn start_health_server(
    port: u16,
    readiness: Readiness,
    token: CancellationToken,
) -> Result<JoinHandle<()>, std::io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("start health server on port {}", port);
    let router = build_router(readiness);
    Ok(tokio::spawn(async move {
        let shutdown = token.cancelled_owned();
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("health server failed: {}", e);
        }
        tracing::info!("health server stopped");
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    use super::{Readiness, build_router};

    async fn call(readiness: &Readiness, method: Method, uri: &str) -> (StatusCode, String) {
        let res = build_router(readiness.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let readiness = Readiness::default();
        assert_eq!(
            call(&readiness, Method::GET, "/health").await,
            (StatusCode::OK, "OK".to_string())
        );
    }

    #[tokio::test]
    async fn ready_follows_flag() {
        let readiness = Readiness::default();
        assert_eq!(
            call(&readiness, Method::GET, "/ready").await,
            (StatusCode::SERVICE_UNAVAILABLE, "Not Ready".to_string())
        );
        readiness.set_ready(true);
        assert_eq!(
            call(&readiness, Method::GET, "/ready").await,
            (StatusCode::OK, "Ready".to_string())
        );
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let readiness = Readiness::default();
        let (status, _) = call(&readiness, Method::POST, "/health").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
