//! Administrative HTTP surface
//!
//! - `POST /api/reload` (GET also accepted) reloads restream definitions;
//!   200 on success, 500 when the definition source cannot be read
//! - `GET /api/stats` returns every restream keyed by identifier

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::registry::RestreamSnapshot;
use crate::relay::Relay;

/// Build the admin router
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/api/reload", get(reload_handler).post(reload_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(relay)
}

async fn reload_handler(State(relay): State<Relay>) -> StatusCode {
    match relay.reload().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Reload via API failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn stats_handler(State(relay): State<Relay>) -> Json<BTreeMap<String, RestreamSnapshot>> {
    let stats = relay
        .list()
        .await
        .into_iter()
        .map(|snapshot| (snapshot.id.clone(), snapshot))
        .collect();
    Json(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::definitions::{DirectorySource, RestreamDefinition, StaticDefinitions};
    use crate::transport::memory::MemoryConnector;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_reload_then_stats() {
        let definitions = Arc::new(StaticDefinitions::new(vec![RestreamDefinition::new(
            "r1", "Test",
        )
        .endpoint("e1", "E1", "mem://dest1")]));
        let app = router(Relay::new(definitions, Arc::new(MemoryConnector::new())));

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/reload"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request(Method::GET, "/api/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["r1"]["name"], "Test");
        assert_eq!(json["r1"]["streaming"], false);
        assert_eq!(json["r1"]["endpoints"]["e1"]["url"], "mem://dest1");
        assert_eq!(json["r1"]["stats"]["rxBytes"], 0);
    }

    #[tokio::test]
    async fn test_reload_get_is_accepted() {
        let app = router(Relay::new(
            Arc::new(StaticDefinitions::default()),
            Arc::new(MemoryConnector::new()),
        ));

        let response = app.oneshot(request(Method::GET, "/api/reload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_failure_is_500() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("missing");
        let app = router(Relay::new(
            Arc::new(DirectorySource::new(missing)),
            Arc::new(MemoryConnector::new()),
        ));

        let response = app.oneshot(request(Method::POST, "/api/reload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let app = router(Relay::new(
            Arc::new(StaticDefinitions::default()),
            Arc::new(MemoryConnector::new()),
        ));

        let response = app.oneshot(request(Method::GET, "/api/stats")).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{}");
    }
}
