//! HTTP control API.
//!
//! Three routes, all behind the `Authorization` check:
//! - `POST /api/add` with a JSON mapping
//! - `DELETE /api/delete?listenAddr=..&mappingType=..`
//! - `GET /api/query`

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::controller::Controller;

mod auth;
mod error;
mod handlers;

pub use self::auth::AuthCode;

#[derive(Debug, Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    pub auth: Arc<AuthCode>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/add", post(handlers::add_mapping))
        .route("/api/delete", delete(handlers::delete_mapping))
        .route("/api/query", get(handlers::query_mappings))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control API on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    const CODE: &str = "test";

    fn app() -> (Router, Arc<Controller>) {
        let controller = Arc::new(Controller::new(Duration::from_secs(5), None));
        let state = ApiState {
            controller: Arc::clone(&controller),
            auth: Arc::new(AuthCode::new(CODE).unwrap()),
        };

        (router(state), controller)
    }

    async fn free_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, body)
    }

    fn add(listen: &str, forward: &str, mapping_type: &str) -> Request<Body> {
        let body = json!({
            "listenAddr": listen,
            "forwardAddr": forward,
            "mappingType": mapping_type,
        });

        Request::builder()
            .method(Method::POST)
            .uri("/api/add")
            .header("Authorization", CODE)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(listen: &str, mapping_type: &str) -> Request<Body> {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!(
                "/api/delete?listenAddr={listen}&mappingType={mapping_type}"
            ))
            .header("Authorization", CODE)
            .body(Body::empty())
            .unwrap()
    }

    fn query() -> Request<Body> {
        Request::builder()
            .uri("/api/query")
            .header("Authorization", CODE)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn requests_without_code_are_rejected() {
        let (app, controller) = app();
        let listen = format!("127.0.0.1:{}", free_port().await);

        let mut request = add(&listen, "10.0.0.5:80", "tcp");
        request.headers_mut().remove("Authorization");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let mut request = add(&listen, "10.0.0.5:80", "tcp");
        request
            .headers_mut()
            .insert("Authorization", "wrong".parse().unwrap());
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert!(controller.query().is_empty());
    }

    #[tokio::test]
    async fn add_conflict_delete_query() {
        let (app, _controller) = app();
        let listen = format!("127.0.0.1:{}", free_port().await);

        let (status, body) = send(&app, add(&listen, "10.0.0.5:80", "tcp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["listenAddr"], listen);
        assert_eq!(body["forwardAddr"], "10.0.0.5:80");
        assert_eq!(body["state"], "Active");

        let (status, body) = send(&app, add(&listen, "10.0.0.6:80", "tcp")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, _) = send(&app, query()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, delete(&listen, "tcp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["forwardAddr"], "10.0.0.5:80");

        let (status, body) = send(&app, query()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn query_lists_mappings_with_state() {
        let (app, _controller) = app();
        let a = format!("127.0.0.1:{}", free_port().await);
        let b = format!("127.0.0.1:{}", free_port().await);

        send(&app, add(&a, "10.0.0.5:80", "tcp")).await;
        send(&app, add(&b, "db.internal:5432", "tcp")).await;

        let (_, body) = send(&app, query()).await;
        assert_eq!(
            body,
            json!([
                {"listenAddr": a, "forwardAddr": "10.0.0.5:80", "mappingType": "tcp", "state": "Active"},
                {"listenAddr": b, "forwardAddr": "db.internal:5432", "mappingType": "tcp", "state": "Active"},
            ])
        );
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let (app, controller) = app();
        let listen = format!("127.0.0.1:{}", free_port().await);
        send(&app, add(&listen, "10.0.0.5:80", "tcp")).await;

        let other = format!("127.0.0.1:{}", free_port().await);
        let (status, body) = send(&app, delete(&other, "tcp")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert_eq!(controller.query().len(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_are_bad_requests() {
        let (app, controller) = app();
        let listen = format!("127.0.0.1:{}", free_port().await);

        let (status, body) = send(&app, add(&listen, "1.1.1.1:53", "udp")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_mapping_type");

        let (status, body) = send(&app, add("localhost:80", "10.0.0.5:80", "tcp")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        for listen in ["127.0.0.1:0", ":0"] {
            let (status, body) = send(&app, add(listen, "10.0.0.5:80", "tcp")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "bad_request");
        }

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/add")
            .header("Authorization", CODE)
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"listenAddr": ":8080"}"#))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/delete?listenAddr=:8080")
            .header("Authorization", CODE)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(controller.query().is_empty());
    }

    #[tokio::test]
    async fn wrong_method_is_not_allowed() {
        let (app, _controller) = app();

        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/add")
            .header("Authorization", CODE)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn address_in_use_is_a_server_error() {
        let (app, controller) = app();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen = taken.local_addr().unwrap().to_string();

        let (status, body) = send(&app, add(&listen, "10.0.0.5:80", "tcp")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "address_in_use");
        assert!(controller.query().is_empty());
    }

    #[tokio::test]
    async fn unreachable_forward_still_adds() {
        let (app, controller) = app();
        let listen = format!("127.0.0.1:{}", free_port().await);
        let dead = format!("127.0.0.1:{}", free_port().await);

        let (status, body) = send(&app, add(&listen, &dead, "tcp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "Active");

        let mut client = tokio::net::TcpStream::connect(&listen).await.unwrap();
        let mut buf = Vec::new();
        let n = tokio::io::AsyncReadExt::read_to_end(&mut client, &mut buf)
            .await
            .unwrap_or(0);
        assert_eq!(n, 0);

        assert_eq!(controller.query()[0].state, crate::mapping::MappingState::Active);
    }
}
