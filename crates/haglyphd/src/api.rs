use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::StatusHandle;
use crate::hub::rest::RestClient;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/status endpoint
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    hostname: String,
    engine: crate::engine::EngineState,
    connection: crate::hub::ConnectionState,
    last_render: Option<u64>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    status: StatusHandle,
    rest: Arc<RestClient>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/status
#[tracing::instrument(skip(state))]
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/status request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let snapshot = state.status.snapshot();

    (
        StatusCode::OK,
        Json(StatusResponse {
            version: state.version.to_string(),
            hostname,
            engine: snapshot.engine,
            connection: snapshot.connection,
            last_render: snapshot.last_render,
        }),
    )
}

/// Handler for POST /v1/entities/:id/toggle. Forwards to the hub's REST
/// service endpoint; the resulting state change comes back through the
/// subscription like any other.
#[tracing::instrument(skip(state))]
async fn toggle(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> impl IntoResponse {
    tracing::debug!("Handling /v1/entities/{}/toggle request", entity_id);

    match state.rest.toggle(&entity_id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!("Toggle of {} failed: {}", entity_id, e);
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/status", get(status))
        .route("/v1/entities/:id/toggle", post(toggle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the specified address and serves the API endpoints until the
/// provided shutdown signal is triggered.
pub async fn serve(
    listen: String,
    port: u16,
    status: StatusHandle,
    rest: RestClient,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        status,
        rest: Arc::new(rest),
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineState;
    use crate::hub::ConnectionState;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let (_engine_tx, engine_rx) = watch::channel(EngineState::Running);
        let (_conn_tx, conn_rx) = watch::channel(ConnectionState::Subscribed);
        let (_render_tx, render_rx) = watch::channel(Some(1_700_000_000));

        create_router(Arc::new(AppState {
            version: "0.0.0",
            status: StatusHandle::new(engine_rx, conn_rx, render_rx),
            rest: Arc::new(RestClient::new("http://127.0.0.1:1", "token")),
        }))
    }

    #[tokio::test]
    async fn test_ping() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_toggle_unreachable_hub_is_bad_gateway() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/entities/switch.lamp/toggle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
