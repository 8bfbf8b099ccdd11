//! JSON HTTP API over the gateway and the feedback store.

use crate::{
    error::ServerError,
    feedback::NewFeedback,
    gateway::{GatewayRequest, GatewayResponse},
    services::TutorServices,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

const DEFAULT_LOG_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub struct ApiError(ServerError);

impl From<ServerError> for ApiError {
    fn from(e: ServerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServerError::Feedback(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("API error: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(services: TutorServices) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/ask", post(ask))
        .route("/api/feedback", post(submit_feedback))
        .route("/api/feedback/stats", get(feedback_stats))
        .route("/api/metrics", get(metrics))
        .route("/api/metrics/reset", post(reset_metrics))
        .route("/api/logs", get(recent_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "math-routing-agent",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ask(
    State(services): State<TutorServices>,
    Json(body): Json<AskRequest>,
) -> Json<GatewayResponse> {
    let mut request = GatewayRequest::new(body.question);
    request.user_id = body.user_id;
    request.session_id = body.session_id;
    Json(services.gateway.process_request(request).await)
}

async fn submit_feedback(
    State(services): State<TutorServices>,
    Json(body): Json<NewFeedback>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let feedback = services.feedback.add_feedback(body).await?;
    info!("📝 Feedback {} recorded via API", feedback.feedback_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "feedback_id": feedback.feedback_id,
            "message": "Thank you for your feedback!",
        })),
    ))
}

async fn feedback_stats(State(services): State<TutorServices>) -> Json<Value> {
    Json(json!(services.feedback.get_feedback_stats()))
}

async fn metrics(State(services): State<TutorServices>) -> Json<Value> {
    Json(json!(services.gateway.get_metrics()))
}

async fn reset_metrics(State(services): State<TutorServices>) -> Json<Value> {
    services.gateway.reset_metrics();
    Json(json!({ "success": true }))
}

async fn recent_logs(
    State(services): State<TutorServices>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let logs = services
        .gateway
        .get_recent_logs(query.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    Json(json!(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tests::test_services;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_services(dir.path()));
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn ask_then_inspect_metrics_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_services(dir.path()));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/ask",
            Some(json!({ "question": "Solve 2x + 3 = 7" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["metadata"]["agent_used"], "math_solver");
        assert_eq!(body["guardrail_results"].as_array().unwrap().len(), 4);

        let (_, body) = send(
            &app,
            Method::POST,
            "/api/ask",
            Some(json!({ "question": "what's the weather today" })),
        )
        .await;
        assert_eq!(body["success"], false);

        let (_, metrics) = send(&app, Method::GET, "/api/metrics", None).await;
        assert_eq!(metrics["total_requests"], 2);
        assert_eq!(metrics["blocked_requests"], 1);
        assert_eq!(metrics["block_rate"], 50.0);

        let (_, logs) = send(&app, Method::GET, "/api/logs?limit=1", None).await;
        let logs = logs.as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["user_query"], "what's the weather today");

        let (status, _) = send(&app, Method::POST, "/api/metrics/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, metrics) = send(&app, Method::GET, "/api/metrics", None).await;
        assert_eq!(metrics["total_requests"], 0);
    }

    #[tokio::test]
    async fn feedback_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_services(dir.path()));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/feedback",
            Some(json!({
                "question": "Solve 2x + 3 = 7",
                "original_response": "x = 2",
                "feedback_rating": 4,
                "suggested_correction": "x = 2, since 2*2 + 3 = 7"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["feedback_id"].as_str().is_some());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/feedback",
            Some(json!({
                "question": "Solve 2x + 3 = 7",
                "original_response": "x = 2",
                "feedback_rating": 0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("between 1 and 5"));

        let (_, stats) = send(&app, Method::GET, "/api/feedback/stats", None).await;
        assert_eq!(stats["total_feedback"], 1);
        assert_eq!(stats["average_rating"], 4.0);
    }
}
