use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{
    engine::PhishEngine,
    error::{validation_error, AppError},
    types::*,
};

pub type AppState = Arc<PhishEngine>;

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/label", post(label))
        .route("/reviews", get(reviews))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(engine)
}

pub async fn predict(
    State(engine): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let Json(request) = payload.map_err(|e| {
        warn!("Rejected prediction body: {}", e);
        validation_error("URL is required")
    })?;
    Ok(Json(engine.predict(request).await?))
}

pub async fn label(
    State(engine): State<AppState>,
    payload: Result<Json<LabelRequest>, JsonRejection>,
) -> Result<Json<LabelResponse>, AppError> {
    let Json(request) = payload.map_err(|e| validation_error(&e.body_text()))?;
    Ok(Json(engine.label(request).await?))
}

pub async fn reviews(State(engine): State<AppState>) -> Json<Vec<ReviewTicket>> {
    Json(engine.pending_reviews())
}

pub async fn health_check(State(engine): State<AppState>) -> Json<HealthResponse> {
    Json(engine.health().await)
}
