use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

use crate::model::{Alarm, BinEvent, HistoryResponse, Reading};
use crate::store::Store;

#[derive(Debug, Clone)]
struct AppState {
    store: Store,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

pub fn create_router(store: Store) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/api/v1/bins", get(get_bins))
        .route("/api/v1/bins/:bin_id/latest", get(get_latest_reading))
        .route("/api/v1/bins/:bin_id/readings", get(get_readings))
        .route("/api/v1/bins/:bin_id/events", get(get_events))
        .route("/api/v1/alarms", get(get_alarms))
        .route("/api/v1/alarms/:alarm_id/ack", post(ack_alarm))
        .with_state(state)
}

async fn get_bins(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.distinct_bin_ids().await?))
}

async fn get_latest_reading(
    State(state): State<AppState>,
    Path(bin_id): Path<String>,
) -> Result<Response, AppError> {
    match state.store.latest_reading(&bin_id).await? {
        Some(reading) => Ok(Json(reading).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            format!("no readings for bin {bin_id}"),
        )
            .into_response()),
    }
}

async fn get_readings(
    State(state): State<AppState>,
    Path(bin_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse<Reading>>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let readings = state.store.recent_readings(&bin_id, limit).await?;
    let total = readings.len();
    Ok(Json(HistoryResponse {
        data: readings,
        total,
        limit,
    }))
}

async fn get_events(
    State(state): State<AppState>,
    Path(bin_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse<BinEvent>>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let events = state.store.recent_events(&bin_id, limit).await?;
    let total = events.len();
    Ok(Json(HistoryResponse {
        data: events,
        total,
        limit,
    }))
}

async fn get_alarms(State(state): State<AppState>) -> Result<Json<Vec<Alarm>>, AppError> {
    Ok(Json(state.store.list_active_alarms().await?))
}

/// Acknowledging twice, or acknowledging an unknown id, is still a 204.
async fn ack_alarm(
    State(state): State<AppState>,
    Path(alarm_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.store.acknowledge(alarm_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::model::AlarmKind;

    #[test]
    fn test_ack_endpoint_is_idempotent() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let id = store
                .create_alarm("bin_1", AlarmKind::HighFill, "Bin bin_1 is 90.0% full", Utc::now())
                .await
                .unwrap();
            let app = create_router(store.clone());

            // Repeat acks and unknown ids all land as 204.
            for target in [id, id, 9999] {
                let response = app
                    .clone()
                    .oneshot(
                        Request::builder()
                            .method("POST")
                            .uri(format!("/api/v1/alarms/{target}/ack"))
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::NO_CONTENT);
            }

            assert!(store.list_active_alarms().await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_latest_reading_missing_bin_is_404() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let app = create_router(store);

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/api/v1/bins/bin_404/latest")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        });
    }
}
