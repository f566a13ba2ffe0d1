use crate::{access::AttemptRecord, access::AttemptStore, error::AppError, AppState};
use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// GET /admin/metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    state
        .metrics
        .tracked_ips
        .set(state.access_guard.store().len() as i64);

    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::InternalError(format!("指标渲染失败: {}", e)))?;

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct ListLockoutsResponse {
    pub records: Vec<AttemptRecord>,
}

/// GET /admin/lockouts：当前所有失败记录
pub async fn list_lockouts(State(state): State<AppState>) -> Json<ListLockoutsResponse> {
    let mut records = state.access_guard.store().snapshot();
    records.sort_by(|a, b| a.ip.cmp(&b.ip));
    Json(ListLockoutsResponse { records })
}
