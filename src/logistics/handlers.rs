use axum::{extract::State, routing::get, Json, Router};
use tracing::{debug, info, instrument};

use crate::{
    auth::extractors::{ApiJson, AuthUser},
    error::AppError,
    state::AppState,
};

use super::{
    dto::{AssignContainerRequest, ContainerAssignment, RecordResponse, RecordsResponse},
    repo,
};

pub fn logistics_routes() -> Router<AppState> {
    Router::new()
        .route("/api/logistics", get(list_pending).put(assign_container))
        .route("/api/container-history", get(list_history))
}

#[instrument(skip(state))]
pub async fn list_pending(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<RecordsResponse>, AppError> {
    let data = repo::list_pending(&state.db).await?;
    debug!(user_id = %caller.sub, count = data.len(), "pending records listed");
    Ok(Json(RecordsResponse { success: true, data }))
}

#[instrument(skip(state))]
pub async fn list_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<RecordsResponse>, AppError> {
    let data = repo::list_history(&state.db).await?;
    debug!(user_id = %caller.sub, count = data.len(), "container history listed");
    Ok(Json(RecordsResponse { success: true, data }))
}

#[instrument(skip(state, payload))]
pub async fn assign_container(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(payload): ApiJson<AssignContainerRequest>,
) -> Result<Json<RecordResponse>, AppError> {
    let a = ContainerAssignment::try_from(payload)?;

    let record = repo::assign_container(
        &state.db,
        a.inv_number,
        &a.container_id,
        a.delivery_notes.as_deref(),
        a.shipping_line.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Record not found or already updated".into()))?;

    info!(
        user_id = %caller.sub,
        inv_number = record.inv_number,
        container_id = %a.container_id,
        "container assigned"
    );
    Ok(Json(RecordResponse { success: true, data: record }))
}
