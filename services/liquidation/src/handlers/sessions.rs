//! Review Session Handlers

use aduana_models::{LineItem, LineItemPatch, PublishReceipt};
use aduana_utils::{normalize_folder_id, parse_template, validate_model, AduanaError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::handlers::ApiResult;
use crate::session::{PublishOptions, ReclassifyOutcome, SessionView};
use crate::AppState;

/// GET /api/v1/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let handle = state.sessions.get(session_id).await?;
    Ok(Json(handle.view().await))
}

/// Abandon a session without publishing
///
/// DELETE /api/v1/sessions/:id
pub async fn discard_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .sessions
        .remove(session_id)
        .await
        .ok_or_else(|| AduanaError::not_found(format!("session {}", session_id)))?;
    state.metrics.active_sessions.set(state.sessions.len().await as i64);

    tracing::info!(%session_id, "Review session discarded");
    Ok(StatusCode::NO_CONTENT)
}

/// `item` is null when the id no longer exists.
#[derive(Debug, Serialize)]
pub struct ItemEditResponse {
    pub item: Option<LineItem>,
}

/// PATCH /api/v1/sessions/:id/items/:item_id
pub async fn update_item(
    State(state): State<AppState>,
    Path((session_id, item_id)): Path<(Uuid, String)>,
    Json(patch): Json<LineItemPatch>,
) -> ApiResult<Json<ItemEditResponse>> {
    let handle = state.sessions.get(session_id).await?;
    let item = handle.apply_edit(&item_id, &patch).await?;
    Ok(Json(ItemEditResponse { item }))
}

#[derive(Debug, Serialize)]
pub struct ItemDeleteResponse {
    pub deleted: bool,
}

/// DELETE /api/v1/sessions/:id/items/:item_id
pub async fn delete_item(
    State(state): State<AppState>,
    Path((session_id, item_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<ItemDeleteResponse>> {
    let handle = state.sessions.get(session_id).await?;
    let deleted = handle.delete_item(&item_id).await?;
    Ok(Json(ItemDeleteResponse { deleted }))
}

/// Classification failures are reported in the outcome, not as errors.
///
/// POST /api/v1/sessions/:id/items/:item_id/reclassify
pub async fn reclassify_item(
    State(state): State<AppState>,
    Path((session_id, item_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<ReclassifyOutcome>> {
    let handle = state.sessions.get(session_id).await?;
    let outcome = handle.reclassify(&item_id).await;
    state.metrics.record_reclassification(outcome.label());
    Ok(Json(outcome))
}

/// Publish request body
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishBody {
    pub template: Option<String>,
    #[validate(length(max = 200))]
    pub document_name: Option<String>,
    pub folder_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub receipt: PublishReceipt,
}

/// Write the session to the destination spreadsheet. The session is
/// discarded once the publish succeeds.
///
/// POST /api/v1/sessions/:id/publish
pub async fn publish_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<PublishBody>,
) -> ApiResult<Json<PublishResponse>> {
    validate_model(&body)?;
    let handle = state.sessions.get(session_id).await?;

    let template = match body.template.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(key) => parse_template(key)?,
        None => state.config.publish.default_template,
    };
    let folder_id = match body.folder_url.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        Some(folder_url) => Some(normalize_folder_id(folder_url)?),
        None => None,
    };

    let result = handle
        .publish(PublishOptions {
            template,
            document_name: body.document_name,
            folder_id,
        })
        .await;

    let receipt = match result {
        Ok(receipt) => receipt,
        Err(e) => {
            if matches!(e, AduanaError::ExternalService { .. } | AduanaError::Internal { .. }) {
                state.metrics.record_publish(false);
            }
            return Err(e.into());
        }
    };

    state.metrics.record_publish(true);
    state.sessions.remove(session_id).await;
    state.metrics.active_sessions.set(state.sessions.len().await as i64);

    Ok(Json(PublishResponse {
        session_id,
        receipt,
    }))
}
