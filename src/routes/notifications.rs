use crate::{
    error::{AppError, Result},
    models::{NotificationEvent, NotificationPriority},
    routes::stream,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientQuery {
    pub recipient_id: Option<String>,
    pub priority: Option<String>,
}

impl RecipientQuery {
    /// recipientId 是所有端点的归属范围，缺失即 400
    pub fn require_recipient(&self) -> Result<&str> {
        self.recipient_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::bad_request("recipientId query parameter is required"))
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications).post(create_notification))
        .route("/unread/count", get(unread_count))
        .route("/stream", get(stream::notification_stream))
        .route("/:id", get(get_notification).delete(delete_notification))
        .route("/:id/read", patch(mark_notification_read))
}

/// Create a notification and broadcast it to the recipient's open channels
/// POST /api/notifications
async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(event): Json<NotificationEvent>,
) -> Result<(StatusCode, Json<Value>)> {
    event.validate()?;
    debug!("Creating notification for recipient: {}", event.recipient_id);

    let notification = state.notification_service.ingest(event).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "notification": notification })),
    ))
}

/// List a recipient's notifications, newest first
/// GET /api/notifications?recipientId&priority?
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Value>> {
    let recipient_id = query.require_recipient()?;
    let priority = query
        .priority
        .as_deref()
        .map(NotificationPriority::parse_or_default);
    debug!("Listing notifications for recipient: {}", recipient_id);

    let notifications = state
        .notification_service
        .list(recipient_id, priority)
        .await?;

    Ok(Json(json!({ "notifications": notifications })))
}

/// Count a recipient's unread notifications
/// GET /api/notifications/unread/count?recipientId
async fn unread_count(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Value>> {
    let recipient_id = query.require_recipient()?;

    let count = state.notification_service.unread_count(recipient_id).await?;

    Ok(Json(json!({ "count": count })))
}

/// Get a single notification
/// GET /api/notifications/:id?recipientId
async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Value>> {
    let recipient_id = query.require_recipient()?;
    debug!("Getting notification: {} for recipient: {}", id, recipient_id);

    let notification = state
        .notification_service
        .get(&id, recipient_id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    Ok(Json(json!({ "notification": notification })))
}

/// Mark a notification as read (idempotent)
/// PATCH /api/notifications/:id/read?recipientId
async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Value>> {
    let recipient_id = query.require_recipient()?;
    debug!("Marking notification read: {} for recipient: {}", id, recipient_id);

    let notification = state
        .notification_service
        .mark_read(&id, recipient_id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    Ok(Json(json!({ "notification": notification })))
}

/// Soft-delete a notification
/// DELETE /api/notifications/:id?recipientId
async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<Value>> {
    let recipient_id = query.require_recipient()?;
    debug!("Soft-deleting notification: {} for recipient: {}", id, recipient_id);

    let notification = state
        .notification_service
        .soft_delete(&id, recipient_id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    Ok(Json(json!({ "notification": notification })))
}
