use crate::{error::Result, state::AppState};
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/streams", get(stream_stats))
}

/// 诊断端点：当前打开的推送连接统计
/// GET /api/diagnostics/streams
async fn stream_stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    debug!("Collecting stream diagnostics");

    let stats = state.registry.stats();

    Ok(Json(json!({
        "connectedRecipients": stats.recipients,
        "openChannels": stats.handles,
    })))
}
