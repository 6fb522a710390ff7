use axum::extract::State;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::types::StatementKind;

#[derive(Debug, Serialize)]
pub struct StatementSummary {
    pub path: String,
    pub url: String,
    pub kind: StatementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub revision: u64,
    pub source: PathBuf,
    pub cached: bool,
}

/// GET /admin/statements - Every loaded statement, sorted by logical path
pub async fn statements(State(state): State<AppState>) -> ApiResult<Vec<StatementSummary>> {
    let summaries = state
        .router
        .store()
        .definitions()
        .into_iter()
        .map(|def| StatementSummary {
            url: state.router.url_for(&def.path),
            path: def.path.clone(),
            kind: def.kind,
            description: def.description.clone(),
            revision: def.revision,
            source: def.source.clone(),
            cached: def.cache.is_some(),
        })
        .collect();
    Ok(ApiResponse::success(summaries))
}

/// POST /admin/reload - Full rescan of every root.
///
/// With the watcher running the rescan is queued behind pending file events;
/// otherwise it runs here and the scan report is returned.
pub async fn reload(State(state): State<AppState>) -> ApiResult<Value> {
    if let Some(rescan) = &state.rescan {
        rescan.request();
        return Ok(ApiResponse::accepted(json!({ "queued": true })));
    }

    let store = Arc::clone(state.router.store());
    let report = tokio::task::spawn_blocking(move || store.scan())
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Rescan failed: {}", e)))?;

    Ok(ApiResponse::success(json!({
        "loaded": report.loaded,
        "kept": report.kept,
        "removed": report.removed,
        "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
    })))
}
