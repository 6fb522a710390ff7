use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{decode, query_bindings, requested_callback};
use crate::engine::ExecutionResult;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;

/// POST <prefix>/:root/*path - Execute a statement with a JSON payload
pub async fn post(
    State(state): State<AppState>,
    Path((root, path)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                let err = ApiError::invalid_json(format!("Invalid JSON body: {}", e));
                return respond(requested_callback(&Value::Null, &query), Err(err));
            }
        }
    };
    let callback = requested_callback(&body, &query);
    respond(callback, run(state, &root, &path, body, &query).await)
}

/// GET <prefix>/:root/*path - Execute with query-string bindings (JSONP clients)
pub async fn get(
    State(state): State<AppState>,
    Path((root, path)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let body = query_bindings(&query);
    let callback = requested_callback(&Value::Null, &query);
    respond(callback, run(state, &root, &path, body, &query).await)
}

/// Errors follow the response format the client asked for
fn respond(callback: Option<String>, result: ApiResult<Arc<ExecutionResult>>) -> Response {
    match (result, callback) {
        (Ok(response), _) => response.into_response(),
        (Err(err), Some(callback)) => err.into_jsonp(&callback),
        (Err(err), None) => err.into_response(),
    }
}

async fn run(
    state: AppState,
    root: &str,
    path: &str,
    body: Value,
    query: &BTreeMap<String, String>,
) -> ApiResult<Arc<ExecutionResult>> {
    let logical = state.router.resolve_relative(&format!("{}/{}", root, path))?;
    let definition = state.router.store().get(&logical)?;

    let decoded = decode(&definition.path, definition.kind.payload_shape(), body, query)?;
    let result = state.engine.execute(&definition, decoded.request).await?;

    Ok(ApiResponse::success(result).with_callback(decoded.callback))
}
