//! Request Handlers
//!
//! The administrative endpoints and the plugin dispatcher. Dispatch runs the
//! same steps for every request: resolve the path, validate the body against
//! the plugin's event schema, import the module once, then invoke the export
//! under a freshly activated sandbox.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use super::protocol::{json_response, parse_body, DispatchError, StatusResponse};
use super::state::AppState;
use crate::js::{JsError, WorkerError};

/// `/status`
pub async fn status() -> StatusResponse {
    StatusResponse::HEALTHY
}

/// `/uploadPluginInfo`
pub async fn upload_plugin_info(State(state): State<AppState>, body: Bytes) -> Result<StatusResponse, DispatchError> {
    let body = parse_body(&body)?;

    let applied = state.registry().apply_upload(&body).inspect_err(|e| {
        tracing::warn!("Rejected plugin info upload: {}", e);
    })?;

    tracing::info!(applied, registered = state.registry().len(), "Uploaded plugin info");
    Ok(StatusResponse::PLUGIN_INFO_UPLOADED)
}

/// `/uploadEnvironmentVariables`
///
/// Each pair is recorded and assigned onto the JS global object. A body that is
/// not an object has nothing to apply.
pub async fn upload_environment_variables(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusResponse, DispatchError> {
    let body = parse_body(&body)?;

    let Value::Object(vars) = body else {
        tracing::warn!("Environment upload is not an object, nothing applied");
        return Ok(StatusResponse::ENVIRONMENT_UPLOADED);
    };

    // Record exactly what reached the JS globals, even on a partial failure
    let applied = match state.worker().set_globals(vars.clone()).await {
        Ok(()) => state.environment().apply(&vars),
        Err(e) => {
            if let WorkerError::Js(JsError::Global { applied, .. }) = &e {
                state.environment().apply(vars.iter().take(*applied));
            }
            tracing::warn!("Environment upload failed: {}", e);
            return Err(DispatchError::Environment(e.to_string()));
        }
    };

    tracing::info!(applied, "Uploaded environment variables");
    Ok(StatusResponse::ENVIRONMENT_UPLOADED)
}

/// Fallback for every other path
pub async fn dispatch(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    match run_plugin(&state, uri.path(), &body).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(e) => {
            tracing::debug!(path = uri.path(), "Dispatch failed: {}", e);
            e.into_response()
        }
    }
}

async fn run_plugin(state: &AppState, raw_path: &str, body: &[u8]) -> Result<Value, DispatchError> {
    let body = parse_body(body)?;

    let descriptor = state.registry().resolve(raw_path).ok_or(DispatchError::NoPlugin)?;
    let event_type = descriptor
        .resolve_event_type()
        .ok_or(DispatchError::UnsupportedEventType)?;

    let request = event_type.parse_request(&body)?;
    tracing::debug!(
        path = raw_path,
        event = %request.event_type(),
        site = ?request.site(),
        "Validated plugin request"
    );

    let module = state
        .import_module(&descriptor.function_file_path)
        .await
        .map_err(|e| {
            tracing::error!(
                module = %descriptor.function_file_path,
                "Couldn't import function file: {}",
                e
            );
            DispatchError::ImportFailed
        })?;

    state
        .worker()
        .invoke(&module.name, &descriptor.function_name, body)
        .await
        .map_err(|e| match e {
            WorkerError::Js(JsError::Sandbox(err)) => DispatchError::GlobalOverrides(err.to_string()),
            WorkerError::Js(JsError::ModuleMissing(name)) => {
                tracing::error!(module = %name, "Module cached but not loaded in runtime");
                DispatchError::ModuleUnavailable
            }
            other => {
                tracing::error!(
                    module = %descriptor.function_file_path,
                    function = %descriptor.function_name,
                    "Error running plugin: {}",
                    other
                );
                DispatchError::PluginFailed
            }
        })
}
