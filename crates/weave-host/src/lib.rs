// SPDX-License-Identifier: MIT OR Apache-2.0
//! weave-host
//!
//! HTTP adapter over the invocation engine: each exposed invokable
//! becomes a POST endpoint whose request body decodes to the invokable's
//! input and whose response body is the canonical JSON of its packed
//! output. The store binding is per-host instance.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use weave_core::{Packed, Value, pack_resource, pack_value, unpack_resource, unpack_value};
use weave_engine::{Engine, Invokable, Outcome};

/// Structured error body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code, e.g. `"not_found"` or `"invocation_failed"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The packed raised resource, when the invocation itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raised: Option<serde_json::Value>,
}

impl ApiError {
    /// Create an error with no raised payload.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            raised: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the host is serving.
    pub status: String,
    /// Number of exposed invokables.
    pub invokables: usize,
}

/// One engine plus a routing table of exposed invokables.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use weave_engine::Engine;
/// # use weave_store::Store;
/// # fn demo(dice: Arc<dyn weave_engine::Invokable>) {
/// let engine = Engine::new(Store::in_memory());
/// let app = weave_host::Host::new(engine)
///     .expose("roll", dice)
///     .router();
/// # let _ = app;
/// # }
/// ```
pub struct Host {
    engine: Engine,
    routes: BTreeMap<String, Arc<dyn Invokable>>,
}

impl Host {
    /// Create a host over an engine.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            routes: BTreeMap::new(),
        }
    }

    /// Expose an invokable at `POST /invoke/{name}`.
    #[must_use]
    pub fn expose(mut self, name: impl Into<String>, invokable: Arc<dyn Invokable>) -> Self {
        self.routes.insert(name.into(), invokable);
        self
    }

    /// Names of all exposed invokables, sorted.
    #[must_use]
    pub fn exposed(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Build the axum router for this host.
    #[must_use]
    pub fn router(self) -> Router {
        Router::new()
            .route("/invoke/{name}", post(invoke_handler))
            .route("/health", get(health_handler))
            .with_state(Arc::new(self))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("routes", &self.exposed())
            .finish()
    }
}

async fn health_handler(State(host): State<Arc<Host>>) -> Response {
    let body = HealthResponse {
        status: "ok".to_string(),
        invokables: host.routes.len(),
    };
    (StatusCode::OK, axum::Json(body)).into_response()
}

async fn invoke_handler(
    State(host): State<Arc<Host>>,
    Path(name): Path<String>,
    body: Option<axum::Json<serde_json::Value>>,
) -> Response {
    let Some(invokable) = host.routes.get(&name) else {
        return error_response(
            StatusCode::NOT_FOUND,
            ApiError::not_found(format!("no invokable exposed as `{name}`")),
        );
    };
    debug!(target: "weave.host", invokable = %name, "invoke request");

    let input = match decode_input(&host, invokable.as_ref(), body.map(|b| b.0)) {
        Ok(input) => input,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let invocation = match host.engine.invoke(invokable.as_ref(), input) {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(target: "weave.host", invokable = %name, error = %err, "engine failure");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal(err.to_string()));
        }
    };

    match invocation.outcome() {
        Ok(Outcome::Completed(output)) => match pack_value(&output) {
            Ok(packed) => (StatusCode::OK, axum::Json(packed)).into_response(),
            Err(err) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal(err.to_string()),
            ),
        },
        Ok(Outcome::Failed(raised)) => {
            let packed = pack_resource(&raised)
                .ok()
                .and_then(|p| serde_json::to_value(&p).ok());
            let mut err = ApiError::new("invocation_failed", raised.to_string());
            err.raised = packed;
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err)
        }
        Ok(Outcome::Suspended(request)) => error_response(
            StatusCode::CONFLICT,
            ApiError::new(
                "input_required",
                format!("invocation suspended waiting for {}", request.requested),
            ),
        ),
        Ok(Outcome::Pending) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::internal("invocation finished without a response"),
        ),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::internal(err.to_string()),
        ),
    }
}

/// Decode a request body into the invokable's input value.
///
/// With a declared input type, the body is the packed field map of that
/// resource type; without one, the body is a packed value (or absent for
/// a null input).
fn decode_input(
    host: &Host,
    invokable: &dyn Invokable,
    body: Option<serde_json::Value>,
) -> Result<Value, ApiError> {
    let registry = host.engine.store().registry();
    match (invokable.input_type(), body) {
        (_, None) => Ok(Value::Null),
        (Some(type_key), Some(body)) => {
            let fields = body
                .as_object()
                .ok_or_else(|| ApiError::invalid_request("input body must be a JSON object"))?
                .clone();
            let packed = Packed {
                type_key,
                fields,
            };
            let resource = unpack_resource(&packed, registry)
                .map_err(|err| ApiError::invalid_request(err.to_string()))?;
            Ok(Value::Resource(resource))
        }
        (None, Some(body)) => unpack_value(&body, registry)
            .map_err(|err| ApiError::invalid_request(err.to_string())),
    }
}

fn error_response(status: StatusCode, error: ApiError) -> Response {
    (status, axum::Json(error)).into_response()
}

#[cfg(test)]
mod tests;
