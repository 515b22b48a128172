//! Probe context for the axum adapter.
//!
//! [`ProbeContext`] is the single context object handed to health callbacks.
//! Callbacks write a reply into it; the route handler turns the reply into
//! the HTTP response once the health handler has finished.

use std::sync::{Arc, Mutex};

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::health::{HealthHandlerOptions, ProbeCallback};
use crate::http::X_REQUEST_ID;

#[derive(Debug)]
struct Reply {
    status: StatusCode,
    body: Value,
}

/// Request context passed to health callbacks.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    request_id: String,
    method: Method,
    path: String,
    reply: Arc<Mutex<Option<Reply>>>,
}

impl ProbeContext {
    pub fn from_request(request: &Request) -> Self {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            reply: Arc::new(Mutex::new(None)),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the response. A later call replaces an earlier one.
    pub fn respond(&self, status: StatusCode, body: Value) {
        let mut reply = self.reply.lock().unwrap_or_else(|e| e.into_inner());
        *reply = Some(Reply { status, body });
    }

    /// Status of the reply written so far.
    pub fn status(&self) -> Option<StatusCode> {
        self.reply
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.status)
    }

    /// Convert the written reply into a response; 503 if nothing was written.
    pub fn into_response(self) -> Response {
        let reply = self.reply.lock().unwrap_or_else(|e| e.into_inner()).take();
        match reply {
            Some(Reply { status, body }) => (status, Json(body)).into_response(),
            None => {
                tracing::warn!(request_id = %self.request_id, path = %self.path, "Health callbacks wrote no response");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unknown" }))).into_response()
            }
        }
    }
}

/// Callbacks answering 200 `{"status":"ok"}` or 503 `{"status":"unavailable"}`.
pub fn default_options() -> HealthHandlerOptions<ProbeContext> {
    HealthHandlerOptions::new(
        ProbeCallback::from_fn(|ctx: ProbeContext| ctx.respond(StatusCode::OK, json!({ "status": "ok" }))),
        ProbeCallback::from_fn(|ctx: ProbeContext| {
            ctx.respond(StatusCode::SERVICE_UNAVAILABLE, json!({ "status": "unavailable" }))
        }),
    )
}
