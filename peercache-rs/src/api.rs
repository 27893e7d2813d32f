//! Exposes the groups of a node to external callers.
//!
//! A value is read by sending `POST /api/<group>` with the key as request body. The value is
//! returned as raw body (`200`). An empty key yields `400`, an unknown group `404` and a failed
//! load `500` (with the error message as body).
//!
//! ```text
//! curl -X POST --data Tom http://localhost:9999/api/scores
//! ```
use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};

use crate::errors::CacheError;
use crate::registry::GroupRegistry;
use crate::server::{respond, text_response, Handler};

/// Contains the path prefix of all API requests.
pub const API_PREFIX: &str = "/api/";

/// Contains the port of the API server if none is configured.
pub const DEFAULT_PORT: u16 = 9999;

/// Serves group values to external callers.
pub struct ApiHandler {
    registry: Arc<GroupRegistry>,
}

impl ApiHandler {
    /// Creates a new handler which resolves groups via the given registry.
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        ApiHandler { registry }
    }
}

#[async_trait::async_trait]
impl Handler for ApiHandler {
    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let group_name = match request.uri().path().strip_prefix(API_PREFIX) {
            Some(name) if !name.is_empty() && !name.contains('/') => name.to_owned(),
            _ => {
                return text_response(
                    StatusCode::NOT_FOUND,
                    format!("Unknown path: {}", request.uri().path()),
                )
            }
        };

        if request.method() != Method::POST {
            return text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Use POST and pass the key as body",
            );
        }

        let group = match self.registry.get_group(&group_name) {
            Some(group) => group,
            None => {
                return text_response(
                    StatusCode::NOT_FOUND,
                    format!("No such group: {}", group_name),
                )
            }
        };

        let body = match hyper::body::to_bytes(request.into_body()).await {
            Ok(body) => body,
            Err(error) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request: {}", error),
                )
            }
        };

        let key = match String::from_utf8(body.to_vec()) {
            Ok(key) => key,
            Err(_) => return text_response(StatusCode::BAD_REQUEST, "The key must be valid UTF-8"),
        };

        match group.get(&key).await {
            Ok(value) => respond(StatusCode::OK, "application/octet-stream", value.bytes()),
            Err(error @ CacheError::InvalidArgument(_)) => {
                text_response(StatusCode::BAD_REQUEST, error.to_string())
            }
            Err(error) => {
                log::warn!("Failed to read {} from {}: {}", key, group_name, error);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        }
    }
}
