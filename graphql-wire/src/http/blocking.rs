//! Synchronous dispatch for thread-per-request servers.
//!
//! [`Blocking`] wraps a [`GraphQL`] binding with a current-thread runtime so
//! callers that own plain threads (WSGI-style gateways, test harnesses) can
//! serve operations without an async executor of their own. Semantics match
//! the axum route, with the body policy such transports need: the
//! `Content-Length` header is mandatory and an empty body is rejected before
//! content negotiation. WebSocket subscriptions are out of reach here;
//! subscription operations get the standard over-HTTP error.

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header::ALLOW;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;

use crate::BoxError;
use crate::engine::Engine;
use crate::error::HttpError;
use crate::http::multipart;
use crate::http::reader;
use crate::http::reader::ContentKind;
use crate::http::reader::Payload;
use crate::http::service::serialize_payload;
use crate::server::GraphQL;

/// A [`GraphQL`] binding driven from synchronous code.
pub struct Blocking<E: Engine> {
    server: Arc<GraphQL<E>>,
    runtime: tokio::runtime::Runtime,
}

impl<E: Engine> Blocking<E> {
    /// Wraps a binding with its own current-thread runtime.
    pub fn new(server: GraphQL<E>) -> Result<Self, BoxError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            server: Arc::new(server),
            runtime,
        })
    }

    /// Serves one request to completion on the calling thread.
    pub fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if request.method() != Method::POST {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "")
                .map(with_allow)
                .unwrap_or_else(fallback);
        }
        let (parts, body) = request.into_parts();
        match self.runtime.block_on(self.respond(&parts, body)) {
            Ok(response) => response,
            Err(error) => plain(error.status(), error.to_string()).unwrap_or_else(fallback),
        }
    }

    async fn respond(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
    ) -> Result<Response<Bytes>, HttpError> {
        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.parse::<usize>().ok())
            .ok_or(HttpError::ContentLength)?;
        if declared == 0 || body.is_empty() {
            return Err(HttpError::EmptyBody);
        }
        if body.len() > self.server.configuration.http_max_request_bytes {
            return Err(HttpError::PayloadTooLarge);
        }

        let kind = reader::negotiate_content_type(&parts.headers)?;
        let context = self.server.new_context(parts);
        let payload = match kind {
            ContentKind::Json => reader::decode_json(&body)?,
            ContentKind::Multipart { boundary } => {
                let (operations, uploads) =
                    multipart::decode(body, boundary, &self.server.configuration.uploads).await?;
                context.extensions().insert(uploads);
                reader::classify(operations)?
            }
        };

        self.server.extensions.request_started(&context).await;
        let response = match payload {
            Payload::Single(operation) => {
                let outcome = self.server.execute_http_operation(operation, &context).await;
                let status = if outcome.success {
                    StatusCode::OK
                } else {
                    StatusCode::BAD_REQUEST
                };
                json(status, &outcome.response)
            }
            Payload::Batch(operations) => {
                // Items run sequentially here; the thread is the unit of
                // concurrency on this path.
                let mut outcomes = Vec::with_capacity(operations.len());
                for operation in operations {
                    outcomes.push(self.server.execute_http_operation(operation, &context).await);
                }
                let status = if outcomes.iter().all(|outcome| outcome.success) {
                    StatusCode::OK
                } else {
                    StatusCode::BAD_REQUEST
                };
                let responses: Vec<_> =
                    outcomes.iter().map(|outcome| &outcome.response).collect();
                json(status, &responses)
            }
        };
        self.server.extensions.request_finished(&context).await;
        Ok(response)
    }
}

fn json<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Bytes> {
    serialize_payload(body)
        .ok()
        .and_then(|body| {
            Response::builder()
                .status(status)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .ok()
        })
        .unwrap_or_else(fallback)
}

fn plain(status: StatusCode, message: impl Into<String>) -> Option<Response<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Bytes::from(message.into()))
        .ok()
}

fn with_allow(mut response: Response<Bytes>) -> Response<Bytes> {
    if let Ok(allow) = "POST".parse() {
        response.headers_mut().insert(ALLOW, allow);
    }
    response
}

fn fallback() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
