//! The axum route serving a [`GraphQL`] binding.
//!
//! One route does everything: POST carries operations (JSON or multipart),
//! GET serves the explorer or upgrades to a WebSocket, every other method is
//! answered with 405.

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use futures::future::join_all;
use http::HeaderMap;
use http::StatusCode;
use http::header::ALLOW;
use http::header::CONTENT_TYPE;

use crate::Context;
use crate::engine::Engine;
use crate::error::HttpError;
use crate::execution::OperationOutcome;
use crate::graphql;
use crate::http::multipart;
use crate::http::reader;
use crate::http::reader::ContentKind;
use crate::http::reader::Payload;
use crate::server::GraphQL;
use crate::subscriptions::connection::Connection;
use crate::subscriptions::protocol::GRAPHQL_WS_SUBPROTOCOL;
use crate::subscriptions::protocol::SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL;
use crate::subscriptions::protocol::WebSocketProtocol;

impl<E: Engine> GraphQL<E> {
    /// Mounts the server as an axum [`Router`] serving its route at `/`.
    ///
    /// Nest the router to serve under a different path. Fails when the CORS
    /// configuration is contradictory.
    pub fn into_router(self) -> Result<Router, crate::BoxError> {
        let cors = self.configuration.cors.clone().into_layer()?;
        let server = Arc::new(self);
        let router = Router::new()
            .route("/", get(handle_get::<E>).post(handle_post::<E>))
            .with_state(server);
        Ok(match cors {
            Some(cors) => router.layer(cors),
            None => router,
        })
    }
}

async fn handle_get<E: Engine>(
    State(server): State<Arc<GraphQL<E>>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();

    if let Ok(upgrade) = upgrade {
        if !server.configuration.subscriptions.enabled {
            return plain_response(StatusCode::BAD_REQUEST, "WebSocket subscriptions are disabled");
        }
        let context = server.new_context(&parts);
        return upgrade
            .protocols([GRAPHQL_WS_SUBPROTOCOL, SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL])
            .on_upgrade(move |socket| async move {
                let protocol = WebSocketProtocol::from_subprotocol(
                    socket.protocol().and_then(|value| value.to_str().ok()),
                );
                let (sink, stream) = socket.split();
                Connection::new(server, protocol, context).serve(sink, stream).await;
            });
    }

    match &server.explorer_html {
        Some(html) if reader::accepts_html(&parts.headers) => (
            StatusCode::OK,
            [(CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())],
            html.clone(),
        )
            .into_response(),
        Some(_) => plain_response(
            StatusCode::NOT_ACCEPTABLE,
            "GET requests must accept text/html",
        ),
        None => method_not_allowed(),
    }
}

async fn handle_post<E: Engine>(
    State(server): State<Arc<GraphQL<E>>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let context = server.new_context(&parts);

    server.extensions.request_started(&context).await;
    let response = match read_body(&server, &parts.headers, body, &context).await {
        Ok(payload) => respond(&server, payload, &context).await,
        Err(error) => error.into_response(),
    };
    server.extensions.request_finished(&context).await;
    response
}

/// Negotiates the content type and decodes the body into operation payloads.
async fn read_body<E: Engine>(
    server: &GraphQL<E>,
    headers: &HeaderMap,
    body: axum::body::Body,
    context: &Context,
) -> Result<Payload, HttpError> {
    let kind = reader::negotiate_content_type(headers)?;
    let limit = server.configuration.http_max_request_bytes;
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| HttpError::PayloadTooLarge)?;

    match kind {
        ContentKind::Json => reader::decode_json(&bytes),
        ContentKind::Multipart { boundary } => {
            let (operations, uploads) =
                multipart::decode(bytes, boundary, &server.configuration.uploads).await?;
            context.extensions().insert(uploads);
            reader::classify(operations)
        }
    }
}

/// Executes the decoded payload and assembles the HTTP response.
async fn respond<E: Engine>(
    server: &GraphQL<E>,
    payload: Payload,
    context: &Context,
) -> Response {
    match payload {
        Payload::Single(operation) => {
            let outcome = server.execute_http_operation(operation, context).await;
            let status = status_of(&outcome);
            json_response(status, &outcome.response)
        }
        Payload::Batch(operations) => {
            let outcomes = join_all(
                operations
                    .into_iter()
                    .map(|operation| server.execute_http_operation(operation, context)),
            )
            .await;
            let status = if outcomes.iter().all(|outcome| outcome.success) {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            let responses: Vec<&graphql::Response> =
                outcomes.iter().map(|outcome| &outcome.response).collect();
            json_response(status, &responses)
        }
    }
}

fn status_of(outcome: &OperationOutcome) -> StatusCode {
    if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(body) => (
            status,
            [(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "failed to serialize a response body");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "response serialization failed")
        }
    }
}

fn plain_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(ALLOW, "GET, POST")],
        String::new(),
    )
        .into_response()
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        plain_response(self.status(), self.to_string())
    }
}

/// Serializes a JSON body for transports that assemble their own responses.
pub(crate) fn serialize_payload<T: serde::Serialize>(body: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(body).map(Bytes::from)
}
