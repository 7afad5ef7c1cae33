//! Message vocabularies and close codes for the WebSocket sub-protocols.

use axum::extract::ws;
use serde::Deserialize;
use serde_json_bytes::Value;

use crate::graphql;

/// The WebSocket subprotocol name for the modern graphql-ws protocol.
/// See [`WebSocketProtocol::GraphqlWs`].
pub(crate) const GRAPHQL_WS_SUBPROTOCOL: &str = "graphql-transport-ws";
/// The WebSocket subprotocol name for the legacy subscriptions-transport-ws
/// protocol. See [`WebSocketProtocol::SubscriptionsTransportWs`].
pub(crate) const SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL: &str = "graphql-ws";

/// Close codes used by the connection state machine.
pub(crate) mod close {
    /// The client sent a frame the protocol cannot decode.
    pub(crate) const BAD_REQUEST: u16 = 4400;
    /// An operation message arrived before `connection_init` was accepted.
    pub(crate) const UNAUTHORIZED: u16 = 4401;
    /// The `on_connect` hook rejected the connection.
    pub(crate) const FORBIDDEN: u16 = 4403;
    /// No `connection_init` arrived within the configured timeout.
    pub(crate) const INIT_TIMEOUT: u16 = 4408;
    /// A `subscribe` reused the id of a live operation.
    pub(crate) const DUPLICATE_SUBSCRIBER: u16 = 4409;
    /// A second `connection_init` arrived on an acknowledged connection.
    pub(crate) const TOO_MANY_INIT: u16 = 4429;
    /// Clean shutdown requested by either side.
    pub(crate) const NORMAL: u16 = 1000;
    /// The client stopped answering keep-alive pings.
    pub(crate) const KEEPALIVE_TIMEOUT: u16 = 1011;
}

/// The negotiated WebSocket sub-protocol of one connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebSocketProtocol {
    /// The modern graphql-ws protocol. The subprotocol name is
    /// "graphql-transport-ws".
    ///
    /// Spec URL: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md
    #[default]
    GraphqlWs,
    /// The legacy subscriptions-transport-ws protocol. Confusingly, the
    /// subprotocol name is "graphql-ws".
    ///
    /// https://github.com/apollographql/subscriptions-transport-ws/blob/master/PROTOCOL.md
    SubscriptionsTransportWs,
}

impl WebSocketProtocol {
    /// Maps a negotiated subprotocol header value back to the variant.
    ///
    /// Clients that offered nothing recognizable still speak one of the two;
    /// the modern protocol is the ecosystem default.
    pub fn from_subprotocol(negotiated: Option<&str>) -> Self {
        match negotiated {
            Some(SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL) => {
                WebSocketProtocol::SubscriptionsTransportWs
            }
            _ => WebSocketProtocol::GraphqlWs,
        }
    }

    pub fn subprotocol(&self) -> &'static str {
        match self {
            WebSocketProtocol::GraphqlWs => GRAPHQL_WS_SUBPROTOCOL,
            WebSocketProtocol::SubscriptionsTransportWs => SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL,
        }
    }
}

/// WebSocket messages received from the client.
///
/// Legacy wire names are handled as aliases: `start` is the legacy spelling
/// of `subscribe`, `stop` the legacy spelling of `complete`;
/// `connection_terminate` only exists on the legacy protocol.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    /// A new connection
    ConnectionInit {
        /// Optional init payload from the client
        #[serde(default)]
        payload: Option<Value>,
    },
    /// The start of an operation, left undecoded so shape failures stay
    /// scoped to the operation id.
    #[serde(alias = "start")]
    Subscribe { id: String, payload: Value },
    /// The client is done with an operation.
    #[serde(alias = "stop")]
    Complete { id: String },
    /// Connection terminated by the client, only used in the
    /// subscriptions-transport-ws protocol.
    ConnectionTerminate,
    /// Useful for detecting failed connections, displaying latency metrics
    /// or other types of network probing.
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// The response to the Ping message.
    Pong {
        #[serde(default)]
        payload: Option<Value>,
    },
}

impl ClientMessage {
    /// Decodes a text or binary frame.
    ///
    /// Transport-level ping/pong frames are answered by the WebSocket stack
    /// itself and never reach this decoder.
    pub(crate) fn decode(message: &ws::Message) -> Option<serde_json::Result<Self>> {
        match message {
            ws::Message::Text(text) => Some(serde_json::from_str(text)),
            ws::Message::Binary(bytes) => Some(serde_json::from_slice(bytes)),
            _ => None,
        }
    }
}

/// WebSocket messages sent to the client, in protocol-agnostic form.
///
/// [`ServerMessage::encode`] maps each message onto the wire vocabulary of
/// the active protocol.
#[derive(Debug)]
pub(crate) enum ServerMessage {
    ConnectionAck { payload: Option<Value> },
    /// One operation result. Wire type "next" on the modern protocol, "data"
    /// on the legacy one.
    Next {
        id: String,
        payload: graphql::Response,
    },
    /// An operation-scoped failure. The modern protocol carries an array of
    /// errors, the legacy protocol a single error object.
    Error {
        id: String,
        errors: Vec<graphql::Error>,
    },
    Complete { id: String },
    Ping,
    Pong { payload: Option<Value> },
    /// Legacy keep-alive ("ka") message.
    KeepAlive,
    /// Legacy pre-ack rejection carrying the `on_connect` payload verbatim.
    ConnectionError { payload: Value },
}

impl ServerMessage {
    /// Serializes the message into a text frame using the wire vocabulary of
    /// `protocol`.
    pub(crate) fn encode(
        self,
        protocol: WebSocketProtocol,
    ) -> serde_json::Result<ws::Message> {
        let legacy = protocol == WebSocketProtocol::SubscriptionsTransportWs;
        let value = match self {
            ServerMessage::ConnectionAck { payload } => match payload {
                Some(payload) => serde_json::json!({"type": "connection_ack", "payload": payload}),
                None => serde_json::json!({"type": "connection_ack"}),
            },
            ServerMessage::Next { id, payload } => serde_json::json!({
                "type": if legacy { "data" } else { "next" },
                "id": id,
                "payload": payload,
            }),
            ServerMessage::Error { id, errors } => {
                if legacy {
                    serde_json::json!({
                        "type": "error",
                        "id": id,
                        "payload": errors.first(),
                    })
                } else {
                    serde_json::json!({"type": "error", "id": id, "payload": errors})
                }
            }
            ServerMessage::Complete { id } => serde_json::json!({"type": "complete", "id": id}),
            ServerMessage::Ping => serde_json::json!({"type": "ping"}),
            ServerMessage::Pong { payload } => match payload {
                Some(payload) => serde_json::json!({"type": "pong", "payload": payload}),
                None => serde_json::json!({"type": "pong"}),
            },
            ServerMessage::KeepAlive => serde_json::json!({"type": "ka"}),
            ServerMessage::ConnectionError { payload } => {
                serde_json::json!({"type": "connection_error", "payload": payload})
            }
        };
        Ok(ws::Message::Text(serde_json::to_string(&value)?.into()))
    }
}

/// Builds the close frame for a state machine transition to CLOSED.
pub(crate) fn close_frame(code: u16, reason: impl Into<String>) -> ws::Message {
    ws::Message::Close(Some(ws::CloseFrame {
        code,
        reason: reason.into().into(),
    }))
}
