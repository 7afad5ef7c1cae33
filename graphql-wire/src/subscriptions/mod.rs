//! WebSocket subscription transport.
//!
//! Two sub-protocols are served, negotiated through `Sec-WebSocket-Protocol`:
//! the modern `graphql-transport-ws` protocol and the legacy
//! subscriptions-transport-ws protocol (whose subprotocol name is,
//! confusingly, `graphql-ws`). Both share one connection state machine in
//! [`connection`]; [`protocol`] owns the message vocabularies and close
//! codes.

pub(crate) mod connection;
pub(crate) mod protocol;

pub use protocol::WebSocketProtocol;
