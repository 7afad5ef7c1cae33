//! Serves GraphQL over HTTP and WebSocket for any execution engine.
//!
//! This crate owns the transport side of a GraphQL server: request decoding
//! (JSON bodies, batches and multipart file uploads), the policies applied
//! before execution (payload shape, document syntax, introspection), result
//! formatting with its HTTP status contract, and WebSocket subscriptions over
//! both the `graphql-transport-ws` and the legacy `graphql-ws` sub-protocol.
//!
//! Execution itself stays behind the [`Engine`] trait. Bind an engine with
//! [`GraphQL::builder`], then mount it with [`GraphQL::into_router`] or drive
//! it synchronously through [`http::Blocking`].

#![warn(unreachable_pub)]

mod configuration;
mod context;
mod engine;
mod error;
mod execution;
mod extensions;
pub mod graphql;
pub mod http;
pub mod json_ext;
mod server;
pub mod subscriptions;

pub use configuration::Configuration;
pub use configuration::Cors;
pub use configuration::SubscriptionConfig;
pub use configuration::UploadLimits;
pub use context::Context;
pub use engine::Engine;
pub use engine::EngineRequest;
pub use engine::RootValue;
pub use engine::ValidationRules;
pub use extensions::Extension;
pub use server::ConnectionRejected;
pub use server::ContextFactory;
pub use server::GraphQL;
pub use server::OnConnect;

/// A boxed error, as passed across hook and engine boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
