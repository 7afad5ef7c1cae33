//! The server binding: one engine, one configuration, one route.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json_bytes::Value;

use crate::Context;
use crate::configuration::Configuration;
use crate::engine::Engine;
use crate::engine::RootValue;
use crate::engine::ValidationRules;
use crate::extensions::Extension;
use crate::extensions::ExtensionChain;

/// Builds a [`Context`] for an incoming HTTP request or WebSocket upgrade.
pub type ContextFactory = Arc<dyn Fn(&http::request::Parts) -> Context + Send + Sync>;

/// Decides whether a WebSocket connection is accepted, given the client's
/// `connection_init` payload. Accepting may attach a payload to the
/// `connection_ack` message; rejecting closes the connection.
pub type OnConnect = Arc<
    dyn Fn(Context, Option<Value>) -> BoxFuture<'static, Result<Option<Value>, ConnectionRejected>>
        + Send
        + Sync,
>;

/// A rejected WebSocket connection.
///
/// The payload is delivered verbatim to `graphql-ws` (legacy) clients in a
/// `connection_error` message before the close; `graphql-transport-ws`
/// clients only observe the 4403 close, as their protocol has no pre-ack
/// error frame.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRejected {
    pub payload: Option<Value>,
}

impl ConnectionRejected {
    pub fn new(payload: Value) -> Self {
        Self {
            payload: Some(payload),
        }
    }
}

/// A GraphQL server: an [`Engine`] bound to a configuration, hooks and
/// extensions.
///
/// The binding itself is transport-agnostic; [`GraphQL::into_router`] mounts
/// it as an `axum` route and [`crate::http::Blocking`] drives it from
/// synchronous callers.
pub struct GraphQL<E: Engine> {
    pub(crate) engine: Arc<E>,
    pub(crate) configuration: Configuration,
    pub(crate) extensions: ExtensionChain,
    pub(crate) rules: ValidationRules<E::Rule>,
    pub(crate) root: RootValue,
    pub(crate) context_factory: Option<ContextFactory>,
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) explorer_html: Option<String>,
}

#[buildstructor::buildstructor]
impl<E: Engine> GraphQL<E> {
    /// Returns a builder that binds an engine into a [`GraphQL`] server.
    ///
    /// Builder methods:
    ///
    /// * `.engine(E)`
    ///   Required.
    ///   The execution engine serving this binding.
    ///
    /// * `.configuration(`[`Configuration`]`)`
    ///   Optional, defaults to [`Configuration::default`].
    ///
    /// * `.extension(Arc<dyn `[`Extension`]`>)`
    ///   Optional, may be called multiple times.
    ///   Appends one extension to the HTTP hook chain, in call order.
    ///
    /// * `.validation_rules(`[`ValidationRules`]`<E::Rule>)`
    ///   Optional.
    ///   Rules resolved per operation and passed to the engine.
    ///
    /// * `.root_value(`[`RootValue`]`)`
    ///   Optional.
    ///   The root value (or per-operation factory) passed to the engine.
    ///
    /// * `.context_factory(`[`ContextFactory`]`)`
    ///   Optional.
    ///   Builds the per-request / per-connection [`Context`]; defaults to
    ///   `Context::default()`.
    ///
    /// * `.on_connect(`[`OnConnect`]`)`
    ///   Optional.
    ///   WebSocket `connection_init` acceptance hook.
    ///
    /// * `.explorer_html(impl Into<`[`String`]`>)`
    ///   Optional.
    ///   HTML document served on GET requests that prefer HTML. Without it
    ///   GET requests are answered with 405.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a [`GraphQL`] server.
    #[builder(visibility = "pub")]
    fn new(
        engine: E,
        configuration: Option<Configuration>,
        extensions: Vec<Arc<dyn Extension>>,
        validation_rules: Option<ValidationRules<E::Rule>>,
        root_value: Option<RootValue>,
        context_factory: Option<ContextFactory>,
        on_connect: Option<OnConnect>,
        explorer_html: Option<String>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            configuration: configuration.unwrap_or_default(),
            extensions: ExtensionChain::new(extensions),
            rules: validation_rules.unwrap_or_default(),
            root: root_value.unwrap_or_default(),
            context_factory,
            on_connect,
            explorer_html,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Builds the context for a request, through the configured factory.
    pub(crate) fn new_context(&self, parts: &http::request::Parts) -> Context {
        match &self.context_factory {
            Some(factory) => factory(parts),
            None => Context::default(),
        }
    }
}
