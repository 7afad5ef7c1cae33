//! The boundary between the transport layer and GraphQL execution.

use std::sync::Arc;

use apollo_compiler::ast;
use async_trait::async_trait;
use serde_json_bytes::Value;

use crate::BoxError;
use crate::Context;
use crate::graphql::Error;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::graphql::ResponseStream;

/// A GraphQL execution engine.
///
/// The transport layer owns request decoding, payload shape checks, syntax
/// parsing and transport policy; everything from validation to field
/// resolution belongs to the engine. Implementations are typically a thin
/// adapter over an executor holding the schema and resolvers.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Engine-defined validation rule handle.
    ///
    /// Rules configured on the server through [`ValidationRules`] are
    /// resolved per operation and handed back in [`EngineRequest::rules`];
    /// the transport never interprets them.
    type Rule: Clone + Send + Sync + 'static;

    /// Executes a query or mutation to completion.
    ///
    /// Failures during resolution are reported inside the returned
    /// [`Response`] as GraphQL errors, per the GraphQL spec.
    async fn execute(&self, request: EngineRequest<Self::Rule>) -> Response;

    /// Starts a subscription, returning one response per source event.
    ///
    /// Failures raised before the event stream exists (engine-side
    /// validation, unknown subscription field) are reported as `Err`; the
    /// WebSocket protocols deliver those as operation-scoped `error`
    /// messages.
    async fn subscribe(
        &self,
        request: EngineRequest<Self::Rule>,
    ) -> Result<ResponseStream, Vec<Error>>;
}

/// Everything an engine needs to run one operation.
#[derive(Clone)]
#[non_exhaustive]
pub struct EngineRequest<R> {
    /// The shape-validated operation payload.
    pub request: Request,
    /// Context of the enclosing HTTP request or WebSocket connection.
    pub context: Context,
    /// The root value for this operation, when one is configured.
    pub root: Option<Value>,
    /// Validation rules resolved for this operation.
    pub rules: Vec<R>,
}

#[buildstructor::buildstructor]
impl<R> EngineRequest<R> {
    /// Returns a builder that builds an [`EngineRequest`] from its components.
    ///
    /// Mostly useful for exercising engine implementations in tests; within
    /// the pipeline the execution adapter assembles requests itself.
    #[builder(visibility = "pub")]
    fn new(
        request: Request,
        context: Option<Context>,
        root: Option<Value>,
        rules: Option<Vec<R>>,
    ) -> Self {
        Self {
            request,
            context: context.unwrap_or_default(),
            root,
            rules: rules.unwrap_or_default(),
        }
    }
}

/// Validation rules attached to the server.
///
/// Either a fixed list cloned for every operation, or a resolver invoked per
/// operation with the context, the parsed document and the payload — the
/// dynamic form supports rules that depend on who is asking (cost limits,
/// depth limits for anonymous clients, and so on).
pub enum ValidationRules<R> {
    Static(Vec<R>),
    Dynamic(Arc<dyn Fn(&Context, &ast::Document, &Request) -> Vec<R> + Send + Sync>),
}

impl<R: Clone> ValidationRules<R> {
    pub(crate) fn resolve(
        &self,
        context: &Context,
        document: &ast::Document,
        request: &Request,
    ) -> Vec<R> {
        match self {
            ValidationRules::Static(rules) => rules.clone(),
            ValidationRules::Dynamic(resolver) => resolver(context, document, request),
        }
    }
}

impl<R> Default for ValidationRules<R> {
    fn default() -> Self {
        ValidationRules::Static(Vec::new())
    }
}

/// The root value passed to the engine for every operation.
///
/// A factory failure aborts the operation with an error response instead of
/// reaching the engine.
pub enum RootValue {
    Value(Option<Value>),
    Factory(Arc<dyn Fn(&Context, &Request) -> Result<Value, BoxError> + Send + Sync>),
}

impl RootValue {
    pub(crate) fn resolve(
        &self,
        context: &Context,
        request: &Request,
    ) -> Result<Option<Value>, BoxError> {
        match self {
            RootValue::Value(value) => Ok(value.clone()),
            RootValue::Factory(factory) => factory(context, request).map(Some),
        }
    }
}

impl Default for RootValue {
    fn default() -> Self {
        RootValue::Value(None)
    }
}
