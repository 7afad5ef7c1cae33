//! The operation pipeline shared by the HTTP and WebSocket transports.
//!
//! Every operation flows through the same stages: payload shape checks,
//! syntax parsing, the introspection and operation-kind policies, validation
//! rule resolution and finally engine dispatch. What differs per transport is
//! only what happens around the pipeline (extension hooks on HTTP, protocol
//! frames on WebSocket) and how subscriptions are treated.

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::validation::WithErrors;
use serde_json_bytes::Value;

use crate::Context;
use crate::engine::Engine;
use crate::engine::EngineRequest;
use crate::error::ParseErrors;
use crate::graphql::Error;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::server::GraphQL;

pub(crate) const SUBSCRIPTION_OVER_HTTP_MESSAGE: &str =
    "Subscriptions are not supported over HTTP. They can only be executed over a WebSocket connection.";

pub(crate) const INTROSPECTION_DISABLED_MESSAGE: &str = "Introspection has been disabled.";

/// How one operation concluded on the HTTP path.
pub(crate) struct OperationOutcome {
    /// False exactly when the failure occurred before execution could begin:
    /// payload shape, document syntax or the introspection policy. Callers
    /// map this to the HTTP status.
    pub(crate) success: bool,
    pub(crate) response: Response,
}

impl OperationOutcome {
    fn failed(errors: Vec<Error>) -> Self {
        Self {
            success: false,
            response: Response::from_errors(errors),
        }
    }

    fn executed(response: Response) -> Self {
        Self {
            success: true,
            response,
        }
    }
}

/// What a WebSocket operation produced.
pub(crate) enum WsExecution {
    /// A query or mutation result, delivered as a single `next` frame.
    Single(Response),
    /// A subscription event stream.
    Stream(ResponseStream),
}

/// An operation that passed every pre-execution stage.
struct Prepared<R> {
    kind: ast::OperationType,
    rules: Vec<R>,
}

impl<E: Engine> GraphQL<E> {
    /// Runs one HTTP operation end to end.
    ///
    /// `payload` is one decoded JSON value: the whole body for a single
    /// operation, one array item for a batch. Extension hooks fire here;
    /// they never fire on the WebSocket path.
    pub(crate) async fn execute_http_operation(
        &self,
        payload: Value,
        context: &Context,
    ) -> OperationOutcome {
        let outcome = match Request::from_operation_value(payload) {
            Ok(request) => {
                self.extensions.on_operation(context, &request).await;
                self.run_http_operation(request, context).await
            }
            Err(error) => OperationOutcome::failed(vec![error]),
        };
        self.conclude(outcome, context).await
    }

    async fn run_http_operation(
        &self,
        request: Request,
        context: &Context,
    ) -> OperationOutcome {
        let prepared = match self.prepare(&request, context) {
            Ok(prepared) => prepared,
            Err(errors) => return OperationOutcome::failed(errors),
        };

        if prepared.kind == ast::OperationType::Subscription {
            return OperationOutcome::executed(Response::from_errors(vec![
                Error::builder()
                    .message(SUBSCRIPTION_OVER_HTTP_MESSAGE)
                    .extension_code("SUBSCRIPTION_OVER_HTTP")
                    .build(),
            ]));
        }

        let root = match self.root.resolve(context, &request) {
            Ok(root) => root,
            Err(error) => {
                // The request was fine, the server hook was not: report the
                // failure as an executed operation, not a bad request.
                return OperationOutcome::executed(Response::from_errors(vec![
                    Error::from_exception(error.as_ref(), self.configuration.debug),
                ]));
            }
        };

        let engine_request = EngineRequest {
            request,
            context: context.clone(),
            root,
            rules: prepared.rules,
        };
        OperationOutcome::executed(self.engine.execute(engine_request).await)
    }

    /// Runs one WebSocket operation through the shared pipeline.
    ///
    /// Pre-execution failures come back as `Err` and are delivered as
    /// operation-scoped `error` frames; queries and mutations execute once.
    pub(crate) async fn execute_ws_operation(
        &self,
        request: Request,
        context: &Context,
    ) -> Result<WsExecution, Vec<Error>> {
        let prepared = self.prepare(&request, context)?;

        let root = self
            .root
            .resolve(context, &request)
            .map_err(|error| {
                vec![Error::from_exception(
                    error.as_ref(),
                    self.configuration.debug,
                )]
            })?;

        let engine_request = EngineRequest {
            request,
            context: context.clone(),
            root,
            rules: prepared.rules,
        };
        match prepared.kind {
            ast::OperationType::Subscription => self
                .engine
                .subscribe(engine_request)
                .await
                .map(WsExecution::Stream),
            _ => Ok(WsExecution::Single(self.engine.execute(engine_request).await)),
        }
    }

    /// Parses the document and applies the pre-execution policies.
    fn prepare(&self, request: &Request, context: &Context) -> Result<Prepared<E::Rule>, Vec<Error>> {
        let query = request.query.as_deref().unwrap_or_default();
        let document = match ast::Document::parse(query, "operation.graphql") {
            Ok(document) => document,
            Err(WithErrors { errors, .. }) => {
                return Err(ParseErrors { errors }.into_graphql_errors());
            }
        };

        let operation = requested_operation(&document, request.operation_name.as_deref());
        let kind = operation
            .map(|operation| operation.operation_type)
            .unwrap_or(ast::OperationType::Query);

        if !self.configuration.introspection
            && let Some(operation) = operation
            && selects_introspection(&document, operation)
        {
            return Err(vec![
                Error::builder()
                    .message(INTROSPECTION_DISABLED_MESSAGE)
                    .extension_code("INTROSPECTION_DISABLED")
                    .build(),
            ]);
        }

        let rules = self.rules.resolve(context, &document, request);
        Ok(Prepared { kind, rules })
    }

    /// Applies the error and formatting hooks to a finished outcome.
    async fn conclude(
        &self,
        mut outcome: OperationOutcome,
        context: &Context,
    ) -> OperationOutcome {
        if !outcome.response.errors.is_empty() {
            self.extensions
                .has_errors(context, &outcome.response.errors)
                .await;
        }
        if !self.extensions.is_empty() {
            let formatted = self.extensions.format(context).await;
            for (key, value) in formatted {
                // Entries already present in the response win.
                outcome.response.extensions.entry(key).or_insert(value);
            }
        }
        outcome
    }
}

/// Finds the operation this request targets.
///
/// Nameless requests select the only operation in the document; an ambiguous
/// or missing match returns `None` and leaves the error to the engine, which
/// owns the authoritative document validation.
fn requested_operation<'a>(
    document: &'a ast::Document,
    operation_name: Option<&str>,
) -> Option<&'a Node<ast::OperationDefinition>> {
    let mut operations = document.definitions.iter().filter_map(|definition| {
        match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        }
    });
    match operation_name {
        Some(name) => operations.find(|operation| {
            operation
                .name
                .as_ref()
                .is_some_and(|candidate| candidate.as_str() == name)
        }),
        None => {
            let first = operations.next();
            match operations.next() {
                Some(_) => None,
                None => first,
            }
        }
    }
}

/// True when any root selection of the operation resolves to `__schema` or
/// `__type`, following fragment spreads at the root level.
fn selects_introspection(
    document: &ast::Document,
    operation: &ast::OperationDefinition,
) -> bool {
    fn walk(document: &ast::Document, selections: &[ast::Selection], seen: &mut Vec<String>) -> bool {
        selections.iter().any(|selection| match selection {
            ast::Selection::Field(field) => {
                let name = field.name.as_str();
                name == "__schema" || name == "__type"
            }
            ast::Selection::InlineFragment(inline) => {
                walk(document, &inline.selection_set, seen)
            }
            ast::Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                // Documents are pre-validation here, so guard against spread cycles.
                if seen.iter().any(|visited| visited == name) {
                    return false;
                }
                seen.push(name.to_string());
                document.definitions.iter().any(|definition| match definition {
                    ast::Definition::FragmentDefinition(fragment)
                        if fragment.name.as_str() == name =>
                    {
                        walk(document, &fragment.selection_set, seen)
                    }
                    _ => false,
                })
            }
        })
    }
    walk(document, &operation.selection_set, &mut Vec::new())
}
