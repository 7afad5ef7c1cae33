//! Hook chain around HTTP operation processing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Context;
use crate::graphql::Error;
use crate::graphql::Request;
use crate::json_ext::Object;

/// Hooks invoked around the processing of HTTP operations.
///
/// All methods default to no-ops; implement the ones you need. Extensions
/// run in registration order and share the request [`Context`]. They never
/// run for operations executed over a WebSocket connection.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Called once per HTTP request, before the body is decoded.
    async fn request_started(&self, _context: &Context) {}

    /// Called once per HTTP request, after the response body is assembled.
    async fn request_finished(&self, _context: &Context) {}

    /// Called for each operation after shape validation, before execution.
    /// A batch triggers one call per operation.
    async fn on_operation(&self, _context: &Context, _request: &Request) {}

    /// Called when an operation produced errors of any kind.
    async fn has_errors(&self, _context: &Context, _errors: &[Error]) {}

    /// Contributes entries to the `extensions` map of the operation's
    /// response. Entries from later extensions win key conflicts.
    async fn format(&self, _context: &Context) -> Option<Object> {
        None
    }
}

/// The ordered extension set bound to a server.
#[derive(Clone, Default)]
pub(crate) struct ExtensionChain {
    extensions: Arc<Vec<Arc<dyn Extension>>>,
}

impl ExtensionChain {
    pub(crate) fn new(extensions: Vec<Arc<dyn Extension>>) -> Self {
        Self {
            extensions: Arc::new(extensions),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub(crate) async fn request_started(&self, context: &Context) {
        for extension in self.extensions.iter() {
            extension.request_started(context).await;
        }
    }

    pub(crate) async fn request_finished(&self, context: &Context) {
        for extension in self.extensions.iter() {
            extension.request_finished(context).await;
        }
    }

    pub(crate) async fn on_operation(&self, context: &Context, request: &Request) {
        for extension in self.extensions.iter() {
            extension.on_operation(context, request).await;
        }
    }

    pub(crate) async fn has_errors(&self, context: &Context, errors: &[Error]) {
        for extension in self.extensions.iter() {
            extension.has_errors(context, errors).await;
        }
    }

    /// Collects and merges the `format` output of every extension.
    pub(crate) async fn format(&self, context: &Context) -> Object {
        let mut merged = Object::new();
        for extension in self.extensions.iter() {
            if let Some(entries) = extension.format(context).await {
                for (key, value) in entries {
                    merged.insert(key, value);
                }
            }
        }
        merged
    }
}
