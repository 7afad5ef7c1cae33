#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use graphql_wire::Engine;
use graphql_wire::EngineRequest;
use graphql_wire::GraphQL;
use graphql_wire::graphql;
use graphql_wire::graphql::ResponseStream;
use serde_json_bytes::Value;
use serde_json_bytes::json;

/// An engine with fixed behavior per query string, enough to exercise every
/// transport path end to end.
pub struct TestEngine;

#[async_trait]
impl Engine for TestEngine {
    type Rule = ();

    async fn execute(&self, request: EngineRequest<()>) -> graphql::Response {
        match request.request.query.as_deref() {
            Some("{ boom }") => graphql::Response::builder()
                .data(Value::Null)
                .error(graphql::Error::builder().message("boom").build())
                .build(),
            _ => graphql::Response::builder()
                .data(json!({"hello": "Hello, Bob!"}))
                .build(),
        }
    }

    async fn subscribe(
        &self,
        request: EngineRequest<()>,
    ) -> Result<ResponseStream, Vec<graphql::Error>> {
        match request.request.query.as_deref() {
            Some("subscription { countdown }") => {
                let events: Vec<_> = (1..=3)
                    .rev()
                    .map(|n| graphql::Response::builder().data(json!({"countdown": n})).build())
                    .collect();
                Ok(Box::pin(stream::iter(events)))
            }
            Some("subscription { endless }") => {
                let interval = tokio::time::interval(Duration::from_millis(25));
                let events = tokio_stream::wrappers::IntervalStream::new(interval)
                    .enumerate()
                    .map(|(n, _)| {
                        graphql::Response::builder().data(json!({"endless": n})).build()
                    });
                Ok(Box::pin(events))
            }
            _ => Err(vec![
                graphql::Error::builder()
                    .message("Unknown subscription field")
                    .build(),
            ]),
        }
    }
}

/// Serves the binding on an ephemeral local port.
pub async fn spawn<E: Engine>(server: GraphQL<E>) -> SocketAddr {
    let router = server.into_router().expect("valid configuration");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server task");
    });
    addr
}
