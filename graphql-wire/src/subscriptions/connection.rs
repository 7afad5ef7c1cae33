//! The per-connection state machine.
//!
//! One [`Connection`] serves one WebSocket for its whole life: the init
//! handshake, the acknowledged phase with any number of concurrently running
//! operations, and teardown. Every outbound frame flows through a single
//! writer task feeding the sink, so sends stay serialized even though each
//! operation produces results from its own task. The live-operation map is
//! only ever touched by the connection task itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use serde_json_bytes::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::Context;
use crate::engine::Engine;
use crate::execution::WsExecution;
use crate::graphql::Request;
use crate::server::GraphQL;
use crate::subscriptions::protocol::ClientMessage;
use crate::subscriptions::protocol::ServerMessage;
use crate::subscriptions::protocol::WebSocketProtocol;
use crate::subscriptions::protocol::close;
use crate::subscriptions::protocol::close_frame;

/// Frames handed to the writer task.
enum Outbound {
    Message(ServerMessage),
    /// Terminal frame: the writer sends the close and exits.
    Close { code: u16, reason: String },
}

/// How the init phase concluded.
enum InitOutcome {
    Accepted { ack_payload: Option<Value> },
    Rejected { payload: Option<Value> },
    Violation { code: u16, reason: String },
    /// The socket went away before the handshake finished.
    Gone,
}

/// A live operation, owned by the connection task.
///
/// Dropping or firing `cancel` stops the producer's stream at its next
/// suspension point. A closed sender means the producer already finished, so
/// the id is free for reuse.
struct OperationHandle {
    cancel: oneshot::Sender<()>,
}

/// One WebSocket connection bound to a server.
pub(crate) struct Connection<E: Engine> {
    server: Arc<GraphQL<E>>,
    protocol: WebSocketProtocol,
    context: Context,
}

impl<E: Engine> Connection<E> {
    pub(crate) fn new(
        server: Arc<GraphQL<E>>,
        protocol: WebSocketProtocol,
        context: Context,
    ) -> Self {
        Self {
            server,
            protocol,
            context,
        }
    }

    /// Drives the connection until the socket closes.
    ///
    /// Generic over the sink/stream halves so tests can substitute in-memory
    /// channels for a real socket.
    pub(crate) async fn serve<W, R>(self, sink: W, mut stream: R)
    where
        W: Sink<ws::Message> + Unpin + Send + 'static,
        R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin + Send,
    {
        let connection_id = uuid::Uuid::new_v4();
        let span = tracing::debug_span!(
            "websocket_connection",
            id = %connection_id,
            protocol = self.protocol.subprotocol(),
        );
        async {
            tracing::debug!("websocket connection opened");

            let (outbound, outbound_rx) = mpsc::channel::<Outbound>(16);
            let writer = tokio::spawn(write_frames(sink, outbound_rx, self.protocol));

            self.run(&mut stream, &outbound).await;

            // Dropping the last sender lets the writer drain queued frames and exit.
            drop(outbound);
            let _ = writer.await;
            tracing::debug!("websocket connection closed");
        }
        .instrument(span)
        .await;
    }

    async fn run<R>(&self, stream: &mut R, outbound: &mpsc::Sender<Outbound>)
    where
        R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin + Send,
    {
        let init_timeout = self.server.configuration.subscriptions.connection_init_timeout;
        let init = tokio::time::timeout(init_timeout, self.await_init(stream, outbound)).await;
        match init {
            Err(_elapsed) => {
                tracing::debug!("no connection_init within the timeout");
                send_close(outbound, close::INIT_TIMEOUT, "Connection initialisation timeout")
                    .await;
            }
            Ok(InitOutcome::Gone) => {}
            Ok(InitOutcome::Violation { code, reason }) => {
                tracing::debug!(code, %reason, "protocol violation before acknowledgement");
                send_close(outbound, code, reason).await;
            }
            Ok(InitOutcome::Rejected { payload }) => {
                tracing::debug!("connection rejected by the on_connect hook");
                if self.protocol == WebSocketProtocol::SubscriptionsTransportWs
                    && let Some(payload) = payload
                {
                    send(outbound, ServerMessage::ConnectionError { payload }).await;
                }
                send_close(outbound, close::FORBIDDEN, "Forbidden").await;
            }
            Ok(InitOutcome::Accepted { ack_payload }) => {
                send(
                    outbound,
                    ServerMessage::ConnectionAck {
                        payload: ack_payload,
                    },
                )
                .await;
                if self.protocol == WebSocketProtocol::SubscriptionsTransportWs
                    && self.server.configuration.subscriptions.keepalive_interval.is_some()
                {
                    send(outbound, ServerMessage::KeepAlive).await;
                }
                self.acknowledged(stream, outbound).await;
            }
        }
    }

    /// CONNECTING: waits for `connection_init` and runs the `on_connect` hook.
    async fn await_init<R>(&self, stream: &mut R, outbound: &mpsc::Sender<Outbound>) -> InitOutcome
    where
        R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin + Send,
    {
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(error)) => {
                    tracing::debug!(%error, "websocket error before acknowledgement");
                    return InitOutcome::Gone;
                }
                None => return InitOutcome::Gone,
            };
            if matches!(message, ws::Message::Close(_)) {
                return InitOutcome::Gone;
            }
            let decoded = match ClientMessage::decode(&message) {
                Some(Ok(decoded)) => decoded,
                Some(Err(error)) => {
                    return InitOutcome::Violation {
                        code: close::BAD_REQUEST,
                        reason: format!("Invalid message: {error}"),
                    };
                }
                // Transport ping/pong frames, answered by the socket itself.
                None => continue,
            };
            match decoded {
                ClientMessage::ConnectionInit { payload } => {
                    return match &self.server.on_connect {
                        None => InitOutcome::Accepted { ack_payload: None },
                        Some(hook) => match hook(self.context.clone(), payload).await {
                            Ok(ack_payload) => InitOutcome::Accepted { ack_payload },
                            Err(rejection) => InitOutcome::Rejected {
                                payload: rejection.payload,
                            },
                        },
                    };
                }
                ClientMessage::Ping { payload } => {
                    send(outbound, ServerMessage::Pong { payload }).await;
                }
                ClientMessage::Pong { .. } => {}
                ClientMessage::ConnectionTerminate => return InitOutcome::Gone,
                ClientMessage::Subscribe { .. } | ClientMessage::Complete { .. } => {
                    return InitOutcome::Violation {
                        code: close::UNAUTHORIZED,
                        reason: "Unauthorized".to_string(),
                    };
                }
            }
        }
    }

    /// ACKNOWLEDGED: dispatches operations until the socket closes.
    async fn acknowledged<R>(&self, stream: &mut R, outbound: &mpsc::Sender<Outbound>)
    where
        R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin + Send,
    {
        let mut operations: HashMap<String, OperationHandle> = HashMap::new();
        let mut producers = JoinSet::new();

        let keepalive = self.server.configuration.subscriptions.keepalive_interval;
        let mut keepalive_timer = keepalive.map(|interval| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });
        // Modern keep-alive liveness: set after a ping goes out, cleared by
        // any inbound frame. Two consecutive silent intervals close the
        // connection.
        let mut awaiting_pong = false;

        loop {
            let message = tokio::select! {
                biased;
                _ = tick(&mut keepalive_timer) => {
                    match self.protocol {
                        WebSocketProtocol::SubscriptionsTransportWs => {
                            send(outbound, ServerMessage::KeepAlive).await;
                        }
                        WebSocketProtocol::GraphqlWs => {
                            if awaiting_pong {
                                tracing::debug!("client missed the keep-alive window");
                                send_close(outbound, close::KEEPALIVE_TIMEOUT, "keep-alive timeout")
                                    .await;
                                break;
                            }
                            send(outbound, ServerMessage::Ping).await;
                            awaiting_pong = true;
                        }
                    }
                    continue;
                }
                message = stream.next() => message,
            };

            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(error)) => {
                    tracing::debug!(%error, "websocket error, dropping connection");
                    break;
                }
                None => break,
            };
            awaiting_pong = false;
            if matches!(message, ws::Message::Close(_)) {
                break;
            }
            let decoded = match ClientMessage::decode(&message) {
                Some(Ok(decoded)) => decoded,
                Some(Err(error)) => {
                    send_close(
                        outbound,
                        close::BAD_REQUEST,
                        format!("Invalid message: {error}"),
                    )
                    .await;
                    break;
                }
                None => continue,
            };

            match decoded {
                ClientMessage::ConnectionInit { .. } => {
                    send_close(outbound, close::TOO_MANY_INIT, "Too many initialisation requests")
                        .await;
                    break;
                }
                ClientMessage::Subscribe { id, payload } => {
                    let live = operations
                        .get(&id)
                        .is_some_and(|handle| !handle.cancel.is_closed());
                    if live {
                        send_close(
                            outbound,
                            close::DUPLICATE_SUBSCRIBER,
                            format!("Subscriber for {id} already exists"),
                        )
                        .await;
                        break;
                    }
                    tracing::debug!(operation = %id, "starting operation");
                    let (cancel, cancelled) = oneshot::channel();
                    operations.insert(id.clone(), OperationHandle { cancel });
                    producers.spawn(produce(
                        Arc::clone(&self.server),
                        self.context.clone(),
                        self.protocol,
                        id,
                        payload,
                        outbound.clone(),
                        cancelled,
                    ));
                }
                ClientMessage::Complete { id } => {
                    if let Some(handle) = operations.remove(&id) {
                        tracing::debug!(operation = %id, "operation stopped by the client");
                        let _ = handle.cancel.send(());
                    }
                }
                ClientMessage::Ping { payload } => {
                    send(outbound, ServerMessage::Pong { payload }).await;
                }
                ClientMessage::Pong { .. } => {}
                ClientMessage::ConnectionTerminate => {
                    send_close(outbound, close::NORMAL, "").await;
                    break;
                }
            }
        }

        // Cancellation reaches every producer at its next suspension point;
        // frames they already queued still flush through the writer.
        drop(operations);
        producers.abort_all();
    }
}

/// Runs one operation and feeds its frames to the writer.
///
/// All frames for one id originate here, sequentially, which gives the
/// per-id ordering guarantee: every `next` precedes the final
/// `complete`/`error`.
async fn produce<E: Engine>(
    server: Arc<GraphQL<E>>,
    context: Context,
    protocol: WebSocketProtocol,
    id: String,
    payload: Value,
    outbound: mpsc::Sender<Outbound>,
    cancelled: oneshot::Receiver<()>,
) {
    let request = match Request::from_operation_value(payload) {
        Ok(request) => request,
        Err(error) => {
            send(
                &outbound,
                ServerMessage::Error {
                    id,
                    errors: vec![error],
                },
            )
            .await;
            return;
        }
    };

    match server.execute_ws_operation(request, &context).await {
        Err(errors) => {
            send(&outbound, ServerMessage::Error { id, errors }).await;
        }
        Ok(WsExecution::Single(response)) => {
            send(
                &outbound,
                ServerMessage::Next {
                    id: id.clone(),
                    payload: response,
                },
            )
            .await;
            send(&outbound, ServerMessage::Complete { id }).await;
        }
        Ok(WsExecution::Stream(responses)) => {
            let mut responses = responses.take_until(cancelled);
            while let Some(response) = responses.next().await {
                let next = ServerMessage::Next {
                    id: id.clone(),
                    payload: response,
                };
                if outbound.send(Outbound::Message(next)).await.is_err() {
                    return;
                }
            }
            let cancelled = responses.is_stopped();
            // A cancelled operation completes silently on the modern
            // protocol; the legacy protocol acknowledges the stop.
            if !cancelled || protocol == WebSocketProtocol::SubscriptionsTransportWs {
                send(&outbound, ServerMessage::Complete { id }).await;
            }
        }
    }
}

/// The single writer: serializes frames and owns the sink.
async fn write_frames<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Outbound>,
    protocol: WebSocketProtocol,
) where
    W: Sink<ws::Message> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Message(message) => match message.encode(protocol) {
                Ok(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping unserializable frame");
                }
            },
            Outbound::Close { code, reason } => {
                let _ = sink.send(close_frame(code, reason)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn send(outbound: &mpsc::Sender<Outbound>, message: ServerMessage) {
    let _ = outbound.send(Outbound::Message(message)).await;
}

async fn send_close(outbound: &mpsc::Sender<Outbound>, code: u16, reason: impl Into<String>) {
    let _ = outbound
        .send(Outbound::Close {
            code,
            reason: reason.into(),
        })
        .await;
}

/// Waits for the next keep-alive tick, or forever when disabled.
async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::channel::mpsc as futures_mpsc;
    use futures::stream;
    use serde_json::json as sjson;
    use serde_json_bytes::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::Configuration;
    use crate::engine::EngineRequest;
    use crate::graphql;
    use crate::graphql::Response;
    use crate::graphql::ResponseStream;
    use crate::server::ConnectionRejected;
    use crate::server::OnConnect;

    /// Subscriptions tick values relayed from a broadcast channel; queries
    /// echo their document.
    struct TickEngine {
        ticks: broadcast::Sender<u64>,
    }

    impl Default for TickEngine {
        fn default() -> Self {
            let (ticks, _) = broadcast::channel(16);
            Self { ticks }
        }
    }

    #[async_trait]
    impl Engine for TickEngine {
        type Rule = ();

        async fn execute(&self, request: EngineRequest<()>) -> Response {
            Response::builder()
                .data(json!({"echo": request.request.query}))
                .build()
        }

        async fn subscribe(
            &self,
            request: EngineRequest<()>,
        ) -> Result<ResponseStream, Vec<graphql::Error>> {
            if request.request.query.as_deref() == Some("subscription { broken }") {
                return Err(vec![
                    graphql::Error::builder()
                        .message("unknown subscription field")
                        .build(),
                ]);
            }
            if request.request.query.as_deref() == Some("subscription { finite }") {
                return Ok(Box::pin(stream::iter(vec![
                    Response::builder().data(json!({"n": 1})).build(),
                    Response::builder().data(json!({"n": 2})).build(),
                    Response::builder().data(json!({"n": 3})).build(),
                ])));
            }
            let ticks = self.ticks.subscribe();
            Ok(Box::pin(stream::unfold(ticks, |mut ticks| async move {
                match ticks.recv().await {
                    Ok(n) => Some((
                        Response::builder().data(json!({"tick": n})).build(),
                        ticks,
                    )),
                    Err(_) => None,
                }
            })))
        }
    }

    struct Harness {
        to_server: futures_mpsc::UnboundedSender<Result<ws::Message, axum::Error>>,
        from_server: futures_mpsc::UnboundedReceiver<ws::Message>,
        server: Arc<GraphQL<TickEngine>>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn spawn(protocol: WebSocketProtocol, configuration: Configuration) -> Self {
            Self::spawn_with(protocol, configuration, None)
        }

        fn spawn_with(
            protocol: WebSocketProtocol,
            configuration: Configuration,
            on_connect: Option<OnConnect>,
        ) -> Self {
            let server = Arc::new(
                GraphQL::builder()
                    .engine(TickEngine::default())
                    .configuration(configuration)
                    .and_on_connect(on_connect)
                    .build(),
            );

            let (to_server, inbound) = futures_mpsc::unbounded();
            let (sink, from_server) = futures_mpsc::unbounded();
            let connection = Connection::new(Arc::clone(&server), protocol, Context::new());
            let task = tokio::spawn(connection.serve(sink, inbound));
            Self {
                to_server,
                from_server,
                server,
                task,
            }
        }

        fn send(&self, value: serde_json::Value) {
            self.to_server
                .unbounded_send(Ok(ws::Message::Text(value.to_string().into())))
                .expect("connection is listening");
        }

        async fn recv(&mut self) -> serde_json::Value {
            match self.next_frame().await {
                ws::Message::Text(text) => serde_json::from_str(&text).expect("valid JSON frame"),
                other => panic!("expected a text frame, got {other:?}"),
            }
        }

        async fn next_frame(&mut self) -> ws::Message {
            tokio::time::timeout(std::time::Duration::from_secs(60), self.from_server.next())
                .await
                .expect("frame within the timeout")
                .expect("connection still open")
        }

        async fn expect_close(&mut self, code: u16) -> String {
            loop {
                match self.next_frame().await {
                    ws::Message::Close(Some(frame)) => {
                        assert_eq!(frame.code, code);
                        return frame.reason.to_string();
                    }
                    ws::Message::Close(None) => panic!("close frame without a code"),
                    _ => continue,
                }
            }
        }

        async fn handshake(&mut self) {
            self.send(sjson!({"type": "connection_init"}));
            let ack = self.recv().await;
            assert_eq!(ack["type"], "connection_ack");
        }
    }

    fn no_keepalive() -> Configuration {
        Configuration {
            subscriptions: crate::SubscriptionConfig {
                keepalive_interval: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn finite_subscription_is_ordered_and_completes() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "subscription { finite }"},
        }));
        for expected in 1..=3 {
            let next = harness.recv().await;
            assert_eq!(next["type"], "next");
            assert_eq!(next["id"], "1");
            assert_eq!(next["payload"]["data"]["n"], expected);
        }
        let complete = harness.recv().await;
        assert_eq!(complete["type"], "complete");
        assert_eq!(complete["id"], "1");
    }

    #[test_log::test(tokio::test)]
    async fn legacy_wire_names_are_served() {
        let mut harness =
            Harness::spawn(WebSocketProtocol::SubscriptionsTransportWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "start",
            "id": "a",
            "payload": {"query": "subscription { finite }"},
        }));
        let first = harness.recv().await;
        assert_eq!(first["type"], "data");
        assert_eq!(first["payload"]["data"]["n"], 1);
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_live_id_closes_4409() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        let subscribe = sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "subscription { ticks }"},
        });
        harness.send(subscribe.clone());
        tokio::task::yield_now().await;
        harness.send(subscribe);
        let reason = harness.expect_close(close::DUPLICATE_SUBSCRIBER).await;
        assert_eq!(reason, "Subscriber for 1 already exists");
    }

    #[test_log::test(tokio::test)]
    async fn stop_then_restart_reuses_the_id() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "subscription { ticks }"},
        }));
        harness.send(sjson!({"type": "complete", "id": "1"}));
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "subscription { finite }"},
        }));
        let next = harness.recv().await;
        assert_eq!(next["type"], "next");
        assert_eq!(next["payload"]["data"]["n"], 1);
    }

    #[test_log::test(tokio::test)]
    async fn queries_over_ws_execute_once() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "q",
            "payload": {"query": "{ me }"},
        }));
        let next = harness.recv().await;
        assert_eq!(next["type"], "next");
        assert_eq!(next["payload"]["data"]["echo"], "{ me }");
        let complete = harness.recv().await;
        assert_eq!(complete["type"], "complete");
    }

    #[test_log::test(tokio::test)]
    async fn operation_errors_keep_the_connection_open() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "bad",
            "payload": {"query": "subscription { broken }"},
        }));
        let error = harness.recv().await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["id"], "bad");
        assert_eq!(error["payload"][0]["message"], "unknown subscription field");

        // The connection still serves other operations.
        harness.send(sjson!({
            "type": "subscribe",
            "id": "ok",
            "payload": {"query": "{ me }"},
        }));
        let next = harness.recv().await;
        assert_eq!(next["type"], "next");
        assert_eq!(next["id"], "ok");
    }

    #[test_log::test(tokio::test)]
    async fn malformed_operation_payload_is_operation_scoped() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": 42},
        }));
        let error = harness.recv().await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["payload"][0]["message"], "The query must be a string.");
    }

    #[test_log::test(tokio::test)]
    async fn message_before_init_closes_4401() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "{ me }"},
        }));
        harness.expect_close(close::UNAUTHORIZED).await;
    }

    #[test_log::test(tokio::test)]
    async fn second_init_closes_4429() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({"type": "connection_init"}));
        let reason = harness.expect_close(close::TOO_MANY_INIT).await;
        assert_eq!(reason, "Too many initialisation requests");
    }

    #[test_log::test(tokio::test)]
    async fn unparseable_frame_closes_4400() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness
            .to_server
            .unbounded_send(Ok(ws::Message::Text("{ garbage".into())))
            .unwrap();
        harness.expect_close(close::BAD_REQUEST).await;
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn init_timeout_closes_4408() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        let reason = harness.expect_close(close::INIT_TIMEOUT).await;
        assert_eq!(reason, "Connection initialisation timeout");
    }

    #[test_log::test(tokio::test)]
    async fn ping_is_answered_with_pong_echoing_the_payload() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.send(sjson!({"type": "ping", "payload": {"probe": 1}}));
        let pong = harness.recv().await;
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["payload"]["probe"], 1);

        harness.handshake().await;
        harness.send(sjson!({"type": "ping"}));
        let pong = harness.recv().await;
        assert_eq!(pong["type"], "pong");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn legacy_keepalive_sends_ka_frames() {
        let mut harness =
            Harness::spawn(WebSocketProtocol::SubscriptionsTransportWs, Configuration::default());
        harness.handshake().await;
        // One ka right after the ack, then one per interval.
        let ka = harness.recv().await;
        assert_eq!(ka["type"], "ka");
        let ka = harness.recv().await;
        assert_eq!(ka["type"], "ka");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn modern_keepalive_closes_silent_connections() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, Configuration::default());
        harness.handshake().await;
        let ping = harness.recv().await;
        assert_eq!(ping["type"], "ping");
        // No pong: the next tick gives up on the client.
        harness.expect_close(close::KEEPALIVE_TIMEOUT).await;
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn modern_keepalive_spares_responsive_clients() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, Configuration::default());
        harness.handshake().await;
        for _ in 0..3 {
            let ping = harness.recv().await;
            assert_eq!(ping["type"], "ping");
            harness.send(sjson!({"type": "pong"}));
        }
        assert!(!harness.task.is_finished());
    }

    #[test_log::test(tokio::test)]
    async fn rejected_connection_closes_4403() {
        let on_connect: OnConnect = Arc::new(|_context, _payload| {
            Box::pin(async {
                Err(ConnectionRejected::new(json!({"reason": "bad token"})))
            })
        });
        let mut harness = Harness::spawn_with(
            WebSocketProtocol::SubscriptionsTransportWs,
            no_keepalive(),
            Some(on_connect),
        );
        harness.send(sjson!({"type": "connection_init", "payload": {"token": "nope"}}));
        let error = harness.recv().await;
        assert_eq!(error["type"], "connection_error");
        assert_eq!(error["payload"]["reason"], "bad token");
        harness.expect_close(close::FORBIDDEN).await;

        // Modern clients only observe the close code.
        let on_connect: OnConnect =
            Arc::new(|_context, _payload| Box::pin(async { Err(ConnectionRejected::default()) }));
        let mut harness = Harness::spawn_with(
            WebSocketProtocol::GraphqlWs,
            no_keepalive(),
            Some(on_connect),
        );
        harness.send(sjson!({"type": "connection_init"}));
        let reason = harness.expect_close(close::FORBIDDEN).await;
        assert_eq!(reason, "Forbidden");
    }

    #[test_log::test(tokio::test)]
    async fn accepted_connection_relays_the_ack_payload() {
        let on_connect: OnConnect = Arc::new(|context, payload| {
            Box::pin(async move {
                context.insert_json_value("token", payload.unwrap_or_default());
                Ok(Some(json!({"welcome": true})))
            })
        });
        let mut harness = Harness::spawn_with(
            WebSocketProtocol::GraphqlWs,
            no_keepalive(),
            Some(on_connect),
        );
        harness.send(sjson!({"type": "connection_init", "payload": "secret"}));
        let ack = harness.recv().await;
        assert_eq!(ack["type"], "connection_ack");
        assert_eq!(ack["payload"]["welcome"], true);
    }

    #[test_log::test(tokio::test)]
    async fn connection_terminate_closes_normally() {
        let mut harness =
            Harness::spawn(WebSocketProtocol::SubscriptionsTransportWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({"type": "connection_terminate"}));
        harness.expect_close(close::NORMAL).await;
    }

    #[test_log::test(tokio::test)]
    async fn socket_close_cancels_live_subscriptions() {
        let mut harness = Harness::spawn(WebSocketProtocol::GraphqlWs, no_keepalive());
        harness.handshake().await;
        harness.send(sjson!({
            "type": "subscribe",
            "id": "1",
            "payload": {"query": "subscription { ticks }"},
        }));
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while harness.server.engine.ticks.receiver_count() == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription starts");

        harness
            .to_server
            .unbounded_send(Ok(ws::Message::Close(None)))
            .unwrap();
        let task = harness.task;
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("connection task ends")
            .expect("connection task does not panic");
    }
}
