use std::{fmt::Display, future::ready, pin::pin, sync::Arc};

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as Frame, WebSocket},
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use shared::models::{LiveChannelQuery, LiveEvent, SendMessageRequest, check_identifier};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    services::{ConnectionHandle, heartbeat::spawn_heartbeat},
};

/// Upgrades `GET /ws?user_id=..` into the user's live channel.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveChannelQuery>,
) -> AppResult<Response> {
    check_identifier(&query.user_id).map_err(|err| {
        ApiError::validation(format!("user_id: {err}")).with_details(json!({ "field": "user_id" }))
    })?;

    let user_id = query.user_id;
    info!(user_id, "live channel upgrade requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (sender, receiver) = socket.split();

    let inbound = receiver
        .take_while(|frame| ready(!matches!(frame, Ok(Frame::Close(_)) | Err(_))))
        .filter_map(|frame| {
            ready(match frame {
                Ok(Frame::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });
    let outbound =
        sender.with(|text: String| ready(Ok::<_, axum::Error>(Frame::Text(text.into()))));

    run_live_session(state, user_id, inbound, outbound).await;
}

/// Drives one live channel from open to close.
///
/// `inbound` yields the client's text frames and ends when the client goes
/// away. Every [`LiveEvent`] for this connection, whether a delivered message
/// or a reply to the client's own frame, is written to `outbound` as JSON.
#[instrument(name = "chat.live_session", skip(state, inbound, outbound))]
pub async fn run_live_session<I, O>(state: Arc<AppState>, user_id: String, inbound: I, outbound: O)
where
    I: Stream<Item = String> + Send,
    O: Sink<String> + Send + 'static,
    O::Error: Display,
{
    let (handle, events) = ConnectionHandle::new(state.config.live.channel_capacity);
    let connection_id = handle.id();

    // Registering first means an older connection closing from here on sees
    // itself superseded and leaves presence alone.
    if let Some(previous) = state.registry.register(&user_id, handle.clone()).await {
        info!(
            previous = %previous.id(),
            current = %connection_id,
            "live channel superseded an older connection"
        );
    }

    if let Err(err) = state.presence.set_online(&user_id).await {
        warn!(error = %err, "failed to mark user online");
    }
    state.presence.touch_activity(&user_id).await;

    let heartbeat_token = CancellationToken::new();
    let _heartbeat_guard = heartbeat_token.clone().drop_guard();
    let heartbeat = spawn_heartbeat(
        state.presence.clone(),
        user_id.clone(),
        state.config.presence.heartbeat_interval(),
        heartbeat_token.clone(),
    );

    let writer_token = CancellationToken::new();
    let writer = tokio::spawn(write_events(events, outbound, writer_token.clone()));

    let mut inbound = pin!(inbound);
    while let Some(frame) = inbound.next().await {
        let reply = match serde_json::from_str::<SendMessageRequest>(&frame) {
            Ok(request) => match state.dispatcher.submit_frame(&user_id, request).await {
                Ok(receipt) => LiveEvent::Ack {
                    message: receipt.message,
                    delivery: receipt.delivery,
                },
                Err(err) => LiveEvent::error(err.code(), err.to_string()),
            },
            Err(err) => {
                debug!(error = %err, "rejecting malformed frame");
                LiveEvent::error("invalid_frame", err.to_string())
            }
        };
        if !handle.try_send(reply) {
            warn!("live queue full; dropping reply");
        }
    }

    heartbeat_token.cancel();
    if let Err(err) = heartbeat.await {
        warn!(error = %err, "heartbeat task ended abnormally");
    }

    writer_token.cancel();
    if let Err(err) = writer.await {
        warn!(error = %err, "writer task ended abnormally");
    }

    let presence = &state.presence;
    state
        .registry
        .unregister_with(&user_id, connection_id, || async {
            if let Err(err) = presence.set_offline(&user_id).await {
                warn!(error = %err, "failed to mark user offline");
            }
        })
        .await;
    info!("live channel closed");
}

async fn write_events<O>(mut events: mpsc::Receiver<LiveEvent>, outbound: O, stop: CancellationToken)
where
    O: Sink<String>,
    O::Error: Display,
{
    let mut outbound = pin!(outbound);

    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = stop.cancelled() => break,
        };
        if !forward(&mut outbound, &event).await {
            return;
        }
    }

    // Events queued before the stop signal still go out.
    while let Ok(event) = events.try_recv() {
        if !forward(&mut outbound, &event).await {
            return;
        }
    }

    if let Err(err) = outbound.close().await {
        debug!(error = %err, "live channel already closed");
    }
}

async fn forward<O>(outbound: &mut O, event: &LiveEvent) -> bool
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "failed to encode live event");
            return true;
        }
    };
    match outbound.send(text).await {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, "live channel write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::MemoryLog,
        store::{KeyValueStore, MemoryStore, StoreResult},
    };
    use async_trait::async_trait;
    use futures::channel::mpsc as channel;
    use serde_json::{Value, json};
    use shared::{
        config::server::{Config, Profile},
        models::{Delivery, HistoryQuery},
    };
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use tokio::sync::Notify;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(Config::default_for_profile(Profile::Test)))
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum GatedOp {
        SetWithTtl,
        Delete,
    }

    /// Holds the first armed `op` on `key` until released.
    struct Gate {
        op: GatedOp,
        key: &'static str,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl Gate {
        fn new(op: GatedOp, key: &'static str) -> Arc<Self> {
            Arc::new(Self {
                op,
                key,
                armed: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            })
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        async fn pass(&self, op: GatedOp, key: &str) {
            if op == self.op && key == self.key && self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
        }
    }

    struct GatedStore {
        inner: MemoryStore,
        gate: Arc<Gate>,
    }

    #[async_trait]
    impl KeyValueStore for GatedStore {
        async fn list_push_front_capped(&self, key: &str, value: String, cap: usize) -> StoreResult<usize> {
            self.inner.list_push_front_capped(key, value, cap).await
        }
        async fn list_fill_if_empty(&self, key: &str, values: Vec<String>, cap: usize) -> StoreResult<bool> {
            self.inner.list_fill_if_empty(key, values, cap).await
        }
        async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
            self.inner.list_range(key, limit).await
        }
        async fn list_len(&self, key: &str) -> StoreResult<usize> {
            self.inner.list_len(key).await
        }
        async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
            self.inner.hash_incr(key, field, delta).await
        }
        async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()> {
            self.inner.hash_del(key, field).await
        }
        async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
            self.inner.hash_get_all(key).await
        }
        async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
            self.gate.pass(GatedOp::SetWithTtl, key).await;
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.gate.pass(GatedOp::Delete, key).await;
            self.inner.delete(key).await
        }
    }

    fn gated_state(gate: &Arc<Gate>) -> Arc<AppState> {
        let store = GatedStore {
            inner: MemoryStore::new(),
            gate: Arc::clone(gate),
        };
        Arc::new(AppState::new(
            Arc::new(Config::default_for_profile(Profile::Test)),
            Arc::new(store),
            Arc::new(MemoryLog::new()),
            None,
        ))
    }

    struct Client {
        frames: channel::UnboundedSender<String>,
        events: channel::UnboundedReceiver<String>,
        session: tokio::task::JoinHandle<()>,
    }

    impl Client {
        fn connect(state: &Arc<AppState>, user_id: &str) -> Self {
            let (frames, inbound) = channel::unbounded();
            let (outbound, events) = channel::unbounded();
            let session = tokio::spawn(run_live_session(
                Arc::clone(state),
                user_id.to_string(),
                inbound,
                outbound,
            ));
            Self {
                frames,
                events,
                session,
            }
        }

        fn send(&self, frame: Value) {
            self.frames.unbounded_send(frame.to_string()).unwrap();
        }

        async fn next_event(&mut self) -> Value {
            let text = tokio::time::timeout(Duration::from_secs(5), self.events.next())
                .await
                .expect("event within timeout")
                .expect("channel open");
            serde_json::from_str(&text).unwrap()
        }

        async fn close(self) {
            drop(self.frames);
            self.session.await.unwrap();
        }
    }

    async fn wait_until_connected(state: &AppState, user_id: &str) {
        for _ in 0..100 {
            if state.registry.is_connected(user_id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{user_id} never connected");
    }

    #[tokio::test]
    async fn opening_a_channel_marks_the_user_online() {
        let state = test_state();
        let client = Client::connect(&state, "u1");
        wait_until_connected(&state, "u1").await;

        assert!(state.presence.is_online("u1").await.unwrap());
        assert!(state.presence.last_activity("u1").await.unwrap().is_some());

        client.close().await;
        assert!(!state.registry.is_connected("u1").await);
        assert!(!state.presence.is_online("u1").await.unwrap());
    }

    #[tokio::test]
    async fn frames_are_acked_and_delivered_to_the_receiver() {
        let state = test_state();
        let mut alice = Client::connect(&state, "u1");
        let mut bob = Client::connect(&state, "u2");
        wait_until_connected(&state, "u1").await;
        wait_until_connected(&state, "u2").await;

        alice.send(json!({ "receiver_id": "u2", "content": "hello" }));

        let ack = alice.next_event().await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["delivery"]["status"], "live");
        assert_eq!(ack["delivery"]["delivered"], true);

        let delivered = bob.next_event().await;
        assert_eq!(delivered["type"], "message");
        assert_eq!(delivered["message"]["sender_id"], "u1");
        assert_eq!(delivered["message"]["content"], "hello");

        assert!(state.unread.get_all("u2").await.unwrap().is_empty());

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn frame_sender_is_the_channel_owner() {
        let state = test_state();
        let mut client = Client::connect(&state, "u1");
        wait_until_connected(&state, "u1").await;

        client.send(json!({ "sender_id": "mallory", "receiver_id": "u2", "content": "hi" }));
        let ack = client.next_event().await;
        assert_eq!(ack["message"]["sender_id"], "u1");

        let history = state
            .history
            .resolve(&HistoryQuery {
                sender_id: "u2".into(),
                receiver_id: "u1".into(),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender_id, "u1");

        client.close().await;
    }

    #[tokio::test]
    async fn invalid_frames_report_errors_and_keep_the_channel_open() {
        let state = test_state();
        let mut client = Client::connect(&state, "u1");
        wait_until_connected(&state, "u1").await;

        client.frames.unbounded_send("not json".into()).unwrap();
        let error = client.next_event().await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "invalid_frame");

        client.send(json!({ "receiver_id": "u2", "content": "" }));
        let error = client.next_event().await;
        assert_eq!(error["code"], "validation_failed");

        client.send(json!({ "receiver_id": "u2", "content": "still here" }));
        let ack = client.next_event().await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["delivery"], json!({ "status": "unread", "count": 1 }));

        client.close().await;
    }

    #[tokio::test]
    async fn superseded_connection_does_not_mark_user_offline() {
        let state = test_state();
        let first = Client::connect(&state, "u1");
        wait_until_connected(&state, "u1").await;

        let mut second = Client::connect(&state, "u1");
        // An ack proves the second session registered before reading frames.
        second.send(json!({ "receiver_id": "u2", "content": "from the new tab" }));
        assert_eq!(second.next_event().await["type"], "ack");

        first.close().await;
        assert!(state.registry.is_connected("u1").await);
        assert!(state.presence.is_online("u1").await.unwrap());

        second.close().await;
        assert!(!state.registry.is_connected("u1").await);
        assert!(!state.presence.is_online("u1").await.unwrap());
    }

    #[tokio::test]
    async fn reconnect_during_connect_keeps_new_connection_online() {
        let gate = Gate::new(GatedOp::SetWithTtl, "user:lastactive:u1");
        let state = gated_state(&gate);
        let mut first = Client::connect(&state, "u1");
        first.send(json!({ "receiver_id": "u2", "content": "first tab" }));
        assert_eq!(first.next_event().await["type"], "ack");

        // The new session stalls while recording activity on connect.
        gate.arm();
        let mut second = Client::connect(&state, "u1");
        gate.entered.notified().await;

        first.close().await;
        gate.release.notify_one();

        second.send(json!({ "receiver_id": "u2", "content": "second tab" }));
        assert_eq!(second.next_event().await["type"], "ack");
        assert!(state.registry.is_connected("u1").await);
        assert!(state.presence.is_online("u1").await.unwrap());

        second.close().await;
        assert!(!state.presence.is_online("u1").await.unwrap());
    }

    #[tokio::test]
    async fn stale_disconnect_finishes_before_new_connection_registers() {
        let gate = Gate::new(GatedOp::Delete, "user:online:u1");
        let state = gated_state(&gate);
        let mut first = Client::connect(&state, "u1");
        first.send(json!({ "receiver_id": "u2", "content": "first tab" }));
        assert_eq!(first.next_event().await["type"], "ack");

        // The old session stalls while clearing the online marker.
        gate.arm();
        let closing = tokio::spawn(first.close());
        gate.entered.notified().await;

        let mut second = Client::connect(&state, "u1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.release.notify_one();
        closing.await.unwrap();

        second.send(json!({ "receiver_id": "u2", "content": "second tab" }));
        assert_eq!(second.next_event().await["type"], "ack");
        assert!(state.registry.is_connected("u1").await);
        assert!(state.presence.is_online("u1").await.unwrap());

        second.close().await;
    }

    #[tokio::test]
    async fn delivery_to_a_closed_writer_reports_not_delivered() {
        let state = test_state();
        let client = Client::connect(&state, "u2");
        wait_until_connected(&state, "u2").await;
        drop(client.events);

        let request = SendMessageRequest {
            sender_id: "u1".into(),
            sender: None,
            receiver_id: "u2".into(),
            content: "anyone?".into(),
            msg_type: None,
        };
        // The first delivery may still be queued before the writer notices the
        // closed sink; later ones are refused once the writer is gone.
        let mut last = None;
        for _ in 0..100 {
            let receipt = state.dispatcher.submit(request.clone()).await.unwrap();
            if receipt.delivery == (Delivery::Live { delivered: false }) {
                last = Some(receipt.delivery);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last, Some(Delivery::Live { delivered: false }));

        drop(client.frames);
        client.session.await.unwrap();
    }
}
