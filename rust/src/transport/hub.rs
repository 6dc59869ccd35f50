// Websocket push channel with request/reply correlation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;

use super::rest::RestClient;
use super::{backoff_delay, ChannelState, ChannelTransport, EventHandler, TransportEvent};
use crate::error::SyncError;
use crate::protocol::{ClientFrame, HubCommand, HubFrame, ServerEvent};

type PendingReply = oneshot::Sender<Result<Value, SyncError>>;

#[derive(Debug, Clone)]
pub struct HubTransportOptions {
    pub hub_url: String,
    pub api_base_url: String,
    pub command_timeout: Duration,
    pub reconnect_backoff_max_ms: u64,
}

pub struct HubTransport {
    options: HubTransportOptions,
    rest: RestClient,
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    topics: Mutex<BTreeSet<String>>,
    next_id: AtomicU64,
    alive: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl HubTransport {
    pub fn new(options: HubTransportOptions) -> anyhow::Result<Self> {
        let rest = RestClient::new(&options.api_base_url, options.command_timeout)?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            options,
            rest,
            shared: Arc::new(Shared {
                state: RwLock::new(ChannelState::Disconnected),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                topics: Mutex::new(BTreeSet::new()),
                next_id: AtomicU64::new(1),
                alive: AtomicBool::new(true),
                shutdown_tx,
            }),
        })
    }
}

impl Shared {
    fn set_state(&self, next: ChannelState) -> ChannelState {
        match self.state.write() {
            Ok(mut g) => std::mem::replace(&mut *g, next),
            Err(poison) => std::mem::replace(&mut *poison.into_inner(), next),
        }
    }

    fn state(&self) -> ChannelState {
        match self.state.read() {
            Ok(g) => *g,
            Err(poison) => *poison.into_inner(),
        }
    }

    fn invoke_frame(&self, command: &HubCommand) -> Result<(u64, String), SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = ClientFrame::Invoke {
            id,
            method: command.method(),
            arguments: command.arguments(),
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| SyncError::Transport(format!("encode {}: {e}", command.method())))?;
        Ok((id, text))
    }

    fn fail_pending(&self, reason: &str) {
        let drained: Vec<PendingReply> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "failing in-flight hub calls");
        }
        for tx in drained {
            let _ = tx.send(Err(SyncError::Transport(reason.to_string())));
        }
    }

    fn handle_frame(
        &self,
        text: &str,
        handler: &EventHandler,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        let frame = match serde_json::from_str::<HubFrame>(text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%e, "hub frame not understood");
                return;
            }
        };
        match frame {
            HubFrame::Reply { id, result, error } => {
                let Some(tx) = lock(&self.pending).remove(&id) else {
                    // Resubscribe joins are fire-and-forget.
                    tracing::debug!(id, "reply without waiter");
                    return;
                };
                let reply = match error {
                    Some(msg) => Err(SyncError::Rejected(msg)),
                    None => Ok(result),
                };
                let _ = tx.send(reply);
            }
            HubFrame::Event { name, payload } => match ServerEvent::from_wire(&name, payload) {
                Ok(event) => handler(TransportEvent::Event(event)),
                Err(e) => tracing::warn!(event = %name, %e, "dropping unrecognised hub event"),
            },
            HubFrame::Ping => {
                if let Ok(pong) = serde_json::to_string(&ClientFrame::Pong) {
                    let _ = out_tx.send(pong);
                }
            }
        }
    }
}

async fn run_channel(
    shared: Arc<Shared>,
    hub_url: String,
    backoff_max_ms: u64,
    handler: EventHandler,
) {
    let mut shutdown = shared.shutdown_tx.subscribe();
    let mut attempt: u32 = 0;
    let mut connected_before = false;

    while shared.alive.load(Ordering::SeqCst) {
        shared.set_state(ChannelState::Connecting);
        tracing::info!(url = %hub_url, attempt, "hub: connecting");

        match tokio_tungstenite::connect_async(hub_url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                let (mut sink, mut stream) = ws.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                *lock(&shared.outbound) = Some(out_tx.clone());
                shared.set_state(ChannelState::Connected);
                tracing::info!(reconnected = connected_before, "hub: connected");
                handler(TransportEvent::Connected {
                    reconnected: connected_before,
                });
                connected_before = true;

                let topics: Vec<String> = lock(&shared.topics).iter().cloned().collect();
                for account_id in topics {
                    let join = HubCommand::JoinAccountGroup { account_id };
                    if let Ok((_, text)) = shared.invoke_frame(&join) {
                        let _ = out_tx.send(text);
                    }
                }

                let reason = loop {
                    tokio::select! {
                        _ = shutdown.changed() => break "shutdown".to_string(),
                        outgoing = out_rx.recv() => {
                            let Some(text) = outgoing else {
                                break "outbound closed".to_string();
                            };
                            if let Err(e) = sink.send(Message::text(text)).await {
                                break format!("send failed: {e}");
                            }
                        }
                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                shared.handle_frame(text.as_str(), &handler, &out_tx);
                            }
                            Some(Ok(Message::Close(_))) => break "closed by hub".to_string(),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break format!("read failed: {e}"),
                            None => break "stream ended".to_string(),
                        }
                    }
                };

                *lock(&shared.outbound) = None;
                shared.fail_pending(&format!("connection lost: {reason}"));
                shared.set_state(ChannelState::Disconnected);
                tracing::warn!(%reason, "hub: disconnected");
                handler(TransportEvent::Disconnected { reason });
            }
            Err(e) => {
                let previous = shared.set_state(ChannelState::Disconnected);
                tracing::warn!(%e, attempt, "hub: connect failed");
                if previous != ChannelState::Disconnected || attempt == 0 {
                    handler(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !shared.alive.load(Ordering::SeqCst) {
            break;
        }
        let delay = backoff_delay(attempt, backoff_max_ms);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ChannelState::Disconnected);
    tracing::info!("hub: channel task stopped");
}

#[async_trait]
impl ChannelTransport for HubTransport {
    fn connect(&self, handler: EventHandler, runtime: &tokio::runtime::Handle) {
        let shared = self.shared.clone();
        let url = self.options.hub_url.clone();
        let backoff_max_ms = self.options.reconnect_backoff_max_ms;
        runtime.spawn(run_channel(shared, url, backoff_max_ms, handler));
    }

    fn state(&self) -> ChannelState {
        self.shared.state()
    }

    async fn subscribe(&self, account_id: &str) -> Result<(), SyncError> {
        let inserted = lock(&self.shared.topics).insert(account_id.to_string());
        if !inserted || self.state() != ChannelState::Connected {
            // Joined on the next (re)connect.
            return Ok(());
        }
        self.send(HubCommand::JoinAccountGroup {
            account_id: account_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn unsubscribe(&self, account_id: &str) -> Result<(), SyncError> {
        let removed = lock(&self.shared.topics).remove(account_id);
        if !removed || self.state() != ChannelState::Connected {
            return Ok(());
        }
        self.send(HubCommand::LeaveAccountGroup {
            account_id: account_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn send(&self, command: HubCommand) -> Result<Value, SyncError> {
        let outbound = lock(&self.shared.outbound)
            .clone()
            .ok_or_else(|| SyncError::Transport("push channel not connected".to_string()))?;

        let (id, text) = self.shared.invoke_frame(&command)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);

        if outbound.send(text).is_err() {
            lock(&self.shared.pending).remove(&id);
            return Err(SyncError::Transport("push channel closed".to_string()));
        }

        match tokio::time::timeout(self.options.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SyncError::Transport(
                "transport closed before reply".to_string(),
            )),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(SyncError::Transport(format!(
                    "{} timed out after {:?}",
                    command.method(),
                    self.options.command_timeout
                )))
            }
        }
    }

    async fn poll(&self, path: &str) -> Result<Value, SyncError> {
        self.rest.get(path).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, SyncError> {
        self.rest.post(path, body).await
    }

    async fn shutdown(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        let _ = self.shared.shutdown_tx.send(true);
        *lock(&self.shared.outbound) = None;
        self.shared.fail_pending("transport closed");
        self.shared.set_state(ChannelState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HubTransport {
        HubTransport::new(HubTransportOptions {
            hub_url: "ws://127.0.0.1:9/hub".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            command_timeout: Duration::from_millis(200),
            reconnect_backoff_max_ms: 1_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_without_connection_is_transport_error() {
        let t = transport();
        let err = t
            .send(HubCommand::Stand {
                account_id: "A1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn shutdown_rejects_in_flight_calls() {
        let t = Arc::new(transport());
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *lock(&t.shared.outbound) = Some(out_tx);
        t.shared.set_state(ChannelState::Connected);

        let caller = t.clone();
        let call = tokio::spawn(async move {
            caller
                .send(HubCommand::GetRecentSessions {
                    account_id: "A1".into(),
                })
                .await
        });

        // Wait until the invoke frame is on the wire.
        let frame = out_rx.recv().await.unwrap();
        assert!(frame.contains("GetRecentSessions"));

        t.shutdown().await;
        let result = call.await.unwrap();
        assert_eq!(
            result,
            Err(SyncError::Transport("transport closed".to_string()))
        );
        assert_eq!(t.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn reply_frames_resolve_waiters_and_errors_are_rejections() {
        let t = Arc::new(transport());
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *lock(&t.shared.outbound) = Some(out_tx.clone());

        let caller = t.clone();
        let call = tokio::spawn(async move {
            caller
                .send(HubCommand::Sit {
                    account_id: "A1".into(),
                    object_id: "obj".into(),
                })
                .await
        });
        let frame: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        let id = frame["id"].as_u64().unwrap();

        let events: Arc<Mutex<Vec<TransportEvent>>> = Arc::new(Mutex::new(vec![]));
        let sink = events.clone();
        let handler: EventHandler = Arc::new(move |ev: TransportEvent| lock(&sink).push(ev));
        t.shared.handle_frame(
            &format!(r#"{{"type":"reply","id":{id},"error":"not allowed to sit there"}}"#),
            &handler,
            &out_tx,
        );
        assert_eq!(
            call.await.unwrap(),
            Err(SyncError::Rejected("not allowed to sit there".to_string()))
        );

        t.shared.handle_frame(
            r#"{"type":"event","name":"AccountRemoved","payload":{"accountId":"A1"}}"#,
            &handler,
            &out_tx,
        );
        t.shared.handle_frame(
            r#"{"type":"event","name":"Teleported","payload":{"accountId":"A1"}}"#,
            &handler,
            &out_tx,
        );
        assert_eq!(lock(&events).len(), 1);
    }
}
