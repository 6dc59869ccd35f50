use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use avadeck_core::{
    ChannelState, ChannelTransport, EventHandler, HubCommand, ServerEvent, SyncError,
    TransportEvent,
};
use serde_json::Value;

#[derive(Clone)]
struct ScriptedReply {
    delay: Duration,
    result: Result<Value, SyncError>,
}

#[derive(Default)]
struct Inner {
    handler: Option<EventHandler>,
    state: Option<ChannelState>,
    sent: Vec<HubCommand>,
    polls: Vec<String>,
    posts: Vec<(String, Value)>,
    topics: BTreeSet<String>,
    // (method, account id) -> queued replies; unscripted calls answer null.
    replies: HashMap<(String, String), VecDeque<ScriptedReply>>,
    rest: HashMap<String, Result<Value, SyncError>>,
}

/// In-memory push channel driven by the test. Records every call it sees.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
    connect_on_start: bool,
}

impl ScriptedTransport {
    /// Reports `Connected` as soon as the core starts it.
    pub fn connected() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::default(),
            connect_on_start: true,
        })
    }

    /// Stays disconnected until the test calls [`ScriptedTransport::reconnect`].
    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn emit(&self, ev: TransportEvent) {
        let handler = self.inner.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            handler(ev);
        }
    }

    pub fn push(&self, event: ServerEvent) {
        self.emit(TransportEvent::Event(event));
    }

    pub fn drop_connection(&self, reason: &str) {
        self.inner.lock().unwrap().state = Some(ChannelState::Disconnected);
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn reconnect(&self) {
        self.inner.lock().unwrap().state = Some(ChannelState::Connected);
        self.emit(TransportEvent::Connected { reconnected: true });
    }

    pub fn reply(&self, method: &str, account_id: &str, result: Result<Value, SyncError>) {
        self.reply_after(method, account_id, Duration::ZERO, result);
    }

    pub fn reply_after(
        &self,
        method: &str,
        account_id: &str,
        delay: Duration,
        result: Result<Value, SyncError>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .replies
            .entry((method.to_string(), account_id.to_string()))
            .or_default()
            .push_back(ScriptedReply { delay, result });
    }

    pub fn set_rest(&self, path: &str, result: Result<Value, SyncError>) {
        self.inner
            .lock()
            .unwrap()
            .rest
            .insert(path.to_string(), result);
    }

    pub fn sent(&self) -> Vec<HubCommand> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// How many times `method` was invoked for `account_id`.
    pub fn count(&self, method: &str, account_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|c| c.method() == method && c.account_id() == account_id)
            .count()
    }

    pub fn polls(&self, path: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .polls
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.lock().unwrap().topics.iter().cloned().collect()
    }

    fn rest_result(&self, path: &str) -> Result<Value, SyncError> {
        self.inner
            .lock()
            .unwrap()
            .rest
            .get(path)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    fn connect(&self, handler: EventHandler, _runtime: &tokio::runtime::Handle) {
        let state = if self.connect_on_start {
            ChannelState::Connected
        } else {
            ChannelState::Disconnected
        };
        {
            let mut inner = self.inner.lock().unwrap();
            inner.handler = Some(handler);
            inner.state = Some(state);
        }
        if self.connect_on_start {
            self.emit(TransportEvent::Connected { reconnected: false });
        } else {
            self.emit(TransportEvent::Disconnected {
                reason: "scripted offline".to_string(),
            });
        }
    }

    fn state(&self) -> ChannelState {
        self.inner
            .lock()
            .unwrap()
            .state
            .unwrap_or(ChannelState::Disconnected)
    }

    async fn subscribe(&self, account_id: &str) -> Result<(), SyncError> {
        self.inner
            .lock()
            .unwrap()
            .topics
            .insert(account_id.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, account_id: &str) -> Result<(), SyncError> {
        self.inner.lock().unwrap().topics.remove(account_id);
        Ok(())
    }

    async fn send(&self, command: HubCommand) -> Result<Value, SyncError> {
        let scripted = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != Some(ChannelState::Connected) {
                return Err(SyncError::Transport("push channel not connected".into()));
            }
            inner.sent.push(command.clone());
            inner
                .replies
                .get_mut(&(
                    command.method().to_string(),
                    command.account_id().to_string(),
                ))
                .and_then(|q| q.pop_front())
        };
        match scripted {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Ok(Value::Null),
        }
    }

    async fn poll(&self, path: &str) -> Result<Value, SyncError> {
        self.inner.lock().unwrap().polls.push(path.to_string());
        self.rest_result(path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, SyncError> {
        self.inner
            .lock()
            .unwrap()
            .posts
            .push((path.to_string(), body));
        self.rest_result(path)
    }

    async fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = Some(ChannelState::Disconnected);
        inner.handler = None;
    }
}
