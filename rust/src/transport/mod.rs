// Push channel + REST fallback.

mod hub;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::protocol::{HubCommand, ServerEvent};

pub use hub::{HubTransport, HubTransportOptions};
pub use rest::RestClient;

#[derive(uniffi::Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
}

/// What the push channel reports to its owner, in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { reconnected: bool },
    Disconnected { reason: String },
    Event(ServerEvent),
}

pub type EventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    /// Starts the push channel. Reconnects with backoff until `shutdown`.
    fn connect(&self, handler: EventHandler, runtime: &tokio::runtime::Handle);

    fn state(&self) -> ChannelState;

    /// Adds a topic that is (re)joined on every connect.
    async fn subscribe(&self, account_id: &str) -> Result<(), SyncError>;

    async fn unsubscribe(&self, account_id: &str) -> Result<(), SyncError>;

    /// Invokes a hub method and waits for its direct reply.
    async fn send(&self, command: HubCommand) -> Result<Value, SyncError>;

    /// Idempotent GET against the REST fallback.
    async fn poll(&self, path: &str) -> Result<Value, SyncError>;

    async fn post(&self, path: &str, body: Value) -> Result<Value, SyncError>;

    /// Stops reconnecting and fails every call still waiting for a reply.
    async fn shutdown(&self);
}

/// Transport used when networking is disabled: nothing ever connects.
#[derive(Debug, Default)]
pub struct OfflineTransport;

#[async_trait]
impl ChannelTransport for OfflineTransport {
    fn connect(&self, handler: EventHandler, _runtime: &tokio::runtime::Handle) {
        handler(TransportEvent::Disconnected {
            reason: "network disabled".to_string(),
        });
    }

    fn state(&self) -> ChannelState {
        ChannelState::Disconnected
    }

    async fn subscribe(&self, _account_id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn unsubscribe(&self, _account_id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn send(&self, command: HubCommand) -> Result<Value, SyncError> {
        Err(SyncError::Transport(format!(
            "network disabled ({})",
            command.method()
        )))
    }

    async fn poll(&self, path: &str) -> Result<Value, SyncError> {
        Err(SyncError::Transport(format!("network disabled (GET {path})")))
    }

    async fn post(&self, path: &str, _body: Value) -> Result<Value, SyncError> {
        Err(SyncError::Transport(format!("network disabled (POST {path})")))
    }

    async fn shutdown(&self) {}
}

/// Delay before reconnect attempt `attempt` (0-based): 250ms doubling, capped, with jitter.
pub(crate) fn backoff_delay(attempt: u32, max_ms: u64) -> std::time::Duration {
    use rand::Rng;

    let base = 250u64.saturating_mul(1u64 << attempt.min(16));
    let capped = base.min(max_ms.max(250));
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    std::time::Duration::from_millis(capped.saturating_sub(capped / 8) + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(0, 4_000).as_millis();
        assert!((218..=281).contains(&first), "first delay {first}");

        let later = backoff_delay(10, 4_000).as_millis();
        assert!(later <= 4_500, "capped delay {later}");
        assert!(later >= 3_500, "capped delay {later}");
    }

    #[tokio::test]
    async fn offline_transport_fails_every_call_as_transport_error() {
        let t = OfflineTransport;
        let err = t
            .send(HubCommand::Stand {
                account_id: "A1".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(t.poll("/api/accounts").await.unwrap_err().is_retryable());
        assert_eq!(t.state(), ChannelState::Disconnected);
    }
}
