//! Error taxonomy shared by the transport, the caches and the actor.

use thiserror::Error;

/// Failure of a sync-core operation.
///
/// Only [`SyncError::Transport`] is retryable. [`SyncError::StaleData`] is never
/// shown to the user; it only records that the freshness rule discarded an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Connection lost, not connected, or the call timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server declined the command.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The update lost against fresher state already applied.
    #[error("stale update for {entity}: {reason}")]
    StaleData { entity: String, reason: String },

    /// The referenced account or session is no longer present.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub(crate) fn stale(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::StaleData {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Short text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Transport(msg) => format!("Connection problem: {msg}"),
            SyncError::Rejected(msg) => format!("Server refused: {msg}"),
            SyncError::StaleData { entity, .. } => format!("Ignored outdated update for {entity}"),
            SyncError::NotFound(what) => format!("{what} is no longer available"),
        }
    }
}
