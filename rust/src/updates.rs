use serde_json::Value;

use crate::core::TimerKey;
use crate::error::SyncError;
use crate::state::{AccountRow, AppState};
use crate::transport::TransportEvent;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    /// One per applied account upsert, sent ahead of the batch's `FullState`.
    AccountChanged {
        rev: u64,
        account: AccountRow,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::AccountChanged { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Which path a refresh went out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Hub,
    Rest,
}

/// What an in-flight hub/REST call was for, so its reply can be applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    // Background refreshes
    RecentSessions,
    RecentNotices,
    NearbyAvatars,
    RegionStats { issued_at: u64, via: Via },
    ChatHistory { session_id: String },
    Subscribe,

    // User commands
    SendMessage { session_id: String, local_id: String },
    Avatar { tag: &'static str },
    AcknowledgeNotice { notice_id: String },
    ObjectInfo { object_id: String },
    MusicUrl,
    SetMusicUrl { url: String },
    RestartRegion,
    Login,
    Logout,
}

impl Request {
    /// User-initiated requests toast on failure and force a refresh.
    pub fn is_user_command(&self) -> bool {
        !matches!(
            self,
            Request::RecentSessions
                | Request::RecentNotices
                | Request::NearbyAvatars
                | Request::RegionStats { .. }
                | Request::ChatHistory { .. }
                | Request::Subscribe
        )
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Request::RecentSessions => "recent_sessions",
            Request::RecentNotices => "recent_notices",
            Request::NearbyAvatars => "nearby_avatars",
            Request::RegionStats { .. } => "region_stats",
            Request::ChatHistory { .. } => "chat_history",
            Request::Subscribe => "subscribe",
            Request::SendMessage { .. } => "send_message",
            Request::Avatar { tag } => *tag,
            Request::AcknowledgeNotice { .. } => "acknowledge_notice",
            Request::ObjectInfo { .. } => "object_info",
            Request::MusicUrl => "music_url",
            Request::SetMusicUrl { .. } => "set_music_url",
            Request::RestartRegion => "restart_region",
            Request::Login => "login",
            Request::Logout => "logout",
        }
    }
}

#[derive(Debug)]
pub enum InternalEvent {
    // Push channel
    Transport(TransportEvent),

    // Timer registry
    TimerTick {
        key: TimerKey,
        generation: u64,
    },

    // Async results
    AccountsPolled {
        issued_at: u64,
        result: Result<Value, SyncError>,
    },
    Reply {
        account_id: String,
        request: Request,
        result: Result<Value, SyncError>,
    },

    // Lifecycle
    Shutdown,
}
