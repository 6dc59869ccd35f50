use crate::transport::ChannelState;

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Online,
    Error,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Local,
    Im,
    Group,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

/// Snapshot handed to the host after every reconciliation batch.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct AppState {
    pub rev: u64,
    pub channel: ChannelState,
    pub active_account_id: Option<String>,
    pub accounts: Vec<AccountRow>,
    pub sessions: SessionTabs,
    pub current_session: Option<SessionView>,
    pub people: Vec<NearbyAvatarRow>,
    pub region: Option<RegionView>,
    pub notices: Vec<NoticeRow>,
    pub object_info: Option<ObjectInfoView>,
    pub music_url: Option<String>,
    pub busy: BusyState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            channel: ChannelState::Disconnected,
            active_account_id: None,
            accounts: vec![],
            sessions: SessionTabs::empty(),
            current_session: None,
            people: vec![],
            region: None,
            notices: vec![],
            object_info: None,
            music_url: None,
            busy: BusyState::idle(),
            toast: None,
        }
    }
}

/// "In flight" flags for operations the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub logging_in: bool,
    pub loading_history: bool,
    pub restarting_region: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            logging_in: false,
            loading_history: false,
            restarting_region: false,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct AccountRow {
    pub account_id: String,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub status_label: String,
    pub region_name: Option<String>,
    pub last_activity: i64,
    pub is_active: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct SessionTab {
    pub session_id: String,
    pub kind: SessionKind,
    pub name: String,
    pub unread_count: u32,
    pub badge: Option<String>,
    pub is_focused: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct SessionTabs {
    pub local: Option<SessionTab>,
    pub ims: Vec<SessionTab>,
    pub groups: Vec<SessionTab>,
    pub total_unread: u32,
}

impl SessionTabs {
    pub fn empty() -> Self {
        Self {
            local: None,
            ims: vec![],
            groups: vec![],
            total_unread: 0,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct RenderedMessage {
    pub local_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    /// Display line: "Name: body", or "Name waves" for personal narrative.
    pub line: String,
    pub is_personal_narrative: bool,
    pub timestamp: i64,
    pub is_mine: bool,
    pub delivery: DeliveryState,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct SessionView {
    pub session_id: String,
    pub kind: SessionKind,
    pub name: String,
    pub messages: Vec<RenderedMessage>,
    pub can_load_older: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct NearbyAvatarRow {
    pub avatar_id: String,
    pub name: String,
    pub distance: f64,
    pub distance_label: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct RegionView {
    pub region_name: String,
    pub coordinates_label: Option<String>,
    pub time_dilation: f32,
    pub fps: f32,
    pub physics_fps: f32,
    pub agent_count: u32,
    pub active_scripts: u32,
    pub health: RegionHealth,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionHealth {
    Good,
    Degraded,
    Poor,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Group,
    Inventory,
    Friendship,
    Teleport,
    System,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct NoticeRow {
    pub notice_id: String,
    pub kind: NoticeKind,
    pub from_name: String,
    pub subject: String,
    pub message: String,
    pub requires_ack: bool,
    pub timestamp: i64,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ObjectInfoView {
    pub object_id: String,
    pub name: String,
    pub description: String,
    pub owner_name: String,
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
