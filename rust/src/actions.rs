use crate::state::SessionKind;

#[derive(uniffi::Enum, Debug, Clone, PartialEq)]
pub enum AppAction {
    // Accounts
    SelectAccount {
        account_id: String,
    },
    LoginAccount {
        account_id: String,
    },
    LogoutAccount {
        account_id: String,
    },

    // Chat
    OpenSession {
        kind: SessionKind,
        target_id: String,
        name: String,
    },
    FocusSession {
        session_id: String,
    },
    CloseSession {
        session_id: String,
    },
    SendMessage {
        session_id: String,
        text: String,
    },
    LoadOlderMessages {
        session_id: String,
    },

    // Avatar
    Sit {
        object_id: String,
    },
    Stand,
    InspectObject {
        object_id: String,
    },
    AcknowledgeNotice {
        notice_id: String,
        accept: bool,
    },

    // Region
    RestartRegion,
    RefreshMusicUrl,
    SetMusicUrl {
        url: String,
    },

    // UI
    ClearToast,
    DismissObjectInfo,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Accounts
            AppAction::SelectAccount { .. } => "SelectAccount",
            AppAction::LoginAccount { .. } => "LoginAccount",
            AppAction::LogoutAccount { .. } => "LogoutAccount",

            // Chat
            AppAction::OpenSession { .. } => "OpenSession",
            AppAction::FocusSession { .. } => "FocusSession",
            AppAction::CloseSession { .. } => "CloseSession",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",

            // Avatar
            AppAction::Sit { .. } => "Sit",
            AppAction::Stand => "Stand",
            AppAction::InspectObject { .. } => "InspectObject",
            AppAction::AcknowledgeNotice { .. } => "AcknowledgeNotice",

            // Region
            AppAction::RestartRegion => "RestartRegion",
            AppAction::RefreshMusicUrl => "RefreshMusicUrl",
            AppAction::SetMusicUrl { .. } => "SetMusicUrl",

            // UI
            AppAction::ClearToast => "ClearToast",
            AppAction::DismissObjectInfo => "DismissObjectInfo",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
