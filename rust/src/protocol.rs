//! Hub/REST wire types.
//!
//! Inbound events are a closed enum: a name the hub sends that is not listed
//! here fails to parse and is logged by the transport instead of being
//! silently routed nowhere.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusPayload {
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current_region: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub last_activity: Option<i64>,
    #[serde(default)]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRemovedPayload {
    pub account_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCoordinates {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStatsPayload {
    pub account_id: String,
    #[serde(default)]
    pub region_name: String,
    #[serde(default)]
    pub region_coordinates: Option<GridCoordinates>,
    #[serde(default)]
    pub time_dilation: f32,
    #[serde(default)]
    pub fps: f32,
    #[serde(default)]
    pub physics_fps: f32,
    #[serde(default)]
    pub agent_count: u32,
    #[serde(default)]
    pub active_scripts: u32,
    #[serde(default)]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub account_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub chat_type: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub account_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// "IM", "Group" or "Local".
    #[serde(default)]
    pub session_type: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub session_name: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub last_activity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAvatarPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAvatarsPayload {
    pub account_id: String,
    #[serde(default)]
    pub avatars: Vec<NearbyAvatarPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticePayload {
    pub account_id: String,
    pub notice_id: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub notice_type: String,
    #[serde(default)]
    pub requires_acknowledgment: bool,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryPayload {
    pub account_id: String,
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessagePayload>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub total_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSessionsPayload {
    pub account_id: String,
    #[serde(default)]
    pub sessions: Vec<SessionPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentNoticesPayload {
    pub account_id: String,
    #[serde(default)]
    pub notices: Vec<NoticePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfoPayload {
    pub account_id: String,
    pub object_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicUrlPayload {
    #[serde(default)]
    pub url: Option<String>,
}

/// Server-initiated event delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    AccountStatus(AccountStatusPayload),
    AccountRemoved(AccountRemovedPayload),
    RegionStats(RegionStatsPayload),
    ChatMessage(ChatMessagePayload),
    ImSessionStarted(SessionPayload),
    GroupSessionStarted(SessionPayload),
    SessionUpdated(SessionPayload),
    NearbyAvatars(NearbyAvatarsPayload),
    Notice(NoticePayload),
    ChatHistory(ChatHistoryPayload),
    RecentSessions(RecentSessionsPayload),
    RecentNotices(RecentNoticesPayload),
}

impl ServerEvent {
    pub fn from_wire(name: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "event": name, "data": payload }))
    }

    /// Topic the event belongs to. Ordering is only guaranteed within a topic.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AccountStatus(_) => "AccountStatus",
            ServerEvent::AccountRemoved(_) => "AccountRemoved",
            ServerEvent::RegionStats(_) => "RegionStats",
            ServerEvent::ChatMessage(_) => "ChatMessage",
            ServerEvent::ImSessionStarted(_) => "ImSessionStarted",
            ServerEvent::GroupSessionStarted(_) => "GroupSessionStarted",
            ServerEvent::SessionUpdated(_) => "SessionUpdated",
            ServerEvent::NearbyAvatars(_) => "NearbyAvatars",
            ServerEvent::Notice(_) => "Notice",
            ServerEvent::ChatHistory(_) => "ChatHistory",
            ServerEvent::RecentSessions(_) => "RecentSessions",
            ServerEvent::RecentNotices(_) => "RecentNotices",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            ServerEvent::AccountStatus(p) => &p.account_id,
            ServerEvent::AccountRemoved(p) => &p.account_id,
            ServerEvent::RegionStats(p) => &p.account_id,
            ServerEvent::ChatMessage(p) => &p.account_id,
            ServerEvent::ImSessionStarted(p)
            | ServerEvent::GroupSessionStarted(p)
            | ServerEvent::SessionUpdated(p) => &p.account_id,
            ServerEvent::NearbyAvatars(p) => &p.account_id,
            ServerEvent::Notice(p) => &p.account_id,
            ServerEvent::ChatHistory(p) => &p.account_id,
            ServerEvent::RecentSessions(p) => &p.account_id,
            ServerEvent::RecentNotices(p) => &p.account_id,
        }
    }
}

/// Command invoked on the hub; the hub answers with a direct reply.
#[derive(Debug, Clone, PartialEq)]
pub enum HubCommand {
    JoinAccountGroup {
        account_id: String,
    },
    LeaveAccountGroup {
        account_id: String,
    },
    SendChat {
        account_id: String,
        message: String,
        chat_type: String,
        channel: i32,
    },
    SendIm {
        account_id: String,
        target_id: String,
        message: String,
    },
    SendGroupIm {
        account_id: String,
        group_id: String,
        message: String,
    },
    GetChatHistory {
        account_id: String,
        session_id: String,
        count: u32,
        offset: u32,
    },
    GetRecentSessions {
        account_id: String,
    },
    GetRecentNotices {
        account_id: String,
    },
    GetNearbyAvatars {
        account_id: String,
    },
    GetRegionStats {
        account_id: String,
    },
    Sit {
        account_id: String,
        object_id: String,
    },
    Stand {
        account_id: String,
    },
    GetObjectInfo {
        account_id: String,
        object_id: String,
    },
    AcknowledgeNotice {
        account_id: String,
        notice_id: String,
        accept: bool,
    },
}

impl HubCommand {
    /// Hub method name.
    pub fn method(&self) -> &'static str {
        match self {
            HubCommand::JoinAccountGroup { .. } => "JoinAccountGroup",
            HubCommand::LeaveAccountGroup { .. } => "LeaveAccountGroup",
            HubCommand::SendChat { .. } => "SendChat",
            HubCommand::SendIm { .. } => "SendIM",
            HubCommand::SendGroupIm { .. } => "SendGroupIM",
            HubCommand::GetChatHistory { .. } => "GetChatHistory",
            HubCommand::GetRecentSessions { .. } => "GetRecentSessions",
            HubCommand::GetRecentNotices { .. } => "GetRecentNotices",
            HubCommand::GetNearbyAvatars { .. } => "GetNearbyAvatars",
            HubCommand::GetRegionStats { .. } => "GetRegionStats",
            HubCommand::Sit { .. } => "Sit",
            HubCommand::Stand { .. } => "Stand",
            HubCommand::GetObjectInfo { .. } => "GetObjectInfo",
            HubCommand::AcknowledgeNotice { .. } => "AcknowledgeNotice",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            HubCommand::JoinAccountGroup { account_id }
            | HubCommand::LeaveAccountGroup { account_id }
            | HubCommand::SendChat { account_id, .. }
            | HubCommand::SendIm { account_id, .. }
            | HubCommand::SendGroupIm { account_id, .. }
            | HubCommand::GetChatHistory { account_id, .. }
            | HubCommand::GetRecentSessions { account_id }
            | HubCommand::GetRecentNotices { account_id }
            | HubCommand::GetNearbyAvatars { account_id }
            | HubCommand::GetRegionStats { account_id }
            | HubCommand::Sit { account_id, .. }
            | HubCommand::Stand { account_id }
            | HubCommand::GetObjectInfo { account_id, .. }
            | HubCommand::AcknowledgeNotice { account_id, .. } => account_id,
        }
    }

    /// Positional arguments, account id first.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            HubCommand::JoinAccountGroup { account_id }
            | HubCommand::LeaveAccountGroup { account_id }
            | HubCommand::GetRecentSessions { account_id }
            | HubCommand::GetRecentNotices { account_id }
            | HubCommand::GetNearbyAvatars { account_id }
            | HubCommand::GetRegionStats { account_id }
            | HubCommand::Stand { account_id } => vec![json!(account_id)],
            HubCommand::SendChat {
                account_id,
                message,
                chat_type,
                channel,
            } => vec![
                json!(account_id),
                json!(message),
                json!(chat_type),
                json!(channel),
            ],
            HubCommand::SendIm {
                account_id,
                target_id,
                message,
            } => vec![json!(account_id), json!(target_id), json!(message)],
            HubCommand::SendGroupIm {
                account_id,
                group_id,
                message,
            } => vec![json!(account_id), json!(group_id), json!(message)],
            HubCommand::GetChatHistory {
                account_id,
                session_id,
                count,
                offset,
            } => vec![
                json!(account_id),
                json!(session_id),
                json!(count),
                json!(offset),
            ],
            HubCommand::Sit {
                account_id,
                object_id,
            }
            | HubCommand::GetObjectInfo {
                account_id,
                object_id,
            } => vec![json!(account_id), json!(object_id)],
            HubCommand::AcknowledgeNotice {
                account_id,
                notice_id,
                accept,
            } => vec![json!(account_id), json!(notice_id), json!(accept)],
        }
    }
}

/// REST fallback endpoints, mirroring the hub payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestEndpoint {
    Accounts,
    RegionStats { account_id: String },
    MusicUrl { account_id: String },
    RestartRegion { account_id: String },
    Login { account_id: String },
    Logout { account_id: String },
}

impl RestEndpoint {
    pub fn path(&self) -> String {
        match self {
            RestEndpoint::Accounts => "/api/accounts".to_string(),
            RestEndpoint::RegionStats { account_id } => {
                format!("/api/accounts/{account_id}/region")
            }
            RestEndpoint::MusicUrl { account_id } => format!("/api/accounts/{account_id}/music"),
            RestEndpoint::RestartRegion { account_id } => {
                format!("/api/accounts/{account_id}/region/restart")
            }
            RestEndpoint::Login { account_id } => format!("/api/accounts/{account_id}/login"),
            RestEndpoint::Logout { account_id } => format!("/api/accounts/{account_id}/logout"),
        }
    }
}

/// Client → hub frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame<'a> {
    Invoke {
        id: u64,
        method: &'a str,
        arguments: Vec<Value>,
    },
    Pong,
}

/// Hub → client frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HubFrame {
    Reply {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        name: String,
        #[serde(default)]
        payload: Value,
    },
    Ping,
}

/// Decodes a reply or poll body into a typed payload.
pub fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value)
        .map_err(|e| SyncError::Rejected(format!("malformed {what} payload: {e}")))
}

fn timestamp_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let raw = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))?;
            // Millisecond epochs are 13 digits; seconds stay well below that.
            if raw > 100_000_000_000 {
                Some(raw / 1000)
            } else {
                Some(raw)
            }
        }
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|dt| dt.and_utc().timestamp())
            })
            .ok(),
        _ => None,
    }
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(timestamp_from_value(&value).unwrap_or(0))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(timestamp_from_value(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_account_status_event() {
        let ev = ServerEvent::from_wire(
            "AccountStatus",
            json!({
                "accountId": "A1",
                "displayName": "Ada Avatar",
                "firstName": "Ada",
                "lastName": "Avatar",
                "isConnected": true,
                "status": "Online",
                "currentRegion": "Ahern",
                "revision": 3
            }),
        )
        .unwrap();
        match ev {
            ServerEvent::AccountStatus(p) => {
                assert_eq!(p.account_id, "A1");
                assert!(p.is_connected);
                assert_eq!(p.current_region.as_deref(), Some("Ahern"));
                assert_eq!(p.revision, Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_name_is_an_error() {
        let err = ServerEvent::from_wire("MinimapTile", json!({"accountId": "A1"}));
        assert!(err.is_err());
    }

    #[test]
    fn sparse_poll_payload_uses_defaults() {
        let p: AccountStatusPayload =
            serde_json::from_value(json!({"accountId": "A1", "isConnected": false})).unwrap();
        assert_eq!(p.revision, None);
        assert_eq!(p.status, "");
        assert_eq!(p.current_region, None);
    }

    #[test]
    fn timestamps_accept_seconds_millis_and_rfc3339() {
        let secs: ChatMessagePayload =
            serde_json::from_value(json!({"accountId": "A1", "timestamp": 1_700_000_000})).unwrap();
        assert_eq!(secs.timestamp, 1_700_000_000);

        let millis: ChatMessagePayload =
            serde_json::from_value(json!({"accountId": "A1", "timestamp": 1_700_000_000_123i64}))
                .unwrap();
        assert_eq!(millis.timestamp, 1_700_000_000);

        let iso: ChatMessagePayload = serde_json::from_value(
            json!({"accountId": "A1", "timestamp": "2023-11-14T22:13:20Z"}),
        )
        .unwrap();
        assert_eq!(iso.timestamp, 1_700_000_000);
    }

    #[test]
    fn command_arguments_lead_with_account() {
        let cmd = HubCommand::GetChatHistory {
            account_id: "A1".into(),
            session_id: "im-B2".into(),
            count: 50,
            offset: 100,
        };
        assert_eq!(cmd.method(), "GetChatHistory");
        assert_eq!(cmd.account_id(), "A1");
        assert_eq!(
            cmd.arguments(),
            vec![json!("A1"), json!("im-B2"), json!(50), json!(100)]
        );
    }

    #[test]
    fn hub_frames_round_trip_shape() {
        let frame: HubFrame = serde_json::from_str(
            r#"{"type":"event","name":"AccountRemoved","payload":{"accountId":"A9"}}"#,
        )
        .unwrap();
        match frame {
            HubFrame::Event { name, payload } => {
                let ev = ServerEvent::from_wire(&name, payload).unwrap();
                assert_eq!(ev.account_id(), "A9");
            }
            _ => panic!("expected event frame"),
        }

        let invoke = serde_json::to_value(ClientFrame::Invoke {
            id: 7,
            method: "Stand",
            arguments: vec![json!("A1")],
        })
        .unwrap();
        assert_eq!(
            invoke,
            json!({"type": "invoke", "id": 7, "method": "Stand", "arguments": ["A1"]})
        );
    }
}
