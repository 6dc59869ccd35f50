//! Pure projections from the actor's caches to host view-models.
//!
//! Nothing here mutates or performs I/O. The actor only calls
//! [`project_state`] once a batch has been fully applied, so every snapshot
//! the host sees is internally consistent.

use std::cmp::Ordering;

use crate::core::{Account, ChatMessage, ChatSession, EntityCache, MessageLogs, SessionRegistry};
use crate::protocol::{NearbyAvatarPayload, NoticePayload, ObjectInfoPayload, RegionStatsPayload};
use crate::state::{
    AccountRow, AppState, BusyState, ConnectionStatus, NearbyAvatarRow, NoticeKind, NoticeRow,
    ObjectInfoView, RegionHealth, RegionView, RenderedMessage, SessionKind, SessionTab,
    SessionTabs, SessionView,
};
use crate::transport::ChannelState;

const BADGE_CAP: u32 = 99;

/// Borrowed view of everything a snapshot is built from.
pub struct Snapshot<'a> {
    pub channel: ChannelState,
    pub active_account: Option<&'a str>,
    pub accounts: &'a EntityCache,
    pub sessions: &'a SessionRegistry,
    pub logs: &'a MessageLogs,
    pub people: &'a [NearbyAvatarPayload],
    pub region: Option<&'a RegionStatsPayload>,
    pub notices: &'a [NoticePayload],
    pub object_info: Option<&'a ObjectInfoPayload>,
    pub music_url: Option<&'a str>,
    pub busy: &'a BusyState,
    pub toast: Option<&'a str>,
}

pub fn project_state(s: &Snapshot<'_>, rev: u64) -> AppState {
    let current_session = s
        .active_account
        .and_then(|_| project_session_view(s.sessions, s.logs, s.sessions.focused()));
    AppState {
        rev,
        channel: s.channel,
        active_account_id: s.active_account.map(str::to_string),
        accounts: project_accounts(s.accounts, s.active_account),
        sessions: project_session_tabs(s.sessions),
        current_session,
        people: project_people(s.people),
        region: s.region.map(project_region),
        notices: project_notices(s.notices),
        object_info: s.object_info.map(|o| ObjectInfoView {
            object_id: o.object_id.clone(),
            name: o.name.clone(),
            description: o.description.clone(),
            owner_name: o.owner_name.clone(),
        }),
        music_url: s.music_url.map(str::to_string),
        busy: s.busy.clone(),
        toast: s.toast.map(str::to_string),
    }
}

/// Registration order, with the active account flagged.
pub fn project_accounts(cache: &EntityCache, active: Option<&str>) -> Vec<AccountRow> {
    cache
        .list()
        .map(|a| account_row(a, active == Some(a.account_id.as_str())))
        .collect()
}

pub fn account_row(a: &Account, is_active: bool) -> AccountRow {
    AccountRow {
        account_id: a.account_id.clone(),
        display_name: a.display_name.clone(),
        status: a.status,
        status_label: status_label(a.status).to_string(),
        region_name: a.region_name.clone(),
        last_activity: a.last_activity,
        is_active,
    }
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Offline => "Offline",
        ConnectionStatus::Connecting => "Connecting…",
        ConnectionStatus::Online => "Online",
        ConnectionStatus::Error => "Error",
    }
}

pub fn unread_badge(unread: u32) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

fn session_tab(session: &ChatSession, focused: &str) -> SessionTab {
    SessionTab {
        session_id: session.session_id.clone(),
        kind: session.kind,
        name: session.name.clone(),
        unread_count: session.unread_count,
        badge: unread_badge(session.unread_count),
        is_focused: session.session_id == focused,
    }
}

/// Tabs split by kind, each group in creation order.
pub fn project_session_tabs(registry: &SessionRegistry) -> SessionTabs {
    let focused = registry.focused();
    let mut tabs = SessionTabs::empty();
    for session in registry.sessions() {
        let tab = session_tab(session, focused);
        tabs.total_unread = tabs.total_unread.saturating_add(tab.unread_count);
        match session.kind {
            SessionKind::Local => tabs.local = Some(tab),
            SessionKind::Im => tabs.ims.push(tab),
            SessionKind::Group => tabs.groups.push(tab),
        }
    }
    tabs
}

/// Ascending distance; equal distances by name.
pub fn project_people(avatars: &[NearbyAvatarPayload]) -> Vec<NearbyAvatarRow> {
    let mut rows: Vec<NearbyAvatarRow> = avatars
        .iter()
        .map(|a| NearbyAvatarRow {
            avatar_id: a.id.clone(),
            name: if a.name.trim().is_empty() {
                a.id.clone()
            } else {
                a.name.clone()
            },
            distance: a.distance,
            distance_label: format!("{:.1} m", a.distance),
        })
        .collect();
    rows.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}

pub fn project_region(r: &RegionStatsPayload) -> RegionView {
    RegionView {
        region_name: r.region_name.clone(),
        coordinates_label: r
            .region_coordinates
            .map(|c| format!("({}, {})", c.x, c.y)),
        time_dilation: r.time_dilation,
        fps: r.fps,
        physics_fps: r.physics_fps,
        agent_count: r.agent_count,
        active_scripts: r.active_scripts,
        health: region_health(r.time_dilation),
    }
}

fn region_health(time_dilation: f32) -> RegionHealth {
    if time_dilation >= 0.9 {
        RegionHealth::Good
    } else if time_dilation >= 0.5 {
        RegionHealth::Degraded
    } else {
        RegionHealth::Poor
    }
}

fn notice_kind(notice_type: &str) -> NoticeKind {
    let t = notice_type.to_ascii_lowercase();
    if t.contains("group") {
        NoticeKind::Group
    } else if t.contains("inventory") {
        NoticeKind::Inventory
    } else if t.contains("friend") {
        NoticeKind::Friendship
    } else if t.contains("teleport") || t.contains("lure") {
        NoticeKind::Teleport
    } else {
        NoticeKind::System
    }
}

/// Newest first.
pub fn project_notices(notices: &[NoticePayload]) -> Vec<NoticeRow> {
    let mut rows: Vec<NoticeRow> = notices
        .iter()
        .map(|n| NoticeRow {
            notice_id: n.notice_id.clone(),
            kind: notice_kind(&n.notice_type),
            from_name: n.from_name.clone(),
            subject: n.subject.clone(),
            message: n.message.clone(),
            requires_ack: n.requires_acknowledgment,
            timestamp: n.timestamp,
        })
        .collect();
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    rows
}

/// "Name: body", or "Name rest" for `/me` bodies.
pub fn render_message(m: &ChatMessage) -> RenderedMessage {
    let narrative = m.is_personal_narrative();
    let line = if narrative {
        let rest = m.body.strip_prefix("/me").unwrap_or(&m.body);
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        if rest.is_empty() {
            m.sender_name.clone()
        } else if rest.starts_with('\'') {
            format!("{}{}", m.sender_name, rest)
        } else {
            format!("{} {}", m.sender_name, rest)
        }
    } else {
        format!("{}: {}", m.sender_name, m.body)
    };
    RenderedMessage {
        local_id: m.local_id.clone(),
        sender_id: m.sender_id.clone(),
        sender_name: m.sender_name.clone(),
        body: m.body.clone(),
        line,
        is_personal_narrative: narrative,
        timestamp: m.timestamp,
        is_mine: m.is_mine,
        delivery: m.delivery.clone(),
    }
}

pub fn project_session_view(
    registry: &SessionRegistry,
    logs: &MessageLogs,
    session_id: &str,
) -> Option<SessionView> {
    let session = registry.get(session_id)?;
    Some(SessionView {
        session_id: session.session_id.clone(),
        kind: session.kind,
        name: session.name.clone(),
        messages: logs.messages(session_id).map(render_message).collect(),
        can_load_older: logs.can_load_older(session_id),
    })
}
