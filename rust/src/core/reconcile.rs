// Applying pushes, poll results and replies to the caches.

use std::collections::HashSet;

use serde_json::Value;

use super::cache::Account;
use super::chat::{descriptor_for_message, ChatMessage};
use super::freshness::Stamp;
use super::sessions::{EnsureOutcome, RecordOutcome, SessionDescriptor};
use super::timers::{TimerKey, TimerPurpose};
use super::AppCore;
use crate::error::SyncError;
use crate::protocol::{
    decode, AccountStatusPayload, ChatHistoryPayload, ChatMessagePayload, MusicUrlPayload,
    NearbyAvatarsPayload, ObjectInfoPayload, RecentNoticesPayload, RecentSessionsPayload,
    RegionStatsPayload, ServerEvent, SessionPayload,
};
use crate::state::{now_seconds, ConnectionStatus, DeliveryState, SessionKind};
use crate::transport::{ChannelState, TransportEvent};
use crate::updates::{Request, Via};

/// Accepts either a bare array or `{"accounts": [...]}`.
fn decode_account_list(value: Value) -> Result<Vec<AccountStatusPayload>, SyncError> {
    match value {
        Value::Object(mut obj) if obj.contains_key("accounts") => decode(
            "account list",
            obj.remove("accounts").unwrap_or(Value::Null),
        ),
        Value::Null => Ok(vec![]),
        other => decode("account list", other),
    }
}

fn session_kind_from_wire(session_type: &str, session_id: Option<&str>) -> SessionKind {
    match session_type.trim().to_ascii_lowercase().as_str() {
        "im" | "instantmessage" => SessionKind::Im,
        "group" | "groupim" => SessionKind::Group,
        "local" | "normal" => SessionKind::Local,
        _ => match session_id {
            Some(id) if id.starts_with("im-") => SessionKind::Im,
            Some(id) if id.starts_with("group-") => SessionKind::Group,
            _ => SessionKind::Local,
        },
    }
}

pub(super) fn descriptor_from_session(
    kind: Option<SessionKind>,
    p: &SessionPayload,
) -> SessionDescriptor {
    let kind =
        kind.unwrap_or_else(|| session_kind_from_wire(&p.session_type, p.session_id.as_deref()));
    let target = if !p.target_id.trim().is_empty() {
        p.target_id.trim().to_string()
    } else {
        p.session_id
            .as_deref()
            .and_then(|id| id.strip_prefix("im-").or_else(|| id.strip_prefix("group-")))
            .unwrap_or_default()
            .to_string()
    };
    let descriptor = match kind {
        SessionKind::Local => SessionDescriptor::local(),
        SessionKind::Im => SessionDescriptor::im(target, p.session_name.trim()),
        SessionKind::Group => SessionDescriptor::group(target, p.session_name.trim()),
    };
    descriptor.at(p.last_activity)
}

impl AppCore {
    // ── Transport ────────────────────────────────────────────────────────

    pub(super) fn on_transport_event(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::Connected { reconnected } => {
                tracing::info!(reconnected, "push channel connected");
                self.channel = ChannelState::Connected;
                self.mark_dirty();
                // Never assume nothing was missed while disconnected.
                self.poll_accounts();
                if let Some(id) = self.active_account.clone() {
                    self.request_full_state(&id);
                }
            }
            TransportEvent::Disconnected { reason } => {
                tracing::warn!(%reason, "push channel disconnected");
                self.channel = ChannelState::Disconnected;
                self.mark_dirty();
            }
            TransportEvent::Event(event) => self.apply_server_event(event),
        }
    }

    pub(super) fn apply_server_event(&mut self, event: ServerEvent) {
        tracing::debug!(event = event.name(), account_id = event.account_id(), "push");
        match &event {
            // Account-wide events apply to every account in the list.
            ServerEvent::AccountStatus(p) => {
                self.apply_account_status(p, Stamp::push(p.revision));
                return;
            }
            ServerEvent::AccountRemoved(p) => {
                self.remove_account(&p.account_id);
                return;
            }
            _ => {}
        }

        if !self.is_active(event.account_id()) {
            tracing::debug!(
                event = event.name(),
                account_id = event.account_id(),
                "dropping event for inactive account"
            );
            return;
        }

        match event {
            ServerEvent::AccountStatus(_) | ServerEvent::AccountRemoved(_) => {}
            ServerEvent::RegionStats(p) => {
                let stamp = Stamp::push(p.revision);
                self.apply_region_stats(p, stamp);
            }
            ServerEvent::ChatMessage(p) => self.apply_chat_message(&p),
            ServerEvent::ImSessionStarted(p) => {
                self.apply_session_started(descriptor_from_session(Some(SessionKind::Im), &p))
            }
            ServerEvent::GroupSessionStarted(p) => {
                self.apply_session_started(descriptor_from_session(Some(SessionKind::Group), &p))
            }
            ServerEvent::SessionUpdated(p) => {
                if self.sessions.update(&descriptor_from_session(None, &p)) {
                    self.mark_dirty();
                }
            }
            ServerEvent::NearbyAvatars(p) => self.apply_nearby(p),
            ServerEvent::Notice(p) => {
                self.notices.retain(|n| n.notice_id != p.notice_id);
                self.notices.push(p);
                self.mark_dirty();
            }
            ServerEvent::ChatHistory(p) => self.apply_chat_history(p),
            ServerEvent::RecentSessions(p) => self.apply_recent_sessions(p),
            ServerEvent::RecentNotices(p) => {
                self.notices = p.notices;
                self.mark_dirty();
            }
        }
    }

    // ── Accounts ─────────────────────────────────────────────────────────

    fn apply_account_status(&mut self, p: &AccountStatusPayload, stamp: Stamp) {
        let previous = self.accounts.get(&p.account_id).map(|a| a.status);
        let account = Account::from_status(p, now_seconds());
        let status = match self.accounts.upsert(account, stamp) {
            Ok(applied) => applied.status,
            Err(e @ SyncError::StaleData { .. }) => {
                tracing::debug!(%e, "account update discarded");
                return;
            }
            Err(e) => {
                tracing::warn!(%e, account_id = %p.account_id, "account upsert failed");
                return;
            }
        };
        self.changed_accounts.push(p.account_id.clone());
        self.mark_dirty();

        if !self.is_active(&p.account_id) || previous == Some(status) {
            return;
        }
        match status {
            ConnectionStatus::Online => {
                tracing::info!(account_id = %p.account_id, "selected account back online");
                let id = p.account_id.clone();
                self.request_full_state(&id);
            }
            ConnectionStatus::Offline | ConnectionStatus::Error => {
                // Groups closed during the last connection may reopen next time.
                self.sessions.clear_closed_groups();
            }
            ConnectionStatus::Connecting => {}
        }
    }

    fn remove_account(&mut self, account_id: &str) {
        if self.accounts.remove(account_id).is_none() {
            return;
        }
        tracing::info!(account_id, "account removed");
        self.mark_dirty();
        if self.is_active(account_id) {
            self.toast(SyncError::NotFound(format!("Account {account_id}")).user_message());
            self.deselect_account();
        }
    }

    pub(super) fn on_accounts_polled(&mut self, issued_at: u64, result: Result<Value, SyncError>) {
        let list = match result.and_then(decode_account_list) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(%e, "account poll failed");
                return;
            }
        };
        let present: HashSet<String> = list.iter().map(|p| p.account_id.clone()).collect();
        for p in &list {
            self.apply_account_status(p, Stamp::poll(issued_at, p.revision));
        }
        for id in self.accounts.retain_polled(&present, issued_at) {
            tracing::info!(account_id = %id, "account no longer listed");
            self.mark_dirty();
            if self.is_active(&id) {
                self.toast(SyncError::NotFound(format!("Account {id}")).user_message());
                self.deselect_account();
            }
        }
    }

    /// Switches the selected account, dropping everything scoped to the old one.
    pub(super) fn select_account(&mut self, account_id: &str) {
        if !self.accounts.contains(account_id) {
            self.toast(SyncError::NotFound(format!("Account {account_id}")).user_message());
            return;
        }
        if self.is_active(account_id) {
            self.request_full_state(account_id);
            return;
        }
        self.deselect_account();

        tracing::info!(account_id, "account selected");
        self.active_account = Some(account_id.to_string());
        let handle = self.runtime.handle().clone();
        self.timers.start(
            &handle,
            TimerKey::account(account_id, TimerPurpose::RegionStats),
            self.config.region_poll_interval(),
            self.core_sender.clone(),
        );
        self.timers.start(
            &handle,
            TimerKey::account(account_id, TimerPurpose::NearbyAvatars),
            self.config.nearby_poll_interval(),
            self.core_sender.clone(),
        );
        self.request_full_state(account_id);
        self.mark_dirty();
    }

    fn deselect_account(&mut self) {
        if let Some(previous) = self.active_account.take() {
            self.timers.cancel_account(&previous);
            let transport = self.transport.clone();
            self.runtime.spawn(async move {
                if let Err(e) = transport.unsubscribe(&previous).await {
                    tracing::debug!(%e, account_id = %previous, "leave group failed");
                }
            });
        }
        self.sessions.clear_all();
        self.logs.clear();
        self.region_freshness.clear();
        self.region = None;
        self.people.clear();
        self.notices.clear();
        self.object_info = None;
        self.music_url = None;
        self.busy.loading_history = false;
        self.busy.restarting_region = false;
        self.mark_dirty();
    }

    /// Re-requests everything the selected account's views are built from.
    pub(super) fn request_full_state(&mut self, account_id: &str) {
        tracing::debug!(account_id, connected = self.channel_connected(), "requesting full state");
        self.subscribe(account_id);
        self.refresh_region();
        if !self.channel_connected() {
            return;
        }
        self.fetch_recent_sessions(account_id);
        self.fetch_recent_notices(account_id);
        self.refresh_people();
        let focused = self.sessions.focused().to_string();
        self.fetch_history_page(&focused, 0);
    }

    // ── Timers ───────────────────────────────────────────────────────────

    pub(super) fn on_timer_tick(&mut self, key: TimerKey, generation: u64) {
        if !self.timers.is_current(&key, generation) {
            tracing::debug!(purpose = key.purpose.tag(), generation, "stale timer tick");
            return;
        }
        match key.purpose {
            // Redundancy check even while pushes flow.
            TimerPurpose::AccountStatus => self.poll_accounts(),
            TimerPurpose::RegionStats | TimerPurpose::NearbyAvatars => {
                let Some(id) = key.account_id.as_deref() else {
                    return;
                };
                if !self.is_active(id) {
                    return;
                }
                if key.purpose == TimerPurpose::RegionStats {
                    self.refresh_region();
                } else {
                    self.refresh_people();
                }
            }
        }
    }

    // ── Region / people ──────────────────────────────────────────────────

    fn apply_region_stats(&mut self, p: RegionStatsPayload, stamp: Stamp) {
        if let Err(e) = self.region_freshness.admit(&p.account_id, stamp) {
            tracing::debug!(%e, "region stats discarded");
            return;
        }
        self.region = Some(p);
        self.mark_dirty();
    }

    fn apply_nearby(&mut self, p: NearbyAvatarsPayload) {
        self.people = p.avatars;
        self.mark_dirty();
    }

    // ── Chat ─────────────────────────────────────────────────────────────

    fn apply_chat_message(&mut self, p: &ChatMessagePayload) {
        let own = self.active_account.clone().unwrap_or_default();
        let descriptor = descriptor_for_message(p, &own);
        let session_id = descriptor.session_id();
        let message = ChatMessage::from_payload(p, &session_id, &own);

        if message.is_mine {
            if self.logs.confirm_echo(&message) {
                self.mark_dirty();
                return;
            }
            // Sent from elsewhere: open the tab without counting it unread.
            if self.sessions.ensure_open(&descriptor) == EnsureOutcome::Suppressed {
                return;
            }
        } else if self.sessions.record_message(&descriptor) == RecordOutcome::Suppressed {
            tracing::debug!(session_id = %session_id, "message for closed group dropped");
            return;
        }
        self.logs.append(message);
        self.mark_dirty();
    }

    fn apply_session_started(&mut self, descriptor: SessionDescriptor) {
        if self.sessions.ensure_open(&descriptor) == EnsureOutcome::Created {
            self.mark_dirty();
        }
    }

    fn apply_recent_sessions(&mut self, p: RecentSessionsPayload) {
        let descriptors: Vec<SessionDescriptor> = p
            .sessions
            .iter()
            .map(|s| descriptor_from_session(None, s))
            .filter(|d| d.kind != SessionKind::Local)
            .collect();
        let created = self.sessions.load_recent(&descriptors);
        tracing::debug!(created, total = descriptors.len(), "recent sessions loaded");
        if created > 0 {
            self.mark_dirty();
        }
    }

    fn apply_chat_history(&mut self, p: ChatHistoryPayload) {
        if self.busy.loading_history {
            self.busy.loading_history = false;
            self.mark_dirty();
        }
        if self.sessions.get(&p.session_id).is_none() {
            tracing::debug!(session_id = %p.session_id, "history for closed session dropped");
            return;
        }
        let own = self.active_account.clone().unwrap_or_default();
        let page: Vec<ChatMessage> = p
            .messages
            .iter()
            .map(|m| ChatMessage::from_payload(m, &p.session_id, &own))
            .collect();
        let added = self.logs.merge_history(&p.session_id, page, p.total_count);
        tracing::debug!(session_id = %p.session_id, added, "history merged");
        self.mark_dirty();
    }

    // ── Replies ──────────────────────────────────────────────────────────

    pub(super) fn on_reply(
        &mut self,
        account_id: String,
        request: Request,
        result: Result<Value, SyncError>,
    ) {
        let account_scoped = !matches!(request, Request::Login | Request::Logout);
        if account_scoped && !self.is_active(&account_id) {
            tracing::debug!(
                request = request.tag(),
                account_id = %account_id,
                "discarding reply for inactive account"
            );
            return;
        }
        match result {
            Ok(value) => {
                if let Err(e) = self.apply_reply(&account_id, request.clone(), value) {
                    self.on_request_failed(&account_id, request, e);
                }
            }
            Err(e) => self.on_request_failed(&account_id, request, e),
        }
    }

    /// Direct replies carry the same payload as the matching push event, or
    /// null when the data follows as an event.
    fn apply_reply(
        &mut self,
        account_id: &str,
        request: Request,
        value: Value,
    ) -> Result<(), SyncError> {
        match request {
            Request::Subscribe => {}
            Request::RecentSessions => {
                if !value.is_null() {
                    self.apply_recent_sessions(decode::<RecentSessionsPayload>(
                        "recent sessions",
                        value,
                    )?);
                }
            }
            Request::RecentNotices => {
                if !value.is_null() {
                    let p: RecentNoticesPayload = decode("recent notices", value)?;
                    self.notices = p.notices;
                    self.mark_dirty();
                }
            }
            Request::NearbyAvatars => {
                if !value.is_null() {
                    self.apply_nearby(decode("nearby avatars", value)?);
                }
            }
            Request::RegionStats { issued_at, .. } => {
                if !value.is_null() {
                    let p: RegionStatsPayload = decode("region stats", value)?;
                    let stamp = Stamp::poll(issued_at, p.revision);
                    self.apply_region_stats(p, stamp);
                }
            }
            Request::ChatHistory { .. } => {
                if value.is_null() {
                    return Ok(());
                }
                self.apply_chat_history(decode("chat history", value)?);
            }
            Request::SendMessage {
                session_id,
                local_id,
            } => {
                if self
                    .logs
                    .set_delivery(&session_id, &local_id, DeliveryState::Sent)
                {
                    self.mark_dirty();
                }
            }
            Request::Avatar { tag } => {
                tracing::info!(account_id, command = tag, "avatar command accepted");
            }
            Request::AcknowledgeNotice { notice_id } => {
                self.notices.retain(|n| n.notice_id != notice_id);
                self.mark_dirty();
            }
            Request::ObjectInfo { object_id } => {
                if value.is_null() {
                    return Err(SyncError::NotFound(format!("Object {object_id}")));
                }
                let info: ObjectInfoPayload = decode("object info", value)?;
                self.object_info = Some(info);
                self.mark_dirty();
            }
            Request::MusicUrl => {
                let p: MusicUrlPayload = if value.is_null() {
                    MusicUrlPayload::default()
                } else {
                    decode("music url", value)?
                };
                self.music_url = p.url.filter(|u| !u.trim().is_empty());
                self.mark_dirty();
            }
            Request::SetMusicUrl { url } => {
                let confirmed = decode::<MusicUrlPayload>("music url", value)
                    .ok()
                    .and_then(|p| p.url);
                self.music_url = confirmed.or(Some(url)).filter(|u| !u.trim().is_empty());
                self.mark_dirty();
            }
            Request::RestartRegion => {
                self.set_busy(|b| b.restarting_region = false);
                self.toast("Region restart requested");
            }
            Request::Login | Request::Logout => {
                self.set_busy(|b| b.logging_in = false);
                self.poll_accounts();
            }
        }
        Ok(())
    }

    fn on_request_failed(&mut self, account_id: &str, request: Request, err: SyncError) {
        if let SyncError::StaleData { .. } = err {
            tracing::debug!(request = request.tag(), %err, "stale reply");
            return;
        }

        if !request.is_user_command() {
            tracing::warn!(request = request.tag(), account_id, %err, "refresh failed");
            match request {
                Request::ChatHistory { .. } => self.set_busy(|b| b.loading_history = false),
                // Hub unavailable: fall back to the REST poll. A failed REST
                // poll waits for the next tick.
                Request::RegionStats { via: Via::Hub, .. }
                    if err.is_retryable() && self.channel_connected() =>
                {
                    self.poll_region_rest(account_id);
                }
                _ => {}
            }
            return;
        }

        tracing::warn!(request = request.tag(), account_id, %err, "command failed");
        match &request {
            Request::SendMessage {
                session_id,
                local_id,
            } => {
                self.logs.set_delivery(
                    session_id,
                    local_id,
                    DeliveryState::Failed {
                        reason: err.to_string(),
                    },
                );
            }
            Request::RestartRegion => self.busy.restarting_region = false,
            Request::Login | Request::Logout => self.busy.logging_in = false,
            _ => {}
        }
        self.toast(err.user_message());

        // Local state is suspect after a failed mutation: resync.
        self.poll_accounts();
        if let Some(id) = self.active_account.clone() {
            self.request_full_state(&id);
        }
    }
}
