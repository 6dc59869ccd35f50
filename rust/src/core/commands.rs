// Outbound traffic: hub commands, REST polls and user command handlers.
//
// Every call runs on the runtime and reports back through `core_sender`, so
// replies are applied on the actor like any other event.

use serde_json::{json, Value};

use super::chat::ChatMessage;
use super::sessions::{SessionDescriptor, LOCAL_CHAT_ID};
use super::AppCore;
use crate::error::SyncError;
use crate::protocol::{HubCommand, RestEndpoint};
use crate::state::{now_seconds, SessionKind};
use crate::updates::{CoreMsg, InternalEvent, Request, Via};

enum RestCall {
    Get,
    Post(Value),
}

impl AppCore {
    fn spawn_hub(&self, request: Request, command: HubCommand) {
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let account_id = command.account_id().to_string();
        tracing::debug!(method = command.method(), request = request.tag(), "hub call");
        self.runtime.spawn(async move {
            let result = transport.send(command).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Reply {
                account_id,
                request,
                result,
            })));
        });
    }

    fn spawn_rest(
        &self,
        account_id: &str,
        request: Request,
        endpoint: RestEndpoint,
        call: RestCall,
    ) {
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let account_id = account_id.to_string();
        let path = endpoint.path();
        tracing::debug!(%path, request = request.tag(), "rest call");
        self.runtime.spawn(async move {
            let result = match call {
                RestCall::Get => transport.poll(&path).await,
                RestCall::Post(body) => transport.post(&path, body).await,
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Reply {
                account_id,
                request,
                result,
            })));
        });
    }

    /// Toasts and returns `None` when no account is selected.
    fn require_active(&mut self) -> Option<String> {
        if self.active_account.is_none() {
            self.toast("Select an account first");
        }
        self.active_account.clone()
    }

    // ── Background refreshes ─────────────────────────────────────────────

    /// Authoritative account list over REST, stamped with the current push sequence.
    pub(super) fn poll_accounts(&mut self) {
        let issued_at = self.accounts.issue_poll();
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let path = RestEndpoint::Accounts.path();
        self.runtime.spawn(async move {
            let result = transport.poll(&path).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::AccountsPolled {
                issued_at,
                result,
            })));
        });
    }

    pub(super) fn subscribe(&mut self, account_id: &str) {
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let account_id = account_id.to_string();
        self.runtime.spawn(async move {
            let result = transport.subscribe(&account_id).await.map(|_| Value::Null);
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Reply {
                account_id,
                request: Request::Subscribe,
                result,
            })));
        });
    }

    /// Hub when the push channel is up, REST otherwise.
    pub(super) fn refresh_region(&mut self) {
        let Some(account_id) = self.active_account.clone() else {
            return;
        };
        if self.channel_connected() {
            let issued_at = self.region_freshness.issue_poll();
            self.spawn_hub(
                Request::RegionStats {
                    issued_at,
                    via: Via::Hub,
                },
                HubCommand::GetRegionStats { account_id },
            );
        } else {
            self.poll_region_rest(&account_id);
        }
    }

    pub(super) fn poll_region_rest(&mut self, account_id: &str) {
        let issued_at = self.region_freshness.issue_poll();
        self.spawn_rest(
            account_id,
            Request::RegionStats {
                issued_at,
                via: Via::Rest,
            },
            RestEndpoint::RegionStats {
                account_id: account_id.to_string(),
            },
            RestCall::Get,
        );
    }

    /// Nearby avatars have no REST fallback; skipped while disconnected.
    pub(super) fn refresh_people(&mut self) {
        let Some(account_id) = self.active_account.clone() else {
            return;
        };
        if !self.channel_connected() {
            return;
        }
        self.spawn_hub(
            Request::NearbyAvatars,
            HubCommand::GetNearbyAvatars { account_id },
        );
    }

    pub(super) fn fetch_recent_sessions(&mut self, account_id: &str) {
        self.spawn_hub(
            Request::RecentSessions,
            HubCommand::GetRecentSessions {
                account_id: account_id.to_string(),
            },
        );
    }

    pub(super) fn fetch_recent_notices(&mut self, account_id: &str) {
        self.spawn_hub(
            Request::RecentNotices,
            HubCommand::GetRecentNotices {
                account_id: account_id.to_string(),
            },
        );
    }

    pub(super) fn fetch_history_page(&mut self, session_id: &str, offset: u32) {
        let Some(account_id) = self.active_account.clone() else {
            return;
        };
        let count = self.config.history_page_size();
        self.spawn_hub(
            Request::ChatHistory {
                session_id: session_id.to_string(),
            },
            HubCommand::GetChatHistory {
                account_id,
                session_id: session_id.to_string(),
                count,
                offset,
            },
        );
    }

    // ── Accounts ─────────────────────────────────────────────────────────

    pub(super) fn login(&mut self, account_id: &str) {
        if !self.accounts.contains(account_id) {
            self.toast(SyncError::NotFound(format!("Account {account_id}")).user_message());
            return;
        }
        self.set_busy(|b| b.logging_in = true);
        self.spawn_rest(
            account_id,
            Request::Login,
            RestEndpoint::Login {
                account_id: account_id.to_string(),
            },
            RestCall::Post(json!({})),
        );
    }

    pub(super) fn logout(&mut self, account_id: &str) {
        if !self.accounts.contains(account_id) {
            self.toast(SyncError::NotFound(format!("Account {account_id}")).user_message());
            return;
        }
        self.set_busy(|b| b.logging_in = true);
        self.spawn_rest(
            account_id,
            Request::Logout,
            RestEndpoint::Logout {
                account_id: account_id.to_string(),
            },
            RestCall::Post(json!({})),
        );
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    pub(super) fn open_session(&mut self, kind: SessionKind, target_id: &str, name: &str) {
        if self.require_active().is_none() {
            return;
        }
        let descriptor = match kind {
            SessionKind::Local => SessionDescriptor::local(),
            SessionKind::Im => SessionDescriptor::im(target_id.trim(), name.trim()),
            SessionKind::Group => SessionDescriptor::group(target_id.trim(), name.trim()),
        }
        .at(now_seconds());
        if kind != SessionKind::Local && descriptor.target_id.is_empty() {
            self.toast("Missing chat target");
            return;
        }
        let session_id = descriptor.session_id();
        let outcome = self.sessions.open_explicit(&descriptor);
        tracing::debug!(session_id = %session_id, ?outcome, "open session");
        self.focus_session(&session_id);
    }

    pub(super) fn focus_session(&mut self, session_id: &str) {
        if let Err(e) = self.sessions.focus(session_id) {
            // Unknown tab: reset the view to local chat.
            self.toast(e.user_message());
            let _ = self.sessions.focus(LOCAL_CHAT_ID);
            self.mark_dirty();
            return;
        }
        self.mark_dirty();
        let never_loaded =
            self.logs.len(session_id) == 0 && self.logs.history_loaded(session_id) == 0;
        if never_loaded && self.channel_connected() {
            self.fetch_history_page(session_id, 0);
        }
    }

    pub(super) fn close_session(&mut self, session_id: &str) {
        match self.sessions.close(session_id) {
            Ok(closed) => {
                tracing::info!(session_id, kind = ?closed.kind, "session closed");
                self.logs.remove(session_id);
                self.mark_dirty();
            }
            Err(e) => self.toast(e.user_message()),
        }
    }

    pub(super) fn load_older_messages(&mut self, session_id: &str) {
        if self.busy.loading_history || !self.logs.can_load_older(session_id) {
            return;
        }
        if self.sessions.get(session_id).is_none() {
            self.toast(SyncError::NotFound(format!("Chat {session_id}")).user_message());
            return;
        }
        let offset = self.logs.history_loaded(session_id);
        self.set_busy(|b| b.loading_history = true);
        self.fetch_history_page(session_id, offset);
    }

    /// Appends an optimistic copy, then sends. The hub echo or reply confirms it.
    pub(super) fn send_message(&mut self, session_id: &str, text: &str) {
        let body = text.trim();
        if body.is_empty() {
            return;
        }
        let Some(account_id) = self.require_active() else {
            return;
        };
        let Some(session) = self.sessions.get(session_id).cloned() else {
            self.toast(SyncError::NotFound(format!("Chat {session_id}")).user_message());
            let _ = self.sessions.focus(LOCAL_CHAT_ID);
            self.mark_dirty();
            return;
        };

        let sender_name = self
            .accounts
            .get(&account_id)
            .map(|a| a.display_name.clone())
            .unwrap_or_else(|| account_id.clone());
        let now = now_seconds();
        let chat_type = Self::chat_type_for(session.kind);
        let message = ChatMessage::outgoing(
            session_id,
            &account_id,
            &sender_name,
            body,
            chat_type,
            now,
        );
        let local_id = message.local_id.clone();
        self.logs.append(message);

        let descriptor = SessionDescriptor {
            kind: session.kind,
            target_id: session.target_id.clone(),
            name: session.name.clone(),
            last_activity: now,
        };
        // Bumps activity on the existing tab.
        self.sessions.ensure_open(&descriptor);
        self.mark_dirty();

        let command = match session.kind {
            SessionKind::Local => HubCommand::SendChat {
                account_id,
                message: body.to_string(),
                chat_type: chat_type.to_string(),
                channel: 0,
            },
            SessionKind::Im => HubCommand::SendIm {
                account_id,
                target_id: session.target_id,
                message: body.to_string(),
            },
            SessionKind::Group => HubCommand::SendGroupIm {
                account_id,
                group_id: session.target_id,
                message: body.to_string(),
            },
        };
        self.spawn_hub(
            Request::SendMessage {
                session_id: session_id.to_string(),
                local_id,
            },
            command,
        );
    }

    // ── Avatar ───────────────────────────────────────────────────────────

    pub(super) fn sit(&mut self, object_id: &str) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        self.spawn_hub(
            Request::Avatar { tag: "sit" },
            HubCommand::Sit {
                account_id,
                object_id: object_id.to_string(),
            },
        );
    }

    pub(super) fn stand(&mut self) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        self.spawn_hub(Request::Avatar { tag: "stand" }, HubCommand::Stand { account_id });
    }

    pub(super) fn inspect_object(&mut self, object_id: &str) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        self.spawn_hub(
            Request::ObjectInfo {
                object_id: object_id.to_string(),
            },
            HubCommand::GetObjectInfo {
                account_id,
                object_id: object_id.to_string(),
            },
        );
    }

    pub(super) fn acknowledge_notice(&mut self, notice_id: &str, accept: bool) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        if !self.notices.iter().any(|n| n.notice_id == notice_id) {
            self.toast(SyncError::NotFound(format!("Notice {notice_id}")).user_message());
            return;
        }
        self.spawn_hub(
            Request::AcknowledgeNotice {
                notice_id: notice_id.to_string(),
            },
            HubCommand::AcknowledgeNotice {
                account_id,
                notice_id: notice_id.to_string(),
                accept,
            },
        );
    }

    // ── Region ───────────────────────────────────────────────────────────

    pub(super) fn restart_region(&mut self) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        if self.busy.restarting_region {
            return;
        }
        self.set_busy(|b| b.restarting_region = true);
        self.spawn_rest(
            &account_id,
            Request::RestartRegion,
            RestEndpoint::RestartRegion {
                account_id: account_id.clone(),
            },
            RestCall::Post(json!({})),
        );
    }

    pub(super) fn refresh_music_url(&mut self) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        self.spawn_rest(
            &account_id,
            Request::MusicUrl,
            RestEndpoint::MusicUrl {
                account_id: account_id.clone(),
            },
            RestCall::Get,
        );
    }

    pub(super) fn set_music_url(&mut self, url: &str) {
        let Some(account_id) = self.require_active() else {
            return;
        };
        let url = url.trim().to_string();
        self.spawn_rest(
            &account_id,
            Request::SetMusicUrl { url: url.clone() },
            RestEndpoint::MusicUrl {
                account_id: account_id.clone(),
            },
            RestCall::Post(json!({ "url": url })),
        );
    }
}
