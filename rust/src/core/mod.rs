mod cache;
mod chat;
mod commands;
mod config;
mod freshness;
mod reconcile;
mod sessions;
mod timers;

use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::presentation::{self, Snapshot};
use crate::protocol::{NearbyAvatarPayload, NoticePayload, ObjectInfoPayload, RegionStatsPayload};
use crate::state::{AppState, BusyState, SessionKind};
use crate::transport::{
    ChannelState, ChannelTransport, HubTransport, HubTransportOptions, OfflineTransport,
    TransportEvent,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub use cache::{Account, EntityCache};
pub use chat::{ChatMessage, MessageLogs};
pub use freshness::Freshness;
pub use sessions::{ChatSession, SessionRegistry};
pub use timers::{TimerKey, TimerPurpose, TimerRegistry};

#[cfg(test)]
pub(crate) use {freshness::Stamp, sessions::SessionDescriptor};

pub(crate) use config::default_app_config_json;

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    transport: Arc<dyn ChannelTransport>,
    channel: ChannelState,
    shut_down: bool,

    // Mirrors of server state; mutated only from this actor.
    accounts: EntityCache,
    sessions: SessionRegistry,
    logs: MessageLogs,
    timers: TimerRegistry,
    region_freshness: Freshness,

    // Per selected account; cleared on every switch.
    active_account: Option<String>,
    region: Option<RegionStatsPayload>,
    people: Vec<NearbyAvatarPayload>,
    notices: Vec<NoticePayload>,
    object_info: Option<ObjectInfoPayload>,
    music_url: Option<String>,

    busy: BusyState,
    toast: Option<String>,

    // Batch bookkeeping: snapshot is projected once per batch.
    dirty: bool,
    changed_accounts: Vec<String>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let transport: Arc<dyn ChannelTransport> = if config.network_enabled() {
            let options = HubTransportOptions {
                hub_url: config.hub_url().to_string(),
                api_base_url: config.api_base_url().to_string(),
                command_timeout: config.command_timeout(),
                reconnect_backoff_max_ms: config.reconnect_backoff_max_ms(),
            };
            match HubTransport::new(options) {
                Ok(hub) => Arc::new(hub),
                Err(e) => {
                    tracing::error!(
                        err = %format!("{e:#}"),
                        "hub transport init failed; running offline"
                    );
                    Arc::new(OfflineTransport)
                }
            }
        } else {
            tracing::info!("network disabled by config");
            Arc::new(OfflineTransport)
        };
        Self::build(update_sender, core_sender, config, shared_state, transport)
    }

    /// Same as [`AppCore::new`] but with a caller-supplied transport.
    pub fn with_transport(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        Self::build(update_sender, core_sender, config, shared_state, transport)
    }

    fn build(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: config::AppConfig,
        shared_state: Arc<RwLock<AppState>>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let logs = MessageLogs::new(config.message_log_cap());
        let mut this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            transport,
            channel: ChannelState::Disconnected,
            shut_down: false,
            accounts: EntityCache::new(),
            sessions: SessionRegistry::new(),
            logs,
            timers: TimerRegistry::new(),
            region_freshness: Freshness::new(),
            active_account: None,
            region: None,
            people: vec![],
            notices: vec![],
            object_info: None,
            music_url: None,
            busy: BusyState::idle(),
            toast: None,
            dirty: false,
            changed_accounts: vec![],
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        this.state = this.project(0);
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this.start();
        this
    }

    fn start(&mut self) {
        let tx = self.core_sender.clone();
        let handler: crate::transport::EventHandler = Arc::new(move |ev: TransportEvent| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Transport(ev))));
        });
        self.channel = ChannelState::Connecting;
        self.transport.connect(handler, self.runtime.handle());

        self.timers.start(
            self.runtime.handle(),
            TimerKey::global(TimerPurpose::AccountStatus),
            self.config.account_poll_interval(),
            self.core_sender.clone(),
        );
        self.poll_accounts();
        self.dirty = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn project(&self, rev: u64) -> AppState {
        let snapshot = Snapshot {
            channel: self.channel,
            active_account: self.active_account.as_deref(),
            accounts: &self.accounts,
            sessions: &self.sessions,
            logs: &self.logs,
            people: &self.people,
            region: self.region.as_ref(),
            notices: &self.notices,
            object_info: self.object_info.as_ref(),
            music_url: self.music_url.as_deref(),
            busy: &self.busy,
            toast: self.toast.as_deref(),
        };
        presentation::project_state(&snapshot, rev)
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Projects and publishes one snapshot for everything applied since the last call.
    pub fn finish_batch(&mut self) {
        if !self.dirty && self.changed_accounts.is_empty() {
            return;
        }
        self.dirty = false;

        let mut state = self.project(0);
        let changed = std::mem::take(&mut self.changed_accounts);
        let mut account_updates = Vec::with_capacity(changed.len());
        for id in changed {
            if let Some(row) = state.accounts.iter().find(|a| a.account_id == id).cloned() {
                let rev = self.next_rev();
                account_updates.push(AppUpdate::AccountChanged { rev, account: row });
            }
        }
        state.rev = self.next_rev();
        self.state = state;

        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        for update in account_updates {
            let _ = self.update_sender.send(update);
        }
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Kept until the UI clears it so a resync via state() still shows it.
        self.toast = Some(msg.into());
        self.mark_dirty();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        f(&mut self.busy);
        self.mark_dirty();
    }

    fn is_active(&self, account_id: &str) -> bool {
        self.active_account.as_deref() == Some(account_id)
    }

    fn channel_connected(&self) -> bool {
        self.channel == ChannelState::Connected
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        if self.shut_down {
            return;
        }
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::Transport(ev) => self.on_transport_event(ev),
            InternalEvent::TimerTick { key, generation } => self.on_timer_tick(key, generation),
            InternalEvent::AccountsPolled { issued_at, result } => {
                self.on_accounts_polled(issued_at, result)
            }
            InternalEvent::Reply {
                account_id,
                request,
                result,
            } => self.on_reply(account_id, request, result),
            InternalEvent::Shutdown => self.shutdown(),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Accounts
            AppAction::SelectAccount { account_id } => self.select_account(&account_id),
            AppAction::LoginAccount { account_id } => self.login(&account_id),
            AppAction::LogoutAccount { account_id } => self.logout(&account_id),

            // Chat
            AppAction::OpenSession {
                kind,
                target_id,
                name,
            } => self.open_session(kind, &target_id, &name),
            AppAction::FocusSession { session_id } => self.focus_session(&session_id),
            AppAction::CloseSession { session_id } => self.close_session(&session_id),
            AppAction::SendMessage { session_id, text } => self.send_message(&session_id, &text),
            AppAction::LoadOlderMessages { session_id } => self.load_older_messages(&session_id),

            // Avatar
            AppAction::Sit { object_id } => self.sit(&object_id),
            AppAction::Stand => self.stand(),
            AppAction::InspectObject { object_id } => self.inspect_object(&object_id),
            AppAction::AcknowledgeNotice { notice_id, accept } => {
                self.acknowledge_notice(&notice_id, accept)
            }

            // Region
            AppAction::RestartRegion => self.restart_region(),
            AppAction::RefreshMusicUrl => self.refresh_music_url(),
            AppAction::SetMusicUrl { url } => self.set_music_url(&url),

            // UI
            AppAction::ClearToast => {
                if self.toast.is_some() {
                    self.toast = None;
                    self.mark_dirty();
                }
            }
            AppAction::DismissObjectInfo => {
                if self.object_info.take().is_some() {
                    self.mark_dirty();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => {
                // Never trust that nothing was missed while backgrounded.
                self.poll_accounts();
                if let Some(id) = self.active_account.clone() {
                    self.request_full_state(&id);
                }
            }
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("core shutting down");
        self.timers.cancel_all();
        let transport = self.transport.clone();
        self.runtime.block_on(async move { transport.shutdown().await });
        self.shut_down = true;
    }

    /// Kind used for the chat-type tag of outgoing messages.
    fn chat_type_for(kind: SessionKind) -> &'static str {
        match kind {
            SessionKind::Local => "Normal",
            SessionKind::Im => "IM",
            SessionKind::Group => "Group",
        }
    }
}
