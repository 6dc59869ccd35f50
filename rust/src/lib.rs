mod actions;
mod core;
mod error;
mod logging;
mod presentation;
mod protocol;
mod state;
mod transport;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use error::SyncError;
pub use presentation::unread_badge;
pub use protocol::*;
pub use state::*;
pub use transport::{
    ChannelState, ChannelTransport, EventHandler, HubTransport, HubTransportOptions,
    OfflineTransport, RestClient, TransportEvent,
};
pub use updates::*;

// Messages drained into one batch before a snapshot is published.
const MAX_BATCH: usize = 64;

/// Return the default `avadeck_config.json` payload used when no config file exists.
#[uniffi::export]
pub fn default_config_json() -> String {
    core::default_app_config_json()
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        Self::spawn(move |update_tx, core_tx, shared| {
            crate::core::AppCore::new(update_tx, core_tx, data_dir, shared)
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn current_accounts(&self) -> Vec<AccountRow> {
        self.state().accounts
    }

    pub fn current_sessions(&self) -> SessionTabs {
        self.state().sessions
    }

    pub fn current_people(&self) -> Vec<NearbyAvatarRow> {
        self.state().people
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl FfiApp {
    /// Builds the app around a caller-supplied transport instead of the hub.
    pub fn with_transport_for_tests(
        data_dir: String,
        transport: Arc<dyn ChannelTransport>,
    ) -> Arc<Self> {
        Self::spawn(move |update_tx, core_tx, shared| {
            crate::core::AppCore::with_transport(update_tx, core_tx, data_dir, shared, transport)
        })
    }

    fn spawn<F>(make_core: F) -> Arc<Self>
    where
        F: FnOnce(
                Sender<AppUpdate>,
                Sender<CoreMsg>,
                Arc<RwLock<AppState>>,
            ) -> crate::core::AppCore
            + Send
            + 'static,
    {
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = make_core(update_tx, core_tx_for_core, shared_for_core);
            core.finish_batch();
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
                for msg in core_rx.try_iter().take(MAX_BATCH) {
                    core.handle_message(msg);
                }
                if core.is_shut_down() {
                    break;
                }
                core.finish_batch();
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }
}

impl Drop for FfiApp {
    fn drop(&mut self) {
        let _ = self
            .core_tx
            .send(CoreMsg::Internal(Box::new(InternalEvent::Shutdown)));
    }
}
