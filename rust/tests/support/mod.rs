#![allow(dead_code)]

mod scripted;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use avadeck_core::{AccountStatusPayload, AppReconciler, AppUpdate, ChatMessagePayload, ServerEvent};

pub use scripted::ScriptedTransport;

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Writes an offline config with fast timers unless overridden.
pub fn write_config(data_dir: &str, overrides: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("avadeck_config.json");
    let mut v = serde_json::json!({
        "disable_network": true,
        "account_poll_interval_ms": 60_000,
        "region_poll_interval_ms": 60_000,
        "nearby_poll_interval_ms": 60_000,
        "history_page_size": 25,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), overrides.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn account_status(
    id: &str,
    name: &str,
    connected: bool,
    revision: Option<u64>,
) -> ServerEvent {
    ServerEvent::AccountStatus(AccountStatusPayload {
        account_id: id.to_string(),
        display_name: name.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        is_connected: connected,
        status: if connected { "Online" } else { "Offline" }.to_string(),
        current_region: Some("Ahern".to_string()),
        last_activity: None,
        revision,
    })
}

pub fn chat_message(
    account_id: &str,
    chat_type: &str,
    sender_id: &str,
    sender_name: &str,
    target_id: Option<&str>,
    body: &str,
) -> ServerEvent {
    ServerEvent::ChatMessage(ChatMessagePayload {
        account_id: account_id.to_string(),
        session_id: None,
        session_name: None,
        chat_type: chat_type.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
        target_id: target_id.map(str::to_string),
        message: body.to_string(),
        timestamp: 1_700_000_000,
    })
}

/// Account list in the shape the REST fallback returns it.
pub fn account_list(rows: &[(&str, &str, bool, u64)]) -> serde_json::Value {
    serde_json::Value::Array(
        rows.iter()
            .map(|(id, name, connected, revision)| {
                serde_json::json!({
                    "accountId": id,
                    "displayName": name,
                    "isConnected": connected,
                    "status": if *connected { "Online" } else { "Offline" },
                    "revision": revision,
                })
            })
            .collect(),
    )
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn last_toast(&self) -> Option<String> {
        self.0.lock().unwrap().iter().rev().find_map(|u| match u {
            AppUpdate::FullState(s) => s.toast.clone(),
            _ => None,
        })
    }

    pub fn account_changes(&self, account_id: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|u| match u {
                AppUpdate::AccountChanged { account, .. } => account.account_id == account_id,
                _ => false,
            })
            .count()
    }

    pub fn revs(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(|u| u.rev()).collect()
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}
