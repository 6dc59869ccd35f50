// Account/presence cache: one record per account id, in registration order.

use std::collections::{HashMap, HashSet};

use super::freshness::{Freshness, Stamp};
use crate::error::SyncError;
use crate::protocol::AccountStatusPayload;
use crate::state::ConnectionStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub status: ConnectionStatus,
    pub region_name: Option<String>,
    pub last_activity: i64,
}

impl Account {
    pub fn from_status(p: &AccountStatusPayload, now: i64) -> Self {
        let display_name = if !p.display_name.trim().is_empty() {
            p.display_name.trim().to_string()
        } else {
            let full = format!("{} {}", p.first_name.trim(), p.last_name.trim());
            let full = full.trim();
            if full.is_empty() {
                p.account_id.clone()
            } else {
                full.to_string()
            }
        };
        Self {
            account_id: p.account_id.clone(),
            display_name,
            first_name: p.first_name.clone(),
            last_name: p.last_name.clone(),
            status: status_from_wire(p.is_connected, &p.status),
            region_name: p
                .current_region
                .as_ref()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            last_activity: p.last_activity.unwrap_or(now),
        }
    }

    #[cfg(test)]
    pub fn is_online(&self) -> bool {
        self.status == ConnectionStatus::Online
    }
}

/// `isConnected` is authoritative for Online; the free-form status refines the rest.
pub fn status_from_wire(is_connected: bool, status: &str) -> ConnectionStatus {
    if is_connected {
        return ConnectionStatus::Online;
    }
    let s = status.trim().to_ascii_lowercase();
    if s.starts_with("disconnect") || s.starts_with("logged out") {
        ConnectionStatus::Offline
    } else if s.contains("connecting") || s.contains("logging in") || s == "login" {
        ConnectionStatus::Connecting
    } else if s.contains("error") || s.contains("fail") || s.contains("kicked") {
        ConnectionStatus::Error
    } else {
        ConnectionStatus::Offline
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    order: Vec<String>,
    accounts: HashMap<String, Account>,
    freshness: Freshness,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the record outright. Unknown ids are inserted, stale stamps rejected.
    pub fn upsert(&mut self, account: Account, stamp: Stamp) -> Result<&Account, SyncError> {
        self.freshness.admit(&account.account_id, stamp)?;
        let id = account.account_id.clone();
        if !self.accounts.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.accounts.insert(id.clone(), account);
        self.accounts
            .get(&id)
            .ok_or_else(|| SyncError::NotFound(format!("account {id}")))
    }

    pub fn get(&self, account_id: &str) -> Option<&Account> {
        self.accounts.get(account_id)
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    /// Accounts in registration order.
    pub fn list(&self) -> impl Iterator<Item = &Account> {
        self.order.iter().filter_map(|id| self.accounts.get(id))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn remove(&mut self, account_id: &str) -> Option<Account> {
        self.order.retain(|id| id != account_id);
        self.freshness.forget(account_id);
        self.accounts.remove(account_id)
    }

    pub fn issue_poll(&self) -> u64 {
        self.freshness.issue_poll()
    }

    /// Drops accounts missing from an authoritative list poll, except those a
    /// push has touched since the poll was issued. Returns the removed ids.
    pub fn retain_polled(&mut self, present: &HashSet<String>, issued_at: u64) -> Vec<String> {
        let doomed: Vec<String> = self
            .order
            .iter()
            .filter(|id| !present.contains(*id) && !self.freshness.pushed_since(id, issued_at))
            .cloned()
            .collect();
        for id in &doomed {
            self.remove(id);
        }
        doomed
    }
}
