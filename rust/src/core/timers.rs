// Periodic refresh timers, one per (account, purpose).

use std::collections::HashMap;
use std::time::Duration;

use flume::Sender;
use tokio::task::JoinHandle;

use crate::updates::{CoreMsg, InternalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    AccountStatus,
    RegionStats,
    NearbyAvatars,
}

impl TimerPurpose {
    pub fn tag(self) -> &'static str {
        match self {
            TimerPurpose::AccountStatus => "account_status",
            TimerPurpose::RegionStats => "region_stats",
            TimerPurpose::NearbyAvatars => "nearby_avatars",
        }
    }
}

/// `account_id` is `None` for timers not tied to one account (the account list poll).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub account_id: Option<String>,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    pub fn global(purpose: TimerPurpose) -> Self {
        Self {
            account_id: None,
            purpose,
        }
    }

    pub fn account(account_id: &str, purpose: TimerPurpose) -> Self {
        Self {
            account_id: Some(account_id.to_string()),
            purpose,
        }
    }
}

struct ActiveTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns every periodic task. Ticks carry a generation so a tick already
/// queued when its timer was cancelled or restarted can be recognised.
#[derive(Default)]
pub struct TimerRegistry {
    timers: HashMap<TimerKey, ActiveTimer>,
    next_generation: u64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the timer for `key`. The first tick fires after one period.
    pub fn start(
        &mut self,
        runtime: &tokio::runtime::Handle,
        key: TimerKey,
        period: Duration,
        tx: Sender<CoreMsg>,
    ) -> u64 {
        self.cancel(&key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tick_key = key.clone();
        let period = period.max(Duration::from_millis(1));
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let tick = InternalEvent::TimerTick {
                    key: tick_key.clone(),
                    generation,
                };
                if tx.send(CoreMsg::Internal(Box::new(tick))).is_err() {
                    break;
                }
            }
        });
        tracing::debug!(
            account_id = ?key.account_id,
            purpose = key.purpose.tag(),
            generation,
            ?period,
            "timer started"
        );
        self.timers.insert(key, ActiveTimer { generation, handle });
        generation
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer belonging to `account_id`. Returns how many were stopped.
    pub fn cancel_account(&mut self, account_id: &str) -> usize {
        let keys: Vec<TimerKey> = self
            .timers
            .keys()
            .filter(|k| k.account_id.as_deref() == Some(account_id))
            .cloned()
            .collect();
        for key in &keys {
            self.cancel(key);
        }
        if !keys.is_empty() {
            tracing::debug!(account_id, count = keys.len(), "account timers cancelled");
        }
        keys.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn is_current(&self, key: &TimerKey, generation: u64) -> bool {
        self.timers
            .get(key)
            .map(|t| t.generation == generation)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
