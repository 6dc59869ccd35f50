// Chat session registry: open tabs, unread counters and group suppression.

use std::collections::HashSet;

use crate::error::SyncError;
use crate::state::SessionKind;

pub const LOCAL_CHAT_ID: &str = "local-chat";
const LOCAL_CHAT_NAME: &str = "Local Chat";

/// Deterministic session id for a kind + target pair.
pub fn session_id_for(kind: SessionKind, target_id: &str) -> String {
    match kind {
        SessionKind::Local => LOCAL_CHAT_ID.to_string(),
        SessionKind::Im => format!("im-{target_id}"),
        SessionKind::Group => format!("group-{target_id}"),
    }
}

/// What is known about a session before it exists locally.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub kind: SessionKind,
    pub target_id: String,
    pub name: String,
    pub last_activity: i64,
}

impl SessionDescriptor {
    pub fn local() -> Self {
        Self {
            kind: SessionKind::Local,
            target_id: String::new(),
            name: LOCAL_CHAT_NAME.to_string(),
            last_activity: 0,
        }
    }

    pub fn im(target_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Im,
            target_id: target_id.into(),
            name: name.into(),
            last_activity: 0,
        }
    }

    pub fn group(group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Group,
            target_id: group_id.into(),
            name: name.into(),
            last_activity: 0,
        }
    }

    pub fn at(mut self, last_activity: i64) -> Self {
        self.last_activity = last_activity;
        self
    }

    pub fn session_id(&self) -> String {
        session_id_for(self.kind, &self.target_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub session_id: String,
    pub kind: SessionKind,
    pub name: String,
    pub target_id: String,
    pub unread_count: u32,
    pub last_activity: i64,
}

impl ChatSession {
    fn open(d: &SessionDescriptor) -> Self {
        let name = if d.name.trim().is_empty() {
            d.target_id.clone()
        } else {
            d.name.clone()
        };
        Self {
            session_id: d.session_id(),
            kind: d.kind,
            name,
            target_id: d.target_id.clone(),
            unread_count: 0,
            last_activity: d.last_activity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Existing,
    Created,
    /// Group closed by the user during this connection; nothing was created.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { created: bool, unread: u32 },
    Suppressed,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Vec<ChatSession>,
    closed_groups: HashSet<String>,
    focused: String,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: vec![ChatSession::open(&SessionDescriptor::local())],
            closed_groups: HashSet::new(),
            focused: LOCAL_CHAT_ID.to_string(),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.session_id == session_id)
    }

    /// Open sessions in creation order, local chat first.
    pub fn sessions(&self) -> impl Iterator<Item = &ChatSession> {
        self.sessions.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn focused(&self) -> &str {
        &self.focused
    }

    #[cfg(test)]
    pub fn is_suppressed(&self, session_id: &str) -> bool {
        self.closed_groups.contains(session_id)
    }

    pub fn ensure_open(&mut self, d: &SessionDescriptor) -> EnsureOutcome {
        let id = d.session_id();
        if let Some(existing) = self.get_mut(&id) {
            existing.last_activity = existing.last_activity.max(d.last_activity);
            return EnsureOutcome::Existing;
        }
        if d.kind == SessionKind::Group && self.closed_groups.contains(&id) {
            tracing::debug!(session_id = %id, "group session suppressed");
            return EnsureOutcome::Suppressed;
        }
        self.sessions.push(ChatSession::open(d));
        EnsureOutcome::Created
    }

    /// Explicit user start. Lifts group suppression before opening.
    pub fn open_explicit(&mut self, d: &SessionDescriptor) -> EnsureOutcome {
        self.closed_groups.remove(&d.session_id());
        self.ensure_open(d)
    }

    /// Counts an inbound message, creating the session from `d` if needed.
    pub fn record_message(&mut self, d: &SessionDescriptor) -> RecordOutcome {
        let created = match self.ensure_open(d) {
            EnsureOutcome::Suppressed => return RecordOutcome::Suppressed,
            EnsureOutcome::Created => true,
            EnsureOutcome::Existing => false,
        };
        let id = d.session_id();
        let focused = self.focused == id;
        let Some(session) = self.get_mut(&id) else {
            return RecordOutcome::Suppressed;
        };
        if focused {
            session.unread_count = 0;
        } else {
            session.unread_count = session.unread_count.saturating_add(1);
        }
        RecordOutcome::Recorded {
            created,
            unread: session.unread_count,
        }
    }

    pub fn focus(&mut self, session_id: &str) -> Result<(), SyncError> {
        let Some(session) = self.get_mut(session_id) else {
            return Err(SyncError::NotFound(format!("session {session_id}")));
        };
        session.unread_count = 0;
        self.focused = session_id.to_string();
        Ok(())
    }

    /// Applies name/activity changes from a session-updated event. Never creates.
    pub fn update(&mut self, d: &SessionDescriptor) -> bool {
        let Some(session) = self.get_mut(&d.session_id()) else {
            return false;
        };
        if !d.name.trim().is_empty() {
            session.name = d.name.clone();
        }
        session.last_activity = session.last_activity.max(d.last_activity);
        true
    }

    pub fn close(&mut self, session_id: &str) -> Result<ChatSession, SyncError> {
        if session_id == LOCAL_CHAT_ID {
            return Err(SyncError::Rejected("local chat cannot be closed".to_string()));
        }
        let Some(idx) = self.sessions.iter().position(|s| s.session_id == session_id) else {
            return Err(SyncError::NotFound(format!("session {session_id}")));
        };
        let removed = self.sessions.remove(idx);
        if removed.kind == SessionKind::Group {
            self.closed_groups.insert(removed.session_id.clone());
        }
        if self.focused == session_id {
            self.focus_local();
        }
        Ok(removed)
    }

    /// Bulk load from the recent-sessions report. Returns how many were created.
    pub fn load_recent(&mut self, descriptors: &[SessionDescriptor]) -> usize {
        descriptors
            .iter()
            .filter(|d| self.ensure_open(d) == EnsureOutcome::Created)
            .count()
    }

    /// Drops every non-local session and forgets suppressed groups.
    pub fn clear_all(&mut self) {
        self.sessions.retain(|s| s.kind == SessionKind::Local);
        self.closed_groups.clear();
        self.focus_local();
    }

    pub fn clear_closed_groups(&mut self) {
        self.closed_groups.clear();
    }

    fn focus_local(&mut self) {
        self.focused = LOCAL_CHAT_ID.to_string();
        if let Some(local) = self.get_mut(LOCAL_CHAT_ID) {
            local.unread_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_open_is_idempotent() {
        let mut reg = SessionRegistry::new();
        let d = SessionDescriptor::im("B2", "Bea");
        assert_eq!(reg.ensure_open(&d), EnsureOutcome::Created);
        assert_eq!(reg.ensure_open(&d), EnsureOutcome::Existing);
        assert_eq!(
            reg.sessions().filter(|s| s.session_id == "im-B2").count(),
            1
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn closed_group_stays_closed_until_clear_all() {
        let mut reg = SessionRegistry::new();
        let d = SessionDescriptor::group("G1", "Builders");
        reg.record_message(&d);
        reg.close("group-G1").unwrap();
        assert!(reg.is_suppressed("group-G1"));

        assert_eq!(reg.record_message(&d), RecordOutcome::Suppressed);
        assert_eq!(reg.ensure_open(&d), EnsureOutcome::Suppressed);
        assert!(reg.get("group-G1").is_none());

        reg.clear_all();
        assert!(!reg.is_suppressed("group-G1"));
        assert_eq!(reg.ensure_open(&d), EnsureOutcome::Created);
    }

    #[test]
    fn closed_im_reopens_with_only_new_unread() {
        let mut reg = SessionRegistry::new();
        let d = SessionDescriptor::im("B2", "Bea");
        for _ in 0..3 {
            reg.record_message(&d);
        }
        assert_eq!(reg.get("im-B2").unwrap().unread_count, 3);
        reg.close("im-B2").unwrap();
        assert!(!reg.is_suppressed("im-B2"));

        assert_eq!(
            reg.record_message(&d),
            RecordOutcome::Recorded {
                created: true,
                unread: 1
            }
        );
    }

    #[test]
    fn focused_session_never_accumulates_unread() {
        let mut reg = SessionRegistry::new();
        let bea = SessionDescriptor::im("B2", "Bea");
        let cal = SessionDescriptor::im("C3", "Cal");
        reg.ensure_open(&bea);
        reg.ensure_open(&cal);
        reg.focus("im-B2").unwrap();

        for i in 1..=4u32 {
            assert_eq!(
                reg.record_message(&bea),
                RecordOutcome::Recorded {
                    created: false,
                    unread: 0
                }
            );
            assert_eq!(
                reg.record_message(&cal),
                RecordOutcome::Recorded {
                    created: false,
                    unread: i
                }
            );
        }

        // Focus moves; the previous session keeps its zero.
        reg.focus("im-C3").unwrap();
        assert_eq!(reg.get("im-C3").unwrap().unread_count, 0);
        assert_eq!(reg.get("im-B2").unwrap().unread_count, 0);
        reg.record_message(&bea);
        assert_eq!(reg.get("im-B2").unwrap().unread_count, 1);
    }

    #[test]
    fn closing_focused_session_refocuses_local_chat() {
        let mut reg = SessionRegistry::new();
        reg.ensure_open(&SessionDescriptor::group("G1", "Builders"));
        reg.focus("group-G1").unwrap();
        reg.close("group-G1").unwrap();
        assert_eq!(reg.focused(), LOCAL_CHAT_ID);
    }

    #[test]
    fn local_chat_cannot_be_closed_or_cleared() {
        let mut reg = SessionRegistry::new();
        assert!(matches!(
            reg.close(LOCAL_CHAT_ID),
            Err(SyncError::Rejected(_))
        ));
        reg.ensure_open(&SessionDescriptor::im("B2", "Bea"));
        reg.clear_all();
        assert_eq!(reg.len(), 1);
        assert!(reg.get(LOCAL_CHAT_ID).is_some());
    }

    #[test]
    fn unknown_sessions_are_not_found() {
        let mut reg = SessionRegistry::new();
        assert!(matches!(reg.focus("im-nobody"), Err(SyncError::NotFound(_))));
        assert!(matches!(reg.close("im-nobody"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn load_recent_respects_suppression() {
        let mut reg = SessionRegistry::new();
        reg.ensure_open(&SessionDescriptor::group("G1", "Builders"));
        reg.close("group-G1").unwrap();
        let created = reg.load_recent(&[
            SessionDescriptor::group("G1", "Builders"),
            SessionDescriptor::group("G2", "Sailors").at(50),
            SessionDescriptor::im("B2", "Bea"),
        ]);
        assert_eq!(created, 2);
        assert!(reg.get("group-G1").is_none());
        assert_eq!(reg.get("group-G2").unwrap().last_activity, 50);
    }

    #[test]
    fn explicit_open_lifts_suppression() {
        let mut reg = SessionRegistry::new();
        let d = SessionDescriptor::group("G1", "Builders");
        reg.ensure_open(&d);
        reg.close("group-G1").unwrap();
        assert_eq!(reg.open_explicit(&d), EnsureOutcome::Created);
        assert!(!reg.is_suppressed("group-G1"));
    }

    #[test]
    fn clear_closed_groups_allows_reopen_without_dropping_tabs() {
        let mut reg = SessionRegistry::new();
        reg.ensure_open(&SessionDescriptor::im("B2", "Bea"));
        reg.ensure_open(&SessionDescriptor::group("G1", "Builders"));
        reg.close("group-G1").unwrap();
        reg.clear_closed_groups();
        assert!(reg.get("im-B2").is_some());
        assert_eq!(
            reg.ensure_open(&SessionDescriptor::group("G1", "Builders")),
            EnsureOutcome::Created
        );
    }
}
