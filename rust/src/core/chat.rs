// Per-session message logs and inbound message classification.

use std::collections::{HashMap, VecDeque};

use super::sessions::SessionDescriptor;
use crate::protocol::ChatMessagePayload;
use crate::state::{DeliveryState, SessionKind};

const PERSONAL_NARRATIVE_PREFIXES: &[&str] = &["/me ", "/me'"];

/// True for "/me waves" style bodies, which render without the ": " separator.
pub fn is_personal_narrative(body: &str) -> bool {
    body == "/me"
        || PERSONAL_NARRATIVE_PREFIXES
            .iter()
            .any(|prefix| body.starts_with(prefix))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub local_id: String,
    pub session_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub timestamp: i64,
    pub chat_type: String,
    pub is_mine: bool,
    pub delivery: DeliveryState,
    /// Set on optimistic local copies until the hub echoes them back.
    pub awaiting_echo: bool,
}

impl ChatMessage {
    pub fn from_payload(p: &ChatMessagePayload, session_id: &str, own_account_id: &str) -> Self {
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender_id: p.sender_id.clone(),
            sender_name: p.sender_name.clone(),
            body: p.message.clone(),
            timestamp: p.timestamp,
            chat_type: p.chat_type.clone(),
            is_mine: !own_account_id.is_empty() && p.sender_id == own_account_id,
            delivery: DeliveryState::Sent,
            awaiting_echo: false,
        }
    }

    /// Optimistic copy of a message we are about to send.
    pub fn outgoing(
        session_id: &str,
        sender_id: &str,
        sender_name: &str,
        body: &str,
        chat_type: &str,
        timestamp: i64,
    ) -> Self {
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            body: body.to_string(),
            timestamp,
            chat_type: chat_type.to_string(),
            is_mine: true,
            delivery: DeliveryState::Pending,
            awaiting_echo: true,
        }
    }

    pub fn is_personal_narrative(&self) -> bool {
        is_personal_narrative(&self.body)
    }

    fn same_content(&self, other: &ChatMessage) -> bool {
        self.sender_id == other.sender_id
            && self.body == other.body
            && self.timestamp == other.timestamp
    }
}

/// Works out which session an inbound message belongs to.
pub fn descriptor_for_message(p: &ChatMessagePayload, own_account_id: &str) -> SessionDescriptor {
    let kind = kind_for_message(&p.chat_type, p.session_id.as_deref());
    let from_me = !own_account_id.is_empty() && p.sender_id == own_account_id;
    let session_name = p
        .session_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let target = p
        .target_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let descriptor = match kind {
        SessionKind::Local => SessionDescriptor::local(),
        SessionKind::Im => {
            let peer = if from_me {
                target.unwrap_or(p.sender_id.as_str())
            } else {
                p.sender_id.as_str()
            };
            let name = session_name.unwrap_or(if from_me {
                peer
            } else {
                p.sender_name.as_str()
            });
            SessionDescriptor::im(peer, name)
        }
        SessionKind::Group => {
            let group = target
                .or_else(|| {
                    p.session_id
                        .as_deref()
                        .and_then(|s| s.strip_prefix("group-"))
                })
                .unwrap_or(p.sender_id.as_str());
            SessionDescriptor::group(group, session_name.unwrap_or(group))
        }
    };
    descriptor.at(p.timestamp)
}

fn kind_for_message(chat_type: &str, session_id: Option<&str>) -> SessionKind {
    match chat_type.trim().to_ascii_lowercase().as_str() {
        "im" | "instantmessage" | "instant_message" => return SessionKind::Im,
        "group" | "groupim" | "group_im" | "groupchat" => return SessionKind::Group,
        _ => {}
    }
    match session_id {
        Some(id) if id.starts_with("im-") => SessionKind::Im,
        Some(id) if id.starts_with("group-") => SessionKind::Group,
        _ => SessionKind::Local,
    }
}

/// Bounded logs keyed by session id. History pages are fetched from the
/// server; nothing older than `cap` is kept locally.
#[derive(Debug)]
pub struct MessageLogs {
    cap: usize,
    logs: HashMap<String, VecDeque<ChatMessage>>,
    history_loaded: HashMap<String, u32>,
    history_total: HashMap<String, u32>,
}

impl MessageLogs {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            logs: HashMap::new(),
            history_loaded: HashMap::new(),
            history_total: HashMap::new(),
        }
    }

    pub fn messages(&self, session_id: &str) -> impl Iterator<Item = &ChatMessage> {
        self.logs.get(session_id).into_iter().flat_map(|log| log.iter())
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.logs.get(session_id).map(|l| l.len()).unwrap_or(0)
    }

    pub fn append(&mut self, msg: ChatMessage) {
        let log = self.logs.entry(msg.session_id.clone()).or_default();
        log.push_back(msg);
        while log.len() > self.cap {
            log.pop_front();
        }
    }

    /// Matches an inbound echo of our own message against an optimistic local copy.
    pub fn confirm_echo(&mut self, incoming: &ChatMessage) -> bool {
        let Some(log) = self.logs.get_mut(&incoming.session_id) else {
            return false;
        };
        let pending = log
            .iter_mut()
            .find(|m| m.is_mine && m.awaiting_echo && m.body == incoming.body);
        match pending {
            Some(m) => {
                m.awaiting_echo = false;
                m.delivery = DeliveryState::Sent;
                m.timestamp = incoming.timestamp;
                m.sender_name = incoming.sender_name.clone();
                true
            }
            None => false,
        }
    }

    /// Updates delivery of a local copy. Returns false when it has been evicted.
    pub fn set_delivery(
        &mut self,
        session_id: &str,
        local_id: &str,
        delivery: DeliveryState,
    ) -> bool {
        match self
            .logs
            .get_mut(session_id)
            .and_then(|log| log.iter_mut().find(|m| m.local_id == local_id))
        {
            Some(m) => {
                m.delivery = delivery;
                true
            }
            None => false,
        }
    }

    /// Merges a history page (oldest first) in front of the live log, skipping duplicates.
    pub fn merge_history(
        &mut self,
        session_id: &str,
        page: Vec<ChatMessage>,
        total: Option<u32>,
    ) -> usize {
        let page_len = page.len() as u32;
        let log = self.logs.entry(session_id.to_string()).or_default();
        let fresh: Vec<ChatMessage> = page
            .into_iter()
            .filter(|m| !log.iter().any(|existing| existing.same_content(m)))
            .collect();
        let added = fresh.len();

        let mut merged: Vec<ChatMessage> = fresh;
        merged.extend(log.drain(..));
        merged.sort_by_key(|m| m.timestamp);
        let overflow = merged.len().saturating_sub(self.cap);
        log.extend(merged.into_iter().skip(overflow));

        *self.history_loaded.entry(session_id.to_string()).or_default() += page_len;
        if let Some(total) = total {
            self.history_total.insert(session_id.to_string(), total);
        } else if page_len == 0 {
            let loaded = self.history_loaded(session_id);
            self.history_total.insert(session_id.to_string(), loaded);
        }
        added
    }

    /// Offset for the next history page request.
    pub fn history_loaded(&self, session_id: &str) -> u32 {
        self.history_loaded.get(session_id).copied().unwrap_or(0)
    }

    pub fn can_load_older(&self, session_id: &str) -> bool {
        match self.history_total.get(session_id) {
            Some(total) => self.history_loaded(session_id) < *total,
            None => true,
        }
    }

    pub fn remove(&mut self, session_id: &str) {
        self.logs.remove(session_id);
        self.history_loaded.remove(session_id);
        self.history_total.remove(session_id);
    }

    pub fn clear(&mut self) {
        self.logs.clear();
        self.history_loaded.clear();
        self.history_total.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(chat_type: &str, sender: &str, message: &str, ts: i64) -> ChatMessagePayload {
        ChatMessagePayload {
            account_id: "A1".into(),
            session_id: None,
            session_name: None,
            chat_type: chat_type.into(),
            sender_id: sender.into(),
            sender_name: format!("{sender} Resident"),
            target_id: None,
            message: message.into(),
            timestamp: ts,
        }
    }

    #[test]
    fn personal_narrative_prefixes() {
        assert!(is_personal_narrative("/me waves"));
        assert!(is_personal_narrative("/me's hat falls off"));
        assert!(is_personal_narrative("/me"));
        assert!(!is_personal_narrative("hello"));
        assert!(!is_personal_narrative("/meow"));
    }

    #[test]
    fn im_from_peer_keys_on_sender() {
        let d = descriptor_for_message(&payload("IM", "B2", "hi", 10), "A1");
        assert_eq!(d.kind, SessionKind::Im);
        assert_eq!(d.session_id(), "im-B2");
        assert_eq!(d.name, "B2 Resident");
        assert_eq!(d.last_activity, 10);
    }

    #[test]
    fn im_echo_from_self_keys_on_target() {
        let mut p = payload("IM", "A1", "hi", 10);
        p.target_id = Some("B2".into());
        let d = descriptor_for_message(&p, "A1");
        assert_eq!(d.session_id(), "im-B2");
    }

    #[test]
    fn group_uses_target_or_session_id() {
        let mut p = payload("Group", "B2", "hi", 10);
        p.target_id = Some("G1".into());
        p.session_name = Some("Builders".into());
        let d = descriptor_for_message(&p, "A1");
        assert_eq!(d.session_id(), "group-G1");
        assert_eq!(d.name, "Builders");

        let mut p = payload("", "B2", "hi", 10);
        p.session_id = Some("group-G7".into());
        assert_eq!(descriptor_for_message(&p, "A1").session_id(), "group-G7");
    }

    #[test]
    fn normal_chat_goes_to_local() {
        let d = descriptor_for_message(&payload("Normal", "B2", "hi", 10), "A1");
        assert_eq!(d.session_id(), "local-chat");
    }

    #[test]
    fn log_is_bounded() {
        let mut logs = MessageLogs::new(3);
        for i in 0..5 {
            let p = payload("Normal", "B2", &format!("m{i}"), i);
            logs.append(ChatMessage::from_payload(&p, "local-chat", "A1"));
        }
        let bodies: Vec<&str> = logs.messages("local-chat").map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn history_merge_skips_duplicates_and_orders_by_time() {
        let mut logs = MessageLogs::new(50);
        let live = ChatMessage::from_payload(&payload("IM", "B2", "latest", 30), "im-B2", "A1");
        logs.append(live.clone());

        let page = vec![
            ChatMessage::from_payload(&payload("IM", "B2", "first", 10), "im-B2", "A1"),
            ChatMessage::from_payload(&payload("IM", "A1", "second", 20), "im-B2", "A1"),
            ChatMessage::from_payload(&payload("IM", "B2", "latest", 30), "im-B2", "A1"),
        ];
        assert_eq!(logs.merge_history("im-B2", page, Some(3)), 2);
        let bodies: Vec<&str> = logs.messages("im-B2").map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second", "latest"]);
        assert!(logs.messages("im-B2").nth(1).unwrap().is_mine);
        assert_eq!(logs.history_loaded("im-B2"), 3);
        assert!(!logs.can_load_older("im-B2"));
    }

    #[test]
    fn echo_confirms_pending_copy() {
        let mut logs = MessageLogs::new(10);
        let mine = ChatMessage::outgoing("local-chat", "A1", "Ada", "hello", "Normal", 0);
        let local_id = mine.local_id.clone();
        logs.append(mine);
        // Hub accepted the send before the echo arrived.
        assert!(logs.set_delivery("local-chat", &local_id, DeliveryState::Sent));

        let echo =
            ChatMessage::from_payload(&payload("Normal", "A1", "hello", 42), "local-chat", "A1");
        assert!(logs.confirm_echo(&echo));
        assert!(!logs.confirm_echo(&echo));
        let stored = logs.messages("local-chat").next().unwrap();
        assert_eq!(stored.delivery, DeliveryState::Sent);
        assert_eq!(stored.timestamp, 42);
        assert_eq!(logs.len("local-chat"), 1);
    }
}
