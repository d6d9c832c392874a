//! Session book — the coordinator's record of every session it opened.

use std::collections::HashMap;

use super::PaymentSession;

#[derive(Debug, Default)]
pub struct SessionBook {
    sessions: HashMap<String, PaymentSession>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: PaymentSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<&PaymentSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PaymentSession> {
        self.sessions.get_mut(id)
    }

    /// Snapshot of all sessions, oldest first.
    pub fn list(&self) -> Vec<PaymentSession> {
        let mut all: Vec<PaymentSession> = self.sessions.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
