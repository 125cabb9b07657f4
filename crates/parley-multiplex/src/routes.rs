//! Session and conversation routing tables
//!
//! Inbound envelopes carry only a session id; these tables map them back to
//! the conversation and project that own them.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SessionRoutes {
    /// conversation id -> owning project path
    owners: HashMap<String, String>,
    /// session id -> conversation id
    sessions: HashMap<String, String>,
}

impl SessionRoutes {
    pub fn bind_conversation(&mut self, conversation_id: &str, project_path: &str) {
        self.owners
            .insert(conversation_id.to_string(), project_path.to_string());
    }

    pub fn bind_session(&mut self, session_id: &str, conversation_id: &str) {
        self.sessions
            .insert(session_id.to_string(), conversation_id.to_string());
    }

    pub fn conversation_for(&self, session_id: &str) -> Option<&str> {
        self.sessions.get(session_id).map(String::as_str)
    }

    pub fn project_for_conversation(&self, conversation_id: &str) -> Option<&str> {
        self.owners.get(conversation_id).map(String::as_str)
    }

    pub fn project_for_session(&self, session_id: &str) -> Option<&str> {
        self.conversation_for(session_id)
            .and_then(|conv| self.project_for_conversation(conv))
    }

    pub fn unbind_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Drop everything owned by a project; returns the session ids that
    /// were routed to it.
    pub fn unbind_project(&mut self, project_path: &str) -> Vec<String> {
        let conversations: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, p)| p.as_str() == project_path)
            .map(|(c, _)| c.clone())
            .collect();
        for conv in &conversations {
            self.owners.remove(conv);
        }
        let sessions: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, c)| conversations.contains(c))
            .map(|(s, _)| s.clone())
            .collect();
        for session in &sessions {
            self.sessions.remove(session);
        }
        sessions
    }
}
