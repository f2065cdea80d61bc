use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::prompt::{parse_prompt_text, serialize_prompt, StructuredPrompt};

/// One editing session: the flat text and the structured record, kept in
/// sync so the UI can edit either representation. The codec stays stateless;
/// this is where the "which view drives which" rule lives.
#[derive(Debug, Clone)]
pub struct PromptSession {
    pub flat_text: String,
    pub record: StructuredPrompt,
}

impl PromptSession {
    pub fn new() -> Self {
        PromptSession {
            flat_text: String::new(),
            record: StructuredPrompt::empty(),
        }
    }

    /// Replaces both views with a generated record; the flat text becomes
    /// the record's canonical form.
    pub fn adopt_record(&mut self, record: StructuredPrompt) {
        self.flat_text = serialize_prompt(&record);
        self.record = record;
    }

    /// A flat-text edit: the text is kept verbatim and the record is
    /// re-derived from it. When nothing decomposes into fields the text
    /// still stands on its own, so we keep it and show the empty record
    /// rather than failing. Returns whether any field matched.
    pub fn apply_text_edit(&mut self, text: String) -> bool {
        let record = parse_prompt_text(&text);
        let matched = !record.is_empty() || text.trim().is_empty();
        self.record = record;
        self.flat_text = text;
        matched
    }

    /// A single-field edit: whole-field replacement into a new record, then
    /// the flat text is re-serialized to the canonical form. `None` for a
    /// field outside the schema.
    pub fn apply_field_edit(&mut self, identifier: &str, value: String) -> Option<()> {
        let record = self.record.with_field(identifier, value)?;
        self.flat_text = serialize_prompt(&record);
        self.record = record;
        Some(())
    }
}

impl Default for PromptSession {
    fn default() -> Self {
        Self::new()
    }
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_session_id() -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{}", Utc::now().timestamp_micros(), seq)
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<Mutex<HashMap<String, PromptSession>>>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_session(&self) -> (String, PromptSession) {
        let id = next_session_id();
        let session = PromptSession::new();
        self.sessions.lock().insert(id.clone(), session.clone());
        (id, session)
    }

    pub fn insert_session(&self, session: PromptSession) -> String {
        let id = next_session_id();
        self.sessions.lock().insert(id.clone(), session);
        id
    }

    pub fn get_session(&self, id: &str) -> Option<PromptSession> {
        self.sessions.lock().get(id).cloned()
    }

    /// Runs a closure against one session under the lock, or `None` when the
    /// session does not exist.
    pub fn with_session<T>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut PromptSession) -> T,
    ) -> Option<T> {
        self.sessions.lock().get_mut(id).map(apply)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_edit_re_derives_the_record() {
        let mut session = PromptSession::new();
        let matched = session.apply_text_edit("Subject: a red fox\nMood: whimsical".to_string());
        assert!(matched);
        assert_eq!(session.record.get("subject"), Some("a red fox"));
        assert_eq!(session.record.get("mood"), Some("whimsical"));
    }

    #[test]
    fn unparseable_text_keeps_the_flat_text_and_falls_back_to_empty() {
        let mut session = PromptSession::new();
        let matched = session.apply_text_edit("free-form prose with no labels".to_string());
        assert!(!matched);
        assert_eq!(session.flat_text, "free-form prose with no labels");
        assert_eq!(session.record, StructuredPrompt::empty());
    }

    #[test]
    fn blank_text_edit_counts_as_matched() {
        let mut session = PromptSession::new();
        assert!(session.apply_text_edit("   \n".to_string()));
        assert!(session.record.is_empty());
    }

    #[test]
    fn field_edit_re_serializes_the_canonical_text() {
        let mut session = PromptSession::new();
        session.apply_text_edit("Subject: cat".to_string());
        session
            .apply_field_edit("lighting", "soft window light".to_string())
            .unwrap();
        assert_eq!(
            session.flat_text,
            "Subject: cat\nLighting: soft window light"
        );
    }

    #[test]
    fn field_edit_rejects_unknown_fields() {
        let mut session = PromptSession::new();
        assert!(session.apply_field_edit("camera", "35mm".to_string()).is_none());
    }

    #[test]
    fn adopting_a_record_canonicalizes_the_text() {
        let mut session = PromptSession::new();
        session.apply_text_edit("whatever came before".to_string());
        let record = StructuredPrompt::empty()
            .with_field("subject", "a lighthouse")
            .unwrap();
        session.adopt_record(record.clone());
        assert_eq!(session.flat_text, "Subject: a lighthouse");
        assert_eq!(session.record, record);
    }

    #[test]
    fn sessions_are_isolated_per_id() {
        let state = AppState::new();
        let (first, _) = state.create_session();
        let (second, _) = state.create_session();
        assert_ne!(first, second);

        state
            .with_session(&first, |session| {
                session.apply_text_edit("Subject: cat".to_string())
            })
            .unwrap();
        assert_eq!(
            state.get_session(&second).unwrap().record,
            StructuredPrompt::empty()
        );
    }
}
