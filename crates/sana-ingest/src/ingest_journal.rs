//! Conversation journal behind the dashboard's chat list.
//!
//! Records every answered exchange and every message left waiting for a
//! human, with rolling response-time stats. Persists as a single JSON
//! document written atomically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use sana_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::ingest_contract::bare_sender_id;

pub const JOURNAL_SCHEMA_VERSION: u32 = 1;

/// Response-time samples retained for stats.
pub const RESPONSE_TIME_SAMPLE_CAP: usize = 1_000;

/// Samples averaged for the dashboard's response-time figure.
const RESPONSE_TIME_AVERAGE_WINDOW: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalMessage {
    pub message_id: String,
    pub content: String,
    pub timestamp_ms: u64,
    pub from_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalConversation {
    pub conversation_id: String,
    pub sender: String,
    pub sender_display: String,
    pub messages: Vec<JournalMessage>,
    pub first_timestamp_ms: u64,
    pub last_timestamp_ms: u64,
    pub last_message: String,
    #[serde(default)]
    pub unanswered_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalStats {
    pub total_messages: u64,
    pub total_conversations: u64,
    pub unique_senders: u64,
    pub average_response_time_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalState {
    conversations: Vec<JournalConversation>,
    response_times_ms: Vec<u64>,
    total_messages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    schema_version: u32,
    saved_at_ms: u64,
    #[serde(flatten)]
    state: JournalState,
}

#[derive(Debug, Default)]
pub struct ConversationJournal {
    inner: Mutex<JournalState>,
}

impl ConversationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an answered user message and the bot's reply to the sender's
    /// conversation, creating the conversation on first sight.
    pub fn record_exchange(
        &self,
        sender: &str,
        sender_display: &str,
        message: &str,
        response: &str,
        response_time_ms: u64,
        now_ms: u64,
    ) {
        let mut state = self.lock_state();
        let conversation = resolve_conversation(&mut state.conversations, sender, sender_display);
        append_message(conversation, message, now_ms, true);
        append_message(conversation, response, now_ms, false);
        conversation.last_message = message.to_string();
        conversation.last_timestamp_ms = now_ms;

        state.total_messages = state.total_messages.saturating_add(1);
        state.response_times_ms.push(response_time_ms);
        if state.response_times_ms.len() > RESPONSE_TIME_SAMPLE_CAP {
            let excess = state.response_times_ms.len() - RESPONSE_TIME_SAMPLE_CAP;
            state.response_times_ms.drain(..excess);
        }
    }

    /// Appends a message that the muted bot did not answer and bumps the
    /// sender's unanswered count. Returns the new count.
    pub fn record_unanswered(
        &self,
        sender: &str,
        sender_display: &str,
        message: &str,
        now_ms: u64,
    ) -> u32 {
        let mut state = self.lock_state();
        let conversation = resolve_conversation(&mut state.conversations, sender, sender_display);
        conversation.unanswered_count = conversation.unanswered_count.saturating_add(1);
        let count = conversation.unanswered_count;
        append_message(conversation, message, now_ms, true);
        append_message(
            conversation,
            &format!("[Awaiting manual response from support ({count} unanswered)]"),
            now_ms,
            false,
        );
        conversation.last_message = message.to_string();
        conversation.last_timestamp_ms = now_ms;
        state.total_messages = state.total_messages.saturating_add(1);
        count
    }

    /// Resets the unanswered count once an operator has replied.
    pub fn clear_unanswered(&self, sender: &str) {
        let mut state = self.lock_state();
        if let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|conversation| conversation.sender == sender)
        {
            conversation.unanswered_count = 0;
        }
    }

    pub fn unanswered_count(&self, sender: &str) -> u32 {
        self.lock_state()
            .conversations
            .iter()
            .find(|conversation| conversation.sender == sender)
            .map(|conversation| conversation.unanswered_count)
            .unwrap_or(0)
    }

    /// All conversations, newest activity first.
    pub fn conversations(&self) -> Vec<JournalConversation> {
        let state = self.lock_state();
        let mut rows = state.conversations.clone();
        rows.sort_by(|left, right| right.last_timestamp_ms.cmp(&left.last_timestamp_ms));
        rows
    }

    pub fn stats(&self) -> JournalStats {
        let state = self.lock_state();
        let recent = state
            .response_times_ms
            .iter()
            .rev()
            .take(RESPONSE_TIME_AVERAGE_WINDOW)
            .copied()
            .collect::<Vec<u64>>();
        let average = if recent.is_empty() {
            0
        } else {
            recent.iter().sum::<u64>() / recent.len() as u64
        };
        JournalStats {
            total_messages: state.total_messages,
            total_conversations: state.conversations.len() as u64,
            unique_senders: state.conversations.len() as u64,
            average_response_time_ms: average,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = {
            let state = self.lock_state();
            let file = JournalFile {
                schema_version: JOURNAL_SCHEMA_VERSION,
                saved_at_ms: current_unix_timestamp_ms(),
                state: JournalState {
                    conversations: state.conversations.clone(),
                    response_times_ms: state.response_times_ms.clone(),
                    total_messages: state.total_messages,
                },
            };
            serde_json::to_string_pretty(&file).context("failed to encode journal")?
        };
        write_text_atomic(path, &rendered)
            .with_context(|| format!("failed to write journal {}", path.display()))
    }

    /// Missing file yields a fresh journal; a corrupt file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read journal {}", path.display()))?;
        let file = serde_json::from_str::<JournalFile>(&raw)
            .with_context(|| format!("failed to parse journal {}", path.display()))?;
        if file.schema_version != JOURNAL_SCHEMA_VERSION {
            bail!(
                "journal {} has unsupported schema_version {} (expected {})",
                path.display(),
                file.schema_version,
                JOURNAL_SCHEMA_VERSION
            );
        }
        Ok(Self {
            inner: Mutex::new(file.state),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, JournalState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn resolve_conversation<'a>(
    conversations: &'a mut Vec<JournalConversation>,
    sender: &str,
    sender_display: &str,
) -> &'a mut JournalConversation {
    if let Some(position) = conversations
        .iter()
        .position(|conversation| conversation.sender == sender)
    {
        return &mut conversations[position];
    }
    let bare = bare_sender_id(sender);
    conversations.push(JournalConversation {
        conversation_id: format!("conv-{bare}"),
        sender: sender.to_string(),
        sender_display: if sender_display.trim().is_empty() {
            bare
        } else {
            sender_display.trim().to_string()
        },
        messages: Vec::new(),
        first_timestamp_ms: 0,
        last_timestamp_ms: 0,
        last_message: String::new(),
        unanswered_count: 0,
    });
    conversations
        .last_mut()
        .expect("conversation was just pushed")
}

fn append_message(
    conversation: &mut JournalConversation,
    content: &str,
    timestamp_ms: u64,
    from_user: bool,
) {
    let sequence = conversation.messages.len() + 1;
    if conversation.first_timestamp_ms == 0 {
        conversation.first_timestamp_ms = timestamp_ms;
    }
    conversation.messages.push(JournalMessage {
        message_id: format!("{}-{}", conversation.conversation_id, sequence),
        content: content.to_string(),
        timestamp_ms,
        from_user,
    });
}
