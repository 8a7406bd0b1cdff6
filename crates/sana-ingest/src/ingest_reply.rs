//! Reply-generation collaborator seam.
//!
//! The upstream reasoning service lives behind [`ReplyGenerator`]; the gate
//! only sees the three-way decision it returns. Implementations are expected
//! to be slow out-of-process calls, so nothing here may be invoked while a
//! lock is held.

use async_trait::async_trait;
use thiserror::Error;

use crate::ingest_contract::InboundChatEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Conversation context handed to the reply collaborator.
pub struct ReplyContext {
    pub sender: String,
    pub sender_display: String,
    pub text: String,
    pub received_at_ms: u64,
}

impl ReplyContext {
    pub fn from_event(event: &InboundChatEvent) -> Self {
        Self {
            sender: event.sender.clone(),
            sender_display: event.display_name(),
            text: event.text.clone(),
            received_at_ms: event.received_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDecision {
    /// A reply to send verbatim.
    Text(String),
    /// The bot is muted for this conversation; a human will answer.
    ChannelDisabled,
    /// The upstream produced nothing worth sending.
    Empty,
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply upstream unavailable: {0}")]
    Unavailable(String),
    #[error("reply upstream returned malformed output: {0}")]
    Malformed(String),
}

impl ReplyError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "reply_upstream_unavailable",
            Self::Malformed(_) => "reply_upstream_malformed",
        }
    }
}

#[async_trait]
/// Trait contract for reply generation collaborators.
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, context: ReplyContext) -> Result<ReplyDecision, ReplyError>;
}

#[cfg(test)]
mod tests {
    use super::{ReplyContext, ReplyError};
    use crate::ingest_contract::InboundChatEvent;

    #[test]
    fn unit_reply_context_uses_display_name_fallback() {
        let context = ReplyContext::from_event(&InboundChatEvent {
            event_id: "evt-1".to_string(),
            sender: "628555@s.whatsapp.net".to_string(),
            sender_display: String::new(),
            text: "halo".to_string(),
            received_at_ms: 7,
        });
        assert_eq!(context.sender_display, "628555");
        assert_eq!(context.text, "halo");
    }

    #[test]
    fn unit_reply_error_reason_codes_are_stable() {
        assert_eq!(
            ReplyError::Unavailable("timeout".to_string()).reason_code(),
            "reply_upstream_unavailable"
        );
        assert_eq!(
            ReplyError::Malformed("not json".to_string()).reason_code(),
            "reply_upstream_malformed"
        );
    }
}
