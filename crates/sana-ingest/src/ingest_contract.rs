//! Inbound chat event contract and fingerprint derivation.
//!
//! Relay adapters normalize provider payloads into [`InboundChatEvent`]
//! before anything else touches them. Parsing and validation failures are
//! surfaced with reason codes so operators can trace malformed ingress.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of leading text characters mixed into an event fingerprint.
///
/// The excerpt guards against transports that recycle message identifiers
/// across distinct payloads.
pub const EVENT_FINGERPRINT_TEXT_CHARS: usize = 20;

/// Number of leading response characters mixed into a response fingerprint.
pub const RESPONSE_FINGERPRINT_TEXT_CHARS: usize = 30;

/// Characters of payload text retained next to a cache entry for diagnostics.
pub const PAYLOAD_DIGEST_CHARS: usize = 32;

const FINGERPRINT_HEX_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Reason codes attached to inbound event parse/validation failures.
pub enum IngestEventReasonCode {
    InvalidJson,
    MissingEventId,
    MissingSender,
    MissingText,
    InvalidTimestamp,
}

impl IngestEventReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingEventId => "missing_event_id",
            Self::MissingSender => "missing_sender",
            Self::MissingText => "missing_text",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEventError {
    pub code: IngestEventReasonCode,
    pub message: String,
}

impl Display for IngestEventError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for IngestEventError {}

fn event_error(code: IngestEventReasonCode, message: impl Into<String>) -> IngestEventError {
    IngestEventError {
        code,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One inbound chat message, normalized from whatever the relay received.
pub struct InboundChatEvent {
    pub event_id: String,
    /// Stable conversation identifier; may carry a transport suffix.
    pub sender: String,
    #[serde(default)]
    pub sender_display: String,
    #[serde(default)]
    pub text: String,
    pub received_at_ms: u64,
}

impl InboundChatEvent {
    /// Display name with the bare sender id as fallback, mirroring how the
    /// dashboard labels conversations without a profile name.
    pub fn display_name(&self) -> String {
        if self.sender_display.trim().is_empty() {
            bare_sender_id(&self.sender)
        } else {
            self.sender_display.trim().to_string()
        }
    }
}

/// Strips any `@…` transport suffix from a raw sender identifier.
pub fn bare_sender_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((bare, _)) => bare.to_string(),
        None => trimmed.to_string(),
    }
}

pub fn parse_inbound_chat_event(raw: &str) -> Result<InboundChatEvent, IngestEventError> {
    let event = serde_json::from_str::<InboundChatEvent>(raw)
        .map_err(|error| event_error(IngestEventReasonCode::InvalidJson, error.to_string()))?;
    validate_inbound_chat_event(&event)?;
    Ok(event)
}

pub fn validate_inbound_chat_event(event: &InboundChatEvent) -> Result<(), IngestEventError> {
    if event.event_id.trim().is_empty() {
        return Err(event_error(
            IngestEventReasonCode::MissingEventId,
            "event_id cannot be empty",
        ));
    }
    if event.sender.trim().is_empty() {
        return Err(event_error(
            IngestEventReasonCode::MissingSender,
            "sender cannot be empty",
        ));
    }
    if event.text.trim().is_empty() {
        return Err(event_error(
            IngestEventReasonCode::MissingText,
            "text cannot be empty",
        ));
    }
    if event.received_at_ms == 0 {
        return Err(event_error(
            IngestEventReasonCode::InvalidTimestamp,
            "received_at_ms must be greater than 0",
        ));
    }
    Ok(())
}

/// Dedup key for an inbound event: stable id plus sender plus a text excerpt.
pub fn event_fingerprint(event: &InboundChatEvent) -> String {
    truncated_sha256_hex(&[
        event.event_id.trim(),
        event.sender.trim(),
        text_prefix(&event.text, EVENT_FINGERPRINT_TEXT_CHARS),
    ])
}

/// Dedup key for an outbound reply candidate.
pub fn response_fingerprint(recipient: &str, text: &str) -> String {
    truncated_sha256_hex(&[
        recipient.trim(),
        text_prefix(text, RESPONSE_FINGERPRINT_TEXT_CHARS),
    ])
}

/// Short plain-text excerpt stored alongside cache entries for diagnostics.
pub fn payload_digest(text: &str) -> String {
    text_prefix(text.trim(), PAYLOAD_DIGEST_CHARS).to_string()
}

fn truncated_sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let mut rendered = format!("{:x}", hasher.finalize());
    rendered.truncate(FINGERPRINT_HEX_CHARS);
    rendered
}

fn text_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        bare_sender_id, event_fingerprint, parse_inbound_chat_event, payload_digest,
        response_fingerprint, validate_inbound_chat_event, InboundChatEvent,
        IngestEventReasonCode, PAYLOAD_DIGEST_CHARS,
    };

    fn sample_event() -> InboundChatEvent {
        InboundChatEvent {
            event_id: "evt-1".to_string(),
            sender: "6281234567890@s.whatsapp.net".to_string(),
            sender_display: "Ana".to_string(),
            text: "hello there".to_string(),
            received_at_ms: 1_760_100_000_000,
        }
    }

    #[test]
    fn unit_parse_inbound_chat_event_maps_expected_fields() {
        let raw = r#"{
  "event_id": "evt-9",
  "sender": "628111@s.whatsapp.net",
  "sender_display": "Budi",
  "text": "selamat pagi",
  "received_at_ms": 1760100000000
}"#;
        let event = parse_inbound_chat_event(raw).expect("event should parse");
        assert_eq!(event.event_id, "evt-9");
        assert_eq!(event.sender, "628111@s.whatsapp.net");
        assert_eq!(event.display_name(), "Budi");
    }

    #[test]
    fn unit_display_name_falls_back_to_bare_sender_id() {
        let mut event = sample_event();
        event.sender_display = "  ".to_string();
        assert_eq!(event.display_name(), "6281234567890");
        assert_eq!(bare_sender_id("no-suffix"), "no-suffix");
    }

    #[test]
    fn unit_validate_rejects_blank_required_fields() {
        let mut event = sample_event();
        event.sender = " ".to_string();
        let error = validate_inbound_chat_event(&event).expect_err("blank sender should fail");
        assert_eq!(error.code, IngestEventReasonCode::MissingSender);

        let mut event = sample_event();
        event.text = String::new();
        let error = validate_inbound_chat_event(&event).expect_err("blank text should fail");
        assert_eq!(error.code, IngestEventReasonCode::MissingText);

        let mut event = sample_event();
        event.received_at_ms = 0;
        let error = validate_inbound_chat_event(&event).expect_err("zero timestamp should fail");
        assert_eq!(error.code, IngestEventReasonCode::InvalidTimestamp);
    }

    #[test]
    fn regression_parse_rejects_invalid_json_with_reason_code() {
        let error = parse_inbound_chat_event("{not json").expect_err("should fail");
        assert_eq!(error.code, IngestEventReasonCode::InvalidJson);
    }

    #[test]
    fn functional_event_fingerprint_is_stable_across_reserialization() {
        let event = sample_event();
        let serialized = serde_json::to_string(&event).expect("serialize");
        let reparsed = parse_inbound_chat_event(&serialized).expect("reparse");
        assert_eq!(event_fingerprint(&event), event_fingerprint(&reparsed));
    }

    #[test]
    fn functional_event_fingerprint_distinguishes_reused_event_ids() {
        let first = sample_event();
        let mut second = sample_event();
        second.text = "a completely different question".to_string();
        assert_ne!(event_fingerprint(&first), event_fingerprint(&second));
    }

    #[test]
    fn unit_fingerprints_ignore_text_beyond_the_excerpt() {
        let mut long_a = sample_event();
        let mut long_b = sample_event();
        long_a.text = format!("{}{}", "x".repeat(20), "tail one");
        long_b.text = format!("{}{}", "x".repeat(20), "tail two");
        assert_eq!(event_fingerprint(&long_a), event_fingerprint(&long_b));
        assert_eq!(
            response_fingerprint("a", &"y".repeat(40)),
            response_fingerprint("a", &format!("{}{}", "y".repeat(30), "zzz"))
        );
    }

    #[test]
    fn regression_fingerprint_helpers_respect_multibyte_boundaries() {
        let mut event = sample_event();
        event.text = "héllo wörld with ünïcode characters beyond the excerpt".to_string();
        // Must not panic slicing inside a multibyte char.
        let _ = event_fingerprint(&event);
        let digest = payload_digest(&event.text);
        assert!(digest.chars().count() <= PAYLOAD_DIGEST_CHARS);
    }
}
