//! Idempotent ingestion gate.
//!
//! Consumes inbound chat events, suppresses duplicates through the
//! fingerprint caches, asks the reply collaborator for a decision, and
//! dispatches at most one delivery per unique (sender, response) pair within
//! the suppression window. The event fingerprint is claimed before any slow
//! downstream call so a concurrent duplicate loses the race at the cache,
//! not after seconds of reply generation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use sana_core::current_unix_timestamp_ms;

use crate::ingest_contract::{
    event_fingerprint, payload_digest, response_fingerprint, validate_inbound_chat_event,
    InboundChatEvent,
};
use crate::ingest_fingerprint::{FingerprintCache, FingerprintCacheConfig};
use crate::ingest_journal::ConversationJournal;
use crate::ingest_outbound::OutboundDelivery;
use crate::ingest_reply::{ReplyContext, ReplyDecision, ReplyGenerator};

/// Best-effort fallback sent once when the reply upstream fails.
pub const GENERATION_FAILURE_APOLOGY: &str =
    "Sorry, something went wrong while processing your message. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    DuplicateEvent,
    ChannelDisabled,
    EmptyReply,
    DuplicateResponse,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateEvent => "duplicate_event",
            Self::ChannelDisabled => "channel_disabled",
            Self::EmptyReply => "empty_reply",
            Self::DuplicateResponse => "duplicate_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestFailure {
    Validation(String),
    Generation(String),
    Delivery(String),
}

impl IngestFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "event_validation_failed",
            Self::Generation(_) => "reply_generation_failed",
            Self::Delivery(_) => "reply_delivery_failed",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(detail) | Self::Generation(detail) | Self::Delivery(detail) => detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Delivered,
    Suppressed(SuppressReason),
    Failed(IngestFailure),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestionGateConfig {
    pub event_window_ms: u64,
    pub response_window_ms: u64,
}

impl Default for IngestionGateConfig {
    fn default() -> Self {
        Self {
            event_window_ms: FingerprintCacheConfig::event_default().window_ms,
            response_window_ms: FingerprintCacheConfig::response_default().window_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Rolling counters over everything the gate has seen.
pub struct IngestSummary {
    pub ingested: usize,
    pub delivered: usize,
    pub duplicate_events: usize,
    pub duplicate_responses: usize,
    pub channel_disabled: usize,
    pub empty_replies: usize,
    pub validation_failures: usize,
    pub generation_failures: usize,
    pub delivery_failures: usize,
}

/// Marks the claimed key `Processed` on drop so every exit path, including
/// unwinds out of collaborator calls, completes dedup bookkeeping.
struct ClaimBookkeeping<'a> {
    cache: &'a FingerprintCache,
    key: &'a str,
}

impl Drop for ClaimBookkeeping<'_> {
    fn drop(&mut self) {
        self.cache.mark_processed(self.key);
    }
}

pub struct IngestionGate {
    event_cache: Arc<FingerprintCache>,
    response_cache: Arc<FingerprintCache>,
    reply_generator: Arc<dyn ReplyGenerator>,
    delivery: Arc<dyn OutboundDelivery>,
    journal: Option<Arc<ConversationJournal>>,
    summary: Mutex<IngestSummary>,
}

impl IngestionGate {
    pub fn new(
        config: IngestionGateConfig,
        reply_generator: Arc<dyn ReplyGenerator>,
        delivery: Arc<dyn OutboundDelivery>,
    ) -> Self {
        Self {
            event_cache: Arc::new(FingerprintCache::new(FingerprintCacheConfig {
                window_ms: config.event_window_ms,
            })),
            response_cache: Arc::new(FingerprintCache::new(FingerprintCacheConfig {
                window_ms: config.response_window_ms,
            })),
            reply_generator,
            delivery,
            journal: None,
            summary: Mutex::new(IngestSummary::default()),
        }
    }

    /// Attaches the conversation journal fed on delivered and unanswered
    /// exchanges.
    pub fn with_journal(mut self, journal: Arc<ConversationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Both caches (event first, response second), for wiring into the
    /// background sweeper.
    pub fn fingerprint_caches(&self) -> Vec<Arc<FingerprintCache>> {
        vec![
            Arc::clone(&self.event_cache),
            Arc::clone(&self.response_cache),
        ]
    }

    pub fn summary(&self) -> IngestSummary {
        self.lock_summary().clone()
    }

    /// Processes one inbound event to completion. No cancellation: once the
    /// event fingerprint is claimed the call runs to an outcome, and callers
    /// that time out must not re-ingest the same event concurrently.
    pub async fn ingest(&self, event: &InboundChatEvent) -> IngestOutcome {
        self.bump(|summary| summary.ingested += 1);

        if let Err(error) = validate_inbound_chat_event(event) {
            tracing::warn!(
                "ingest rejected event: reason_code={} detail={}",
                error.code.as_str(),
                error.message
            );
            self.bump(|summary| summary.validation_failures += 1);
            return IngestOutcome::Failed(IngestFailure::Validation(error.to_string()));
        }

        let event_key = event_fingerprint(event);
        let now_ms = current_unix_timestamp_ms();
        if !self
            .event_cache
            .claim(&event_key, &payload_digest(&event.text), now_ms)
        {
            tracing::debug!(
                "ingest suppressed duplicate event: key={} sender={}",
                event_key,
                event.sender
            );
            self.bump(|summary| summary.duplicate_events += 1);
            return IngestOutcome::Suppressed(SuppressReason::DuplicateEvent);
        }
        let bookkeeping = ClaimBookkeeping {
            cache: self.event_cache.as_ref(),
            key: event_key.as_str(),
        };

        let generation_started = Instant::now();
        let decision = self
            .reply_generator
            .generate_reply(ReplyContext::from_event(event))
            .await;

        let reply_text = match decision {
            Err(error) => {
                tracing::error!(
                    "reply generation failed: sender={} reason_code={} detail={}",
                    event.sender,
                    error.reason_code(),
                    error
                );
                self.bump(|summary| summary.generation_failures += 1);
                // One best-effort apology; its failure is logged, not retried.
                if let Err(apology_error) =
                    self.delivery.deliver(&event.sender, GENERATION_FAILURE_APOLOGY).await
                {
                    tracing::error!(
                        "apology delivery failed: sender={} reason_code={} detail={}",
                        event.sender,
                        apology_error.reason_code(),
                        apology_error
                    );
                }
                return IngestOutcome::Failed(IngestFailure::Generation(error.to_string()));
            }
            Ok(ReplyDecision::ChannelDisabled) => {
                let unanswered = self.journal.as_ref().map(|journal| {
                    journal.record_unanswered(
                        &event.sender,
                        &event.display_name(),
                        &event.text,
                        current_unix_timestamp_ms(),
                    )
                });
                tracing::info!(
                    "ingest suppressed while channel disabled: sender={} unanswered={}",
                    event.sender,
                    unanswered.unwrap_or(0)
                );
                self.bump(|summary| summary.channel_disabled += 1);
                return IngestOutcome::Suppressed(SuppressReason::ChannelDisabled);
            }
            Ok(ReplyDecision::Empty) => {
                self.bump(|summary| summary.empty_replies += 1);
                return IngestOutcome::Suppressed(SuppressReason::EmptyReply);
            }
            Ok(ReplyDecision::Text(text)) if text.trim().is_empty() => {
                self.bump(|summary| summary.empty_replies += 1);
                return IngestOutcome::Suppressed(SuppressReason::EmptyReply);
            }
            Ok(ReplyDecision::Text(text)) => text,
        };

        let response_key = response_fingerprint(&event.sender, &reply_text);
        if !self.response_cache.claim(
            &response_key,
            &payload_digest(&reply_text),
            current_unix_timestamp_ms(),
        ) {
            tracing::debug!(
                "ingest suppressed duplicate response: key={} sender={}",
                response_key,
                event.sender
            );
            self.bump(|summary| summary.duplicate_responses += 1);
            return IngestOutcome::Suppressed(SuppressReason::DuplicateResponse);
        }

        match self.delivery.deliver(&event.sender, &reply_text).await {
            Err(error) => {
                // The response claim is left Pending and expires via sweep;
                // upstream re-delivery of the event is suppressed as a
                // duplicate instead of retried here.
                tracing::error!(
                    "reply delivery failed: sender={} reason_code={} detail={}",
                    event.sender,
                    error.reason_code(),
                    error
                );
                self.bump(|summary| summary.delivery_failures += 1);
                IngestOutcome::Failed(IngestFailure::Delivery(error.to_string()))
            }
            Ok(()) => {
                drop(bookkeeping);
                self.response_cache.mark_processed(&response_key);
                let response_time_ms =
                    u64::try_from(generation_started.elapsed().as_millis()).unwrap_or(u64::MAX);
                if let Some(journal) = self.journal.as_ref() {
                    journal.record_exchange(
                        &event.sender,
                        &event.display_name(),
                        &event.text,
                        &reply_text,
                        response_time_ms,
                        current_unix_timestamp_ms(),
                    );
                }
                self.bump(|summary| summary.delivered += 1);
                IngestOutcome::Delivered
            }
        }
    }

    fn bump(&self, update: impl FnOnce(&mut IngestSummary)) {
        update(&mut self.lock_summary());
    }

    fn lock_summary(&self) -> MutexGuard<'_, IngestSummary> {
        match self.summary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
