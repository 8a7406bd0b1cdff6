//! Per-conversation bot enablement.
//!
//! Operators can mute the bot for a single conversation so a human takes
//! over; everything else keeps flowing. Unknown senders default to enabled.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::ingest_reply::{ReplyContext, ReplyDecision, ReplyError, ReplyGenerator};

#[derive(Debug, Default)]
pub struct ChannelToggles {
    states: Mutex<HashMap<String, bool>>,
}

impl ChannelToggles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults to `true` for senders never toggled.
    pub fn is_enabled(&self, sender: &str) -> bool {
        self.lock_states().get(sender).copied().unwrap_or(true)
    }

    pub fn set_enabled(&self, sender: &str, enabled: bool) {
        self.lock_states().insert(sender.to_string(), enabled);
        tracing::info!("channel toggle: sender={} enabled={}", sender, enabled);
    }

    /// Flips the sender's state and returns the new value.
    pub fn toggle(&self, sender: &str) -> bool {
        let mut states = self.lock_states();
        let next = !states.get(sender).copied().unwrap_or(true);
        states.insert(sender.to_string(), next);
        next
    }

    /// Stable-ordered view for dashboards and diagnostics.
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.lock_states()
            .iter()
            .map(|(sender, enabled)| (sender.clone(), *enabled))
            .collect()
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Wraps a reply generator with the toggle check so muted conversations
/// short-circuit to `ChannelDisabled` without touching the upstream.
pub struct ToggledReplyGenerator<G> {
    toggles: Arc<ChannelToggles>,
    inner: G,
}

impl<G> ToggledReplyGenerator<G> {
    pub fn new(toggles: Arc<ChannelToggles>, inner: G) -> Self {
        Self { toggles, inner }
    }
}

#[async_trait]
impl<G: ReplyGenerator> ReplyGenerator for ToggledReplyGenerator<G> {
    async fn generate_reply(&self, context: ReplyContext) -> Result<ReplyDecision, ReplyError> {
        if !self.toggles.is_enabled(&context.sender) {
            return Ok(ReplyDecision::ChannelDisabled);
        }
        self.inner.generate_reply(context).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{ChannelToggles, ToggledReplyGenerator};
    use crate::ingest_reply::{ReplyContext, ReplyDecision, ReplyError, ReplyGenerator};

    struct CannedReply;

    #[async_trait]
    impl ReplyGenerator for CannedReply {
        async fn generate_reply(
            &self,
            _context: ReplyContext,
        ) -> Result<ReplyDecision, ReplyError> {
            Ok(ReplyDecision::Text("hi".to_string()))
        }
    }

    fn context_for(sender: &str) -> ReplyContext {
        ReplyContext {
            sender: sender.to_string(),
            sender_display: sender.to_string(),
            text: "hello".to_string(),
            received_at_ms: 1,
        }
    }

    #[test]
    fn unit_unknown_sender_defaults_to_enabled() {
        let toggles = ChannelToggles::new();
        assert!(toggles.is_enabled("628111@s.whatsapp.net"));
    }

    #[test]
    fn unit_toggle_returns_new_state_each_flip() {
        let toggles = ChannelToggles::new();
        assert!(!toggles.toggle("a"));
        assert!(toggles.toggle("a"));
        toggles.set_enabled("b", false);
        let snapshot = toggles.snapshot();
        assert_eq!(snapshot.get("a"), Some(&true));
        assert_eq!(snapshot.get("b"), Some(&false));
    }

    #[tokio::test]
    async fn functional_disabled_sender_short_circuits_to_channel_disabled() {
        let toggles = Arc::new(ChannelToggles::new());
        toggles.set_enabled("muted", false);
        let generator = ToggledReplyGenerator::new(Arc::clone(&toggles), CannedReply);

        let decision = generator
            .generate_reply(context_for("muted"))
            .await
            .expect("decision");
        assert_eq!(decision, ReplyDecision::ChannelDisabled);

        let decision = generator
            .generate_reply(context_for("open"))
            .await
            .expect("decision");
        assert_eq!(decision, ReplyDecision::Text("hi".to_string()));
    }
}
