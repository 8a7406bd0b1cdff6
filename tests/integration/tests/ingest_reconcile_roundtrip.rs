//! End-to-end flows across the ingestion gate and the insight store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sana_core::current_unix_timestamp_ms;
use sana_ingest::{
    spawn_fingerprint_sweeper, ChannelToggles, ConversationJournal, DeliveryError,
    InboundChatEvent, IngestOutcome, IngestionGate, IngestionGateConfig, OutboundDelivery,
    ReplyContext, ReplyDecision, ReplyError, ReplyGenerator, SuppressReason,
    ToggledReplyGenerator,
};
use sana_insight::{
    canonical_contact_id, normalize_analysis_value, replay_insight_snapshot,
    save_insight_snapshot, DetailPatch, FragmentSource, InsightFragment, InsightStore,
};

struct CannedReply {
    text: String,
}

#[async_trait]
impl ReplyGenerator for CannedReply {
    async fn generate_reply(&self, _context: ReplyContext) -> Result<ReplyDecision, ReplyError> {
        Ok(ReplyDecision::Text(self.text.clone()))
    }
}

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl OutboundDelivery for RecordingDelivery {
    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn event(event_id: &str, sender: &str, text: &str) -> InboundChatEvent {
    InboundChatEvent {
        event_id: event_id.to_string(),
        sender: sender.to_string(),
        sender_display: String::new(),
        text: text.to_string(),
        received_at_ms: current_unix_timestamp_ms(),
    }
}

/// Analyzer-side adapter: turns a delivered exchange into a push fragment,
/// the shape any transport hands to the store.
fn push_fragment_for(event: &InboundChatEvent, analysis_json: serde_json::Value) -> InsightFragment {
    let analysis = normalize_analysis_value(&analysis_json, event.received_at_ms);
    InsightFragment {
        details: DetailPatch::from_analysis(&analysis),
        analysis: Some(analysis),
        ..InsightFragment::new(FragmentSource::Push, &event.sender, event.received_at_ms)
    }
}

#[tokio::test]
async fn integration_ingest_once_then_reconcile_updates_subscribers() {
    init_tracing();
    let delivery = Arc::new(RecordingDelivery::default());
    let gate = IngestionGate::new(
        IngestionGateConfig::default(),
        Arc::new(CannedReply {
            text: "hi".to_string(),
        }),
        Arc::clone(&delivery) as Arc<dyn OutboundDelivery>,
    );
    let store = InsightStore::new();
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let subscription = store.subscribe(move |update| {
        sink.lock().expect("updates lock").push(update.user_id.clone());
    });

    // The spec's worked example: same event twice within the window.
    let inbound = event("e1", "A", "hello");
    assert_eq!(gate.ingest(&inbound).await, IngestOutcome::Delivered);
    assert_eq!(
        gate.ingest(&inbound).await,
        IngestOutcome::Suppressed(SuppressReason::DuplicateEvent)
    );
    assert_eq!(delivery.sent(), vec![("A".to_string(), "hi".to_string())]);

    // Only the delivered ingest produces an analytics fragment.
    let fragment = push_fragment_for(&inbound, json!({"name": "Ana", "emotion": "positive"}));
    store.merge(&fragment).expect("merge");

    let seen = updates.lock().expect("updates lock").clone();
    assert_eq!(seen, vec![canonical_contact_id("A")]);
    let insight = store.get("A").expect("entity");
    assert_eq!(insight.details.name.as_deref(), Some("Ana"));
    assert_eq!(insight.interactions.len(), 1);
    subscription.unsubscribe();
}

#[tokio::test]
async fn integration_toggled_channel_parks_messages_until_reenabled() {
    init_tracing();
    let delivery = Arc::new(RecordingDelivery::default());
    let toggles = Arc::new(ChannelToggles::new());
    let journal = Arc::new(ConversationJournal::new());
    let gate = IngestionGate::new(
        IngestionGateConfig::default(),
        Arc::new(ToggledReplyGenerator::new(
            Arc::clone(&toggles),
            CannedReply {
                text: "with you shortly".to_string(),
            },
        )),
        Arc::clone(&delivery) as Arc<dyn OutboundDelivery>,
    )
    .with_journal(Arc::clone(&journal));

    let sender = "628222@s.whatsapp.net";
    toggles.set_enabled(sender, false);
    assert_eq!(
        gate.ingest(&event("e1", sender, "anyone there?")).await,
        IngestOutcome::Suppressed(SuppressReason::ChannelDisabled)
    );
    assert_eq!(
        gate.ingest(&event("e2", sender, "hello??")).await,
        IngestOutcome::Suppressed(SuppressReason::ChannelDisabled)
    );
    assert!(delivery.sent().is_empty());
    assert_eq!(journal.unanswered_count(sender), 2);

    assert!(toggles.toggle(sender));
    assert_eq!(
        gate.ingest(&event("e3", sender, "still here")).await,
        IngestOutcome::Delivered
    );
    assert_eq!(delivery.sent().len(), 1);
    let summary = gate.summary();
    assert_eq!(summary.channel_disabled, 2);
    assert_eq!(summary.delivered, 1);
}

#[tokio::test]
async fn integration_suppression_ends_when_window_expires_and_sweeper_runs() {
    init_tracing();
    let delivery = Arc::new(RecordingDelivery::default());
    let gate = IngestionGate::new(
        IngestionGateConfig {
            event_window_ms: 50,
            response_window_ms: 40,
        },
        Arc::new(CannedReply {
            text: "hi".to_string(),
        }),
        Arc::clone(&delivery) as Arc<dyn OutboundDelivery>,
    );
    let sweeper = spawn_fingerprint_sweeper(gate.fingerprint_caches(), Duration::from_millis(10));

    let inbound = event("e1", "A", "hello");
    assert_eq!(gate.ingest(&inbound).await, IngestOutcome::Delivered);
    assert_eq!(
        gate.ingest(&inbound).await,
        IngestOutcome::Suppressed(SuppressReason::DuplicateEvent)
    );

    // Past both windows the same event is fresh again; at-most-once holds
    // per suppression window, not forever.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(gate.ingest(&inbound).await, IngestOutcome::Delivered);
    assert_eq!(delivery.sent().len(), 2);
    sweeper.shutdown().await;
}

#[tokio::test]
async fn integration_snapshot_survives_restart_without_regressing_live_data() {
    init_tracing();
    let tempdir = tempfile::tempdir().expect("tempdir");
    let path = tempdir.path().join("user_insights.json");
    let sender = "628333@s.whatsapp.net";

    // First process lifetime: one analyzed conversation, then persist.
    let store = InsightStore::new();
    let inbound = event("e1", sender, "my head hurts");
    store
        .merge(&push_fragment_for(
            &inbound,
            json!({"name": "Budi", "health_complaints": ["sakit kepala"], "urgency_level": "tinggi"}),
        ))
        .expect("merge");
    save_insight_snapshot(&store, &path).expect("save");

    // Second process lifetime: cache load first, then a newer push fragment.
    let restarted = InsightStore::new();
    assert_eq!(replay_insight_snapshot(&restarted, &path).expect("replay"), 1);
    let newer = InsightFragment {
        details: DetailPatch {
            location: Some("Bandung".to_string()),
            ..DetailPatch::default()
        },
        ..InsightFragment::new(
            FragmentSource::Push,
            sender,
            current_unix_timestamp_ms() + 10,
        )
    };
    restarted.merge(&newer).expect("newer merge");

    // Replaying the stale snapshot again must not undo the newer push.
    assert_eq!(replay_insight_snapshot(&restarted, &path).expect("replay"), 0);
    let insight = restarted.get(sender).expect("entity");
    assert_eq!(insight.details.name.as_deref(), Some("Budi"));
    assert_eq!(insight.details.location.as_deref(), Some("Bandung"));
    assert_eq!(insight.details.health_complaints, vec!["sakit kepala"]);
}
