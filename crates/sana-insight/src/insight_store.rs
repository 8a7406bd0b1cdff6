//! Multi-source reconciliation store for user insight records.
//!
//! Fragments from push, pull, and cached-snapshot producers all funnel
//! through [`InsightStore::merge`], which applies one set of rules: newer
//! timestamps win, partial absence never erases, and interaction history is
//! bounded. Entities are keyed by canonical contact id; merges for different
//! ids never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::insight_contract::{AnalysisSnapshot, Gender, InsightFragment};
use crate::insight_identity::canonical_contact_id;

/// Interaction records retained per user; older records are evicted, not
/// archived.
pub const INTERACTION_HISTORY_CAP: usize = 10;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub health_complaints: Vec<String>,
    #[serde(default)]
    pub barriers: Vec<String>,
    pub first_interaction_at_ms: u64,
    pub last_interaction_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp_ms: u64,
    pub analysis: AnalysisSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInsight {
    pub id: String,
    pub details: ContactDetails,
    /// Oldest → newest, at most [`INTERACTION_HISTORY_CAP`] records.
    #[serde(default)]
    pub interactions: Vec<InteractionRecord>,
    #[serde(default)]
    pub latest_analysis: Option<AnalysisSnapshot>,
}

impl UserInsight {
    fn new(id: &str, received_at_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            details: ContactDetails {
                first_interaction_at_ms: received_at_ms,
                last_interaction_at_ms: received_at_ms,
                ..ContactDetails::default()
            },
            interactions: Vec::new(),
            latest_analysis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReceipt {
    /// Canonical id the fragment resolved to.
    pub user_id: String,
    pub changed: bool,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightUpdate {
    pub user_id: String,
    pub insight: UserInsight,
}

type SubscriberCallback = Box<dyn Fn(&InsightUpdate) + Send + Sync>;
type SubscriberRegistry = Mutex<HashMap<u64, SubscriberCallback>>;

/// Handle returned by [`InsightStore::subscribe`]; dropping it without
/// calling [`unsubscribe`] leaves the callback registered.
///
/// [`unsubscribe`]: InsightSubscription::unsubscribe
pub struct InsightSubscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl InsightSubscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock_or_recover(&registry).remove(&self.id);
        }
    }
}

#[derive(Default)]
pub struct InsightStore {
    entries: Mutex<HashMap<String, Arc<Mutex<UserInsight>>>>,
    subscribers: Arc<SubscriberRegistry>,
    next_subscription_id: AtomicU64,
}

impl InsightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one fragment. Atomic per user id: the registry lock is held
    /// only to resolve the entry, the per-entry lock for the read-modify-
    /// write, and subscriber callbacks run with neither lock held.
    pub fn merge(&self, fragment: &InsightFragment) -> Result<MergeReceipt> {
        let user_id = canonical_contact_id(&fragment.user_id);
        if user_id.is_empty() {
            bail!(
                "fragment from source '{}' has empty user_id",
                fragment.source.as_str()
            );
        }

        let (entry, created) = {
            let mut entries = lock_or_recover(&self.entries);
            match entries.get(&user_id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let fresh = Arc::new(Mutex::new(UserInsight::new(
                        &user_id,
                        fragment.received_at_ms,
                    )));
                    entries.insert(user_id.clone(), Arc::clone(&fresh));
                    (fresh, true)
                }
            }
        };

        let (changed, snapshot) = {
            let mut insight = lock_or_recover(&entry);
            let before = insight.clone();
            apply_fragment(&mut insight, fragment);
            let changed = created || *insight != before;
            (changed, insight.clone())
        };

        if changed {
            tracing::debug!(
                "insight merge: user_id={} source={} created={}",
                user_id,
                fragment.source.as_str(),
                created
            );
            self.notify_subscribers(&InsightUpdate {
                user_id: user_id.clone(),
                insight: snapshot,
            });
        }

        Ok(MergeReceipt {
            user_id,
            changed,
            created,
        })
    }

    pub fn get(&self, user_id: &str) -> Option<UserInsight> {
        let canonical = canonical_contact_id(user_id);
        let entry = {
            let entries = lock_or_recover(&self.entries);
            entries.get(&canonical).cloned()
        };
        entry.map(|entry| lock_or_recover(&entry).clone())
    }

    /// Explicit deletion; merge never removes entities. Callers holding a
    /// cached snapshot for this id must rewrite it afterwards.
    pub fn remove(&self, user_id: &str) -> bool {
        let canonical = canonical_contact_id(user_id);
        let removed = lock_or_recover(&self.entries).remove(&canonical).is_some();
        if removed {
            tracing::info!("insight removed: user_id={}", canonical);
        }
        removed
    }

    pub fn user_ids(&self) -> Vec<String> {
        let mut ids = lock_or_recover(&self.entries)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_or_recover(&self.entries).is_empty()
    }

    /// Clones every entity, sorted by id; the snapshot writer's view.
    pub fn snapshot_all(&self) -> Vec<UserInsight> {
        let entries = {
            let entries = lock_or_recover(&self.entries);
            entries.values().cloned().collect::<Vec<_>>()
        };
        let mut rows = entries
            .iter()
            .map(|entry| lock_or_recover(entry).clone())
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| left.id.cmp(&right.id));
        rows
    }

    /// Registers a change callback invoked synchronously after each merge
    /// that actually changed something.
    pub fn subscribe(
        &self,
        callback: impl Fn(&InsightUpdate) + Send + Sync + 'static,
    ) -> InsightSubscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        lock_or_recover(&self.subscribers).insert(id, Box::new(callback));
        InsightSubscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    fn notify_subscribers(&self, update: &InsightUpdate) {
        let subscribers = lock_or_recover(&self.subscribers);
        for callback in subscribers.values() {
            callback(update);
        }
    }
}

fn apply_fragment(insight: &mut UserInsight, fragment: &InsightFragment) {
    let patch = &fragment.details;
    let details = &mut insight.details;

    // Scalars: Some overwrites, None is "no news".
    if let Some(name) = &patch.name {
        details.name = Some(name.clone());
    }
    if let Some(age) = patch.age {
        details.age = Some(age);
    }
    if let Some(gender) = patch.gender {
        details.gender = Some(gender);
    }
    if let Some(location) = &patch.location {
        details.location = Some(location.clone());
    }

    // Arrays replace only when non-empty; an empty array is not a clear.
    if !patch.health_complaints.is_empty() {
        details.health_complaints = patch.health_complaints.clone();
    }
    if !patch.barriers.is_empty() {
        details.barriers = patch.barriers.clone();
    }

    // last interaction is monotonically non-decreasing; an out-of-order
    // fragment keeps the stored value.
    let incoming_last = patch
        .last_interaction_at_ms
        .unwrap_or(fragment.received_at_ms);
    details.last_interaction_at_ms = details.last_interaction_at_ms.max(incoming_last);

    if let Some(first) = patch.first_interaction_at_ms {
        if first > 0 && first < details.first_interaction_at_ms {
            details.first_interaction_at_ms = first;
        }
    }

    if let Some(analysis) = &fragment.analysis {
        let newer_than_stored = insight
            .interactions
            .last()
            .map_or(true, |last| fragment.received_at_ms > last.timestamp_ms);
        if newer_than_stored {
            insight.interactions.push(InteractionRecord {
                timestamp_ms: fragment.received_at_ms,
                analysis: analysis.clone(),
            });
            if insight.interactions.len() > INTERACTION_HISTORY_CAP {
                let excess = insight.interactions.len() - INTERACTION_HISTORY_CAP;
                insight.interactions.drain(..excess);
            }
            insight.latest_analysis = Some(analysis.clone());
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
