//! Cached-snapshot persistence for the insight store.
//!
//! The snapshot is one JSON document written atomically. Loading does not
//! bypass reconciliation: each persisted entity becomes a
//! `CachedSnapshot`-tagged fragment replayed through the ordinary merge
//! path, so a stale snapshot can never regress newer in-memory state.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use sana_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::insight_contract::{DetailPatch, FragmentSource, InsightFragment};
use crate::insight_store::{InsightStore, UserInsight};

pub const INSIGHT_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct InsightSnapshotFile {
    schema_version: u32,
    saved_at_ms: u64,
    users: BTreeMap<String, UserInsight>,
}

pub fn save_insight_snapshot(store: &InsightStore, path: &Path) -> Result<()> {
    let users = store
        .snapshot_all()
        .into_iter()
        .map(|insight| (insight.id.clone(), insight))
        .collect::<BTreeMap<_, _>>();
    let file = InsightSnapshotFile {
        schema_version: INSIGHT_SNAPSHOT_SCHEMA_VERSION,
        saved_at_ms: current_unix_timestamp_ms(),
        users,
    };
    let rendered =
        serde_json::to_string_pretty(&file).context("failed to encode insight snapshot")?;
    write_text_atomic(path, &rendered)
        .with_context(|| format!("failed to write insight snapshot {}", path.display()))
}

/// Reads a snapshot back as cached-snapshot fragments. A missing file is an
/// empty snapshot, not an error.
pub fn load_insight_snapshot(path: &Path) -> Result<Vec<InsightFragment>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read insight snapshot {}", path.display()))?;
    let file = serde_json::from_str::<InsightSnapshotFile>(&raw)
        .with_context(|| format!("failed to parse insight snapshot {}", path.display()))?;
    if file.schema_version != INSIGHT_SNAPSHOT_SCHEMA_VERSION {
        bail!(
            "insight snapshot {} has unsupported schema_version {} (expected {})",
            path.display(),
            file.schema_version,
            INSIGHT_SNAPSHOT_SCHEMA_VERSION
        );
    }

    Ok(file
        .users
        .into_values()
        .map(fragment_from_persisted_insight)
        .collect())
}

/// Loads the snapshot at `path` and merges every fragment into `store`.
/// Returns how many entities actually changed the store.
///
/// A persisted fragment is replayed only when the store does not already
/// hold newer state for its id; the cache must never regress what push or
/// pull producers delivered in the meantime.
pub fn replay_insight_snapshot(store: &InsightStore, path: &Path) -> Result<usize> {
    let fragments = load_insight_snapshot(path)?;
    let mut changed = 0usize;
    for fragment in &fragments {
        if let Some(existing) = store.get(&fragment.user_id) {
            if fragment.received_at_ms <= existing.details.last_interaction_at_ms {
                tracing::debug!(
                    "insight snapshot replay skipped stale fragment: user_id={} received_at_ms={}",
                    fragment.user_id,
                    fragment.received_at_ms
                );
                continue;
            }
        }
        match store.merge(fragment) {
            Ok(receipt) if receipt.changed => changed += 1,
            Ok(_) => {}
            Err(error) => {
                // One bad persisted row must not sink the rest of the replay.
                tracing::warn!(
                    "insight snapshot replay skipped fragment: user_id={} error={error:#}",
                    fragment.user_id
                );
            }
        }
    }
    tracing::info!(
        "insight snapshot replay: path={} fragments={} changed={}",
        path.display(),
        fragments.len(),
        changed
    );
    Ok(changed)
}

fn fragment_from_persisted_insight(insight: UserInsight) -> InsightFragment {
    let received_at_ms = insight.details.last_interaction_at_ms;
    InsightFragment {
        source: FragmentSource::CachedSnapshot,
        user_id: insight.id,
        received_at_ms,
        details: DetailPatch {
            name: insight.details.name,
            age: insight.details.age,
            gender: insight.details.gender,
            location: insight.details.location,
            health_complaints: insight.details.health_complaints,
            barriers: insight.details.barriers,
            first_interaction_at_ms: Some(insight.details.first_interaction_at_ms),
            last_interaction_at_ms: Some(insight.details.last_interaction_at_ms),
        },
        analysis: insight.latest_analysis,
    }
}
