//! collapses the per-upstream raw alert groups into one canonical alert set
//!
//! Replicas of a clustered alertmanager report overlapping copies of the
//! same alerts, distinguishable only by replica-identifying labels such as
//! the instance name. Stripping those labels before computing the dedup key
//! makes the copies collapse into one [CanonicalAlert] that remembers every
//! reporting upstream.

use std::collections::{hash_map::Entry, BTreeMap, BTreeSet, HashMap};

use crate::{
    alert::{CanonicalAlert, DedupKey, RawAlert},
    settings::LabelSettings,
    snapshot_store::Snapshot,
};

/// outcome of one dedup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupResult {
    /// canonical alerts sorted by dedup key
    pub alerts: Vec<CanonicalAlert>,
    /// number of malformed raw alerts dropped during the pass
    pub skipped: usize,
}

/// collapse every raw alert of every upstream into the canonical alert set
///
/// One linear pass over the snapshot. Sources are visited in name order, so
/// the result does not depend on the order in which pollers last wrote
/// their slots. Malformed raw alerts are dropped and counted, never fatal
/// to the pass: an entirely unusable snapshot still yields a valid, empty
/// result.
pub fn dedup(snapshot: &Snapshot, labels: &LabelSettings) -> DedupResult {
    let mut merged: HashMap<DedupKey, CanonicalAlert> = HashMap::new();
    let mut skipped = 0_usize;

    for source in &snapshot.sources {
        let group = match &source.group {
            Some(group) => group,
            None => continue,
        };

        for alert in &group.alerts {
            if malformed(alert) {
                tracing::debug!(
                    "skipping malformed alert {} reported by {}",
                    alert.fingerprint,
                    source.name
                );
                skipped += 1;
                continue;
            }

            let projected = project_labels(alert, &labels.replica);
            let key = DedupKey::new(&projected, &alert.receiver);

            match merged.entry(key) {
                Entry::Occupied(entry) => merge_into(entry.into_mut(), alert, &source.name),
                Entry::Vacant(entry) => {
                    let id = entry.key().clone();
                    entry.insert(canonical_from(id, projected, alert, &source.name));
                }
            }
        }
    }

    let mut alerts: Vec<CanonicalAlert> = merged.into_values().collect();
    alerts.sort_unstable_by(|a, b| a.id.cmp(&b.id));

    DedupResult { alerts, skipped }
}

/// a raw alert the engine cannot key: no receiver, or a nameless label
fn malformed(alert: &RawAlert) -> bool {
    alert.receiver.is_empty() || alert.labels.keys().any(|name| name.is_empty())
}

/// the alert's labels minus the configured replica labels
fn project_labels(alert: &RawAlert, replica: &[String]) -> BTreeMap<String, String> {
    alert
        .labels
        .iter()
        .filter(|(name, _)| !replica.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// first sighting of a key: the canonical alert starts as a copy of this
/// raw alert
fn canonical_from(
    id: DedupKey,
    labels: BTreeMap<String, String>,
    alert: &RawAlert,
    source: &str,
) -> CanonicalAlert {
    CanonicalAlert {
        id,
        labels,
        annotations: alert.annotations.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        receiver: alert.receiver.clone(),
        state: alert.state,
        starts_at: alert.starts_at,
        sources: BTreeSet::from([source.to_string()]),
    }
}

/// fold another sighting of the same key into the canonical alert
///
/// Annotations keep the first value seen for a name; with sources visited
/// in name order that means the lexicographically smallest reporting source
/// wins a conflict. State merges towards the most severe, the start
/// timestamp towards the earliest.
fn merge_into(canonical: &mut CanonicalAlert, alert: &RawAlert, source: &str) {
    for (name, value) in &alert.annotations {
        if !canonical.annotations.contains_key(name) {
            canonical.annotations.insert(name.clone(), value.clone());
        }
    }

    canonical.state = canonical.state.max(alert.state);
    canonical.starts_at = canonical.starts_at.min(alert.starts_at);
    canonical.sources.insert(source.to_string());
}
