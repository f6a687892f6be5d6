//! in-memory holding area for the latest poll result of every upstream
//!
//! One slot per configured upstream, created at startup and never removed.
//! The poller replaces a slot wholesale on every successful poll and records
//! failures without touching the previous payload, so readers get
//! stale-but-present data instead of no data while an upstream is down.
//! The slot is the unit of synchronization: writers for different upstreams
//! never contend and a snapshot only ever observes fully-written payloads.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::{alert::RawAlertGroup, settings::UpstreamSettings};

/// last poll outcome for one upstream
#[derive(Debug, Default)]
struct SlotState {
    group: Option<Arc<RawAlertGroup>>,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

/// one upstream's slot
#[derive(Debug)]
struct Slot {
    cluster: String,
    state: RwLock<SlotState>,
}

/// holds the most recent [RawAlertGroup] per upstream
#[derive(Debug)]
pub struct SnapshotStore {
    /// keyed by upstream name; the ordered map fixes the snapshot order
    slots: BTreeMap<String, Slot>,
}

impl SnapshotStore {
    pub fn new(upstreams: &[UpstreamSettings]) -> Self {
        let slots = upstreams
            .iter()
            .map(|upstream| {
                let slot = Slot {
                    cluster: upstream.cluster_name().to_string(),
                    state: RwLock::new(SlotState::default()),
                };

                (upstream.name.clone(), slot)
            })
            .collect();

        Self { slots }
    }

    /// install the latest poll result for `source`, clearing any recorded
    /// error
    pub fn replace(&self, source: &str, group: RawAlertGroup) {
        if let Some(slot) = self.slot(source) {
            let mut state = slot.state.write();

            state.last_success = Some(group.polled_at);
            state.last_error = None;
            state.group = Some(Arc::new(group));
        }
    }

    /// record a failed poll for `source`, keeping the previous payload
    pub fn mark_failure(&self, source: &str, error: String) {
        if let Some(slot) = self.slot(source) {
            slot.state.write().last_error = Some(error);
        }
    }

    /// a read-only view over every slot as of its last completed write,
    /// sorted by upstream name
    pub fn snapshot(&self) -> Snapshot {
        let sources = self
            .slots
            .iter()
            .map(|(name, slot)| {
                let state = slot.state.read();

                SourceState {
                    name: name.clone(),
                    cluster: slot.cluster.clone(),
                    group: state.group.clone(),
                    last_error: state.last_error.clone(),
                    last_success: state.last_success,
                }
            })
            .collect();

        Snapshot { sources }
    }

    fn slot(&self, source: &str) -> Option<&Slot> {
        let slot = self.slots.get(source);

        if slot.is_none() {
            tracing::warn!("dropping poll outcome for unknown upstream {source}");
        }

        slot
    }
}

/// consistent view across all upstream slots; alert payloads are shared with
/// the store, never copied
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// per-upstream states, sorted by upstream name
    pub sources: Vec<SourceState>,
}

/// one upstream's contribution to a [Snapshot]
#[derive(Debug, Clone)]
pub struct SourceState {
    pub name: String,
    pub cluster: String,
    /// the last successfully polled alert group, if any poll ever succeeded
    pub group: Option<Arc<RawAlertGroup>>,
    /// the error recorded by the most recent poll attempt, if it failed
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// upstream health counters shown in the dashboard header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpstreamCounters {
    pub total: usize,
    pub healthy: usize,
    pub failed: usize,
}

/// per-upstream status block of the alerts payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamInstance {
    pub name: String,
    pub cluster: String,
    pub error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// upstream section of the alerts payload: health counters, per-instance
/// status and cluster membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamsReport {
    pub counters: UpstreamCounters,
    pub instances: Vec<UpstreamInstance>,
    pub clusters: BTreeMap<String, Vec<String>>,
}

impl Snapshot {
    /// an upstream counts as failed while its most recent poll attempt
    /// recorded an error, even if stale data is still being served for it
    pub fn counters(&self) -> UpstreamCounters {
        let failed = self.sources.iter().filter(|source| source.last_error.is_some()).count();

        UpstreamCounters {
            total: self.sources.len(),
            healthy: self.sources.len() - failed,
            failed,
        }
    }

    pub fn upstreams_report(&self) -> UpstreamsReport {
        let mut clusters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut instances = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            clusters.entry(source.cluster.clone()).or_default().push(source.name.clone());

            instances.push(UpstreamInstance {
                name: source.name.clone(),
                cluster: source.cluster.clone(),
                error: source.last_error.clone(),
                last_success: source.last_success,
            });
        }

        UpstreamsReport { counters: self.counters(), instances, clusters }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn store(upstreams: &[(&str, Option<&str>)]) -> SnapshotStore {
        let upstreams: Vec<UpstreamSettings> = upstreams
            .iter()
            .map(|(name, cluster)| UpstreamSettings {
                name: name.to_string(),
                uri: Url::parse("http://localhost:9093").unwrap(),
                cluster: cluster.map(str::to_string),
            })
            .collect();

        SnapshotStore::new(&upstreams)
    }

    fn group(polled_at: &str) -> RawAlertGroup {
        RawAlertGroup { alerts: vec![], polled_at: ts(polled_at) }
    }

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn snapshot_is_sorted_by_upstream_name() {
        let store = store(&[("zulu", None), ("alpha", None), ("mike", None)]);

        let snapshot = store.snapshot();
        let names: Vec<&str> =
            snapshot.sources.iter().map(|source| source.name.as_str()).collect();

        assert_eq!(names, vec!["alpha", "mike", "zulu"]);
    }

    #[test]
    fn replace_installs_payload_and_clears_error() {
        let store = store(&[("am1", None)]);

        store.mark_failure("am1", String::from("connection refused"));
        store.replace("am1", group("2024-05-01T12:00:00Z"));

        let snapshot = store.snapshot();
        assert!(snapshot.sources[0].group.is_some());
        assert_eq!(snapshot.sources[0].last_error, None);
        assert_eq!(snapshot.sources[0].last_success, Some(ts("2024-05-01T12:00:00Z")));
    }

    #[test]
    fn failure_keeps_the_stale_payload() {
        let store = store(&[("am1", None)]);

        store.replace("am1", group("2024-05-01T12:00:00Z"));
        store.mark_failure("am1", String::from("gateway timeout"));

        let snapshot = store.snapshot();
        assert!(snapshot.sources[0].group.is_some(), "stale data must survive a failed poll");
        assert_eq!(snapshot.sources[0].last_error.as_deref(), Some("gateway timeout"));
    }

    #[test]
    fn unknown_upstreams_are_ignored() {
        let store = store(&[("am1", None)]);

        store.replace("intruder", group("2024-05-01T12:00:00Z"));
        store.mark_failure("intruder", String::from("nope"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.sources.len(), 1);
        assert!(snapshot.sources[0].group.is_none());
    }

    #[test]
    fn counters_track_failed_upstreams() {
        let store = store(&[("am1", None), ("am2", None), ("am3", None)]);

        store.replace("am1", group("2024-05-01T12:00:00Z"));
        store.mark_failure("am2", String::from("boom"));

        assert_eq!(
            store.snapshot().counters(),
            UpstreamCounters { total: 3, healthy: 2, failed: 1 }
        );
    }

    #[test]
    fn report_groups_cluster_members() {
        let store = store(&[("am1", Some("prod")), ("am2", Some("prod")), ("solo", None)]);

        let report = store.snapshot().upstreams_report();

        assert_eq!(
            report.clusters.get("prod"),
            Some(&vec![String::from("am1"), String::from("am2")])
        );
        assert_eq!(report.clusters.get("solo"), Some(&vec![String::from("solo")]));
        assert_eq!(report.instances.len(), 3);
    }

    #[test]
    fn concurrent_writers_land_in_their_own_slots() {
        let store = store(&[("am1", None), ("am2", None), ("am3", None)]);
        let store_ref = &store;

        std::thread::scope(|scope| {
            for name in ["am1", "am2", "am3"] {
                scope.spawn(move || {
                    for _ in 0..100 {
                        store_ref.replace(name, group("2024-05-01T12:00:00Z"));
                        store_ref.mark_failure(name, String::from("flap"));
                    }
                    store_ref.replace(name, group("2024-05-01T12:01:00Z"));
                });
            }
        });

        for source in store.snapshot().sources {
            assert!(source.group.is_some());
            assert_eq!(source.last_error, None);
            assert_eq!(source.last_success, Some(ts("2024-05-01T12:01:00Z")));
        }
    }
}
