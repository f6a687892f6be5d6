//! data structures for alerts, raw as polled and canonical after dedup

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// state of an alert as reported by one alertmanager instance
///
/// variants are declared in ascending severity so [Ord] picks the most
/// severe state when replicas disagree: `active` outranks `suppressed`
/// outranks `unprocessed`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Unprocessed,
    Suppressed,
    Active,
}

impl AlertState {
    /// the string form used in `@state=...` autocomplete tokens
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Unprocessed => "unprocessed",
            AlertState::Suppressed => "suppressed",
            AlertState::Active => "active",
        }
    }
}

/// one alert as seen by a single upstream at poll time
#[derive(Debug, Clone)]
pub struct RawAlert {
    pub labels: IndexMap<String, String>,
    pub annotations: IndexMap<String, String>,
    pub receiver: String,
    pub state: AlertState,
    pub starts_at: DateTime<Utc>,
    /// fingerprint assigned by the reporting alertmanager, only unique per source
    pub fingerprint: String,
}

/// one poll result from one upstream, replaced wholesale on every poll
#[derive(Debug, Clone)]
pub struct RawAlertGroup {
    pub alerts: Vec<RawAlert>,
    pub polled_at: DateTime<Utc>,
}

/// identity of a canonical alert: the projected label set plus the receiver
///
/// two raw alerts with equal keys are copies of the same logical alert and
/// collapse into one [CanonicalAlert]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DedupKey(String);

impl DedupKey {
    /// build a key from an already-projected label map and the receiver
    ///
    /// the map is ordered, so the encoding does not depend on the order in
    /// which labels arrived from the upstream
    pub fn new(labels: &BTreeMap<String, String>, receiver: &str) -> Self {
        let mut key = String::with_capacity(receiver.len() + labels.len() * 20);
        push_segment(&mut key, receiver);

        for (name, value) in labels {
            push_segment(&mut key, name);
            push_segment(&mut key, value);
        }

        Self(key)
    }
}

/// append one segment as `{byte length}:{bytes}`
///
/// the length prefix makes the concatenation unambiguous: a crafted label
/// value cannot fake a segment boundary and collide with a key built from
/// different labels
fn push_segment(key: &mut String, segment: &str) {
    key.push_str(&segment.len().to_string());
    key.push(':');
    key.push_str(segment);
}

/// the deduplicated, cluster-aware representation of one alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAlert {
    pub id: DedupKey,
    /// labels with the configured replica labels already stripped
    pub labels: BTreeMap<String, String>,
    /// annotations unioned over every reporting source
    pub annotations: BTreeMap<String, String>,
    pub receiver: String,
    /// most severe state any source reported
    pub state: AlertState,
    /// earliest start any source observed
    pub starts_at: DateTime<Utc>,
    /// names of every upstream that reported this alert
    pub sources: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_is_the_most_severe_state() {
        assert!(AlertState::Active > AlertState::Suppressed);
        assert!(AlertState::Suppressed > AlertState::Unprocessed);
        assert_eq!(
            AlertState::Suppressed.max(AlertState::Active),
            AlertState::Active
        );
    }

    #[test]
    fn state_uses_lowercase_wire_names() {
        assert_eq!(
            serde_json::from_str::<AlertState>("\"active\"").unwrap(),
            AlertState::Active
        );
        assert_eq!(
            serde_json::to_string(&AlertState::Unprocessed).unwrap(),
            "\"unprocessed\""
        );
    }

    #[test]
    fn dedup_key_ignores_label_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert(String::from("alertname"), String::from("HighCPU"));
        forward.insert(String::from("cluster"), String::from("prod"));

        let mut reversed = BTreeMap::new();
        reversed.insert(String::from("cluster"), String::from("prod"));
        reversed.insert(String::from("alertname"), String::from("HighCPU"));

        assert_eq!(
            DedupKey::new(&forward, "pager"),
            DedupKey::new(&reversed, "pager")
        );
    }

    #[test]
    fn dedup_key_separates_receiver_and_labels() {
        let labels = BTreeMap::new();

        let mut labeled = BTreeMap::new();
        labeled.insert(String::from("pager"), String::new());

        // a receiver-only key must not collide with a label-only key
        assert_ne!(DedupKey::new(&labels, "pager"), DedupKey::new(&labeled, ""));
    }

    #[test]
    fn dedup_key_distinguishes_values() {
        let mut a = BTreeMap::new();
        a.insert(String::from("cluster"), String::from("prod"));

        let mut b = BTreeMap::new();
        b.insert(String::from("cluster"), String::from("dev"));

        assert_ne!(DedupKey::new(&a, "pager"), DedupKey::new(&b, "pager"));
    }

    #[test]
    fn crafted_label_content_cannot_forge_a_key_collision() {
        let mut split = BTreeMap::new();
        split.insert(String::from("a"), String::from("x"));
        split.insert(String::from("b"), String::from("y"));

        // values carrying bytes that mimic an encoded pair list, in
        // control-character and in digit-colon flavors
        for smuggled in ["x\u{1e}b\u{1f}y", "x1:b1:y"] {
            let mut fused = BTreeMap::new();
            fused.insert(String::from("a"), String::from(smuggled));

            assert_ne!(
                DedupKey::new(&split, "pager"),
                DedupKey::new(&fused, "pager"),
                "value {smuggled:?} must not merge two distinct label sets"
            );
        }
    }
}
