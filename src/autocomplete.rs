//! derives search suggestions from the canonical alert set
//!
//! The dashboard search box completes tokens like `alertname=HighCPU` or
//! `@state=active`. The index is vocabulary only: it is rebuilt from
//! scratch every render cycle and no token remembers which alert produced
//! it.

use std::collections::{BTreeSet, HashMap};

use crate::alert::CanonicalAlert;

/// build the sorted, deduplicated suggestion list for one alert set
///
/// Equality tokens `name=value` cover every label pair in view, `@state=`
/// and `@receiver=` every observed state and receiver. The inequality
/// token `name!=value` is only offered when at least one alert does not
/// carry that exact pair, otherwise filtering by it could never change
/// the view.
pub fn build_index(alerts: &[CanonicalAlert]) -> Vec<String> {
    let total = alerts.len();

    let mut carriers: HashMap<(&str, &str), usize> = HashMap::new();
    for alert in alerts {
        for (name, value) in &alert.labels {
            *carriers.entry((name, value)).or_insert(0) += 1;
        }
    }

    let mut tokens = BTreeSet::new();

    for alert in alerts {
        tokens.insert(format!("@state={}", alert.state.as_str()));
        tokens.insert(format!("@receiver={}", alert.receiver));
    }

    for ((name, value), carrying) in &carriers {
        tokens.insert(format!("{name}={value}"));
        if *carrying < total {
            tokens.insert(format!("{name}!={value}"));
        }
    }

    tokens.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::alert::{AlertState, DedupKey};

    fn canonical(labels: &[(&str, &str)], receiver: &str, state: AlertState) -> CanonicalAlert {
        let labels: BTreeMap<String, String> =
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        CanonicalAlert {
            id: DedupKey::new(&labels, receiver),
            labels,
            annotations: BTreeMap::new(),
            receiver: receiver.to_string(),
            state,
            starts_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            sources: BTreeSet::from([String::from("am1")]),
        }
    }

    #[test]
    fn every_label_pair_yields_an_equality_token() {
        let alerts = [
            canonical(&[("alertname", "HighCPU"), ("cluster", "prod")], "pager", AlertState::Active),
            canonical(&[("alertname", "DiskFull")], "pager", AlertState::Active),
        ];

        let index = build_index(&alerts);

        assert!(index.contains(&String::from("alertname=HighCPU")));
        assert!(index.contains(&String::from("alertname=DiskFull")));
        assert!(index.contains(&String::from("cluster=prod")));
    }

    #[test]
    fn negative_tokens_cover_values_some_alert_is_missing() {
        let alerts = [
            canonical(&[("cluster", "prod")], "pager", AlertState::Active),
            canonical(&[("cluster", "dev")], "pager", AlertState::Active),
        ];

        let index = build_index(&alerts);

        // each alert lacks the other's value, so both negations are offered
        assert!(index.contains(&String::from("cluster!=prod")));
        assert!(index.contains(&String::from("cluster!=dev")));
    }

    #[test]
    fn universally_carried_pairs_get_no_negative_token() {
        let alerts = [
            canonical(&[("cluster", "prod"), ("job", "node")], "pager", AlertState::Active),
            canonical(&[("cluster", "prod")], "pager", AlertState::Active),
        ];

        let index = build_index(&alerts);

        assert!(!index.contains(&String::from("cluster!=prod")));
        // "job" is absent from the second alert, which counts as not carrying it
        assert!(index.contains(&String::from("job!=node")));
    }

    #[test]
    fn states_and_receivers_become_pseudo_label_tokens() {
        let alerts = [
            canonical(&[], "pager", AlertState::Active),
            canonical(&[], "email", AlertState::Suppressed),
        ];

        let index = build_index(&alerts);

        assert!(index.contains(&String::from("@state=active")));
        assert!(index.contains(&String::from("@state=suppressed")));
        assert!(!index.contains(&String::from("@state=unprocessed")));
        assert!(index.contains(&String::from("@receiver=pager")));
        assert!(index.contains(&String::from("@receiver=email")));
    }

    #[test]
    fn index_is_sorted_and_free_of_duplicates() {
        let alerts = [
            canonical(&[("cluster", "prod"), ("job", "node")], "pager", AlertState::Active),
            canonical(&[("cluster", "prod"), ("job", "blackbox")], "pager", AlertState::Active),
            canonical(&[("cluster", "dev")], "email", AlertState::Suppressed),
        ];

        let index = build_index(&alerts);

        assert!(index.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn empty_alert_set_yields_an_empty_index() {
        assert!(build_index(&[]).is_empty());
    }
}
