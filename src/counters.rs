//! per-label hit counters for the dashboard's distribution bars
//!
//! For every label name in view the dashboard shows how the current alerts
//! spread over its values as a stacked percentage bar. Receivers are
//! counted under the reserved [RECEIVER_LABEL] pseudo label, mirroring the
//! color assignment.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{alert::CanonicalAlert, color::RECEIVER_LABEL};

/// hit counts of every observed value of one label name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCounter {
    pub name: String,
    pub values: Vec<LabelValueCount>,
    /// total hits of this label name over the whole alert set
    pub hits: usize,
}

/// one value's share of its label's hits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelValueCount {
    pub value: String,
    /// the ready-made `name=value` filter the dashboard applies on click
    pub raw: String,
    pub hits: usize,
    /// rounded share of the label's total hits
    pub percent: i32,
    /// sum of the percents before this value, positions the bar segment
    pub offset: i32,
}

/// count every label pair of the canonical set, plus every receiver
///
/// One linear pass. Counters come out sorted by label name and their
/// values by value string, offsets accumulating in that order, so an
/// unchanged alert set always serializes to the same payload.
pub fn count_labels(alerts: &[CanonicalAlert]) -> Vec<LabelCounter> {
    let mut hits: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();

    for alert in alerts {
        for (name, value) in &alert.labels {
            *hits.entry(name).or_default().entry(value).or_default() += 1;
        }
        *hits.entry(RECEIVER_LABEL).or_default().entry(&alert.receiver).or_default() += 1;
    }

    hits.into_iter().map(|(name, values)| counter_from(name, &values)).collect()
}

fn counter_from(name: &str, value_hits: &BTreeMap<&str, usize>) -> LabelCounter {
    let total: usize = value_hits.values().sum();

    let mut offset = 0_i32;
    let values = value_hits
        .iter()
        .map(|(value, hits)| {
            let percent = (*hits as f64 / total as f64 * 100.0).round() as i32;
            let count = LabelValueCount {
                value: value.to_string(),
                raw: format!("{name}={value}"),
                hits: *hits,
                percent,
                offset,
            };
            offset += percent;
            count
        })
        .collect();

    LabelCounter { name: name.to_string(), values, hits: total }
}
