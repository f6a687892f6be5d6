//! one render cycle: snapshot, dedup, index, colorize, count
//!
//! The dashboard derives everything it shows from scratch on every
//! refresh. A cycle reads the current snapshot and rebuilds the canonical
//! alert set, the autocomplete index, the color map and the label counters
//! in one synchronous pass, so a reader can never observe a half-built
//! artifact. Freshness over incremental cleverness.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use prometheus::{
    exponential_buckets, histogram_opts, opts, register_histogram, register_int_counter,
    register_int_gauge, Histogram, IntCounter, IntGauge,
};

use crate::{
    alert::CanonicalAlert,
    autocomplete::build_index,
    color::{ColorCache, LabelColor},
    counters::{count_labels, LabelCounter},
    dedup::{dedup, DedupResult},
    settings::LabelSettings,
    snapshot_store::{SnapshotStore, UpstreamsReport},
};

/// everything one pass produced, built fresh and returned by value
#[derive(Debug, PartialEq)]
pub struct RenderArtifacts {
    /// deduplicated alerts, sorted by dedup key
    pub alerts: Vec<CanonicalAlert>,
    /// sorted search suggestion tokens
    pub autocomplete: Vec<String>,
    /// label name to value to color, the whole cache
    pub colors: BTreeMap<String, BTreeMap<String, LabelColor>>,
    /// per-label hit distribution of the canonical set
    pub counters: Vec<LabelCounter>,
    /// upstream health as of the snapshot the pass consumed
    pub upstreams: UpstreamsReport,
    /// malformed raw alerts dropped during dedup
    pub skipped: usize,
}

/// the long-lived object driving passes over the store
///
/// Owns the only cross-cycle mutable state, the color cache, behind a
/// single lock so callers may run cycles from concurrent request handlers.
#[derive(Debug)]
pub struct RenderCycle {
    store: Arc<SnapshotStore>,
    colors: Mutex<ColorCache>,
    labels: LabelSettings,
    metrics: &'static CycleMetrics,
}

impl RenderCycle {
    pub fn new(store: Arc<SnapshotStore>, labels: LabelSettings) -> Result<Self, prometheus::Error> {
        Ok(Self {
            store,
            colors: Mutex::new(ColorCache::new()),
            labels,
            metrics: CycleMetrics::global()?,
        })
    }

    /// run one full pass and hand the artifacts to the caller
    ///
    /// Per-alert problems are absorbed into the skipped count inside dedup,
    /// so a pass always completes; previously returned artifacts are never
    /// touched.
    pub fn run(&self) -> RenderArtifacts {
        let started = Instant::now();

        let snapshot = self.store.snapshot();
        let deduped = dedup(&snapshot, &self.labels);
        let autocomplete = build_index(&deduped.alerts);
        let colors = self.colors.lock().colorize(&deduped.alerts, &self.labels.color_unique);
        let counters = count_labels(&deduped.alerts);
        let upstreams = snapshot.upstreams_report();

        self.metrics.record_cycle(started.elapsed().as_secs_f64(), &deduped);

        RenderArtifacts {
            alerts: deduped.alerts,
            autocomplete,
            colors,
            counters,
            upstreams,
            skipped: deduped.skipped,
        }
    }
}

/// prometheus meters for the render cycle
#[derive(Debug)]
struct CycleMetrics {
    /// total number of passes run
    cycles: IntCounter,
    /// malformed raw alerts dropped, cumulative over all passes
    skipped_alerts: IntCounter,
    /// size of the canonical set after the most recent pass
    canonical_alerts: IntGauge,
    /// wall time of one full pass
    duration: Histogram,
}

impl CycleMetrics {
    /// the process-wide instance, registered on first use
    fn global() -> Result<&'static Self, prometheus::Error> {
        static METRICS: OnceCell<CycleMetrics> = OnceCell::new();
        METRICS.get_or_try_init(Self::new)
    }

    fn new() -> Result<Self, prometheus::Error> {
        let cycles = register_int_counter!(opts!(
            "cycles_total",
            "total number of render cycles run"
        )
        .namespace("klaxon")
        .subsystem("render"))?;

        let skipped_alerts = register_int_counter!(opts!(
            "skipped_alerts_total",
            "malformed raw alerts dropped during dedup"
        )
        .namespace("klaxon")
        .subsystem("render"))?;

        let canonical_alerts = register_int_gauge!(opts!(
            "canonical_alerts",
            "canonical alerts produced by the most recent render cycle"
        )
        .namespace("klaxon")
        .subsystem("render"))?;

        let duration = register_histogram!(histogram_opts!(
            "cycle_duration_seconds",
            "wall time of one render cycle",
            exponential_buckets(0.0001, 2., 14)?
        )
        .namespace("klaxon")
        .subsystem("render"))?;

        Ok(Self { cycles, skipped_alerts, canonical_alerts, duration })
    }

    fn record_cycle(&self, seconds: f64, deduped: &DedupResult) {
        self.cycles.inc();
        self.skipped_alerts.inc_by(deduped.skipped as u64);
        self.canonical_alerts.set(deduped.alerts.len() as i64);
        self.duration.observe(seconds);
    }
}
