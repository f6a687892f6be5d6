//! polls each configured alertmanager and feeds the snapshot store
//!
//! One task per upstream and no coordination between them: every poller
//! owns exactly one store slot. A failed poll records the error, keeps the
//! slot's previous alerts in view and backs off exponentially until the
//! upstream recovers.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, histogram_opts, opts, register_histogram_vec, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounterVec, IntGaugeVec,
};
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::{
    alert::{AlertState, RawAlert, RawAlertGroup},
    settings::{Settings, UpstreamSettings},
    snapshot_store::SnapshotStore,
};

/// one alert as served by `GET /api/v2/alerts`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GettableAlert {
    #[serde(default)]
    labels: IndexMap<String, String>,
    #[serde(default)]
    annotations: IndexMap<String, String>,
    #[serde(default)]
    receivers: Vec<Receiver>,
    starts_at: DateTime<Utc>,
    #[serde(default)]
    status: AlertStatus,
    #[serde(default)]
    fingerprint: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AlertStatus {
    #[serde(default)]
    state: AlertState,
}

#[derive(Clone, Debug, Deserialize)]
struct Receiver {
    name: String,
}

/// flatten a v2 payload into the store's raw group representation
///
/// An alert listed with several receivers is routed several times and
/// becomes one [RawAlert] per receiver; one with no receiver at all cannot
/// be keyed downstream and is dropped here.
fn to_raw_group(
    upstream: &str,
    payload: Vec<GettableAlert>,
    polled_at: DateTime<Utc>,
) -> RawAlertGroup {
    let mut alerts = Vec::with_capacity(payload.len());

    for alert in payload {
        if alert.receivers.is_empty() {
            tracing::debug!(
                "alert {} from {upstream} names no receiver, dropping",
                alert.fingerprint
            );
            continue;
        }

        for receiver in &alert.receivers {
            alerts.push(RawAlert {
                labels: alert.labels.clone(),
                annotations: alert.annotations.clone(),
                receiver: receiver.name.clone(),
                state: alert.status.state,
                starts_at: alert.starts_at,
                fingerprint: alert.fingerprint.clone(),
            });
        }
    }

    RawAlertGroup { alerts, polled_at }
}

/// the upstream's v2 alerts endpoint, keeping any path prefix the
/// configured uri carries
fn alerts_url(base: &Url) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(["api", "v2", "alerts"]);
    }

    url
}

/// prometheus meters shared by all pollers
#[derive(Debug)]
struct PollerMetrics {
    /// total number of poll attempts per upstream
    polls: IntCounterVec,
    /// number of failed poll attempts per upstream
    poll_errors: IntCounterVec,
    /// raw alerts collected by the most recent successful poll
    collected_alerts: IntGaugeVec,
    /// round trip time of one successful poll
    duration: HistogramVec,
}

impl PollerMetrics {
    /// the process-wide instance, registered on first use
    fn global() -> Result<&'static Self, prometheus::Error> {
        static METRICS: OnceCell<PollerMetrics> = OnceCell::new();
        METRICS.get_or_try_init(Self::new)
    }

    fn new() -> Result<Self, prometheus::Error> {
        let polls = register_int_counter_vec!(
            opts!("polls_total", "total number of poll attempts")
                .namespace("klaxon")
                .subsystem("poller"),
            &["upstream"]
        )?;

        let poll_errors = register_int_counter_vec!(
            opts!("poll_errors_total", "number of failed poll attempts")
                .namespace("klaxon")
                .subsystem("poller"),
            &["upstream"]
        )?;

        let collected_alerts = register_int_gauge_vec!(
            opts!(
                "collected_alerts",
                "raw alerts collected by the most recent successful poll"
            )
            .namespace("klaxon")
            .subsystem("poller"),
            &["upstream"]
        )?;

        let duration = register_histogram_vec!(
            histogram_opts!(
                "poll_duration_seconds",
                "round trip time of one successful poll",
                exponential_buckets(0.01, 2., 12)?
            )
            .namespace("klaxon")
            .subsystem("poller"),
            &["upstream"]
        )?;

        Ok(Self { polls, poll_errors, collected_alerts, duration })
    }

    fn record_attempt(&self, upstream: &str) {
        self.polls.with_label_values(&[upstream]).inc();
    }

    fn record_success(&self, upstream: &str, collected: usize, seconds: f64) {
        self.collected_alerts.with_label_values(&[upstream]).set(collected as i64);
        self.duration.with_label_values(&[upstream]).observe(seconds);
    }

    fn record_failure(&self, upstream: &str) {
        self.poll_errors.with_label_values(&[upstream]).inc();
    }
}

/// the polling task for one upstream
#[derive(Debug)]
pub struct Poller {
    upstream: UpstreamSettings,
    url: Url,
    store: Arc<SnapshotStore>,
    client: reqwest::Client,
    poll_interval: Duration,
    metrics: &'static PollerMetrics,
}

impl Poller {
    pub fn new(
        upstream: UpstreamSettings,
        store: Arc<SnapshotStore>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(poll_timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            url: alerts_url(&upstream.uri),
            upstream,
            store,
            client,
            poll_interval,
            metrics: PollerMetrics::global().context("failed to register prometheus meters")?,
        })
    }

    pub async fn run(self) {
        let mut backoff = self.backoff();

        loop {
            self.metrics.record_attempt(&self.upstream.name);

            let delay = match self.poll_once().await {
                Ok(()) => {
                    backoff.reset();
                    self.poll_interval
                }
                Err(err) => {
                    tracing::warn!("poll of {} failed: {err:#}", self.upstream.name);
                    self.metrics.record_failure(&self.upstream.name);
                    self.store.mark_failure(&self.upstream.name, format!("{err:#}"));

                    backoff.next_backoff().unwrap_or(self.poll_interval)
                }
            };

            tokio::time::sleep(delay).await;
        }
    }

    async fn poll_once(&self) -> Result<()> {
        let started = Instant::now();

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("upstream returned an error status")?;

        let payload: Vec<GettableAlert> =
            response.json().await.context("invalid alerts payload")?;

        let group = to_raw_group(&self.upstream.name, payload, Utc::now());
        tracing::debug!("collected {} alerts from {}", group.alerts.len(), self.upstream.name);

        self.metrics.record_success(
            &self.upstream.name,
            group.alerts.len(),
            started.elapsed().as_secs_f64(),
        );
        self.store.replace(&self.upstream.name, group);

        Ok(())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::default()
            .with_max_interval(self.poll_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// start one polling task per configured upstream
pub fn spawn_pollers(store: &Arc<SnapshotStore>) -> Result<()> {
    let settings = Settings::global();

    for upstream in &settings.upstreams {
        let poller = Poller::new(
            upstream.clone(),
            store.clone(),
            settings.poll_interval,
            settings.poll_timeout,
        )
        .with_context(|| format!("failed to set up poller for {}", upstream.name))?;

        tokio::spawn(poller.run());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2_FIXTURE: &str = r#"[
      {
        "annotations": { "summary": "CPU is hot" },
        "endsAt": "2024-05-01T13:00:00.000Z",
        "fingerprint": "d38dba2b22e2f2a5",
        "receivers": [{ "name": "pager" }],
        "startsAt": "2024-05-01T12:00:00.000Z",
        "updatedAt": "2024-05-01T12:04:00.000Z",
        "status": { "state": "suppressed", "silencedBy": ["abc"], "inhibitedBy": [] },
        "labels": { "alertname": "HighCPU", "cluster": "prod", "instance": "am1" },
        "generatorURL": "http://prometheus/graph"
      }
    ]"#;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn v2_payload_decodes_from_a_real_fixture() {
        let payload: Vec<GettableAlert> = serde_json::from_str(V2_FIXTURE).unwrap();

        assert_eq!(payload.len(), 1);
        let alert = &payload[0];
        assert_eq!(alert.labels.get("alertname").unwrap(), "HighCPU");
        assert_eq!(alert.annotations.get("summary").unwrap(), "CPU is hot");
        assert_eq!(alert.receivers[0].name, "pager");
        assert_eq!(alert.status.state, AlertState::Suppressed);
        assert_eq!(alert.starts_at, ts("2024-05-01T12:00:00Z"));
        assert_eq!(alert.fingerprint, "d38dba2b22e2f2a5");
    }

    #[test]
    fn missing_optional_fields_decode_to_defaults() {
        let bare = r#"[{ "labels": { "alertname": "Bare" }, "startsAt": "2024-05-01T12:00:00Z" }]"#;

        let payload: Vec<GettableAlert> = serde_json::from_str(bare).unwrap();

        let alert = &payload[0];
        assert!(alert.annotations.is_empty());
        assert!(alert.receivers.is_empty());
        assert_eq!(alert.status.state, AlertState::Unprocessed);
        assert_eq!(alert.fingerprint, "");
    }

    #[test]
    fn multi_receiver_alerts_become_one_raw_alert_per_receiver() {
        let mut alert: GettableAlert =
            serde_json::from_str::<Vec<GettableAlert>>(V2_FIXTURE).unwrap().remove(0);
        alert.receivers =
            vec![Receiver { name: String::from("pager") }, Receiver { name: String::from("email") }];

        let group = to_raw_group("am1", vec![alert], ts("2024-05-01T12:05:00Z"));

        assert_eq!(group.alerts.len(), 2);
        assert_eq!(group.alerts[0].receiver, "pager");
        assert_eq!(group.alerts[1].receiver, "email");
        assert_eq!(group.alerts[0].labels, group.alerts[1].labels);
        assert_eq!(group.polled_at, ts("2024-05-01T12:05:00Z"));
    }

    #[test]
    fn receiverless_alerts_are_dropped_at_mapping() {
        let mut alert: GettableAlert =
            serde_json::from_str::<Vec<GettableAlert>>(V2_FIXTURE).unwrap().remove(0);
        alert.receivers = vec![];

        let group = to_raw_group("am1", vec![alert], ts("2024-05-01T12:05:00Z"));

        assert!(group.alerts.is_empty());
    }

    #[test]
    fn alerts_url_appends_the_v2_path() {
        let bare = Url::parse("http://am1:9093").unwrap();
        assert_eq!(alerts_url(&bare).as_str(), "http://am1:9093/api/v2/alerts");

        let prefixed = Url::parse("http://proxy/alertmanager").unwrap();
        assert_eq!(alerts_url(&prefixed).as_str(), "http://proxy/alertmanager/api/v2/alerts");

        let trailing = Url::parse("http://am1:9093/am/").unwrap();
        assert_eq!(alerts_url(&trailing).as_str(), "http://am1:9093/am/api/v2/alerts");
    }
}
