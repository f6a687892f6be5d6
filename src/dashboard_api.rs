//! the http api the dashboard ui polls
//!
//! Three endpoints, `/alerts.json`, `/autocomplete.json` and
//! `/counters.json`. Every request runs a full render cycle over the
//! current snapshot, not just the polls: the ui always sees artifacts
//! derived from the freshest data the store holds.

use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{extract::Query, routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    alert::CanonicalAlert,
    color::LabelColor,
    counters::LabelCounter,
    render_cycle::{RenderArtifacts, RenderCycle},
    settings::Settings,
    snapshot_store::UpstreamsReport,
};

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardApiSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl DashboardApiSettings {
    pub fn global() -> &'static Self {
        &Settings::global().dashboard_api
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// body of `GET /alerts.json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertsResponse {
    timestamp: DateTime<Utc>,
    upstreams: UpstreamsReport,
    alerts: Vec<CanonicalAlert>,
    colors: BTreeMap<String, BTreeMap<String, LabelColor>>,
    total_alerts: usize,
    skipped_alerts: usize,
}

fn alerts_response(artifacts: RenderArtifacts) -> AlertsResponse {
    AlertsResponse {
        timestamp: Utc::now(),
        upstreams: artifacts.upstreams,
        total_alerts: artifacts.alerts.len(),
        alerts: artifacts.alerts,
        colors: artifacts.colors,
        skipped_alerts: artifacts.skipped,
    }
}

async fn alerts(Extension(cycle): Extension<Arc<RenderCycle>>) -> Json<AlertsResponse> {
    Json(alerts_response(cycle.run()))
}

/// body of `GET /counters.json`
#[derive(Debug, Serialize)]
struct CountersResponse {
    total: usize,
    counters: Vec<LabelCounter>,
}

fn counters_response(artifacts: RenderArtifacts) -> CountersResponse {
    CountersResponse { total: artifacts.alerts.len(), counters: artifacts.counters }
}

async fn counters(Extension(cycle): Extension<Arc<RenderCycle>>) -> Json<CountersResponse> {
    Json(counters_response(cycle.run()))
}

#[derive(Debug, Deserialize)]
struct AutocompleteQuery {
    #[serde(default)]
    term: String,
}

/// case-insensitive substring filter over the token list
fn filter_tokens(tokens: Vec<String>, term: &str) -> Vec<String> {
    if term.is_empty() {
        return tokens;
    }

    let needle = term.to_lowercase();
    tokens.into_iter().filter(|token| token.to_lowercase().contains(&needle)).collect()
}

async fn autocomplete(
    Extension(cycle): Extension<Arc<RenderCycle>>,
    Query(query): Query<AutocompleteQuery>,
) -> Json<Vec<String>> {
    Json(filter_tokens(cycle.run().autocomplete, &query.term))
}

pub async fn run_dashboard_api(cycle: Arc<RenderCycle>) -> Result<()> {
    let addr = DashboardApiSettings::global().to_socket_addr();

    let app = Router::new()
        .route("/alerts.json", get(alerts))
        .route("/autocomplete.json", get(autocomplete))
        .route("/counters.json", get(counters))
        .layer(Extension(cycle));

    tracing::info!("dashboard api listening on {addr}");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("dashboard api crashed")?;

    Ok(())
}
