use std::{collections::HashSet, time::Duration};

use anyhow::{Context, Result};
use clap::{App, Arg};
use config::Config;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;
use url::Url;

use crate::{
    dashboard_api::DashboardApiSettings, log::LogSettings,
    telemetry_endpoint::TelemetryEndpointSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// configuration problems that must stop the process before any poll runs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("no alertmanager upstreams configured")]
    NoUpstreams,
    #[error("upstream name may not be empty")]
    EmptyUpstreamName,
    #[error("duplicate upstream name `{0}`")]
    DuplicateUpstream(String),
    #[error("empty label name in `labels.{0}`")]
    EmptyLabelName(&'static str),
    #[error("duplicate label name `{1}` in `labels.{0}`")]
    DuplicateLabelName(&'static str, String),
    #[error("label `{0}` is both replica-stripped and unique-colored")]
    StrippedAndColored(String),
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// how often each upstream is polled
    #[serde_as(as = "DurationSeconds<f64>")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// per-request timeout when talking to an upstream
    #[serde_as(as = "DurationSeconds<f64>")]
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: Duration,
    pub upstreams: Vec<UpstreamSettings>,
    #[serde(default)]
    pub labels: LabelSettings,
    pub dashboard_api: DashboardApiSettings,
    #[serde(default)]
    pub log: LogSettings,
    pub telemetry_endpoint: TelemetryEndpointSettings,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(40)
}

/// one alertmanager endpoint to poll
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    pub name: String,
    pub uri: Url,
    /// upstreams sharing a cluster name are replicas reporting copies of the
    /// same alerts; defaults to the upstream name, a cluster of one
    #[serde(default)]
    pub cluster: Option<String>,
}

impl UpstreamSettings {
    pub fn cluster_name(&self) -> &str {
        self.cluster.as_deref().unwrap_or(&self.name)
    }
}

/// label lists consumed by the engine, immutable for the duration of a
/// render cycle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelSettings {
    /// labels that identify one replica of a clustered deployment, stripped
    /// before the dedup key is computed
    #[serde(default)]
    pub replica: Vec<String>,
    /// labels whose values keep a stable unique color
    #[serde(default)]
    pub color_unique: Vec<String>,
}

impl LabelSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (field, list) in [("replica", &self.replica), ("color_unique", &self.color_unique)] {
            let mut seen = HashSet::new();

            for name in list {
                if name.is_empty() {
                    return Err(SettingsError::EmptyLabelName(field));
                }
                if !seen.insert(name.as_str()) {
                    return Err(SettingsError::DuplicateLabelName(field, name.clone()));
                }
            }
        }

        for name in &self.replica {
            if self.color_unique.contains(name) {
                return Err(SettingsError::StrippedAndColored(name.clone()));
            }
        }

        Ok(())
    }
}

impl Settings {
    pub fn global() -> &'static Self {
        SETTINGS.get_or_init(|| {
            match Self::load().context("failed to load config and command line arguments") {
                Ok(settings) => settings,
                Err(err) => {
                    // tracing wasn't setup yet
                    panic!("{:#?}", err);
                }
            }
        })
    }

    fn load() -> Result<Self> {
        let opts = App::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .args([
                Arg::with_name("config")
                    .help("path of config file")
                    .takes_value(true)
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
                Arg::with_name("level")
                    .help("log level")
                    .possible_values(["error", "warn", "info", "debug", "trace"])
                    .ignore_case(true)
                    .takes_value(true)
                    .long("log"),
            ])
            .get_matches();

        let config_path = opts.value_of("config").unwrap();

        let conf = Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix("KLAXON").separator("__"))
            .build()
            .context("can't load config")?;

        let mut settings: Settings = conf.try_deserialize().context("can't load config")?;

        if let Some(level) = opts.value_of("level") {
            settings.log.level = level.to_string();
        }

        settings.validate()?;

        Ok(settings)
    }

    /// reject configurations that could never produce a correct dedup or
    /// color pass, before any poller or listener starts
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.upstreams.is_empty() {
            return Err(SettingsError::NoUpstreams);
        }

        let mut names = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.name.is_empty() {
                return Err(SettingsError::EmptyUpstreamName);
            }
            if !names.insert(upstream.name.as_str()) {
                return Err(SettingsError::DuplicateUpstream(upstream.name.clone()));
            }
        }

        self.labels.validate()
    }
}
