//! the klaxon daemon: upstream pollers, render cycle, dashboard api and
//! telemetry endpoint

use std::sync::Arc;

use anyhow::{Context, Result};

use klaxon::{
    alertmanager_poller, dashboard_api, log, render_cycle::RenderCycle, settings::Settings,
    snapshot_store::SnapshotStore, telemetry_endpoint,
};

/// exit the complete program if one thread panics
fn setup_panic_handler() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_handler();

    log::setup_logging().context("could not setup logging")?;

    let settings = Settings::global();

    let store = Arc::new(SnapshotStore::new(&settings.upstreams));
    let cycle = Arc::new(
        RenderCycle::new(store.clone(), settings.labels.clone())
            .context("failed to register prometheus meters")?,
    );

    alertmanager_poller::spawn_pollers(&store).context("failed to start pollers")?;

    tokio::spawn(async {
        #[allow(clippy::expect_used)]
        dashboard_api::run_dashboard_api(cycle)
            .await
            .expect("dashboard api failed to start or crashed");
    });

    telemetry_endpoint::run_telemetry_endpoint().await
}
