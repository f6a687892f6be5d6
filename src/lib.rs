//! backend engine of a prometheus alertmanager dashboard
//!
//! Features:
//! - polls multiple alertmanager upstreams and collapses replica copies of
//!   the same alert into one canonical record
//! - derives a sorted search autocomplete vocabulary from the live alert set
//! - counts how the alert set distributes over each label's values for the
//!   dashboard's per-label bars
//! - assigns stable colors to label values and receivers so the dashboard
//!   renders the same value with the same color across runs

pub mod alert;
pub mod alertmanager_poller;
pub mod autocomplete;
pub mod color;
pub mod counters;
pub mod dashboard_api;
pub mod dedup;
pub mod log;
pub mod pairmap;
pub mod render_cycle;
pub mod settings;
pub mod snapshot_store;
pub mod telemetry_endpoint;
