// crates/client/src/lib.rs
//! HTTP side of the geoapi SDK.
//!
//! Provides:
//! - `ClientConfig`: TOML + environment configuration
//! - `HttpTransport`: blocking, api-key signed round trips
//! - `ApiClient`: the `JobApi` implementation the job core drives
//! - `workflows`: submit-and-wait helpers

pub mod config;
pub mod endpoints;
pub mod http;
pub mod workflows;

pub use config::{ClientConfig, ConfigError, PollOverride, PollingConfig, TrackerSettings};
pub use endpoints::ApiClient;
pub use http::HttpTransport;
pub use workflows::{export_and_wait, import_and_wait, run_batch_sql, ImportSource, ImportedTable};
