//! `pv-sentinel`: photovoltaic plant monitoring backend.
//!
//! Daily inverter reports (CSV or JSON) are normalized into one canonical
//! record per plant and day, stored with full version history, and compared
//! against a rolling baseline to raise underperformance alerts.
//!
//! Module boundaries (EMBP):
//! - `config`:   environment driven settings
//! - `schema`:   idempotent PostgreSQL DDL
//! - `models`:   domain types shared by every layer
//! - `store`:    persistence seam with PostgreSQL and in-memory backends
//! - `pipeline`: stages, task graphs, orchestrator and schedule
//! - `routes`:   HTTP trigger API

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::Orchestrator;
