//! Prometheus file-based service discovery for NetBox.
//!
//! This crate fetches devices and virtual machines from the NetBox REST API
//! and writes them as Prometheus `file_sd_configs` target groups.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   NetBox API    │────>│     Mapping     │────>│  Atomic writer  │
//! │  (paginated)    │     │ (target groups) │     │ (tmp + rename)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! A run is stateless: it builds the full document from scratch and only
//! replaces the output once everything was fetched. Scheduling is left to
//! the caller (cron, systemd timer, a shell loop).
//!
//! # Usage
//!
//! ```bash
//! netbox-sd https://netbox.example.com "$NETBOX_TOKEN" /etc/prometheus/sd/netbox.json
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod config;
pub mod error;
pub mod exporter;
pub mod inventory;
pub mod mapping;
pub mod writer;

pub use client::NetBoxClient;
pub use config::ExporterConfig;
pub use error::ExporterError;
pub use exporter::{Exporter, RunSummary, run};
pub use mapping::TargetMapper;
