//! `mnemos-runtime` – Perception memory as the rest of the robot sees it.
//!
//! # Modules
//!
//! - [`integration`] – [`PerceptionMemory`][integration::PerceptionMemory]:
//!   the facade perception, planning and navigation call into.  Records
//!   detected objects, scenes and people; answers similarity and proximity
//!   queries; extracts coordinates for navigation goals.
//! - [`config`] – [`MemoryConfig`][config::MemoryConfig]: persisted settings
//!   in `~/.mnemos/config.toml` with `MNEMOS_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod config;
pub mod integration;
pub mod telemetry;

pub use config::{ConfigError, MemoryConfig};
pub use integration::PerceptionMemory;
pub use telemetry::{TracerProviderGuard, init_tracing};
