//! # chargelink
//!
//! OCPP 1.6J Central System core. Terminates WebSocket connections from EV
//! charge points, speaks the OCPP-J call/result protocol, tracks each
//! charger's operational status, and records every exchanged message and
//! state transition to a time-series store for dashboard consumption.
//!
//! ## Layout
//!
//! - **protocol**: OCPP-J envelope codec and typed action payloads
//! - **session**: connection handles and the identity→connection registry
//! - **dispatch**: action routing, responses, pending server-initiated calls
//! - **domain**: charger status records and the transition function
//! - **telemetry**: append-only log/state points through a bounded queue
//! - **server**: the WebSocket accept loop and per-connection lifecycle
//! - **config / support**: TOML configuration, errors, graceful shutdown

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod protocol;
pub mod server;
pub mod session;
pub mod support;
pub mod telemetry;

pub use config::{default_config_path, AppConfig};
pub use dispatch::Dispatcher;
pub use server::OcppServer;
