//! # tickit-devices
//!
//! Simulated beamline devices. Currently a Dectris Eiger detector served over
//! its SIMPLON REST API, pushing frames on the legacy JSON and CBOR streams.
//!
//! ## Crate Structure
//!
//! - **`sim_core`**: field model, `SimError`, and the `Device` scheduler boundary
//! - **`sim_driver_eiger`**: the Eiger settings, status, streams and acquisition state machine
//! - **`sim_server`**: REST and push adapters, the device runner, the component launcher
//! - **`config`**: layered Figment configuration for the `tickit-devices` binary
//! - **`logging`**: tracing subscriber setup

pub mod config;
pub mod logging;

pub use sim_core;
pub use sim_driver_eiger;
pub use sim_server;

pub use config::SimConfig;
