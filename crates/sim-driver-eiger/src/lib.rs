//! Simulated Dectris Eiger detector.
//!
//! The simulation models the 1.8.0 SIMPLON interface of an Eiger X 16M:
//! configuration and status records with field metadata, the acquisition
//! state machine, and streaming of (all-zero) frames in either the legacy
//! multipart format or the CBOR stream2 format.
//!
//! # Modules
//!
//! - [`settings`] - `detector/config` with coupled energy fields and thresholds
//! - [`status`] - `detector/status` and the [`State`] enum
//! - [`stream`] - stream encoders and the `stream/config|status` records
//! - [`monitor`], [`filewriter`] - records of the auxiliary interfaces
//! - [`image`] - simulated frame payloads
//! - [`eiger`] - the [`EigerDevice`] state machine
//!
//! # Example
//!
//! ```rust,ignore
//! use sim_core::{Device, SimTime};
//! use sim_driver_eiger::{EigerDevice, EigerInputs};
//!
//! let mut eiger = EigerDevice::new();
//! eiger.settings_mut().set("trigger_mode", "ints")?;
//! eiger.initialize();
//! eiger.arm();
//! eiger.trigger();
//!
//! let mut time = SimTime::ZERO;
//! while let Some(next) = eiger.update(time, &EigerInputs::default()).call_at {
//!     time = next;
//! }
//! ```

pub mod eiger;
pub mod filewriter;
pub mod image;
pub mod monitor;
pub mod settings;
pub mod status;
pub mod stream;

pub use eiger::{EigerDevice, EigerInputs, EigerOutputs};
pub use image::{FrameBlob, Image};
pub use settings::{EigerSettings, ThresholdConfig, TriggerMode};
pub use status::{EigerStatus, State};
pub use stream::{
    CborStream, HeaderDetail, LegacyStream, StreamEncoder, StreamFormat, StreamMessage,
};
