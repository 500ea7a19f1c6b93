//! Core types shared by tickit device simulations.
//!
//! - [`field`]: typed, introspectable key/value records with access metadata
//! - [`device`]: the scheduler boundary (`SimTime`, `DeviceUpdate`, `Device`)
//! - [`error`]: the `SimError` taxonomy surfaced to protocol adapters

pub mod device;
pub mod error;
pub mod field;

pub use device::{Device, DeviceUpdate, SimTime};
pub use error::{SimError, SimResult};
pub use field::{AccessMode, Field, FieldMetadata, FieldSet, FieldStore, FieldValue, ValueType};
