//! Error types shared by simulated devices and their adapters.
//!
//! Devices never fail on commands or ticks; errors only arise at the field
//! boundary (looking up or writing a named field) and in transports. The
//! protocol layer decides how each variant is surfaced to a client:
//!
//! - **`FieldNotFound`**: the name is not part of the record's fixed field set.
//! - **`ReadOnly`**: the field exists but its access mode forbids external writes.
//! - **`InvalidValue`** / **`TypeMismatch`**: the value could not be accepted for
//!   the field's declared type, range or allowed-value set.
//! - **`Transport`** / **`Io`**: an outbound stream could not be delivered.

use thiserror::Error;

/// Convenience alias for results using the simulation error type.
pub type SimResult<T> = std::result::Result<T, SimError>;

/// Primary error type for device simulations.
#[derive(Error, Debug)]
pub enum SimError {
    /// Lookup of a name outside the record's fixed field set.
    #[error("No field with name {0}")]
    FieldNotFound(String),

    /// External write attempted on a read-only field.
    #[error("Field {0} is read-only")]
    ReadOnly(String),

    /// The value has the right shape but is not acceptable for the field.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field being written
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The value's type does not match the field's declared type.
    #[error("Type mismatch for {field}: expected {expected}")]
    TypeMismatch {
        /// Field being written
        field: String,
        /// Declared value type of the field
        expected: String,
    },

    /// An outbound transport refused or dropped a message batch.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Standard I/O failure (sockets, files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Shorthand for [`SimError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
