//! Detector status model.

use chrono::{DateTime, Utc};
use sim_core::field::{FieldMetadata, FieldSet, FieldStore, ValueType};
use sim_core::{Field, FieldValue, SimError, SimResult};
use std::fmt;

/// Detector state as reported by `detector/status/state`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Na,
    Ready,
    Initialize,
    Configure,
    Acquire,
    Idle,
    Test,
    Error,
}

impl State {
    pub const ALL: [State; 8] = [
        Self::Na,
        Self::Ready,
        Self::Initialize,
        Self::Configure,
        Self::Acquire,
        Self::Idle,
        Self::Test,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Na => "na",
            Self::Ready => "ready",
            Self::Initialize => "initialize",
            Self::Configure => "configure",
            Self::Acquire => "acquire",
            Self::Idle => "idle",
            Self::Test => "test",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STATUS_KEYS: &[&str] = &["humidity", "state", "temperature", "time", "error"];

/// Read-only detector status.
///
/// `state` and `time` are held as typed values and only change through the
/// device; every other field is a plain record entry.
#[derive(Debug, Clone)]
pub struct EigerStatus {
    state: State,
    time: DateTime<Utc>,
    fields: FieldSet,
}

impl EigerStatus {
    pub fn new() -> Self {
        let fields = FieldSet::new("detector_status")
            .with("error", Vec::<String>::new(), FieldMetadata::ro(ValueType::StringList))
            .with("temperature", 24.5, FieldMetadata::ro(ValueType::Float).with_units("degC"))
            .with("humidity", 0.2, FieldMetadata::ro(ValueType::Float).with_units("%"))
            .with("dcu_buffer_free", 0.5, FieldMetadata::ro(ValueType::Float))
            .with_keys(STATUS_KEYS);

        Self {
            state: State::Na,
            time: Utc::now(),
            fields,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            tracing::debug!("Eiger state {} -> {}", self.state, state);
        }
        self.state = state;
        self.time = Utc::now();
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn temperature(&self) -> f64 {
        self.fields.float("temperature")
    }

    pub fn humidity(&self) -> f64 {
        self.fields.float("humidity")
    }
}

impl Default for EigerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStore for EigerStatus {
    fn field(&self, name: &str) -> SimResult<Field> {
        match name {
            "state" => Ok(Field::new(
                self.state.as_str(),
                FieldMetadata::ro(ValueType::State)
                    .with_allowed_values(State::ALL.map(State::as_str)),
            )),
            "time" => Ok(Field::new(self.time, FieldMetadata::ro(ValueType::DateTime))),
            _ => self.fields.get(name).cloned(),
        }
    }

    fn write_field(&mut self, name: &str, value: FieldValue) -> SimResult<Vec<String>> {
        match name {
            "state" | "time" => Err(SimError::ReadOnly(name.to_string())),
            _ => {
                self.fields.set(name, value)?;
                Ok(vec![name.to_string()])
            }
        }
    }
}
