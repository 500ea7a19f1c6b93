//! SIMPLON REST adapter for the simulated Eiger.
//!
//! Routes (all under `/{subsystem}/api/1.8.0`):
//!
//! | Method | Path | Target |
//! |---|---|---|
//! | GET, PUT | `detector/.../config/{name}` | detector settings |
//! | GET, PUT | `detector/.../config/threshold/{channel}/{name}` | threshold channel |
//! | GET | `detector/.../status/{name}` | detector status |
//! | GET | `detector/.../status/board_000/th0_temp`, `th0_humidity` | temperature, humidity |
//! | GET | `detector/.../status/builder/{name}` | detector status |
//! | PUT | `detector/.../command/{command}` | state machine commands |
//! | GET, PUT | `{stream,monitor,filewriter}/.../config/{name}` | sub-system config |
//! | GET | `{stream,monitor,filewriter}/.../status/{name}` | sub-system status |
//!
//! Field reads return the field description, `PUT` returns the list of changed
//! field names and commands return `{"sequence id": N}`.
//!
//! | Error | Status |
//! |---|---|
//! | unknown path or field | 404 |
//! | write to a read-only field | 403 |
//! | value of the wrong type or outside the allowed values | 400 |

use crate::runner::{Interrupt, SharedDevice};
use serde::Serialize;
use serde_json::{Value, json};
use sim_core::{FieldStore, SimError, SimResult};
use sim_driver_eiger::{EigerDevice, TriggerMode};
use std::fmt;

pub const API_VERSION: &str = "1.8.0";

/// Error text for a command called with an unexpected payload.
pub fn command_404(key: &str) -> String {
    format!("error during request: path error: unknown path: \"{}\"", key)
}

/// Acknowledgement returned by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceComplete {
    #[serde(rename = "sequence id")]
    pub sequence_id: u64,
}

/// HTTP method, as far as the adapter cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Other,
}

/// Response produced by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RestReply {
    pub status: u16,
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Empty,
    Json(Value),
    Text(String),
}

impl RestReply {
    pub fn json(value: Value) -> Self {
        Self {
            status: 200,
            body: ReplyBody::Json(value),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            body: ReplyBody::Empty,
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            body: ReplyBody::Text(text.into()),
        }
    }

    fn sequence(sequence_id: u64) -> Self {
        Self::json(serde_json::to_value(SequenceComplete { sequence_id }).unwrap_or_default())
    }

    fn from_error(error: &SimError) -> Self {
        match error {
            SimError::FieldNotFound(_) => Self::not_found(),
            SimError::ReadOnly(_) => Self::text(403, error.to_string()),
            SimError::InvalidValue { .. } | SimError::TypeMismatch { .. } => {
                Self::text(400, error.to_string())
            }
            SimError::Transport(_) | SimError::Io(_) => Self::text(500, error.to_string()),
        }
    }
}

/// Field record addressed by a path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    DetectorConfig,
    DetectorStatus,
    Threshold(String),
    StreamConfig,
    StreamStatus,
    MonitorConfig,
    MonitorStatus,
    FileWriterConfig,
    FileWriterStatus,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DetectorConfig => f.write_str("detector config"),
            Self::DetectorStatus => f.write_str("detector status"),
            Self::Threshold(channel) => write!(f, "threshold {}", channel),
            Self::StreamConfig => f.write_str("stream config"),
            Self::StreamStatus => f.write_str("stream status"),
            Self::MonitorConfig => f.write_str("monitor config"),
            Self::MonitorStatus => f.write_str("monitor status"),
            Self::FileWriterConfig => f.write_str("filewriter config"),
            Self::FileWriterStatus => f.write_str("filewriter status"),
        }
    }
}

/// Parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Read(Record, String),
    Write(Record, String),
    Command(String),
}

fn route(method: Method, path: &str) -> Option<Route> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let (subsystem, rest) = match segments.as_slice() {
        [subsystem, "api", version, rest @ ..] if *version == API_VERSION => (*subsystem, rest),
        _ => return None,
    };

    let field = |record: Record, name: &str| match method {
        Method::Get => Some(Route::Read(record, name.to_string())),
        Method::Put => Some(Route::Write(record, name.to_string())),
        Method::Other => None,
    };
    let read_only = |record: Record, name: &str| match method {
        Method::Get => Some(Route::Read(record, name.to_string())),
        _ => None,
    };

    match (subsystem, rest) {
        ("detector", ["config", "threshold", channel, name]) => {
            field(Record::Threshold(channel.to_string()), *name)
        }
        ("detector", ["config", name]) => field(Record::DetectorConfig, *name),
        ("detector", ["status", "board_000", sensor]) => {
            let name = match *sensor {
                "th0_temp" => "temperature",
                "th0_humidity" => "humidity",
                _ => return None,
            };
            read_only(Record::DetectorStatus, name)
        }
        ("detector", ["status", "builder", name]) | ("detector", ["status", name]) => {
            read_only(Record::DetectorStatus, *name)
        }
        ("detector", ["command", command]) if method == Method::Put => {
            Some(Route::Command(command.to_string()))
        }
        ("stream", ["config", name]) => field(Record::StreamConfig, *name),
        ("stream", ["status", name]) => read_only(Record::StreamStatus, *name),
        ("monitor", ["config", name]) => field(Record::MonitorConfig, *name),
        ("monitor", ["status", name]) => read_only(Record::MonitorStatus, *name),
        ("filewriter", ["config", name]) => field(Record::FileWriterConfig, *name),
        ("filewriter", ["status", name]) => read_only(Record::FileWriterStatus, *name),
        _ => None,
    }
}

fn read(device: &EigerDevice, record: &Record, name: &str) -> SimResult<Value> {
    match record {
        Record::DetectorConfig => device.settings().describe(name),
        Record::DetectorStatus => device.status().describe(name),
        Record::Threshold(channel) => device
            .settings()
            .threshold_config()
            .channel(channel)?
            .describe(name),
        Record::StreamConfig => device.stream_config().describe(name),
        Record::StreamStatus => device.stream_status().describe(name),
        Record::MonitorConfig => device.monitor_config().describe(name),
        Record::MonitorStatus => device.monitor_status().describe(name),
        Record::FileWriterConfig => device.filewriter_config().describe(name),
        Record::FileWriterStatus => device.filewriter_status().describe(name),
    }
}

fn write(device: &mut EigerDevice, record: &Record, name: &str, value: &Value) -> SimResult<Vec<String>> {
    match record {
        Record::DetectorConfig => device.settings_mut().put_json(name, value),
        Record::Threshold(channel) => device
            .settings_mut()
            .threshold_config_mut()
            .channel_mut(channel)?
            .put_json(name, value),
        Record::StreamConfig => device.stream_config_mut().put_json(name, value),
        Record::MonitorConfig => device.monitor_config_mut().put_json(name, value),
        Record::FileWriterConfig => device.filewriter_config_mut().put_json(name, value),
        Record::DetectorStatus
        | Record::StreamStatus
        | Record::MonitorStatus
        | Record::FileWriterStatus => Err(SimError::ReadOnly(name.to_string())),
    }
}

/// Whether a command body carries a payload.
///
/// Empty bodies and JSON "nothing" values (`null`, `{}`, `""`, ...) do not.
fn has_payload(body: &[u8]) -> bool {
    if body.iter().all(u8::is_ascii_whitespace) {
        return false;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => false,
        Ok(Value::Bool(v)) => v,
        Ok(Value::Number(n)) => n.as_f64() != Some(0.0),
        Ok(Value::String(s)) => !s.is_empty(),
        Ok(Value::Array(items)) => !items.is_empty(),
        Ok(Value::Object(map)) => !map.is_empty(),
        Err(_) => true,
    }
}

/// REST front end of an [`EigerDevice`] driven by a device runner.
#[derive(Clone)]
pub struct EigerRestAdapter {
    device: SharedDevice<EigerDevice>,
    interrupt: Interrupt,
}

impl EigerRestAdapter {
    pub fn new(device: SharedDevice<EigerDevice>, interrupt: Interrupt) -> Self {
        Self { device, interrupt }
    }

    /// Handle one request.
    pub async fn handle(&self, method: Method, path: &str, body: &[u8]) -> RestReply {
        match route(method, path) {
            Some(Route::Read(record, name)) => {
                let device = self.device.lock().await;
                match read(&device, &record, &name) {
                    Ok(value) => RestReply::json(value),
                    Err(e) => {
                        tracing::debug!("Failed to read {} {}: {}", record, name, e);
                        RestReply::from_error(&e)
                    }
                }
            }
            Some(Route::Write(record, name)) => self.put(&record, &name, body).await,
            Some(Route::Command(command)) => self.command(&command, body).await,
            None => {
                tracing::debug!("No route for {}", path);
                RestReply::not_found()
            }
        }
    }

    async fn put(&self, record: &Record, name: &str, body: &[u8]) -> RestReply {
        let value = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(mut request)) => match request.remove("value") {
                Some(value) => value,
                None => return RestReply::text(400, "request body has no \"value\""),
            },
            Ok(_) => return RestReply::text(400, "request body must be a JSON object"),
            Err(e) => return RestReply::text(400, format!("invalid JSON body: {}", e)),
        };

        tracing::debug!("Changing to {} for {}", value, name);
        let mut device = self.device.lock().await;
        match write(&mut device, record, name, &value) {
            Ok(changed) => {
                tracing::debug!("Set {} to {}", name, value);
                RestReply::json(json!(changed))
            }
            Err(e) => {
                tracing::debug!("Eiger has no writable {} variable {}: {}", record, name, e);
                RestReply::from_error(&e)
            }
        }
    }

    async fn command(&self, command: &str, body: &[u8]) -> RestReply {
        if command == "trigger" {
            return self.trigger(body).await;
        }

        let sequence_id = match command {
            "initialize" => 1,
            "arm" => 2,
            "disarm" => 3,
            "cancel" => 5,
            "abort" => 6,
            _ => return RestReply::not_found(),
        };
        if has_payload(body) {
            return RestReply::text(404, command_404(command));
        }

        {
            let mut device = self.device.lock().await;
            match command {
                "initialize" => device.initialize(),
                "arm" => device.arm(),
                "disarm" => device.disarm(),
                "cancel" => device.cancel(),
                _ => device.abort(),
            }
        }
        self.interrupt.raise();
        RestReply::sequence(sequence_id)
    }

    /// Trigger and wait until the frames of this trigger have been acquired.
    async fn trigger(&self, body: &[u8]) -> RestReply {
        let (started, mut finished) = {
            let mut device = self.device.lock().await;
            // only inte takes a payload (the exposure time)
            if has_payload(body) && device.settings().trigger_mode() != Some(TriggerMode::Inte) {
                return RestReply::text(404, command_404("trigger"));
            }
            tracing::debug!("Triggering Eiger");
            let started = device.trigger();
            (started, device.finished_signal())
        };

        self.interrupt.raise();
        if started && finished.wait_for(|done| *done).await.is_err() {
            tracing::warn!("Eiger dropped before trigger finished");
        }
        RestReply::sequence(4)
    }
}
