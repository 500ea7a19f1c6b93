//! Monitor interface records (`monitor/api/1.8.0`).

use sim_core::field::{FieldMetadata, FieldSet, ValueType};

/// `monitor/config` record.
pub fn monitor_config() -> FieldSet {
    let rw = FieldMetadata::rw;
    FieldSet::new("monitor_config")
        .with(
            "mode",
            "enabled",
            rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
        )
        .with("buffer_size", 512u64, rw(ValueType::UInt))
        .with("discard_new", false, rw(ValueType::Bool))
        .with_keys(&["buffer_size", "discard_new", "mode"])
}

/// `monitor/status` record.
pub fn monitor_status() -> FieldSet {
    let ro = FieldMetadata::ro;
    FieldSet::new("monitor_status")
        .with("error", Vec::<String>::new(), ro(ValueType::StringList))
        .with("buffer_fill_level", 2i64, ro(ValueType::Int))
        .with("buffer_free", false, ro(ValueType::Bool))
        .with("dropped", 0i64, ro(ValueType::Int))
        .with(
            "state",
            "normal",
            ro(ValueType::State).with_allowed_values(["normal", "overflow"]),
        )
        .with_keys(&["buffer_fill_level", "buffer_free", "dropped", "error", "state"])
}
