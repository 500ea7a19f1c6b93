//! FileWriter interface records (`filewriter/api/1.8.0`).
//!
//! The simulated detector never writes files; the records exist so clients
//! that configure the file writer before arming find the expected fields.

use sim_core::field::{FieldMetadata, FieldSet, ValueType};

/// `filewriter/config` record.
pub fn filewriter_config() -> FieldSet {
    let rw = FieldMetadata::rw;
    FieldSet::new("filewriter_config")
        .with(
            "mode",
            "enabled",
            rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
        )
        .with("transfer_mode", "HTTP", FieldMetadata::ro(ValueType::String))
        .with("nimages_per_file", 1000u64, rw(ValueType::UInt))
        .with("image_nr_start", 1u64, rw(ValueType::UInt))
        .with("name_pattern", "series_$id", rw(ValueType::String))
        .with("compression_enabled", false, rw(ValueType::Bool))
        .with_keys(&[
            "compression_enabled",
            "image_nr_start",
            "mode",
            "name_pattern",
            "nimages_per_file",
            "transfer_mode",
        ])
}

/// `filewriter/status` record.
pub fn filewriter_status() -> FieldSet {
    let ro = FieldMetadata::ro;
    FieldSet::new("filewriter_status")
        .with("state", "ready", ro(ValueType::String))
        .with("error", Vec::<String>::new(), ro(ValueType::StringList))
        .with("files", Vec::<String>::new(), ro(ValueType::StringList))
        .with_keys(&["error", "files", "state"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sim_core::{FieldStore, SimError};

    #[test]
    fn test_filewriter_config_write() {
        let mut config = filewriter_config();
        config.put_json("name_pattern", &json!("scan_$id")).unwrap();
        assert_eq!(config.text("name_pattern"), "scan_$id");
        assert!(matches!(
            config.put_json("transfer_mode", &json!("FTP")),
            Err(SimError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_filewriter_status() {
        let status = filewriter_status();
        assert_eq!(status.describe("state").unwrap()["value"], json!("ready"));
        assert_eq!(status.describe("files").unwrap()["value"], json!([]));
    }
}
