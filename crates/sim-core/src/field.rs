//! Typed, introspectable fields
//!
//! Simulated instruments expose their configuration and status as flat records
//! of named fields. Each field carries a value plus the metadata a client needs
//! to render or validate it: declared value type, access mode, and optional
//! units, bounds and allowed values.
//!
//! # Records
//!
//! A [`FieldSet`] is built once at construction with every legal field name;
//! the set of names never changes afterwards. Lookups of unknown names fail
//! with [`SimError::FieldNotFound`].
//!
//! ```rust,ignore
//! let config = FieldSet::new("monitor_config")
//!     .with("buffer_size", 512u64, FieldMetadata::rw(ValueType::UInt))
//!     .with("mode", "enabled", FieldMetadata::rw(ValueType::String)
//!         .with_allowed_values(["enabled", "disabled"]))
//!     .with_keys(&["buffer_size", "mode"]);
//!
//! let json = config.describe("mode")?;
//! // {"access_mode":"rw","allowed_values":["enabled","disabled"],"value":"enabled","value_type":"string"}
//! ```
//!
//! # Access control
//!
//! The model itself does not enforce access modes: [`FieldSet::set`] writes
//! any field. [`FieldStore::put_json`] is the external write path and rejects
//! read-only fields, type mismatches and values outside the allowed set.

use crate::error::{SimError, SimResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the pseudo-field listing a record's public keys.
pub const KEYS_FIELD: &str = "keys";

// =============================================================================
// Metadata enums
// =============================================================================

/// Who may write a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "r")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "r",
            Self::ReadWrite => "rw",
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Declared type of a field's value, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "uint")]
    UInt,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "string[]")]
    StringList,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "float[][]")]
    FloatGrid,
    #[serde(rename = "uint[][]")]
    UIntGrid,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "State")]
    State,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::String => "string",
            Self::StringList => "string[]",
            Self::Bool => "bool",
            Self::FloatGrid => "float[][]",
            Self::UIntGrid => "uint[][]",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::None => "none",
            Self::State => "State",
        }
    }

    /// Types carried as plain strings on the wire.
    fn is_textual(self) -> bool {
        matches!(
            self,
            Self::String | Self::State | Self::Date | Self::DateTime
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// FieldValue
// =============================================================================

/// The value held by a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
    FloatGrid(Vec<Vec<f64>>),
    UIntGrid(Vec<Vec<u64>>),
}

impl FieldValue {
    /// Parse a JSON value as the given declared type.
    ///
    /// Integral floats (`3.0`) are accepted for integer fields and integers are
    /// widened for float fields, matching what loosely typed clients send.
    pub fn from_json(field: &str, value_type: ValueType, value: &Json) -> SimResult<Self> {
        let mismatch = || SimError::TypeMismatch {
            field: field.to_string(),
            expected: value_type.to_string(),
        };

        let parsed = match value_type {
            ValueType::Float => value.as_f64().map(Self::Float),
            ValueType::Int => value
                .as_i64()
                .or_else(|| integral(value).map(|v| v as i64))
                .map(Self::Int),
            ValueType::UInt => value
                .as_u64()
                .or_else(|| integral(value).filter(|v| *v >= 0.0).map(|v| v as u64))
                .map(Self::UInt),
            ValueType::Bool => value.as_bool().map(Self::Bool),
            vt if vt.is_textual() => value.as_str().map(|s| Self::Str(s.to_string())),
            ValueType::StringList => value.as_array().and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(Self::StrList)
            }),
            ValueType::FloatGrid => grid(value, Json::as_f64).map(Self::FloatGrid),
            ValueType::UIntGrid => grid(value, Json::as_u64).map(Self::UIntGrid),
            _ => None,
        };

        parsed.ok_or_else(mismatch)
    }

    /// Convert to the variant required by `value_type`, widening numbers.
    pub fn conform(self, field: &str, value_type: ValueType) -> SimResult<Self> {
        match (value_type, self) {
            (ValueType::Float, Self::Float(v)) => Ok(Self::Float(v)),
            (ValueType::Float, Self::UInt(v)) => Ok(Self::Float(v as f64)),
            (ValueType::Float, Self::Int(v)) => Ok(Self::Float(v as f64)),
            (ValueType::Int, Self::Int(v)) => Ok(Self::Int(v)),
            (ValueType::Int, Self::UInt(v)) => i64::try_from(v)
                .map(Self::Int)
                .map_err(|_| SimError::invalid(field, "value out of range for int")),
            (ValueType::UInt, Self::UInt(v)) => Ok(Self::UInt(v)),
            (ValueType::UInt, Self::Int(v)) => u64::try_from(v)
                .map(Self::UInt)
                .map_err(|_| SimError::invalid(field, "value must be non-negative")),
            (ValueType::Bool, Self::Bool(v)) => Ok(Self::Bool(v)),
            (vt, Self::Str(v)) if vt.is_textual() => Ok(Self::Str(v)),
            (ValueType::StringList, Self::StrList(v)) => Ok(Self::StrList(v)),
            (ValueType::FloatGrid, Self::FloatGrid(v)) => Ok(Self::FloatGrid(v)),
            (ValueType::UIntGrid, Self::UIntGrid(v)) => Ok(Self::UIntGrid(v)),
            _ => Err(SimError::TypeMismatch {
                field: field.to_string(),
                expected: value_type.to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Self::Bool(v) => Json::from(*v),
            Self::UInt(v) => Json::from(*v),
            Self::Int(v) => Json::from(*v),
            Self::Float(v) => Json::from(*v),
            Self::Str(v) => Json::from(v.as_str()),
            Self::StrList(v) => Json::from(v.clone()),
            Self::FloatGrid(v) => Json::from(v.clone()),
            Self::UIntGrid(v) => Json::from(v.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::UInt(v) => Some(*v as f64),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

fn integral(value: &Json) -> Option<f64> {
    value.as_f64().filter(|v| v.fract() == 0.0)
}

fn grid<T>(value: &Json, cell: impl Fn(&Json) -> Option<T>) -> Option<Vec<Vec<T>>> {
    value
        .as_array()?
        .iter()
        .map(|row| row.as_array()?.iter().map(&cell).collect::<Option<Vec<T>>>())
        .collect()
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<Vec<Vec<f64>>> for FieldValue {
    fn from(v: Vec<Vec<f64>>) -> Self {
        Self::FloatGrid(v)
    }
}

impl From<Vec<Vec<u64>>> for FieldValue {
    fn from(v: Vec<Vec<u64>>) -> Self {
        Self::UIntGrid(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Str(v.to_rfc3339_opts(SecondsFormat::Millis, false))
    }
}

// =============================================================================
// FieldMetadata
// =============================================================================

/// Describes how a field may be read, written and rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    pub value_type: ValueType,
    pub access_mode: AccessMode,
    pub unit: Option<String>,
    pub min: Option<FieldValue>,
    pub max: Option<FieldValue>,
    pub allowed_values: Option<Vec<String>>,
}

impl FieldMetadata {
    pub fn new(value_type: ValueType, access_mode: AccessMode) -> Self {
        Self {
            value_type,
            access_mode,
            unit: None,
            min: None,
            max: None,
            allowed_values: None,
        }
    }

    /// Read-only field of the given type.
    pub fn ro(value_type: ValueType) -> Self {
        Self::new(value_type, AccessMode::ReadOnly)
    }

    /// Read-write field of the given type.
    pub fn rw(value_type: ValueType) -> Self {
        Self::new(value_type, AccessMode::ReadWrite)
    }

    pub fn with_units(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, min: impl Into<FieldValue>, max: impl Into<FieldValue>) -> Self {
        self.min = Some(min.into());
        self.max = Some(max.into());
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Check a value against the allowed-value set and bounds.
    pub fn validate(&self, field: &str, value: &FieldValue) -> SimResult<()> {
        if let (Some(allowed), Some(text)) = (&self.allowed_values, value.as_str()) {
            if !allowed.iter().any(|a| a == text) {
                return Err(SimError::invalid(
                    field,
                    format!("'{}' is not one of [{}]", text, allowed.join(", ")),
                ));
            }
        }

        if let Some(v) = value.as_f64() {
            if let Some(min) = self.min.as_ref().and_then(FieldValue::as_f64) {
                if v < min {
                    return Err(SimError::invalid(field, format!("{} is below minimum {}", v, min)));
                }
            }
            if let Some(max) = self.max.as_ref().and_then(FieldValue::as_f64) {
                if v > max {
                    return Err(SimError::invalid(field, format!("{} is above maximum {}", v, max)));
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Field
// =============================================================================

/// A value together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub value: FieldValue,
    pub metadata: FieldMetadata,
}

impl Field {
    pub fn new(value: impl Into<FieldValue>, metadata: FieldMetadata) -> Self {
        Self {
            value: value.into(),
            metadata,
        }
    }

    /// Wire representation of a field read.
    ///
    /// Keys are emitted in the order `access_mode, allowed_values, max, min,
    /// unit, value, value_type`; optional entries are omitted when unset.
    pub fn to_json(&self) -> Json {
        let meta = &self.metadata;
        let mut body = Map::new();
        body.insert("access_mode".into(), Json::from(meta.access_mode.as_str()));
        if let Some(allowed) = &meta.allowed_values {
            body.insert("allowed_values".into(), Json::from(allowed.clone()));
        }
        if let Some(max) = &meta.max {
            body.insert("max".into(), max.to_json());
        }
        if let Some(min) = &meta.min {
            body.insert("min".into(), min.to_json());
        }
        if let Some(unit) = &meta.unit {
            body.insert("unit".into(), Json::from(unit.as_str()));
        }
        body.insert("value".into(), self.value.to_json());
        body.insert("value_type".into(), Json::from(meta.value_type.as_str()));
        Json::Object(body)
    }
}

// =============================================================================
// FieldStore - generic access used by protocol adapters
// =============================================================================

/// Type-erased access to a record of named fields.
///
/// Implementors provide raw lookup and write; the provided methods implement
/// the external protocol contract on top (describe a field, validated write
/// from JSON).
pub trait FieldStore {
    /// Look up a field by name.
    fn field(&self, name: &str) -> SimResult<Field>;

    /// Write a field without access checks.
    ///
    /// Returns the names of every field changed by the write, including
    /// derived fields recalculated as a side effect.
    fn write_field(&mut self, name: &str, value: FieldValue) -> SimResult<Vec<String>>;

    /// JSON body for a field read; `keys` is returned as a bare list.
    fn describe(&self, name: &str) -> SimResult<Json> {
        let field = self.field(name)?;
        if name == KEYS_FIELD {
            Ok(field.value.to_json())
        } else {
            Ok(field.to_json())
        }
    }

    /// Validated external write of a JSON value.
    fn put_json(&mut self, name: &str, value: &Json) -> SimResult<Vec<String>> {
        let field = self.field(name)?;
        let meta = &field.metadata;
        if !meta.access_mode.is_writable() {
            return Err(SimError::ReadOnly(name.to_string()));
        }
        let parsed = FieldValue::from_json(name, meta.value_type, value)?;
        meta.validate(name, &parsed)?;
        tracing::debug!("Changing {} to {}", name, parsed);
        self.write_field(name, parsed)
    }
}

// =============================================================================
// FieldSet
// =============================================================================

/// A fixed-name record of typed fields.
#[derive(Debug, Clone)]
pub struct FieldSet {
    record: &'static str,
    fields: BTreeMap<&'static str, Field>,
}

impl FieldSet {
    pub fn new(record: &'static str) -> Self {
        Self {
            record,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field during construction.
    pub fn with(
        mut self,
        name: &'static str,
        value: impl Into<FieldValue>,
        metadata: FieldMetadata,
    ) -> Self {
        self.fields.insert(name, Field::new(value, metadata));
        self
    }

    /// Add the read-only `keys` pseudo-field.
    pub fn with_keys(self, keys: &[&str]) -> Self {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.with(KEYS_FIELD, keys, FieldMetadata::ro(ValueType::StringList))
    }

    /// Name of the record, used in log messages.
    pub fn record(&self) -> &'static str {
        self.record
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> SimResult<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| SimError::FieldNotFound(name.to_string()))
    }

    pub fn value(&self, name: &str) -> SimResult<&FieldValue> {
        self.get(name).map(|f| &f.value)
    }

    /// Raw assignment. The value is conformed to the declared type; access
    /// mode, bounds and allowed values are not checked.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> SimResult<()> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| SimError::FieldNotFound(name.to_string()))?;
        field.value = value.into().conform(name, field.metadata.value_type)?;
        Ok(())
    }

    /// Numeric value of a field, or `0.0` if absent or non-numeric.
    pub fn float(&self, name: &str) -> f64 {
        self.fields.get(name).and_then(|f| f.value.as_f64()).unwrap_or_default()
    }

    /// Unsigned value of a field, or `0` if absent or not an unsigned integer.
    pub fn uint(&self, name: &str) -> u64 {
        self.fields.get(name).and_then(|f| f.value.as_u64()).unwrap_or_default()
    }

    /// Text value of a field, or `""` if absent or not textual.
    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).and_then(|f| f.value.as_str()).unwrap_or_default()
    }

    /// Name/value object of every field except `keys` and `exclude`.
    pub fn snapshot(&self, exclude: &[&str]) -> Json {
        let body: Map<String, Json> = self
            .fields
            .iter()
            .filter(|(name, _)| **name != KEYS_FIELD && !exclude.contains(name))
            .map(|(name, field)| (name.to_string(), field.value.to_json()))
            .collect();
        Json::Object(body)
    }
}

impl FieldStore for FieldSet {
    fn field(&self, name: &str) -> SimResult<Field> {
        self.get(name).cloned()
    }

    fn write_field(&mut self, name: &str, value: FieldValue) -> SimResult<Vec<String>> {
        self.set(name, value)?;
        tracing::debug!("Set {}/{}", self.record, name);
        Ok(vec![name.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn monitor_config() -> FieldSet {
        FieldSet::new("monitor_config")
            .with(
                "mode",
                "enabled",
                FieldMetadata::rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
            )
            .with("buffer_size", 512u64, FieldMetadata::rw(ValueType::UInt))
            .with("discard_new", false, FieldMetadata::rw(ValueType::Bool))
            .with("dropped", 0u64, FieldMetadata::ro(ValueType::UInt))
            .with(
                "gain",
                1.5,
                FieldMetadata::rw(ValueType::Float).with_units("dB").with_range(0.0, 10.0),
            )
            .with_keys(&["buffer_size", "discard_new", "mode"])
    }

    #[test]
    fn test_unknown_field() {
        let config = monitor_config();
        assert!(matches!(config.get("bogus"), Err(SimError::FieldNotFound(name)) if name == "bogus"));
        assert!(config.describe("bogus").is_err());
    }

    #[test]
    fn test_describe_with_allowed_values() {
        let config = monitor_config();
        let body = config.describe("mode").unwrap();
        assert_eq!(
            body,
            json!({
                "access_mode": "rw",
                "allowed_values": ["enabled", "disabled"],
                "value": "enabled",
                "value_type": "string"
            })
        );
        let keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["access_mode", "allowed_values", "value", "value_type"]);
    }

    #[test]
    fn test_describe_bounds_and_units() {
        let config = monitor_config();
        let body = config.describe("gain").unwrap();
        assert_eq!(body["min"], json!(0.0));
        assert_eq!(body["max"], json!(10.0));
        assert_eq!(body["unit"], json!("dB"));
        assert_eq!(body["value"], json!(1.5));
    }

    #[test]
    fn test_keys_is_bare_list() {
        let config = monitor_config();
        assert_eq!(
            config.describe("keys").unwrap(),
            json!(["buffer_size", "discard_new", "mode"])
        );
    }

    #[test]
    fn test_put_json_validates() {
        let mut config = monitor_config();

        assert_eq!(config.put_json("buffer_size", &json!(1024)).unwrap(), vec!["buffer_size"]);
        assert_eq!(config.uint("buffer_size"), 1024);

        // integral float accepted for uint
        config.put_json("buffer_size", &json!(256.0)).unwrap();
        assert_eq!(config.uint("buffer_size"), 256);

        assert!(matches!(
            config.put_json("buffer_size", &json!("big")),
            Err(SimError::TypeMismatch { .. })
        ));
        assert!(matches!(
            config.put_json("buffer_size", &json!(-1)),
            Err(SimError::TypeMismatch { .. })
        ));
        assert!(matches!(
            config.put_json("mode", &json!("sometimes")),
            Err(SimError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.put_json("dropped", &json!(3)),
            Err(SimError::ReadOnly(_))
        ));
        assert!(matches!(
            config.put_json("gain", &json!(11.0)),
            Err(SimError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.put_json("keys", &json!([])),
            Err(SimError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_raw_set_ignores_access_mode() {
        let mut config = monitor_config();
        config.set("dropped", 7u64).unwrap();
        assert_eq!(config.uint("dropped"), 7);

        // numbers widen into float fields
        config.set("gain", 3u64).unwrap();
        assert_eq!(config.value("gain").unwrap(), &FieldValue::Float(3.0));

        assert!(config.set("discard_new", "yes").is_err());
        assert!(config.set("bogus", true).is_err());
    }

    #[test]
    fn test_grid_and_list_parsing() {
        let grid = FieldValue::from_json("flatfield", ValueType::FloatGrid, &json!([[1.0, 2.0], []]))
            .unwrap();
        assert_eq!(grid, FieldValue::FloatGrid(vec![vec![1.0, 2.0], vec![]]));

        let list = FieldValue::from_json("error", ValueType::StringList, &json!(["a", "b"])).unwrap();
        assert_eq!(list.to_json(), json!(["a", "b"]));

        assert!(FieldValue::from_json("pixel_mask", ValueType::UIntGrid, &json!([[1, -2]])).is_err());
    }

    #[test]
    fn test_snapshot_excludes() {
        let config = monitor_config();
        let snapshot = config.snapshot(&["gain"]);
        let object = snapshot.as_object().unwrap();
        assert!(object.contains_key("mode"));
        assert!(!object.contains_key("gain"));
        assert!(!object.contains_key("keys"));
    }

    #[test]
    fn test_access_mode_serde() {
        assert_eq!(serde_json::to_string(&AccessMode::ReadOnly).unwrap(), "\"r\"");
        assert_eq!(serde_json::to_string(&AccessMode::ReadWrite).unwrap(), "\"rw\"");
        assert!(serde_json::from_str::<AccessMode>("\"w\"").is_err());
        assert!(AccessMode::ReadWrite.is_writable());
        assert!(!AccessMode::ReadOnly.is_writable());
        assert_eq!(serde_json::to_string(&ValueType::StringList).unwrap(), "\"string[]\"");
        let vt: ValueType = serde_json::from_str("\"State\"").unwrap();
        assert_eq!(vt, ValueType::State);
    }
}
