//! Frame streaming.
//!
//! A [`StreamEncoder`] turns acquisition lifecycle events (series start,
//! image, series end) into an ordered queue of wire messages. Two encoders
//! exist:
//!
//! - [`LegacyStream`]: the 1.8.0 multipart format, one JSON header per part
//!   interleaved with raw image bytes
//! - [`CborStream`]: the stream2 format, one self-describing CBOR message per
//!   lifecycle event
//!
//! The device only talks to encoders through the trait. The push adapter
//! drains the queue with [`StreamEncoder::consume_data`] after each update.

mod cbor;
mod legacy;

pub use cbor::CborStream;
pub use legacy::LegacyStream;

use crate::image::Image;
use crate::settings::EigerSettings;
use bytes::Bytes;
use sim_core::field::{FieldMetadata, FieldSet, ValueType};
use std::fmt;

/// Amount of configuration sent with a series-start message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HeaderDetail {
    None,
    #[default]
    Basic,
    All,
}

impl HeaderDetail {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "basic" => Some(Self::Basic),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format selected by `stream/config/format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    Legacy,
    #[default]
    Cbor,
}

impl StreamFormat {
    pub const ALL: [StreamFormat; 2] = [Self::Legacy, Self::Cbor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Cbor => "cbor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "legacy" => Some(Self::Legacy),
            "cbor" => Some(Self::Cbor),
            _ => None,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound message part.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A JSON header or metadata object.
    Json(serde_json::Value),
    /// Raw bytes: image data or an encoded CBOR message.
    Binary(Bytes),
}

impl StreamMessage {
    /// Serialized bytes of the message as sent on the wire.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Binary(data) => data,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Json(_) => None,
            Self::Binary(data) => Some(data),
        }
    }
}

/// Translates acquisition lifecycle events into queued wire messages.
pub trait StreamEncoder: Send {
    /// Queue the series-start message(s).
    fn begin_series(&mut self, settings: &EigerSettings, series_id: u64, header_detail: HeaderDetail);

    /// Queue the message(s) for one image.
    fn insert_image(&mut self, image: Image, series_id: u64);

    /// Queue the series-end message.
    fn end_series(&mut self, series_id: u64);

    /// Drain every queued message in enqueue order.
    fn consume_data(&mut self) -> Vec<StreamMessage>;
}

/// `stream/config` record.
pub fn stream_config() -> FieldSet {
    let rw = FieldMetadata::rw;
    FieldSet::new("stream_config")
        .with(
            "mode",
            "enabled",
            rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
        )
        .with(
            "header_detail",
            HeaderDetail::Basic.as_str(),
            rw(ValueType::String).with_allowed_values(["none", "basic", "all"]),
        )
        .with("header_appendix", "", rw(ValueType::String))
        .with("image_appendix", "", rw(ValueType::String))
        .with(
            "format",
            StreamFormat::Cbor.as_str(),
            rw(ValueType::String).with_allowed_values(StreamFormat::ALL.map(StreamFormat::as_str)),
        )
        .with_keys(&["format", "header_appendix", "header_detail", "image_appendix", "mode"])
}

/// `stream/status` record.
pub fn stream_status() -> FieldSet {
    FieldSet::new("stream_status")
        .with("state", "ready", FieldMetadata::ro(ValueType::State))
        .with("error", Vec::<String>::new(), FieldMetadata::ro(ValueType::StringList))
        .with("dropped", 0u64, FieldMetadata::ro(ValueType::Int))
        .with_keys(&["error", "dropped", "state"])
}
