//! CBOR "stream2" encoder.
//!
//! One CBOR map per lifecycle event, each wrapped in the self-describe tag
//! 55799. Arrays use the RFC 8746 typed-array tags inside a tag 40
//! multi-dimensional array, with tag 56500 marking compressed payloads.

use super::{HeaderDetail, StreamEncoder, StreamMessage};
use crate::image::{Image, bslz4_zeros};
use crate::settings::EigerSettings;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::Value;
use std::collections::VecDeque;
use uuid::Uuid;

const TAG_SELF_DESCRIBE: u64 = 55799;
const TAG_DATE_TIME: u64 = 0;
const TAG_MULTI_DIM: u64 = 40;
const TAG_UINT16_LE: u64 = 69;
const TAG_UINT32_LE: u64 = 70;
const TAG_FLOAT32_LE: u64 = 85;
const TAG_COMPRESSED: u64 = 56500;

/// Size of the countrate correction lookup table.
const COUNTRATE_TABLE_LEN: u64 = 1 << 16;

/// Stream2 field name -> settings field, copied verbatim into the start message.
const STREAM_SETTINGS_MAP: &[(&str, &str)] = &[
    ("beam_center_x", "beam_center_x"),
    ("beam_center_y", "beam_center_y"),
    ("count_time", "count_time"),
    ("frame_time", "frame_time"),
    ("sensor_material", "sensor_material"),
    ("sensor_thickness", "sensor_thickness"),
    ("countrate_correction_enabled", "countrate_correction_applied"),
    ("detector_description", "description"),
    ("detector_serial_number", "detector_number"),
    ("flatfield_enabled", "flatfield_correction_applied"),
    ("image_size_x", "x_pixels_in_detector"),
    ("image_size_y", "y_pixels_in_detector"),
    ("incident_energy", "threshold_energy"),
    ("incident_wavelength", "wavelength"),
    ("pixel_mask_enabled", "pixel_mask_applied"),
    ("pixel_size_x", "x_pixel_size"),
    ("pixel_size_y", "y_pixel_size"),
    ("saturation_value", "countrate_correction_count_cutoff"),
    ("virtual_pixel_interpolation_enabled", "virtual_pixel_correction_applied"),
];

const GONIO_AXES: &[&str] = &["chi", "kappa", "omega", "phi", "two_theta"];

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn uint(value: u64) -> Value {
    Value::Integer(value.into())
}

fn tag(tag: u64, value: Value) -> Value {
    Value::Tag(tag, Box::new(value))
}

fn entry(key: &str, value: Value) -> (Value, Value) {
    (text(key), value)
}

fn date(value: DateTime<Utc>) -> Value {
    tag(TAG_DATE_TIME, text(&value.to_rfc3339_opts(SecondsFormat::Micros, true)))
}

/// Simulated timings are not modelled; every timestamp is the rational `0/1`.
fn zero_time() -> Value {
    Value::Array(vec![uint(0), uint(1)])
}

fn json_to_cbor(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(v), _) => uint(v),
            (None, Some(v)) => Value::Integer(v.into()),
            _ => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => text(s),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_cbor).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (text(k), json_to_cbor(v)))
                .collect(),
        ),
    }
}

/// Multi-dimensional typed array with a bitshuffle-LZ4 payload.
fn compressed_array(dims: &[u64], type_tag: u64, elem_size: u64, data: Bytes) -> Value {
    let compressed = tag(
        TAG_COMPRESSED,
        Value::Array(vec![text("bslz4"), uint(elem_size), Value::Bytes(data.to_vec())]),
    );
    tag(
        TAG_MULTI_DIM,
        Value::Array(vec![
            Value::Array(dims.iter().copied().map(uint).collect()),
            tag(type_tag, compressed),
        ]),
    )
}

fn zero_array(dims: &[u64], type_tag: u64, elem_size: u64) -> Value {
    let elements: u64 = dims.iter().product();
    let data = bslz4_zeros(elements as usize, elem_size as usize);
    compressed_array(dims, type_tag, elem_size, data)
}

/// Encoder for the stream2 CBOR format.
#[derive(Debug, Default)]
pub struct CborStream {
    queue: VecDeque<StreamMessage>,
    series_unique_id: String,
    series_date: Option<DateTime<Utc>>,
}

impl CborStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_date(&self) -> DateTime<Utc> {
        self.series_date.unwrap_or_else(Utc::now)
    }

    fn push(&mut self, message: Vec<(Value, Value)>) {
        let mut buffer = Vec::new();
        match ciborium::ser::into_writer(&tag(TAG_SELF_DESCRIBE, Value::Map(message)), &mut buffer) {
            Ok(()) => self.queue.push_back(StreamMessage::Binary(Bytes::from(buffer))),
            Err(e) => tracing::error!("CborStream: failed to encode message: {}", e),
        }
    }

    fn start_message(
        &self,
        settings: &EigerSettings,
        series_id: u64,
        header_detail: HeaderDetail,
    ) -> Vec<(Value, Value)> {
        let fields = settings.fields();
        let (x, y) = settings.shape();
        let thresholds = settings.threshold_config();

        let mut message = vec![
            entry("type", text("start")),
            entry("series_id", uint(series_id)),
            entry("series_unique_id", text(&self.series_unique_id)),
            entry("arm_date", date(self.series_date())),
            entry("channels", Value::Array(vec![text("threshold_1")])),
            entry(
                "detector_translation",
                Value::Array(vec![
                    Value::Float(0.0),
                    Value::Float(0.0),
                    Value::Float(fields.float("detector_distance")),
                ]),
            ),
            entry("image_dtype", text("uint16")),
            entry(
                "number_of_images",
                uint(settings.nimages() * settings.ntrigger()),
            ),
        ];

        for (stream_field, setting) in STREAM_SETTINGS_MAP {
            if let Ok(value) = fields.value(setting) {
                message.push(entry(stream_field, json_to_cbor(&value.to_json())));
            }
        }

        let goniometer = GONIO_AXES
            .iter()
            .map(|axis| {
                entry(
                    axis,
                    Value::Map(vec![
                        entry("increment", Value::Float(fields.float(&format!("{}_increment", axis)))),
                        entry("start", Value::Float(fields.float(&format!("{}_start", axis)))),
                    ]),
                )
            })
            .collect();
        message.push(entry("goniometer", Value::Map(goniometer)));

        message.push(entry(
            "threshold_energy",
            Value::Map(vec![
                entry("threshold_1", Value::Float(thresholds.energy("1"))),
                entry("threshold_2", Value::Float(thresholds.energy("2"))),
            ]),
        ));

        if header_detail == HeaderDetail::All {
            message.push(entry(
                "flatfield",
                Value::Map(vec![entry("threshold_1", zero_array(&[y, x], TAG_FLOAT32_LE, 4))]),
            ));
            message.push(entry(
                "pixel_mask",
                Value::Map(vec![entry("threshold_1", zero_array(&[y, x], TAG_UINT32_LE, 4))]),
            ));
            message.push(entry(
                "countrate_correction_lookup_table",
                zero_array(&[COUNTRATE_TABLE_LEN], TAG_UINT32_LE, 4),
            ));
        }

        message
    }
}

impl StreamEncoder for CborStream {
    fn begin_series(&mut self, settings: &EigerSettings, series_id: u64, header_detail: HeaderDetail) {
        self.series_unique_id = Uuid::new_v4().to_string();
        self.series_date = Some(Utc::now());
        tracing::debug!(
            "CborStream: begin series {} ({}, {})",
            series_id,
            self.series_unique_id,
            header_detail
        );
        let message = self.start_message(settings, series_id, header_detail);
        self.push(message);
    }

    fn insert_image(&mut self, image: Image, series_id: u64) {
        let (width, height) = image.shape;
        let message = vec![
            entry("type", text("image")),
            entry("series_id", uint(series_id)),
            entry("series_unique_id", text(&self.series_unique_id)),
            entry("image_id", uint(image.index)),
            entry("real_time", zero_time()),
            entry("series_date", date(self.series_date())),
            entry("start_time", zero_time()),
            entry("stop_time", zero_time()),
            entry(
                "data",
                Value::Map(vec![entry(
                    "threshold_1",
                    compressed_array(&[height, width], TAG_UINT16_LE, 2, image.data),
                )]),
            ),
        ];
        self.push(message);
    }

    fn end_series(&mut self, series_id: u64) {
        tracing::debug!("CborStream: end series {}", series_id);
        let message = vec![
            entry("type", text("end")),
            entry("series_id", uint(series_id)),
            entry("series_unique_id", text(&self.series_unique_id)),
        ];
        self.push(message);
    }

    fn consume_data(&mut self) -> Vec<StreamMessage> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FrameBlob;

    /// Decode a message and return its map, checking the self-describe tag.
    fn decode(message: &StreamMessage) -> Vec<(Value, Value)> {
        let bytes = message.as_binary().unwrap();
        let value: Value = ciborium::de::from_reader(bytes.as_ref()).unwrap();
        match value {
            Value::Tag(TAG_SELF_DESCRIBE, inner) => match *inner {
                Value::Map(map) => map,
                other => panic!("expected map, got {:?}", other),
            },
            other => panic!("expected tag 55799, got {:?}", other),
        }
    }

    fn get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
        map.iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }

    fn get_u64(map: &[(Value, Value)], key: &str) -> u64 {
        let integer = get(map, key).and_then(Value::as_integer).unwrap();
        u64::try_from(integer).unwrap()
    }

    #[test]
    fn test_consume_empty() {
        let mut stream = CborStream::new();
        assert!(stream.consume_data().is_empty());
    }

    #[test]
    fn test_series_lifecycle() {
        let mut settings = EigerSettings::new();
        settings.set("nimages", 3u64).unwrap();
        settings.set("ntrigger", 2u64).unwrap();
        let blob = FrameBlob::zeros((16, 8));
        let mut stream = CborStream::new();

        stream.begin_series(&settings, 5, HeaderDetail::Basic);
        stream.insert_image(Image::dummy(0, &blob), 5);
        stream.insert_image(Image::dummy(1, &blob), 5);
        stream.end_series(5);

        let messages = stream.consume_data();
        assert_eq!(messages.len(), 4);
        assert!(stream.consume_data().is_empty());

        let start = decode(&messages[0]);
        assert_eq!(get(&start, "type").and_then(Value::as_text), Some("start"));
        assert_eq!(get_u64(&start, "series_id"), 5);
        assert_eq!(get_u64(&start, "number_of_images"), 6);
        assert_eq!(get_u64(&start, "image_size_x"), 4148);
        assert_eq!(
            get(&start, "detector_serial_number").and_then(Value::as_text),
            Some("EIGERSIM001")
        );
        assert!(get(&start, "goniometer").is_some());
        assert!(get(&start, "flatfield").is_none());

        let unique_id = get(&start, "series_unique_id").and_then(Value::as_text).unwrap().to_string();

        let image = decode(&messages[2]);
        assert_eq!(get(&image, "type").and_then(Value::as_text), Some("image"));
        assert_eq!(get_u64(&image, "image_id"), 1);
        assert_eq!(get(&image, "series_unique_id").and_then(Value::as_text), Some(unique_id.as_str()));
        let data = get(&image, "data").and_then(Value::as_map).unwrap();
        assert!(matches!(get(data, "threshold_1"), Some(Value::Tag(TAG_MULTI_DIM, _))));

        let end = decode(&messages[3]);
        assert_eq!(get(&end, "type").and_then(Value::as_text), Some("end"));
        assert_eq!(get_u64(&end, "series_id"), 5);
    }

    #[test]
    fn test_all_detail_adds_arrays() {
        let settings = EigerSettings::new();
        let mut stream = CborStream::new();
        stream.begin_series(&settings, 1, HeaderDetail::All);

        let messages = stream.consume_data();
        let start = decode(&messages[0]);
        assert!(get(&start, "flatfield").is_some());
        assert!(get(&start, "pixel_mask").is_some());
        assert!(get(&start, "countrate_correction_lookup_table").is_some());
    }

    #[test]
    fn test_image_payload_shape() {
        let blob = FrameBlob::zeros((16, 8));
        let image = Image::dummy(0, &blob);
        let mut stream = CborStream::new();
        stream.insert_image(image.clone(), 1);

        let message = decode(&stream.consume_data()[0]);
        let data = get(&message, "data").and_then(Value::as_map).unwrap();
        let Some(Value::Tag(TAG_MULTI_DIM, array)) = get(data, "threshold_1") else {
            panic!("expected multi-dimensional array");
        };
        let parts = array.as_array().unwrap();
        let dims: Vec<u64> = parts[0]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| u64::try_from(d.as_integer().unwrap()).unwrap())
            .collect();
        assert_eq!(dims, vec![8, 16]);
        let Value::Tag(TAG_UINT16_LE, compressed) = &parts[1] else {
            panic!("expected uint16 typed array");
        };
        let Value::Tag(TAG_COMPRESSED, payload) = compressed.as_ref() else {
            panic!("expected compressed payload");
        };
        let payload = payload.as_array().unwrap();
        assert_eq!(payload[0].as_text(), Some("bslz4"));
        assert_eq!(payload[2].as_bytes().map(Vec::as_slice), Some(image.data.as_ref()));
    }
}
