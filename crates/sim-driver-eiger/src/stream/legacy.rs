//! Legacy (1.8.0) multipart stream encoder.

use super::{HeaderDetail, StreamEncoder, StreamMessage};
use crate::image::Image;
use crate::settings::EigerSettings;
use serde_json::json;
use std::collections::VecDeque;

/// Settings too large to send in the basic header.
const LARGE_SETTINGS: &[&str] = &["flatfield", "pixel_mask", "countrate_correction_table"];

/// Detail blocks sent for `header_detail = all`: `(htype, element type)`.
const DETAIL_BLOCKS: &[(&str, &str)] = &[
    ("flatfield-1.0", "float32"),
    ("dpixelmask-1.0", "uint32"),
    ("dcountrate_table-1.0", "float32"),
];

/// Encoder for the legacy multipart format.
///
/// Every header is a JSON object with an `htype` tag; image data is sent as
/// a raw binary part between its headers.
#[derive(Debug, Default)]
pub struct LegacyStream {
    queue: VecDeque<StreamMessage>,
}

impl LegacyStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, message: StreamMessage) {
        self.queue.push_back(message);
    }

    fn push_json(&mut self, value: serde_json::Value) {
        self.push(StreamMessage::Json(value));
    }
}

impl StreamEncoder for LegacyStream {
    fn begin_series(&mut self, settings: &EigerSettings, series_id: u64, header_detail: HeaderDetail) {
        tracing::debug!("LegacyStream: begin series {} ({})", series_id, header_detail);
        self.push_json(json!({
            "htype": "dheader-1.0",
            "header_detail": header_detail.as_str(),
            "series": series_id,
        }));

        if header_detail == HeaderDetail::None {
            return;
        }
        self.push_json(settings.snapshot(LARGE_SETTINGS));

        if header_detail == HeaderDetail::All {
            let (x, y) = settings.shape();
            for (htype, dtype) in DETAIL_BLOCKS {
                self.push_json(json!({
                    "htype": htype,
                    "shape": [x, y],
                    "type": dtype,
                }));
                self.push_json(json!({"blob": "blob"}));
            }
        }
    }

    fn insert_image(&mut self, image: Image, series_id: u64) {
        self.push_json(json!({
            "htype": "dimage-1.0",
            "frame": image.index,
            "hash": image.hash,
            "series": series_id,
        }));
        self.push_json(json!({
            "htype": "dimage_d-1.0",
            "encoding": image.encoding,
            "shape": [image.shape.0, image.shape.1],
            "size": image.data.len(),
            "type": image.dtype,
        }));
        self.push(StreamMessage::Binary(image.data));
        self.push_json(json!({
            "htype": "dconfig-1.0",
            "real_time": 0.0,
            "start_time": 0.0,
            "stop_time": 0.0,
        }));
    }

    fn end_series(&mut self, series_id: u64) {
        tracing::debug!("LegacyStream: end series {}", series_id);
        self.push_json(json!({
            "htype": "dseries_end-1.0",
            "series": series_id,
        }));
    }

    fn consume_data(&mut self) -> Vec<StreamMessage> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FrameBlob;

    fn htype(message: &StreamMessage) -> Option<&str> {
        message.as_json()?.get("htype")?.as_str()
    }

    #[test]
    fn test_consume_empty() {
        let mut stream = LegacyStream::new();
        assert!(stream.consume_data().is_empty());
    }

    #[test]
    fn test_series_with_no_header_detail() {
        let settings = EigerSettings::new();
        let blob = FrameBlob::zeros((16, 8));
        let mut stream = LegacyStream::new();

        stream.begin_series(&settings, 1, HeaderDetail::None);
        stream.insert_image(Image::dummy(0, &blob), 1);
        stream.insert_image(Image::dummy(1, &blob), 1);
        stream.end_series(1);

        let messages = stream.consume_data();
        assert_eq!(messages.len(), 1 + 2 * 4 + 1);

        let types: Vec<Option<&str>> = messages.iter().map(htype).collect();
        assert_eq!(
            types,
            vec![
                Some("dheader-1.0"),
                Some("dimage-1.0"),
                Some("dimage_d-1.0"),
                None,
                Some("dconfig-1.0"),
                Some("dimage-1.0"),
                Some("dimage_d-1.0"),
                None,
                Some("dconfig-1.0"),
                Some("dseries_end-1.0"),
            ]
        );
        assert_eq!(messages[0].as_json().unwrap()["header_detail"], "none");
        assert_eq!(messages[5].as_json().unwrap()["frame"], 1);
        assert_eq!(messages[9].as_json().unwrap()["series"], 1);
        assert!(stream.consume_data().is_empty());
    }

    #[test]
    fn test_image_parts() {
        let blob = FrameBlob::zeros((16, 8));
        let image = Image::dummy(3, &blob);
        let mut stream = LegacyStream::new();
        stream.insert_image(image.clone(), 9);

        let messages = stream.consume_data();
        let header = messages[0].as_json().unwrap();
        assert_eq!(header["frame"], 3);
        assert_eq!(header["series"], 9);
        assert_eq!(header["hash"], image.hash.as_str());

        let characteristics = messages[1].as_json().unwrap();
        assert_eq!(characteristics["encoding"], "bs16-lz4<");
        assert_eq!(characteristics["shape"], json!([16, 8]));
        assert_eq!(characteristics["size"], image.data.len());
        assert_eq!(characteristics["type"], "uint16");

        assert_eq!(messages[2].as_binary(), Some(&image.data));
    }

    #[test]
    fn test_basic_header_includes_settings_snapshot() {
        let mut settings = EigerSettings::new();
        settings.set("nimages", 4u64).unwrap();
        let mut stream = LegacyStream::new();

        stream.begin_series(&settings, 2, HeaderDetail::Basic);
        let messages = stream.consume_data();
        assert_eq!(messages.len(), 2);

        let snapshot = messages[1].as_json().unwrap();
        assert_eq!(snapshot["nimages"], 4);
        assert!(snapshot.get("flatfield").is_none());
        assert!(snapshot.get("pixel_mask").is_none());
    }

    #[test]
    fn test_all_header_adds_detail_blocks() {
        let settings = EigerSettings::new();
        let mut stream = LegacyStream::new();

        stream.begin_series(&settings, 3, HeaderDetail::All);
        let messages = stream.consume_data();
        assert_eq!(messages.len(), 2 + 3 * 2);

        let types: Vec<Option<&str>> = messages.iter().map(htype).collect();
        assert_eq!(types[2], Some("flatfield-1.0"));
        assert_eq!(types[4], Some("dpixelmask-1.0"));
        assert_eq!(types[6], Some("dcountrate_table-1.0"));
        assert_eq!(messages[2].as_json().unwrap()["shape"], json!([4148, 4362]));
        assert_eq!(messages[4].as_json().unwrap()["type"], "uint32");
        assert_eq!(messages[3].as_json().unwrap(), &json!({"blob": "blob"}));
    }
}
