//! End-to-end tests: REST control of a launched Eiger and its push streams.

use hyper::{Body, Client, Request, StatusCode};
use serde_json::{Value, json};
use sim_driver_eiger::{EigerDevice, StreamFormat};
use sim_server::{EigerComponent, EigerComponentConfig, read_batch};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const DETECTOR: &str = "detector/api/1.8.0";

fn local_config() -> EigerComponentConfig {
    EigerComponentConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        stream_host: "127.0.0.1".to_string(),
        stream_legacy_port: 0,
        stream_cbor_port: 0,
        ..EigerComponentConfig::default()
    }
}

async fn launch() -> EigerComponent {
    let mut device = EigerDevice::new();
    let settings = device.settings_mut();
    settings.set("x_pixels_in_detector", 16u64).unwrap();
    settings.set("y_pixels_in_detector", 8u64).unwrap();
    settings.set("count_time", 0.001).unwrap();
    EigerComponent::launch(device, &local_config()).await.unwrap()
}

async fn send(addr: SocketAddr, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let request = Request::builder()
        .method(method)
        .uri(format!("http://{}/{}", addr, path))
        .body(body)
        .unwrap();
    let response = timeout(Duration::from_secs(10), Client::new().request(request))
        .await
        .expect("request timed out")
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn get(addr: SocketAddr, path: &str) -> Value {
    let (status, body) = send(addr, "GET", path, None).await;
    assert_eq!(status, StatusCode::OK, "GET {}", path);
    serde_json::from_slice(&body).unwrap()
}

async fn put(addr: SocketAddr, path: &str, value: Value) -> Value {
    let (status, body) = send(addr, "PUT", path, Some(json!({ "value": value }))).await;
    assert_eq!(status, StatusCode::OK, "PUT {}", path);
    serde_json::from_slice(&body).unwrap()
}

async fn command(addr: SocketAddr, name: &str) -> Value {
    let (status, body) = send(addr, "PUT", &format!("{}/command/{}", DETECTOR, name), None).await;
    assert_eq!(status, StatusCode::OK, "command {}", name);
    serde_json::from_slice(&body).unwrap()
}

async fn next_batch(stream: &mut TcpStream) -> Vec<bytes::Bytes> {
    timeout(Duration::from_secs(10), read_batch(stream))
        .await
        .expect("no batch pushed")
        .unwrap()
}

fn htype(part: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(part).ok()?;
    value.get("htype")?.as_str().map(str::to_string)
}

#[tokio::test]
async fn field_reads_and_writes() {
    let eiger = launch().await;
    let addr = eiger.http_addr();

    let nimages = get(addr, &format!("{}/config/nimages", DETECTOR)).await;
    assert_eq!(nimages, json!({"access_mode": "rw", "value": 1, "value_type": "uint"}));

    let changed = put(addr, &format!("{}/config/element", DETECTOR), json!("Cu")).await;
    assert_eq!(changed, json!(["photon_energy", "wavelength", "threshold_energy", "element"]));
    let energy = get(addr, &format!("{}/config/photon_energy", DETECTOR)).await;
    assert_eq!(energy["value"], json!(8047.78));

    let (status, _) = send(addr, "GET", &format!("{}/config/no_such_field", DETECTOR), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        addr,
        "PUT",
        &format!("{}/config/description", DETECTOR),
        Some(json!({"value": "mine"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let state = get(addr, &format!("{}/status/state", DETECTOR)).await;
    assert_eq!(state["value"], json!("na"));
    let temp = get(addr, &format!("{}/status/board_000/th0_temp", DETECTOR)).await;
    assert_eq!(temp["value"], json!(24.5));

    let keys = get(addr, "stream/api/1.8.0/config/keys").await;
    assert_eq!(
        keys,
        json!(["format", "header_appendix", "header_detail", "image_appendix", "mode"])
    );

    eiger.shutdown().await;
}

#[tokio::test]
async fn command_payload_is_rejected() {
    let eiger = launch().await;
    let addr = eiger.http_addr();

    let (status, body) = send(
        addr,
        "PUT",
        &format!("{}/command/initialize", DETECTOR),
        Some(json!({"value": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        r#"error during request: path error: unknown path: "initialize""#
    );

    eiger.shutdown().await;
}

#[tokio::test]
async fn ints_acquisition_over_legacy_stream() {
    let eiger = launch().await;
    let addr = eiger.http_addr();
    let mut stream = TcpStream::connect(eiger.stream_addr(StreamFormat::Legacy))
        .await
        .unwrap();

    put(addr, &format!("{}/config/trigger_mode", DETECTOR), json!("ints")).await;
    put(addr, &format!("{}/config/nimages", DETECTOR), json!(2)).await;
    put(addr, "stream/api/1.8.0/config/format", json!("legacy")).await;

    assert_eq!(command(addr, "initialize").await, json!({"sequence id": 1}));
    assert_eq!(command(addr, "arm").await, json!({"sequence id": 2}));
    assert_eq!(
        get(addr, &format!("{}/status/state", DETECTOR)).await["value"],
        json!("ready")
    );

    // returns once both frames are acquired
    assert_eq!(command(addr, "trigger").await, json!({"sequence id": 4}));

    let header = next_batch(&mut stream).await;
    assert_eq!(header.len(), 2);
    assert_eq!(htype(&header[0]).as_deref(), Some("dheader-1.0"));

    for frame in 0..2 {
        let image = next_batch(&mut stream).await;
        assert_eq!(image.len(), 4);
        let frame_header: Value = serde_json::from_slice(&image[0]).unwrap();
        assert_eq!(frame_header["htype"], json!("dimage-1.0"));
        assert_eq!(frame_header["frame"], json!(frame));
        assert_eq!(frame_header["series"], json!(1));
    }

    let end = next_batch(&mut stream).await;
    assert_eq!(htype(&end[0]).as_deref(), Some("dseries_end-1.0"));

    // the completing update also finished the series
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        get(addr, &format!("{}/status/state", DETECTOR)).await["value"],
        json!("idle")
    );

    eiger.shutdown().await;
}

#[tokio::test]
async fn exts_trigger_input_over_cbor_stream() {
    let eiger = launch().await;
    let addr = eiger.http_addr();
    let mut stream = TcpStream::connect(eiger.stream_addr(StreamFormat::Cbor))
        .await
        .unwrap();

    put(addr, &format!("{}/config/nimages", DETECTOR), json!(3)).await;
    command(addr, "initialize").await;
    command(addr, "arm").await;

    let start = next_batch(&mut stream).await;
    assert_eq!(start.len(), 1);
    // self-describe tag 55799
    assert_eq!(&start[0][..3], &[0xd9, 0xd9, 0xf7]);

    eiger.inputs().set(|inputs| inputs.trigger = true);

    let mut images = 0;
    loop {
        let batch = next_batch(&mut stream).await;
        assert_eq!(batch.len(), 1);
        let message: ciborium::Value = ciborium::de::from_reader(batch[0].as_ref()).unwrap();
        let ciborium::Value::Tag(55799, inner) = message else {
            panic!("missing self-describe tag");
        };
        let kind = inner
            .as_map()
            .and_then(|map| map.iter().find(|(k, _)| k.as_text() == Some("type")))
            .and_then(|(_, v)| v.as_text().map(str::to_string))
            .unwrap();
        match kind.as_str() {
            "image" => images += 1,
            "end" => break,
            other => panic!("unexpected message type {}", other),
        }
    }
    assert_eq!(images, 3);

    eiger.shutdown().await;
}
