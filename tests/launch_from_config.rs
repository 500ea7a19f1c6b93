//! Launch the Eiger component the way the binary does, from a config file.

use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tickit_devices::SimConfig;
use tickit_devices::sim_driver_eiger::{State, StreamFormat, TriggerMode};
use tickit_devices::sim_server::{EigerComponent, read_batch};
use tokio::net::TcpStream;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
#[serial]
async fn configured_settings_reach_the_running_device() {
    let file = write_config(
        r#"
[eiger]
host = "127.0.0.1"
port = 0
stream_legacy_port = 0
stream_cbor_port = 0

[eiger.settings]
nimages = 3
trigger_mode = "ints"
"#,
    );

    let config = SimConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    let device = config.eiger.build_device().unwrap();
    let eiger = EigerComponent::launch(device, &config.eiger.component)
        .await
        .unwrap();

    {
        let device = eiger.device();
        let device = device.lock().await;
        assert_eq!(device.settings().nimages(), 3);
        assert_eq!(device.settings().trigger_mode(), Some(TriggerMode::Ints));
        assert_eq!(device.state(), State::Na);
    }

    let mut stream = TcpStream::connect(eiger.stream_addr(StreamFormat::Cbor))
        .await
        .unwrap();
    {
        let device = eiger.device();
        let mut device = device.lock().await;
        device.initialize();
        device.arm();
    }
    eiger.interrupt().raise();

    let start = tokio::time::timeout(Duration::from_secs(10), read_batch(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(start.len(), 1);

    eiger.shutdown().await;
}

#[test]
#[serial]
fn rejected_setting_aborts_startup() {
    let file = write_config(
        r#"
[eiger.settings]
trigger_mode = "whenever"
"#,
    );

    let config = SimConfig::load_from(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert!(config.eiger.build_device().is_err());
}
