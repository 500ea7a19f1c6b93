//! Eiger component: device, runner and adapters wired together.
//!
//! One REST server plus one push server per stream format, mirroring the
//! ports of a real Eiger DCU.

use crate::http::{HttpServerHandle, start_http_server};
use crate::push::{DEFAULT_HIGH_WATER_MARK, StreamPushAdapter, TcpPushServer};
use crate::rest::EigerRestAdapter;
use crate::runner::{DeviceRunner, InputHandle, Interrupt, RunnerHandle, SharedDevice};
use serde::{Deserialize, Serialize};
use sim_core::{SimError, SimResult};
use sim_driver_eiger::{EigerDevice, EigerInputs, StreamFormat};
use std::net::{IpAddr, SocketAddr};

/// Network bindings of the Eiger component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EigerComponentConfig {
    /// REST interface address
    #[serde(default = "default_host")]
    pub host: String,
    /// REST interface port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the stream push servers bind to
    #[serde(default = "default_stream_host")]
    pub stream_host: String,
    /// Legacy (JSON multipart) stream port
    #[serde(default = "default_stream_legacy_port")]
    pub stream_legacy_port: u16,
    /// CBOR stream port
    #[serde(default = "default_stream_cbor_port")]
    pub stream_cbor_port: u16,
    /// Batches each stream holds for an absent consumer before dropping
    #[serde(default = "default_stream_high_water_mark")]
    pub stream_high_water_mark: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_stream_host() -> String {
    "127.0.0.1".to_string()
}
fn default_stream_legacy_port() -> u16 {
    9999
}
fn default_stream_cbor_port() -> u16 {
    31001
}
fn default_stream_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

impl Default for EigerComponentConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_host: default_stream_host(),
            stream_legacy_port: default_stream_legacy_port(),
            stream_cbor_port: default_stream_cbor_port(),
            stream_high_water_mark: default_stream_high_water_mark(),
        }
    }
}

fn socket_addr(host: &str, port: u16) -> SimResult<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| SimError::Transport(format!("invalid host '{}': {}", host, e)))?;
    Ok(SocketAddr::new(ip, port))
}

/// A launched Eiger simulation.
pub struct EigerComponent {
    runner: RunnerHandle<EigerDevice>,
    http: HttpServerHandle,
    legacy: TcpPushServer,
    cbor: TcpPushServer,
}

impl EigerComponent {
    /// Bind every server and start the device runner.
    pub async fn launch(device: EigerDevice, config: &EigerComponentConfig) -> SimResult<Self> {
        let hwm = config.stream_high_water_mark;
        let legacy =
            TcpPushServer::bind(socket_addr(&config.stream_host, config.stream_legacy_port)?, hwm).await?;
        let cbor =
            TcpPushServer::bind(socket_addr(&config.stream_host, config.stream_cbor_port)?, hwm).await?;

        let mut runner = DeviceRunner::new(device);
        runner.add_hook(StreamPushAdapter::new(StreamFormat::Legacy, legacy.transport()));
        runner.add_hook(StreamPushAdapter::new(StreamFormat::Cbor, cbor.transport()));

        let rest = EigerRestAdapter::new(runner.device(), runner.interrupt());
        let http = start_http_server(socket_addr(&config.host, config.port)?, rest)?;
        let runner = runner.spawn();

        tracing::info!(
            "Eiger simulation running: REST {}, legacy stream {}, CBOR stream {}",
            http.local_addr(),
            legacy.local_addr(),
            cbor.local_addr()
        );

        Ok(Self {
            runner,
            http,
            legacy,
            cbor,
        })
    }

    /// The simulated detector, shared with the runner.
    pub fn device(&self) -> SharedDevice<EigerDevice> {
        self.runner.device()
    }

    /// Wakes the runner after the device was changed directly.
    pub fn interrupt(&self) -> Interrupt {
        self.runner.interrupt()
    }

    /// External trigger line of the detector.
    pub fn inputs(&self) -> InputHandle<EigerInputs> {
        self.runner.inputs()
    }

    /// Bound REST address.
    pub fn http_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    /// Bound push address of a stream format.
    pub fn stream_addr(&self, format: StreamFormat) -> SocketAddr {
        match format {
            StreamFormat::Legacy => self.legacy.local_addr(),
            StreamFormat::Cbor => self.cbor.local_addr(),
        }
    }

    /// Stop the REST server and the runner.
    pub async fn shutdown(self) {
        tracing::info!("Stopping Eiger simulation");
        self.http.shutdown().await;
        self.runner.shutdown().await;
    }
}
