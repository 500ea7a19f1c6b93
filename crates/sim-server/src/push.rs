//! Push adapters and transports for detector streams.
//!
//! After every device update a [`StreamPushAdapter`] drains one stream
//! encoder and, if anything was queued, hands the whole batch to its
//! [`PushTransport`] as a single multipart message. Empty drains send
//! nothing.
//!
//! # TCP framing
//!
//! [`TcpPushServer`] writes each batch as
//!
//! ```text
//! u32 BE  number of parts
//! repeat: u32 BE part length, part bytes
//! ```
//!
//! Like a PUSH socket, batches queue while no consumer is connected and each
//! batch goes to exactly one consumer. The queue is bounded by a high-water
//! mark; once full, further batches are refused and the adapter logs the drop.

use crate::runner::AfterUpdate;
use bytes::{BufMut, Bytes, BytesMut};
use sim_core::{SimError, SimResult};
use sim_driver_eiger::{EigerDevice, StreamFormat};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// One multipart message: every part queued by a single drain.
pub type Batch = Vec<Bytes>;

/// Batches held for a push consumer before new ones are refused.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Outbound side of a push channel.
///
/// `send` is called with the device locked, so it must not block.
pub trait PushTransport: Send {
    /// Queue one batch, failing with [`SimError::Transport`] when the batch
    /// cannot be accepted.
    fn send(&self, batch: Batch) -> SimResult<()>;
}

// =============================================================================
// In-process transport
// =============================================================================

/// Transport delivering batches to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Batch>,
}

impl ChannelTransport {
    /// Transport holding at most `high_water_mark` undelivered batches.
    pub fn new(high_water_mark: usize) -> (Self, mpsc::Receiver<Batch>) {
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        (Self { tx }, rx)
    }
}

impl PushTransport for ChannelTransport {
    fn send(&self, batch: Batch) -> SimResult<()> {
        self.tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => SimError::Transport(format!(
                "push queue full ({} batches)",
                self.tx.max_capacity()
            )),
            TrySendError::Closed(_) => SimError::Transport("push receiver closed".to_string()),
        })
    }
}

// =============================================================================
// TCP transport
// =============================================================================

/// Encode a batch in the length-prefixed multipart framing.
pub fn encode_batch(batch: &[Bytes]) -> Bytes {
    let size = 4 + batch.iter().map(|part| 4 + part.len()).sum::<usize>();
    let mut out = BytesMut::with_capacity(size);
    out.put_u32(batch.len() as u32);
    for part in batch {
        out.put_u32(part.len() as u32);
        out.put_slice(part);
    }
    out.freeze()
}

/// Read one length-prefixed multipart batch.
pub async fn read_batch<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Batch> {
    let parts = reader.read_u32().await?;
    let mut batch = Vec::with_capacity(parts as usize);
    for _ in 0..parts {
        let len = reader.read_u32().await? as usize;
        let mut part = vec![0u8; len];
        reader.read_exact(&mut part).await?;
        batch.push(Bytes::from(part));
    }
    Ok(batch)
}

/// TCP server pushing batches to one connected consumer at a time.
pub struct TcpPushServer {
    local_addr: SocketAddr,
    transport: ChannelTransport,
    task: JoinHandle<()>,
}

impl TcpPushServer {
    /// Listen on `addr` (port 0 picks a free port), queueing up to
    /// `high_water_mark` batches while no consumer is connected.
    pub async fn bind(addr: SocketAddr, high_water_mark: usize) -> SimResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (transport, rx) = ChannelTransport::new(high_water_mark);
        tracing::info!("Push server listening on {}", local_addr);
        let task = tokio::spawn(serve(listener, rx));
        Ok(Self {
            local_addr,
            transport,
            task,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport feeding this server.
    pub fn transport(&self) -> ChannelTransport {
        self.transport.clone()
    }
}

impl Drop for TcpPushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, mut rx: mpsc::Receiver<Batch>) {
    let mut pending: Option<Batch> = None;
    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Push server accept failed: {}", e);
                continue;
            }
        };
        tracing::debug!("Push consumer connected: {}", peer);

        // consumers never send; a readable socket means EOF or an error
        let mut scratch = [0u8; 1];
        loop {
            let batch = match pending.take() {
                Some(batch) => batch,
                None => tokio::select! {
                    biased;
                    read = socket.read(&mut scratch) => match read {
                        Ok(0) => {
                            tracing::debug!("Push consumer {} disconnected", peer);
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!("Push consumer {} dropped: {}", peer, e);
                            break;
                        }
                    },
                    batch = rx.recv() => match batch {
                        Some(batch) => batch,
                        None => return,
                    },
                },
            };
            if let Err(e) = write_batch(&mut socket, &batch).await {
                tracing::warn!("Push consumer {} dropped: {}", peer, e);
                // resend to the next consumer
                pending = Some(batch);
                break;
            }
        }
    }
}

async fn write_batch(socket: &mut TcpStream, batch: &[Bytes]) -> io::Result<()> {
    socket.write_all(&encode_batch(batch)).await?;
    socket.flush().await
}

// =============================================================================
// Adapter
// =============================================================================

/// Forwards one Eiger stream's messages to a transport after every update.
pub struct StreamPushAdapter {
    format: StreamFormat,
    transport: Box<dyn PushTransport>,
}

impl StreamPushAdapter {
    /// Adapter draining the `format` encoder into `transport`.
    pub fn new(format: StreamFormat, transport: impl PushTransport + 'static) -> Self {
        Self {
            format,
            transport: Box::new(transport),
        }
    }
}

impl AfterUpdate<EigerDevice> for StreamPushAdapter {
    fn after_update(&mut self, device: &mut EigerDevice) {
        let messages = device.stream_mut(self.format).consume_data();
        if messages.is_empty() {
            return;
        }
        tracing::debug!("Pushing {} {} stream parts", messages.len(), self.format);
        let batch = messages.into_iter().map(|m| m.into_bytes()).collect();
        if let Err(e) = self.transport.send(batch) {
            tracing::warn!("Failed to push {} stream batch: {}", self.format, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{Device, SimTime};
    use sim_driver_eiger::EigerInputs;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn small_device() -> EigerDevice {
        let mut device = EigerDevice::new();
        let settings = device.settings_mut();
        settings.set("x_pixels_in_detector", 16u64).unwrap();
        settings.set("y_pixels_in_detector", 8u64).unwrap();
        settings.set("trigger_mode", "ints").unwrap();
        device
    }

    #[test]
    fn test_frame_encoding() {
        let batch = vec![Bytes::from_static(b"ab"), Bytes::new()];
        let encoded = encode_batch(&batch);
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0][..]
        );
    }

    #[tokio::test]
    async fn test_read_batch_decodes_framing() {
        let batch = vec![Bytes::from_static(b"header"), Bytes::from_static(&[0, 1, 2])];
        let encoded = encode_batch(&batch);
        let mut reader = encoded.as_ref();
        assert_eq!(read_batch(&mut reader).await.unwrap(), batch);
    }

    #[test]
    fn test_adapter_skips_empty_drains() {
        let (transport, mut rx) = ChannelTransport::new(16);
        let mut adapter = StreamPushAdapter::new(StreamFormat::Legacy, transport);
        let mut device = small_device();

        adapter.after_update(&mut device);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_adapter_forwards_one_batch_per_update() {
        let (transport, mut rx) = ChannelTransport::new(16);
        let mut adapter = StreamPushAdapter::new(StreamFormat::Legacy, transport);
        let mut device = small_device();
        device.stream_config_mut().set("format", "legacy").unwrap();
        device.stream_config_mut().set("header_detail", "none").unwrap();

        device.initialize();
        device.arm();
        adapter.after_update(&mut device);
        let header = rx.try_recv().unwrap();
        assert_eq!(header.len(), 1);

        device.trigger();
        device.update(SimTime::ZERO, &EigerInputs::default());
        adapter.after_update(&mut device);
        let image = rx.try_recv().unwrap();
        assert_eq!(image.len(), 4);

        device.update(SimTime::ZERO, &EigerInputs::default());
        adapter.after_update(&mut device);
        let end = rx.try_recv().unwrap();
        assert_eq!(end.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_adapter_only_drains_its_format() {
        let (transport, mut rx) = ChannelTransport::new(16);
        let mut legacy = StreamPushAdapter::new(StreamFormat::Legacy, transport);
        let mut device = small_device();

        device.arm(); // default format is cbor
        legacy.after_update(&mut device);
        assert!(rx.try_recv().is_err());
        assert_eq!(device.stream_mut(StreamFormat::Cbor).consume_data().len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_adapter_logs_closed_transport() {
        let (transport, rx) = ChannelTransport::new(16);
        drop(rx);
        let mut adapter = StreamPushAdapter::new(StreamFormat::Cbor, transport);
        let mut device = small_device();

        device.arm();
        adapter.after_update(&mut device);
        assert!(logs_contain("Failed to push cbor stream batch"));
    }

    #[tokio::test]
    async fn test_tcp_push_server_queues_until_connected() {
        let server = TcpPushServer::bind("127.0.0.1:0".parse().unwrap(), DEFAULT_HIGH_WATER_MARK)
            .await
            .unwrap();
        let transport = server.transport();
        transport.send(vec![Bytes::from_static(b"first")]).unwrap();
        transport
            .send(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
            .unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), read_batch(&mut client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, vec![Bytes::from_static(b"first")]);
        let second = read_batch(&mut client).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_channel_transport_refuses_batches_past_high_water_mark() {
        let (transport, mut rx) = ChannelTransport::new(2);
        transport.send(vec![Bytes::from_static(b"1")]).unwrap();
        transport.send(vec![Bytes::from_static(b"2")]).unwrap();

        let overflow = transport.send(vec![Bytes::from_static(b"3")]);
        assert!(matches!(overflow, Err(SimError::Transport(msg)) if msg.contains("full")));

        // draining makes room again
        assert_eq!(rx.try_recv().unwrap(), vec![Bytes::from_static(b"1")]);
        transport.send(vec![Bytes::from_static(b"4")]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![Bytes::from_static(b"2")]);
        assert_eq!(rx.try_recv().unwrap(), vec![Bytes::from_static(b"4")]);
    }

    #[tokio::test]
    async fn test_tcp_push_server_keeps_batches_after_consumer_leaves() {
        let server = TcpPushServer::bind("127.0.0.1:0".parse().unwrap(), DEFAULT_HIGH_WATER_MARK)
            .await
            .unwrap();
        let transport = server.transport();

        let mut first = TcpStream::connect(server.local_addr()).await.unwrap();
        transport.send(vec![Bytes::from_static(b"one")]).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), read_batch(&mut first))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, vec![Bytes::from_static(b"one")]);
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;

        transport.send(vec![Bytes::from_static(b"two")]).unwrap();
        transport.send(vec![Bytes::from_static(b"three")]).unwrap();

        let mut second = TcpStream::connect(server.local_addr()).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), read_batch(&mut second))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, vec![Bytes::from_static(b"two")]);
        let last = read_batch(&mut second).await.unwrap();
        assert_eq!(last, vec![Bytes::from_static(b"three")]);
    }
}
