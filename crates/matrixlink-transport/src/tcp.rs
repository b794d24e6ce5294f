//! TCP transport implementation
//!
//! Each message is preceded by a 4-byte big-endian length prefix. The reader
//! reassembles messages across reads and emits one [`TransportEvent::Data`] per
//! complete message.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Maximum message size (1MB; full label directories can be large)
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_buffer_size: 8192,
            keepalive_secs: 30,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connect to a TCP endpoint (`host:port`)
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        debug!("Connecting to TCP: {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let _ = stream.set_nodelay(true);
        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive =
                socket2::TcpKeepalive::new().with_time(Duration::from_secs(self.config.keepalive_secs));
            let _ = socket.set_tcp_keepalive(&keepalive);
        }

        info!("TCP connected to {}", addr);
        Ok(spawn_connection(stream, &self.config))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a stream, spawn its IO loop and hand back both ends
fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    let connected = Arc::new(Mutex::new(true));
    let closer = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        closer: closer.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    let io = IoLoop {
        outgoing_rx,
        incoming_tx,
        max_size: config.max_message_size,
        read_buffer_size: config.read_buffer_size,
        connected,
        closer,
    };

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        io.run(reader, writer).await;
    });

    (sender, receiver)
}

struct IoLoop {
    outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    max_size: usize,
    read_buffer_size: usize,
    connected: Arc<Mutex<bool>>,
    closer: Arc<Notify>,
}

impl IoLoop {
    async fn run(mut self, mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) {
        let mut read_buf = BytesMut::with_capacity(self.read_buffer_size);

        loop {
            tokio::select! {
                _ = self.closer.notified() => {
                    debug!("TCP connection closed locally");
                    let _ = writer.shutdown().await;
                    break;
                }

                outgoing = self.outgoing_rx.recv() => {
                    let Some(data) = outgoing else {
                        let _ = writer.shutdown().await;
                        break;
                    };
                    let mut frame = BytesMut::with_capacity(4 + data.len());
                    frame.put_u32(data.len() as u32);
                    frame.extend_from_slice(&data);

                    if let Err(e) = writer.write_all(&frame).await {
                        error!("TCP write error: {}", e);
                        let _ = self.incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }

                result = reader.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("TCP connection closed by peer");
                            let _ = self.incoming_tx
                                .send(TransportEvent::Disconnected { reason: None })
                                .await;
                            break;
                        }
                        Ok(_) => {
                            if !self.drain_frames(&mut read_buf).await {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("TCP read error: {}", e);
                            let _ = self.incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
        }

        *self.connected.lock() = false;
    }

    /// Emit every complete frame in the buffer. Returns false when the
    /// connection must be dropped.
    async fn drain_frames(&self, read_buf: &mut BytesMut) -> bool {
        while read_buf.len() >= 4 {
            let len = (&read_buf[..4]).get_u32() as usize;

            if len > self.max_size {
                error!("Message too large: {} > {}", len, self.max_size);
                let _ = self
                    .incoming_tx
                    .send(TransportEvent::Disconnected {
                        reason: Some(format!("message too large: {}", len)),
                    })
                    .await;
                return false;
            }

            if read_buf.len() < 4 + len {
                break;
            }

            read_buf.advance(4);
            let data = read_buf.split_to(len).freeze();
            if self.incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// TCP sender for writing messages
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    closer: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".into()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.closer.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading messages
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let _ = stream.set_nodelay(true);
        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        // The listener closes when dropped
        Ok(())
    }
}
