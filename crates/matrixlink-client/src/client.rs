//! Tree protocol client
//!
//! One [`TreeClient`] lives for exactly one transport connection. Requests are
//! correlated with replies by id; pushes for subscribed paths are handed to the
//! [`SubscriptionRegistry`]. When the connection goes away every outstanding
//! request fails with [`ClientError::Cancelled`].

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use matrixlink_core::{codec, Element, Message, ReplyBody, TreePath};
use matrixlink_transport::{TransportEvent, TransportReceiver, TransportSender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::registry::SubscriptionRegistry;
use crate::tree::{ElementTree, UpdateCallback};

/// Default time to wait for a reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingReplies = DashMap<u32, oneshot::Sender<ReplyBody>>;

/// Client for a single device connection
pub struct TreeClient {
    /// Outgoing frames, drained by the send task
    outgoing: mpsc::Sender<Bytes>,

    transport: Arc<dyn TransportSender>,

    /// Connection state
    connected: Arc<RwLock<bool>>,

    /// Requests waiting for a reply
    pending: Arc<PendingReplies>,

    /// Push handlers for this connection
    registry: Arc<SubscriptionRegistry>,

    next_id: AtomicU32,
    request_timeout: Duration,

    /// Set to the disconnect reason once the receive loop ends
    closed: watch::Receiver<Option<String>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TreeClient {
    /// Wrap an established transport connection
    pub fn new(
        sender: Arc<dyn TransportSender>,
        mut receiver: Box<dyn TransportReceiver>,
        request_timeout: Duration,
    ) -> Self {
        let connected = Arc::new(RwLock::new(true));
        let pending: Arc<PendingReplies> = Arc::new(DashMap::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let (closed_tx, closed_rx) = watch::channel(None);

        // Send task
        let (tx, mut rx) = mpsc::channel::<Bytes>(100);
        let send_transport = sender.clone();
        let send_task = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if let Err(e) = send_transport.send(data).await {
                    error!("Send error: {}", e);
                    break;
                }
            }
        });

        // Receive task
        let recv_connected = connected.clone();
        let recv_pending = pending.clone();
        let recv_registry = registry.clone();
        let recv_task = tokio::spawn(async move {
            let reason = loop {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => match codec::decode(&data) {
                        Ok(msg) => handle_message(msg, &recv_pending, &recv_registry),
                        Err(e) => warn!("Decode error: {}", e),
                    },
                    Some(TransportEvent::Disconnected { reason }) => {
                        break reason.unwrap_or_else(|| "disconnected".to_string());
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("Transport error: {}", e);
                        break e;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break "connection closed".to_string(),
                }
            };

            info!("Disconnected: {}", reason);
            *recv_connected.write() = false;
            // Dropping the reply senders fails every waiter with Cancelled
            recv_pending.clear();
            let _ = closed_tx.send(Some(reason));
        });

        Self {
            outgoing: tx,
            transport: sender,
            connected,
            pending,
            registry,
            next_id: AtomicU32::new(1),
            request_timeout,
            closed: closed_rx,
            tasks: Mutex::new(vec![send_task, recv_task]),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    /// Push handlers registered on this connection
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Wait until the connection ends, returning the reason
    pub async fn closed(&self) -> String {
        let mut rx = self.closed.clone();
        let reason = match rx.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => (*reason).clone().unwrap_or_default(),
            Err(_) => "client dropped".to_string(),
        };
        reason
    }

    /// Resolve a single element
    pub async fn get_element(&self, path: &TreePath) -> Result<Element> {
        let body = self
            .request(|id| Message::GetElement {
                id,
                path: path.clone(),
            })
            .await?;

        match body {
            ReplyBody::Element(element) => Ok(element),
            ReplyBody::Error { code, message } => {
                Err(ClientError::from_reply(&path.to_string(), code, message))
            }
            _ => Err(ClientError::UnexpectedReply("element")),
        }
    }

    /// Resolve an element together with its direct children
    pub async fn get_directory(&self, path: &TreePath) -> Result<(Element, Vec<Element>)> {
        let body = self
            .request(|id| Message::GetDirectory {
                id,
                path: path.clone(),
            })
            .await?;

        match body {
            ReplyBody::Directory { parent, children } => Ok((parent, children)),
            ReplyBody::Error { code, message } => {
                Err(ClientError::from_reply(&path.to_string(), code, message))
            }
            _ => Err(ClientError::UnexpectedReply("directory")),
        }
    }

    /// Subscribe to pushes on a path.
    ///
    /// The handler is registered before the request goes out so the initial
    /// state push that follows the acknowledgement is not lost.
    pub async fn subscribe(&self, path: &TreePath, callback: UpdateCallback) -> Result<()> {
        if self.registry.register(path.clone(), callback) {
            debug!("Replaced handler for {}", path);
        }

        let result = self
            .request(|id| Message::Subscribe {
                id,
                path: path.clone(),
            })
            .await
            .and_then(|body| expect_ack(path, body));

        if result.is_err() {
            self.registry.remove(path);
        } else {
            debug!("Subscribed to {}", path);
        }
        result
    }

    /// Stop pushes on a path
    pub async fn unsubscribe(&self, path: &TreePath) -> Result<()> {
        self.registry.remove(path);
        let body = self
            .request(|id| Message::Unsubscribe {
                id,
                path: path.clone(),
            })
            .await?;
        expect_ack(path, body)
    }

    /// Connect sources to a matrix target and wait for the device to accept it
    pub async fn matrix_connect(&self, path: &TreePath, target: u32, sources: &[u32]) -> Result<()> {
        debug!("Connect {} target {} <- {:?}", path, target, sources);
        let body = self
            .request(|id| Message::MatrixConnect {
                id,
                path: path.clone(),
                target,
                sources: sources.to_vec(),
            })
            .await?;
        expect_ack(path, body)
    }

    /// Close the connection. Outstanding requests fail with `Cancelled`.
    pub async fn close(&self) {
        *self.connected.write() = false;
        let _ = self.transport.close().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pending.clear();
        self.registry.clear();
    }

    /// Send a request and wait for its reply
    async fn request(&self, build: impl FnOnce(u32) -> Message) -> Result<ReplyBody> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = build(id);
        let data = codec::encode(&message)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.outgoing.send(data).await {
            self.pending.remove(&id);
            return Err(ClientError::SendFailed(e.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                self.pending.remove(&id);
                warn!("{} request {} timed out", message.type_name(), id);
                Err(ClientError::Timeout)
            }
        }
    }
}

impl Drop for TreeClient {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn expect_ack(path: &TreePath, body: ReplyBody) -> Result<()> {
    match body {
        ReplyBody::Ack => Ok(()),
        ReplyBody::Error { code, message } => {
            Err(ClientError::from_reply(&path.to_string(), code, message))
        }
        _ => Err(ClientError::UnexpectedReply("ack")),
    }
}

/// Handle incoming message
fn handle_message(msg: Message, pending: &PendingReplies, registry: &SubscriptionRegistry) {
    match msg {
        Message::Reply { id, body } => {
            if let Some((_, tx)) = pending.remove(&id) {
                let _ = tx.send(body);
            } else {
                debug!("Reply for unknown request {}", id);
            }
        }
        Message::Notify { element } => {
            registry.dispatch(&element.path, &element);
        }
        other => {
            debug!("Ignoring unexpected {} from device", other.type_name());
        }
    }
}

#[async_trait]
impl ElementTree for TreeClient {
    async fn resolve(&self, path: &TreePath) -> Result<Element> {
        self.get_element(path).await
    }

    async fn list_children(&self, path: &TreePath) -> Result<Vec<Element>> {
        self.get_directory(path).await.map(|(_, children)| children)
    }

    async fn subscribe(&self, path: &TreePath, callback: UpdateCallback) -> Result<()> {
        TreeClient::subscribe(self, path, callback).await
    }

    async fn matrix_connect(&self, path: &TreePath, target: u32, sources: &[u32]) -> Result<()> {
        TreeClient::matrix_connect(self, path, target, sources).await
    }
}
