//! Simulated device speaking the envelope protocol over TCP
//!
//! RAII: the accept loop and every connection task are aborted on drop.

use matrixlink_core::{codec, Element, Message, TreePath};
use matrixlink_transport::{
    TcpSender, TcpServer, TransportError, TransportEvent, TransportReceiver, TransportSender,
    TransportServer,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{ConnectCommand, DeviceModel};

struct Peer {
    sender: Arc<TcpSender>,
    subscriptions: HashSet<TreePath>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    peers: Mutex<HashMap<u64, Peer>>,
    commands: Mutex<Vec<ConnectCommand>>,
    unresponsive: AtomicBool,
    next_peer: AtomicU64,
}

/// A device on a local TCP port
pub struct SimulatedDevice {
    addr: SocketAddr,
    model: Arc<Mutex<DeviceModel>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// Start on an ephemeral localhost port
    pub async fn start(model: DeviceModel) -> Self {
        match Self::start_on("127.0.0.1:0", model).await {
            Ok(device) => device,
            Err(e) => panic!("failed to start simulated device: {}", e),
        }
    }

    /// Start on a specific address
    pub async fn start_on(addr: &str, model: DeviceModel) -> Result<Self, TransportError> {
        let mut server = TcpServer::bind(addr).await?;
        let addr = server.local_addr()?;
        let model = Arc::new(Mutex::new(model));
        let shared = Arc::new(Shared::default());

        let accept_model = model.clone();
        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((sender, receiver, peer_addr)) => {
                        let id = accept_shared.next_peer.fetch_add(1, Ordering::SeqCst);
                        let sender = Arc::new(sender);
                        accept_shared.peers.lock().insert(
                            id,
                            Peer {
                                sender: sender.clone(),
                                subscriptions: HashSet::new(),
                                task: None,
                            },
                        );
                        let task = tokio::spawn(serve_peer(
                            id,
                            sender,
                            receiver,
                            accept_model.clone(),
                            accept_shared.clone(),
                        ));
                        if let Some(peer) = accept_shared.peers.lock().get_mut(&id) {
                            peer.task = Some(task);
                        }
                        debug!("Simulated device accepted {} as peer {}", peer_addr, id);
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        info!("Simulated device listening on {}", addr);
        Ok(Self {
            addr,
            model,
            shared,
            handle: Some(handle),
        })
    }

    /// `host:port` for clients
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn model(&self) -> Arc<Mutex<DeviceModel>> {
        self.model.clone()
    }

    /// Connect commands received so far
    pub fn commands(&self) -> Vec<ConnectCommand> {
        self.shared.commands.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.peers.lock().len()
    }

    /// Stop answering requests (pushes also stop)
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.shared.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Change a route on the device and push it to subscribers
    pub async fn set_route(&self, matrix: &TreePath, target: u32, source: u32) {
        let delta = self.model.lock().set_route(matrix, target, vec![source]);
        if let Some(delta) = delta {
            broadcast(&self.shared, &delta).await;
        }
    }

    /// Change a label on the device and push it to subscribers
    pub async fn set_label(&self, leaf: &TreePath, label: &str) {
        let element = self.model.lock().set_label(leaf, label);
        if let Some(element) = element {
            broadcast(&self.shared, &element).await;
        }
    }

    /// Close every client connection; the listener stays up
    pub async fn drop_connections(&self) {
        let peers: Vec<Peer> = self.shared.peers.lock().drain().map(|(_, p)| p).collect();
        for peer in peers {
            let _ = peer.sender.close().await;
            if let Some(task) = peer.task {
                task.abort();
            }
        }
    }

    /// Stop the device explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        for (_, peer) in self.shared.peers.lock().drain() {
            if let Some(task) = peer.task {
                task.abort();
            }
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_peer(
    id: u64,
    sender: Arc<TcpSender>,
    mut receiver: impl TransportReceiver,
    model: Arc<Mutex<DeviceModel>>,
    shared: Arc<Shared>,
) {
    while let Some(event) = receiver.recv().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Disconnected { .. } | TransportEvent::Error(_) => break,
            TransportEvent::Connected => continue,
        };

        if shared.unresponsive.load(Ordering::SeqCst) {
            continue;
        }

        let request = match codec::decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Peer {} sent undecodable frame: {}", id, e);
                continue;
            }
        };

        match &request {
            Message::Subscribe { path, .. } => {
                if let Some(peer) = shared.peers.lock().get_mut(&id) {
                    peer.subscriptions.insert(path.clone());
                }
            }
            Message::Unsubscribe { path, .. } => {
                if let Some(peer) = shared.peers.lock().get_mut(&id) {
                    peer.subscriptions.remove(path);
                }
            }
            Message::MatrixConnect {
                path,
                target,
                sources,
                ..
            } => {
                shared.commands.lock().push(ConnectCommand {
                    path: path.clone(),
                    target: *target,
                    sources: sources.clone(),
                });
            }
            _ => {}
        }

        let handled = model.lock().handle(request);
        let Some(handled) = handled else {
            continue;
        };

        if send(&sender, &handled.reply).await.is_err() {
            break;
        }
        if let Some(initial) = handled.initial {
            if send(&sender, &Message::Notify { element: initial }).await.is_err() {
                break;
            }
        }
        if let Some(delta) = handled.broadcast {
            broadcast(&shared, &delta).await;
        }
    }

    shared.peers.lock().remove(&id);
    debug!("Peer {} gone", id);
}

async fn send(sender: &TcpSender, message: &Message) -> Result<(), TransportError> {
    let data = codec::encode(message).map_err(|e| TransportError::Other(e.to_string()))?;
    sender.send(data).await
}

/// Push an element to every peer subscribed to its path
async fn broadcast(shared: &Shared, element: &Element) {
    let targets: Vec<Arc<TcpSender>> = shared
        .peers
        .lock()
        .values()
        .filter(|p| p.subscriptions.contains(&element.path))
        .map(|p| p.sender.clone())
        .collect();

    let message = Message::Notify {
        element: element.clone(),
    };
    for sender in targets {
        let _ = send(&sender, &message).await;
    }
}
