//! In-memory transport
//!
//! A connected pair of endpoints backed by channels. Closing one side delivers
//! `Disconnected` to the other.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

const CHANNEL_BUFFER_SIZE: usize = 1000;

/// Sending half of an in-memory endpoint
pub struct MemorySender {
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

/// Receiving half of an in-memory endpoint
pub struct MemoryReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

/// Create two connected endpoints
pub fn channel_pair() -> ((MemorySender, MemoryReceiver), (MemorySender, MemoryReceiver)) {
    let connected = Arc::new(AtomicBool::new(true));
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

    let a = (
        MemorySender {
            tx: b_tx,
            connected: connected.clone(),
        },
        MemoryReceiver { rx: a_rx },
    );
    let b = (
        MemorySender {
            tx: a_tx,
            connected,
        },
        MemoryReceiver { rx: b_rx },
    );
    (a, b)
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(TransportEvent::Data(data))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .try_send(TransportEvent::Data(data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    async fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .tx
                .send(TransportEvent::Disconnected {
                    reason: Some("closed".to_string()),
                })
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let ((a_tx, mut a_rx), (b_tx, mut b_rx)) = channel_pair();

        a_tx.send(Bytes::from_static(b"ping")).await.unwrap();
        match b_rx.recv().await {
            Some(TransportEvent::Data(d)) => assert_eq!(&d[..], b"ping"),
            other => panic!("unexpected: {:?}", other),
        }

        b_tx.send(Bytes::from_static(b"pong")).await.unwrap();
        match a_rx.recv().await {
            Some(TransportEvent::Data(d)) => assert_eq!(&d[..], b"pong"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_notifies_peer() {
        let ((a_tx, _a_rx), (b_tx, mut b_rx)) = channel_pair();
        a_tx.close().await.unwrap();

        assert!(matches!(
            b_rx.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert!(!b_tx.is_connected());
        assert!(b_tx.send(Bytes::from_static(b"late")).await.is_err());
    }
}
