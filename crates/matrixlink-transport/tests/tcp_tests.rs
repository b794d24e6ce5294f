//! TCP transport tests
//!
//! - Length-prefixed framing across a real socket
//! - Large messages split over several reads
//! - Close propagation

use bytes::Bytes;
use matrixlink_transport::{
    TcpServer, TcpTransport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use std::time::Duration;
use tokio::time::timeout;

async fn recv_data<R: TransportReceiver>(receiver: &mut R) -> Bytes {
    loop {
        match timeout(Duration::from_secs(2), receiver.recv()).await {
            Ok(Some(TransportEvent::Data(data))) => return data,
            Ok(Some(TransportEvent::Connected)) => continue,
            other => panic!("expected data, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_tcp_echo() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (sender, mut receiver, _peer) = server.accept().await.unwrap();
        let data = recv_data(&mut receiver).await;
        sender.send(data).await.unwrap();
        (sender, receiver)
    });

    let transport = TcpTransport::new();
    let (client_tx, mut client_rx) = transport.connect(&addr.to_string()).await.unwrap();

    client_tx.send(Bytes::from("hello device")).await.unwrap();
    assert_eq!(recv_data(&mut client_rx).await, Bytes::from("hello device"));

    let _ = accept.await;
}

#[tokio::test]
async fn test_tcp_large_message_reassembled() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let payload = Bytes::from(vec![0xAB; 200_000]);
    let expected = payload.clone();

    let accept = tokio::spawn(async move {
        let (sender, receiver, _peer) = server.accept().await.unwrap();
        sender.send(payload).await.unwrap();
        (sender, receiver)
    });

    let (_client_tx, mut client_rx) = TcpTransport::new().connect(&addr.to_string()).await.unwrap();
    let received = recv_data(&mut client_rx).await;
    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);

    let _ = accept.await;
}

#[tokio::test]
async fn test_tcp_close_reaches_peer() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (sender, mut receiver, _peer) = server.accept().await.unwrap();
        let event = timeout(Duration::from_secs(2), receiver.recv()).await;
        drop(sender);
        event
    });

    let (client_tx, _client_rx) = TcpTransport::new().connect(&addr.to_string()).await.unwrap();
    client_tx.close().await.unwrap();
    assert!(!client_tx.is_connected());

    let event = accept.await.unwrap();
    assert!(matches!(
        event,
        Ok(Some(TransportEvent::Disconnected { .. })) | Ok(Some(TransportEvent::Error(_))) | Ok(None)
    ));
}
