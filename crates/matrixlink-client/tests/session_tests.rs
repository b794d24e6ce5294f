//! Session Tests (matrixlink-client)
//!
//! Runs the reconnecting session against a simulated device:
//! - Connect, root walk and handler notification
//! - Reconnect after the device drops the link, with a fresh epoch
//! - Liveness probe failure forcing a reconnect
//! - Commands and subscriptions through the ElementTree surface
//! - Shutdown

use async_trait::async_trait;
use matrixlink_client::{
    ElementTree, SessionBuilder, SessionContext, SessionHandler, SessionState, UpdateCallback,
};
use matrixlink_core::{Element, TreePath};
use matrixlink_test_utils::{
    find_available_port, wait_for_count, wait_until, DeviceModel, SimulatedDevice,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    connects: AtomicU32,
    disconnects: AtomicU32,
    epochs: Mutex<Vec<u64>>,
}

#[async_trait]
impl SessionHandler for Recorder {
    async fn on_connected(&self, ctx: SessionContext) {
        assert!(ctx.epoch.is_current());
        self.epochs.lock().push(ctx.epoch.value());
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, _epoch: u64) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_session(addr: &str, recorder: Arc<Recorder>) -> SessionBuilder {
    SessionBuilder::new(addr)
        .request_timeout(Duration::from_millis(300))
        .probe_interval(Duration::from_millis(100))
        .reconnect_interval(Duration::from_millis(50))
        .reconnect_max_interval(Duration::from_millis(200))
        .handler(recorder)
}

#[tokio::test]
async fn test_session_connects_and_notifies_handler() {
    let device = SimulatedDevice::start(DeviceModel::standard(2, 4)).await;
    let recorder = Arc::new(Recorder::default());
    let session = fast_session(&device.addr(), recorder.clone()).start();

    assert!(wait_for_count(&recorder.connects, 1, Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.client().is_some());
    assert_eq!(*recorder.epochs.lock(), vec![1]);

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.client().is_none());
}

#[tokio::test]
async fn test_session_reconnects_with_new_epoch() {
    let device = SimulatedDevice::start(DeviceModel::standard(2, 4)).await;
    let recorder = Arc::new(Recorder::default());
    let session = fast_session(&device.addr(), recorder.clone()).start();

    assert!(wait_for_count(&recorder.connects, 1, Duration::from_secs(5)).await);
    let first = session.epoch();

    device.drop_connections().await;

    assert!(wait_for_count(&recorder.connects, 2, Duration::from_secs(5)).await);
    assert!(!first.is_current());
    assert!(recorder.disconnects.load(Ordering::SeqCst) >= 1);

    let epochs = recorder.epochs.lock().clone();
    assert_eq!(epochs.len(), 2);
    assert!(epochs[1] > epochs[0]);

    session.shutdown().await;
}

#[tokio::test]
async fn test_failed_probe_forces_reconnect() {
    let device = SimulatedDevice::start(DeviceModel::standard(1, 1)).await;
    let recorder = Arc::new(Recorder::default());
    let session = fast_session(&device.addr(), recorder.clone()).start();

    assert!(wait_for_count(&recorder.connects, 1, Duration::from_secs(5)).await);

    device.set_unresponsive(true);
    assert!(
        wait_until(
            || session.state() != SessionState::Connected,
            Duration::from_secs(5)
        )
        .await,
        "probe timeout did not drop the connection"
    );

    device.set_unresponsive(false);
    assert!(wait_for_count(&recorder.connects, 2, Duration::from_secs(5)).await);

    session.shutdown().await;
}

#[tokio::test]
async fn test_commands_and_pushes_through_session() {
    let device = SimulatedDevice::start(DeviceModel::standard(2, 4)).await;
    let recorder = Arc::new(Recorder::default());
    let session = fast_session(&device.addr(), recorder.clone()).start();
    assert!(wait_for_count(&recorder.connects, 1, Duration::from_secs(5)).await);

    let video = DeviceModel::matrix_path(0);
    let element = session.resolve(&video).await.unwrap();
    assert_eq!(element.as_matrix().unwrap().source_count, 4);

    let pushes = Arc::new(AtomicU32::new(0));
    let counter = pushes.clone();
    let callback: UpdateCallback = Arc::new(move |_: &Element| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    session.subscribe(&video, callback).await.unwrap();
    // Current state arrives right after the acknowledgement
    assert!(wait_for_count(&pushes, 1, Duration::from_secs(2)).await);

    session.matrix_connect(&video, 1, &[3]).await.unwrap();
    assert!(wait_for_count(&pushes, 2, Duration::from_secs(2)).await);
    assert_eq!(device.commands().len(), 1);
    assert_eq!(device.model().lock().route(&video, 1), Some(3));

    let err = session.matrix_connect(&video, 9, &[0]).await.unwrap_err();
    assert!(matches!(err, matrixlink_client::ClientError::Rejected { .. }));

    let missing = TreePath::parse("1.2.9.3").unwrap();
    assert!(session.resolve(&missing).await.unwrap_err().is_path_not_found());

    session.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_device_keeps_retrying_until_shutdown() {
    let port = find_available_port().await;
    let recorder = Arc::new(Recorder::default());
    let session = fast_session(&format!("127.0.0.1:{}", port), recorder.clone()).start();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(session.state(), SessionState::Connected);
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
    assert!(session.epoch().value() >= 2, "expected several attempts");

    tokio::time::timeout(Duration::from_secs(2), session.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(session.state(), SessionState::Disconnected);
}
