//! Panel Tests (matrixlink-panel)
//!
//! End-to-end against a simulated device over TCP:
//! - Connect, resubscribe and session events
//! - Adapter actions driving a take through the device
//! - Resubscribe after the device drops the connection
//! - Discovered counts written back into the configuration

use matrixlink_client::SessionState;
use matrixlink_panel::{
    MatrixKind, Panel, PanelAction, PanelConfig, PanelError, PanelEvent, Pick, SessionSettings,
};
use matrixlink_test_utils::{wait_until, DeviceModel, SimulatedDevice};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config_for(device: &SimulatedDevice) -> PanelConfig {
    PanelConfig {
        host: "127.0.0.1".to_string(),
        port: device.port(),
        session: SessionSettings {
            request_timeout_ms: 500,
            probe_interval_ms: 100,
            reconnect_interval_ms: 50,
            reconnect_max_interval_ms: 200,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn all_ready(panel: &Panel) -> bool {
    let epoch = panel.session().epoch();
    MatrixKind::ALL
        .into_iter()
        .all(|kind| panel.mirrors().is_ready(kind, &epoch))
}

async fn ready_panel(device: &SimulatedDevice) -> Arc<Panel> {
    let panel = Panel::new(config_for(device)).unwrap();
    panel.start();
    assert!(wait_until(|| all_ready(&panel), Duration::from_secs(5)).await);
    panel
}

#[tokio::test]
async fn test_panel_takes_through_device() {
    let mut model = DeviceModel::standard(2, 4);
    model.set_route(&DeviceModel::matrix_path(0), 0, vec![3]);
    let device = SimulatedDevice::start(model).await;
    let panel = ready_panel(&device).await;

    assert_eq!(panel.state(), SessionState::Connected);
    assert_eq!(
        panel.surface().variable("output_video_1_input").as_deref(),
        Some("SRC 4")
    );

    panel
        .dispatch_adapter("select_target", &json!({ "matrix": 0, "target_0": 0 }))
        .await
        .unwrap();
    assert_eq!(panel.routing().selection().source, Some(3));

    panel
        .dispatch_adapter(
            "select_source",
            &json!({ "matrix": 0, "source_0": 1, "do_take": true }),
        )
        .await
        .unwrap();

    let video = MatrixKind::Video;
    assert!(
        wait_until(
            || panel.mirrors().get(video).output(0).and_then(|o| o.route) == Some(1),
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(device.commands().len(), 1);
    assert!(panel.surface().undo_possible());
    assert_eq!(
        panel.surface().variable("selected_target_source").as_deref(),
        Some("SRC 2")
    );

    panel.shutdown().await;
}

#[tokio::test]
async fn test_take_before_start_is_not_ready() {
    let config = PanelConfig {
        output_counts: "2,2,2,2,2".to_string(),
        ..Default::default()
    };
    let panel = Panel::new(config).unwrap();
    assert!(!all_ready(&panel));

    panel
        .dispatch(PanelAction::SelectTarget {
            matrix: Some(MatrixKind::Video),
            pick: Pick::Id(0),
        })
        .await
        .unwrap();
    panel
        .dispatch(PanelAction::SelectSource {
            matrix: Some(MatrixKind::Video),
            pick: Pick::Id(1),
            direct_take: false,
        })
        .await
        .unwrap();

    let err = panel.dispatch(PanelAction::Take).await.unwrap_err();
    assert!(matches!(err, PanelError::NotReady(MatrixKind::Video)));
}

#[tokio::test]
async fn test_panel_emits_session_events() {
    let device = SimulatedDevice::start(DeviceModel::standard(1, 1)).await;
    let panel = Panel::new(config_for(&device)).unwrap();
    let mut events = panel.subscribe_events();
    panel.start();

    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(PanelEvent::SessionState(SessionState::Connected)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(connected);

    panel.shutdown().await;
    assert_eq!(panel.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_panel_resubscribes_after_reconnect() {
    let device = SimulatedDevice::start(DeviceModel::standard(2, 2)).await;
    let panel = ready_panel(&device).await;
    let first = panel.session().epoch();

    device.drop_connections().await;
    assert!(
        wait_until(
            || !first.is_current() && all_ready(&panel),
            Duration::from_secs(5)
        )
        .await
    );

    // pushes reach the mirror through the new connection's subscriptions
    device.set_route(&MatrixKind::Audio.base_path(), 1, 0).await;
    assert!(
        wait_until(
            || panel.mirrors().get(MatrixKind::Audio).output(1).and_then(|o| o.route) == Some(0),
            Duration::from_secs(5)
        )
        .await
    );

    panel.shutdown().await;
}

#[tokio::test]
async fn test_discovered_counts_replace_offline_values() {
    let mut model = DeviceModel::standard(3, 5);
    model.remove_matrix(4);
    let device = SimulatedDevice::start(model).await;

    let panel = Panel::new(config_for(&device)).unwrap();
    assert_eq!(panel.discovered_config().input_counts, "1005,1005,1005,1005,1005");
    panel.start();
    assert!(
        wait_until(
            || panel.mirrors().is_ready(MatrixKind::MultiChannelAudio, &panel.session().epoch()),
            Duration::from_secs(5)
        )
        .await
    );

    let discovered = panel.discovered_config();
    assert_eq!(discovered.input_counts, "5,5,5,5,1005");
    assert_eq!(discovered.output_counts, "3,3,3,3,0");
    assert_eq!(discovered.port, device.port());

    let reloaded = PanelConfig::from_toml(&discovered.to_toml().unwrap()).unwrap();
    assert_eq!(reloaded, discovered);

    panel.shutdown().await;
}
