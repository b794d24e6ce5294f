//! Mirror Tests (matrixlink-panel)
//!
//! Resubscribe behavior of the mirror set against an in-memory device tree:
//! - Counts, labels and routes read from the device
//! - A matrix missing on the device keeps its offline tables
//! - Route pushes only count when the route actually changes
//! - Slots without label leaves drop out of navigation
//! - Work and pushes from an older connection are discarded

use matrixlink_client::EpochCounter;
use matrixlink_core::Element;
use matrixlink_panel::{
    EventBus, MatrixKind, MatrixMirrorSet, PanelConfig, PanelEvent, RoutingOptions,
    RoutingOrchestrator, Surface,
};
use matrixlink_test_utils::{DeviceModel, InMemoryTree, LabelSide};
use std::sync::Arc;
use tokio::sync::broadcast;

fn mirror_set(config: &PanelConfig) -> (Arc<MatrixMirrorSet>, broadcast::Receiver<PanelEvent>) {
    let events = EventBus::new();
    let receiver = events.subscribe();
    (Arc::new(MatrixMirrorSet::new(config, events)), receiver)
}

fn route_events(events: &mut broadcast::Receiver<PanelEvent>) -> Vec<Vec<u32>> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PanelEvent::RoutesChanged { targets, .. } = event {
            seen.push(targets);
        }
    }
    seen
}

#[tokio::test]
async fn test_resubscribe_reads_device_tables() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let epochs = EpochCounter::new();
    let token = epochs.advance();
    let mut model = DeviceModel::standard(2, 4);
    model.set_route(&DeviceModel::matrix_path(1), 1, vec![2]);
    let tree = InMemoryTree::new(model);

    mirrors.resubscribe(tree.as_ref(), &token).await;

    for kind in MatrixKind::ALL {
        assert!(mirrors.is_ready(kind, &token), "{} not ready", kind);
        assert_eq!(mirrors.get(kind).counts(), (4, 2));
    }

    let audio = mirrors.get(MatrixKind::Audio);
    assert_eq!(audio.output_order(), &[0, 1]);
    assert_eq!(audio.input_order(), &[0, 1, 2, 3]);
    assert_eq!(audio.output(1).unwrap().route, Some(2));
    assert_eq!(audio.output(0).unwrap().route, None);
    assert_eq!(audio.output(0).unwrap().label, "DST 1");
    assert_eq!(audio.output(0).unwrap().name, "t-0");
    assert_eq!(audio.input(3).unwrap().label, "SRC 4");
    assert_eq!(audio.routed_input(1).unwrap().label, "SRC 3");
    drop(audio);

    assert_eq!(
        mirrors.discovered_counts(),
        ("4,4,4,4,4".to_string(), "2,2,2,2,2".to_string())
    );
}

#[tokio::test]
async fn test_missing_gpio_keeps_offline_tables() {
    let config = PanelConfig {
        input_counts: "8,8,8,8,6".to_string(),
        output_counts: "0,0,0,0,3".to_string(),
        ..Default::default()
    };
    let (mirrors, _events) = mirror_set(&config);
    let mut model = DeviceModel::standard(2, 4);
    model.remove_matrix(4);
    let tree = InMemoryTree::new(model);
    let token = EpochCounter::new().advance();

    mirrors.resubscribe(tree.as_ref(), &token).await;

    let gpio = mirrors.get(MatrixKind::Gpio);
    assert_eq!(gpio.counts(), (6, 3));
    assert!(gpio.outputs().all(|o| o.route.is_none()));
    assert_eq!(gpio.output(2).unwrap().label, "Output 3");
    drop(gpio);
    assert!(!mirrors.is_ready(MatrixKind::Gpio, &token));

    for kind in [MatrixKind::Video, MatrixKind::Audio, MatrixKind::Data, MatrixKind::MultiChannelAudio] {
        assert_eq!(mirrors.get(kind).counts(), (4, 2));
        assert!(mirrors.is_ready(kind, &token));
    }
    assert_eq!(
        mirrors.discovered_counts(),
        ("4,4,4,4,6".to_string(), "2,2,2,2,3".to_string())
    );
}

#[tokio::test]
async fn test_failed_route_subscription_leaves_matrix_unready() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let tree = InMemoryTree::new(DeviceModel::standard(2, 4));
    tree.fail_subscribe(MatrixKind::Video.base_path());
    let token = EpochCounter::new().advance();

    mirrors.resubscribe(tree.as_ref(), &token).await;

    assert!(!mirrors.is_ready(MatrixKind::Video, &token));
    assert!(mirrors.is_ready(MatrixKind::Audio, &token));

    // without the subscription the device route never reaches the mirror
    tree.model().set_route(&MatrixKind::Video.base_path(), 0, vec![2]);
    assert_eq!(mirrors.get(MatrixKind::Video).output(0).unwrap().route, None);
}

#[tokio::test]
async fn test_route_pushes_only_count_changes() {
    let (mirrors, mut events) = mirror_set(&PanelConfig::default());
    let tree = InMemoryTree::new(DeviceModel::standard(3, 4));
    let token = EpochCounter::new().advance();
    mirrors.resubscribe(tree.as_ref(), &token).await;
    route_events(&mut events);

    let video = MatrixKind::Video.base_path();
    tree.set_route(&video, 2, 1);
    tree.set_route(&video, 2, 1);
    tree.set_route(&video, 2, 3);

    assert_eq!(route_events(&mut events), vec![vec![2], vec![2]]);
    let output = mirrors.get(MatrixKind::Video).output(2).cloned().unwrap();
    assert_eq!(output.route, Some(3));
    assert_eq!(output.history.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
}

#[tokio::test]
async fn test_history_is_capped() {
    let config = PanelConfig {
        history_limit: 3,
        ..Default::default()
    };
    let (mirrors, _events) = mirror_set(&config);
    let tree = InMemoryTree::new(DeviceModel::standard(1, 8));
    let token = EpochCounter::new().advance();
    mirrors.resubscribe(tree.as_ref(), &token).await;

    let video = MatrixKind::Video.base_path();
    for source in 0..6 {
        tree.set_route(&video, 0, source);
    }
    let output = mirrors.get(MatrixKind::Video).output(0).cloned().unwrap();
    assert_eq!(output.history.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
}

#[tokio::test]
async fn test_push_for_unknown_output_is_ignored() {
    let (mirrors, mut events) = mirror_set(&PanelConfig::default());
    let tree = InMemoryTree::new(DeviceModel::standard(2, 2));
    let token = EpochCounter::new().advance();
    mirrors.resubscribe(tree.as_ref(), &token).await;
    route_events(&mut events);

    let path = MatrixKind::Data.base_path();
    let mut contents = matrixlink_core::MatrixContents::new("data", 2, 2);
    contents
        .connections
        .insert(9, matrixlink_core::Connection::new(9, vec![1]));
    assert!(tree.push(&Element::matrix(path, contents)));

    assert!(route_events(&mut events).is_empty());
    assert!(mirrors.get(MatrixKind::Data).output(9).is_none());
}

#[tokio::test]
async fn test_label_push_updates_variables() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let tree = InMemoryTree::new(DeviceModel::standard(2, 2));
    let epochs = EpochCounter::new();
    let token = epochs.advance();
    mirrors.resubscribe(tree.as_ref(), &token).await;

    let routing = Arc::new(RoutingOrchestrator::new(
        mirrors.clone(),
        tree.clone(),
        epochs,
        RoutingOptions::default(),
        EventBus::new(),
    ));
    let surface = Surface::new(routing);
    assert_eq!(surface.variable("output_audio_2").as_deref(), Some("DST 2"));

    tree.set_label(&DeviceModel::label_path(1, LabelSide::Targets, 1), "Monitor");
    assert_eq!(surface.variable("output_audio_2").as_deref(), Some("Monitor"));
    assert_eq!(surface.variable("output_audio_2_input").as_deref(), Some("?"));

    tree.set_route(&MatrixKind::Audio.base_path(), 1, 0);
    assert_eq!(surface.variable("output_audio_2_input").as_deref(), Some("SRC 1"));
    assert_eq!(surface.variable("output_audio_3"), None);
}

#[tokio::test]
async fn test_slots_without_labels_leave_navigation() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let mut model = DeviceModel::standard(3, 4);
    model.remove_subtree(&DeviceModel::label_path(0, LabelSide::Sources, 2));
    model.remove_subtree(&DeviceModel::label_path(0, LabelSide::Targets, 0));
    // no label tree at all: every slot stays active
    model.remove_matrix(1);
    model.add_bare_matrix(1, 3, 4);
    let tree = InMemoryTree::new(model);
    let token = EpochCounter::new().advance();

    mirrors.resubscribe(tree.as_ref(), &token).await;

    let video = mirrors.get(MatrixKind::Video);
    assert_eq!(video.input_order(), &[0, 1, 3]);
    assert_eq!(video.output_order(), &[1, 2]);
    assert!(!video.is_active_input(2));
    assert!(video.input(2).is_some());
    drop(video);

    let audio = mirrors.get(MatrixKind::Audio);
    assert_eq!(audio.input_order(), &[0, 1, 2, 3]);
    assert_eq!(audio.output_order(), &[0, 1, 2]);
    assert_eq!(audio.input(0).unwrap().label, "Input 1");
}

#[tokio::test]
async fn test_shrinking_device_drops_surplus_slots() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let epochs = EpochCounter::new();
    let tree = InMemoryTree::new(DeviceModel::standard(4, 4));
    mirrors.resubscribe(tree.as_ref(), &epochs.advance()).await;
    assert_eq!(mirrors.get(MatrixKind::Video).counts(), (4, 4));

    {
        let mut model = tree.model();
        model.remove_matrix(0);
        model.add_matrix(0, 2, 1);
    }
    mirrors.resubscribe(tree.as_ref(), &epochs.advance()).await;

    let video = mirrors.get(MatrixKind::Video);
    assert_eq!(video.counts(), (1, 2));
    assert!(video.output(3).is_none());
    assert_eq!(video.output_order(), &[0, 1]);
}

#[tokio::test]
async fn test_stale_resubscribe_is_discarded() {
    let (mirrors, _events) = mirror_set(&PanelConfig::default());
    let epochs = EpochCounter::new();
    let tree = InMemoryTree::new(DeviceModel::standard(2, 2));
    let stale = epochs.advance();

    tree.hold();
    let task = {
        let mirrors = mirrors.clone();
        let tree = tree.clone();
        let stale = stale.clone();
        tokio::spawn(async move { mirrors.resubscribe(tree.as_ref(), &stale).await })
    };

    // reconnect while the first walk is still waiting on the device
    let current = epochs.advance();
    tree.release();
    task.await.unwrap();

    assert_eq!(mirrors.get(MatrixKind::Video).counts(), (1005, 0));
    assert!(!mirrors.is_ready(MatrixKind::Video, &stale));
    assert!(!mirrors.is_ready(MatrixKind::Video, &current));
    assert!(tree.registry().is_empty());
}

#[tokio::test]
async fn test_pushes_for_old_epoch_are_dropped() {
    let (mirrors, mut events) = mirror_set(&PanelConfig::default());
    let epochs = EpochCounter::new();
    let tree = InMemoryTree::new(DeviceModel::standard(2, 2));
    let first = epochs.advance();
    mirrors.resubscribe(tree.as_ref(), &first).await;
    route_events(&mut events);

    let _second = epochs.advance();
    assert!(tree.set_route(&MatrixKind::Video.base_path(), 0, 1));

    assert!(route_events(&mut events).is_empty());
    assert_eq!(mirrors.get(MatrixKind::Video).output(0).unwrap().route, None);
    assert!(!mirrors.is_ready(MatrixKind::Video, &first));
}
