//! Session and scan flows against the mock transport

use super::*;
use crate::config::{LinkConfig, ScanConfig};
use crate::test_utils::{FixedSensors, ListenerEvent, RecordingListener, demo_peripherals};
use crate::transport::{Transport, TransportEvent};
use crate::transports::MockTransport;
use crate::types::{ConnectionState, DiscoveredPeripheral, PeripheralId, RefreshRate, SensorKind};
use crate::{LinkError, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const LEFT: &str = "EV-0001";
const RIGHT: &str = "EV-0003";

/// Let spawned tasks run; time is paused, so this costs nothing
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

async fn connected_session() -> (Arc<MockTransport>, ConnectionSession, Arc<RecordingListener>) {
    let _ = tracing_subscriber::fmt::try_init();

    let id = PeripheralId::new(LEFT);
    let transport = Arc::new(MockTransport::with_peripherals(demo_peripherals()));
    transport.connect(&id).await.unwrap();

    let mut session = ConnectionSession::new(
        id,
        transport.clone(),
        Arc::new(FixedSensors::demo()),
        &LinkConfig::default(),
    );
    let listener = Arc::new(RecordingListener::new());
    session.set_listener(listener.clone());
    (transport, session, listener)
}

#[tokio::test(start_paused = true)]
async fn streaming_session_sends_enabled_sensors() {
    let (transport, mut session, listener) = connected_session().await;
    session.set_sensor_enabled(SensorKind::Accelerometer, true);
    session.set_sensor_enabled(SensorKind::Gyroscope, true);

    session.start(Duration::from_millis(250), None).await.unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(listener.events(), vec![ListenerEvent::UartReady(Ok(()))]);
    assert!(session.poller().is_armed());

    tokio::time::sleep(Duration::from_millis(1010)).await;
    assert_eq!(transport.take_writes().len(), 8);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_failure_leaves_session_disconnected() {
    let (transport, mut session, listener) = connected_session().await;
    transport.set_uart_missing(session.peripheral());

    let err = session.start(Duration::from_millis(250), None).await.unwrap_err();
    assert!(matches!(err, LinkError::CharacteristicNotFound { .. }));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.poller().is_armed());
    assert!(matches!(listener.events().as_slice(), [ListenerEvent::UartReady(Err(_))]));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(transport.take_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_poll_interval_is_rejected_before_enabling() {
    let (transport, mut session, listener) = connected_session().await;

    let err = session.start(Duration::ZERO, None).await.unwrap_err();
    assert!(matches!(err, LinkError::Config { .. }));
    assert!(!transport.is_uart_enabled(session.peripheral()));
    assert!(listener.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn received_chunks_are_cached_in_order() {
    let (transport, mut session, listener) = connected_session().await;
    session.start(Duration::from_secs(1), None).await.unwrap();
    let id = session.peripheral().clone();

    assert!(transport.inject_rx(&id, b"hello "));
    assert!(transport.inject_rx(&id, b"w\xC3"));
    assert!(transport.inject_rx(&id, b"\xA9rld"));
    settle().await;

    assert_eq!(session.uart_text(), "hello w\u{e9}rld");
    assert_eq!(listener.count(|e| matches!(e, ListenerEvent::UartRx(_))), 3);

    session.reset_rx_cache();
    assert_eq!(session.uart_text(), "");
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_rx_cache_drops_chunks() {
    let (transport, mut session, listener) = connected_session().await;
    session.set_rx_cache_enabled(false);
    session.start(Duration::from_secs(1), None).await.unwrap();

    transport.inject_rx(session.peripheral(), b"ignored");
    settle().await;
    assert_eq!(session.uart_text(), "");
    assert_eq!(listener.count(|e| matches!(e, ListenerEvent::UartRx(_))), 0);

    session.set_rx_cache_enabled(true);
    transport.inject_rx(session.peripheral(), b"kept");
    settle().await;
    assert_eq!(session.uart_text(), "kept");
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_twice_is_harmless() {
    let (transport, mut session, _listener) = connected_session().await;
    session.set_sensor_enabled(SensorKind::Quaternion, true);

    // Before any start
    session.stop().await;
    assert_eq!(transport.uart_disable_calls(), 0);

    session.start(Duration::from_millis(100), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    session.stop().await;
    session.stop().await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.uart_disable_calls(), 1);
    assert!(!transport.is_uart_enabled(session.peripheral()));

    transport.take_writes();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(transport.take_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_while_streaming_rearms_the_poller() {
    let (transport, mut session, listener) = connected_session().await;
    session.set_sensor_enabled(SensorKind::Location, true);

    session.start(Duration::from_millis(250), None).await.unwrap();
    session.start(Duration::from_millis(500), None).await.unwrap();
    assert_eq!(session.poller().interval(), Some(Duration::from_millis(500)));

    tokio::time::sleep(Duration::from_millis(1010)).await;
    assert_eq!(transport.take_writes().len(), 2);
    // UART was enabled only once
    assert_eq!(listener.count(|e| matches!(e, ListenerEvent::UartReady(_))), 1);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn link_loss_disarms_poller_and_notifies() {
    let (transport, mut session, listener) = connected_session().await;
    session.set_sensor_enabled(SensorKind::Magnetometer, true);
    session.start(Duration::from_millis(250), None).await.unwrap();

    transport.drop_connection(session.peripheral());
    settle().await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.poller().is_armed());
    assert_eq!(
        listener.count(|e| matches!(e, ListenerEvent::Disconnected(id) if id.as_str() == LEFT)),
        1
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(transport.take_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn write_failures_reach_the_listener() {
    let (transport, mut session, listener) = connected_session().await;
    session.start(Duration::from_secs(1), None).await.unwrap();

    transport.set_write_failure(true);
    session.send_command(b"!B11".to_vec());
    settle().await;

    assert_eq!(listener.count(|e| matches!(e, ListenerEvent::TransportError(_))), 1);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn button_frames_are_sealed() {
    let (transport, session, _listener) = connected_session().await;

    session.send_button(1, true);
    session.send_button(1, false);

    let frames: Vec<Vec<u8>> = transport.take_writes().into_iter().map(|(_, f)| f).collect();
    assert_eq!(frames, vec![b"!B11:".to_vec(), b"!B10;".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn rx_text_updates_follow_the_cache() {
    let (transport, mut session, _listener) = connected_session().await;
    session.start(Duration::from_secs(1), None).await.unwrap();
    let mut updates = session.rx_text_updates(RefreshRate::Native);

    transport.inject_rx(session.peripheral(), b"abc");
    assert_eq!(updates.next().await.as_deref(), Some("abc"));

    transport.inject_rx(session.peripheral(), b"def");
    assert_eq!(updates.next().await.as_deref(), Some("abcdef"));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shared_cache_updates_are_not_lost_to_other_peripherals() {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(MockTransport::with_peripherals(demo_peripherals()));
    let cache = Arc::new(crate::rx_cache::RxCache::new());
    let session_for = |id: &str| {
        ConnectionSession::with_cache(
            PeripheralId::new(id),
            transport.clone(),
            Arc::new(FixedSensors::new()),
            cache.clone(),
            &LinkConfig::default(),
        )
    };

    let mut left = session_for(LEFT);
    let mut right = session_for(RIGHT);
    for session in [&mut left, &mut right] {
        transport.connect(session.peripheral()).await.unwrap();
        session.start(Duration::from_secs(1), None).await.unwrap();
    }
    let mut left_updates = left.rx_text_updates(RefreshRate::Native);
    let mut right_updates = right.rx_text_updates(RefreshRate::Native);

    // Both chunks land before either stream is polled
    transport.inject_rx(left.peripheral(), b"hello-left");
    transport.inject_rx(right.peripheral(), b"hello-right");

    let left_text = tokio::time::timeout(Duration::from_secs(5), left_updates.next()).await;
    assert_eq!(left_text.unwrap().as_deref(), Some("hello-left"));
    let right_text = tokio::time::timeout(Duration::from_secs(5), right_updates.next()).await;
    assert_eq!(right_text.unwrap().as_deref(), Some("hello-right"));

    left.stop().await;
    right.stop().await;
}

#[tokio::test(start_paused = true)]
async fn listener_changes_apply_while_streaming() {
    let (transport, mut session, first) = connected_session().await;
    session.start(Duration::from_secs(1), None).await.unwrap();

    transport.inject_rx(session.peripheral(), b"one");
    settle().await;

    let second = Arc::new(RecordingListener::new());
    session.set_listener(second.clone());
    transport.inject_rx(session.peripheral(), b"two");
    settle().await;

    session.clear_listener();
    transport.inject_rx(session.peripheral(), b"three");
    settle().await;

    let rx = |e: &ListenerEvent| matches!(e, ListenerEvent::UartRx(_));
    assert_eq!(first.count(rx), 1);
    assert_eq!(second.count(rx), 1);
    assert_eq!(session.uart_text(), "onetwothree");
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_after_link_loss_leaves_uart_alone() {
    let (transport, mut session, _listener) = connected_session().await;
    session.start(Duration::from_secs(1), None).await.unwrap();

    transport.drop_connection(session.peripheral());
    settle().await;
    session.stop().await;

    assert_eq!(transport.uart_disable_calls(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_keeps_cached_text() {
    let _ = tracing_subscriber::fmt::try_init();
    let id = PeripheralId::new(RIGHT);
    let transport = Arc::new(MockTransport::with_peripherals(demo_peripherals()));
    let cache = Arc::new(crate::rx_cache::RxCache::new());
    transport.connect(&id).await.unwrap();

    let mut first = ConnectionSession::with_cache(
        id.clone(),
        transport.clone(),
        Arc::new(FixedSensors::new()),
        cache.clone(),
        &LinkConfig::default(),
    );
    first.start(Duration::from_secs(1), None).await.unwrap();
    transport.inject_rx(&id, b"before ");
    settle().await;
    first.stop().await;
    drop(first);

    let mut second = ConnectionSession::with_cache(
        id.clone(),
        transport.clone(),
        Arc::new(FixedSensors::new()),
        cache,
        &LinkConfig::default(),
    );
    second.start(Duration::from_secs(1), None).await.unwrap();
    transport.inject_rx(&id, b"after");
    settle().await;

    assert_eq!(second.uart_text(), "before after");
    second.stop().await;
}

#[tokio::test]
async fn rssi_and_battery_are_forwarded() {
    let (transport, session, _listener) = connected_session().await;
    transport.set_battery_level(session.peripheral(), 42);

    assert_eq!(session.read_battery_level().await.unwrap(), 42);
    assert_eq!(session.read_rssi().await.unwrap(), -58);
}

// Scan flows

/// Apply every event the transport has emitted so far
async fn drain(scan: &mut ScanSession, events: &mut broadcast::Receiver<TransportEvent>) -> Vec<LinkError> {
    let mut errors = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Err(e) = scan.handle_event(event).await {
            errors.push(e);
        }
    }
    errors
}

async fn scanning(config: ScanConfig) -> (Arc<MockTransport>, ScanSession, broadcast::Receiver<TransportEvent>) {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(MockTransport::with_peripherals(demo_peripherals()));
    let mut events = transport.events();
    let mut scan = ScanSession::new(transport.clone(), config);
    scan.start_scan().await.unwrap();
    assert!(drain(&mut scan, &mut events).await.is_empty());
    (transport, scan, events)
}

fn names(peripherals: &[ScannedPeripheral]) -> Vec<&str> {
    peripherals
        .iter()
        .map(|p| p.name.as_deref().unwrap_or(p.id.as_str()))
        .collect()
}

#[tokio::test]
async fn default_filters_show_named_uart_peripherals() {
    let (_transport, mut scan, _events) = scanning(ScanConfig::default()).await;

    assert_eq!(scan.len(), 5);
    assert_eq!(names(scan.filtered_peripherals(false)), vec!["Evolution Left", "Evolution Right"]);
    assert_eq!(scan.hidden_count(), 3);
    assert_eq!(
        scan.filters_description().as_deref(),
        Some("Showing peripherals with name and with UART")
    );
}

#[tokio::test]
async fn filter_change_recomputes_exactly_once() {
    let (_transport, mut scan, _events) = scanning(ScanConfig::default()).await;

    scan.filtered_peripherals(false);
    let before = scan.recompute_count();
    scan.filtered_peripherals(false);
    assert_eq!(scan.recompute_count(), before);

    scan.set_filters(false, true);
    assert_eq!(
        names(scan.filtered_peripherals(false)),
        vec!["Evolution Left", "Evolution Right", "Heart Rate", "ANON-01", "ANON-02"]
    );
    assert_eq!(scan.recompute_count(), before + 1);
    scan.filtered_peripherals(false);
    assert_eq!(scan.recompute_count(), before + 1);
    assert_eq!(scan.filters_description(), None);

    scan.filtered_peripherals(true);
    assert_eq!(scan.recompute_count(), before + 2);

    scan.set_default_filters();
    assert_eq!(scan.filtered_peripherals(false).len(), 2);
}

#[tokio::test]
async fn name_updates_and_new_advertisements_invalidate_the_view() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    assert_eq!(scan.filtered_peripherals(false).len(), 2);

    transport.rename(&PeripheralId::new("ANON-01"), Some("Evolution Spare"));
    transport.add_peripheral(DiscoveredPeripheral::new("EV-0007", Some("Another"), -66, true));
    drain(&mut scan, &mut events).await;

    assert_eq!(
        names(scan.filtered_peripherals(false)),
        vec!["Another", "Evolution Left", "Evolution Right", "Evolution Spare"]
    );

    scan.clear();
    assert!(scan.filtered_peripherals(false).is_empty());
}

#[tokio::test]
async fn connect_discovers_services_and_fills_the_roster() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);

    scan.connect(&left).await.unwrap();
    assert_eq!(scan.connection_state(), ConnectionState::Connecting);
    assert_eq!(scan.selected(), Some(&left));

    assert!(drain(&mut scan, &mut events).await.is_empty());
    assert_eq!(scan.connection_state(), ConnectionState::Connected);
    assert_eq!(scan.peripheral(&left).map(|p| p.state), Some(ConnectionState::Connected));
    assert_eq!(scan.roster().device(RosterSlot::Primary), Some(&left));
    assert!(transport.is_connected(&left));

    scan.disconnect(&left).await.unwrap();
    drain(&mut scan, &mut events).await;
    assert_eq!(scan.selected(), None);
    assert_eq!(scan.connection_state(), ConnectionState::Disconnected);
    assert!(scan.roster().is_empty());
}

#[tokio::test]
async fn connect_failure_clears_selection() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let right = PeripheralId::new(RIGHT);
    transport.set_unreachable(&right);

    scan.connect(&right).await.unwrap();
    let errors = drain(&mut scan, &mut events).await;

    assert!(matches!(errors.as_slice(), [LinkError::ConnectFailed { .. }]));
    assert_eq!(scan.selected(), None);
    assert_eq!(scan.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn failed_service_discovery_disconnects() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);
    transport.set_service_discovery_failing(&left);

    scan.connect(&left).await.unwrap();
    let errors = drain(&mut scan, &mut events).await;

    assert!(matches!(errors.as_slice(), [LinkError::ServiceDiscovery { .. }]));
    assert!(!transport.is_connected(&left));
    assert_eq!(scan.selected(), None);
}

#[tokio::test]
async fn unknown_peripheral_is_rejected() {
    let (_transport, mut scan, _events) = scanning(ScanConfig::default()).await;
    let err = scan.connect(&PeripheralId::new("nope")).await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownPeripheral { .. }));
}

#[tokio::test]
async fn reselect_cancels_pending_connect_by_default() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);
    let right = PeripheralId::new(RIGHT);

    scan.connect(&left).await.unwrap();
    // Completion not applied yet, so the first connect is still pending
    scan.connect(&right).await.unwrap();
    assert_eq!(scan.selected(), Some(&right));
    assert!(!transport.is_connected(&left));

    drain(&mut scan, &mut events).await;
    assert_eq!(scan.selected(), Some(&right));
    assert_eq!(scan.connection_state(), ConnectionState::Connected);
    assert_eq!(scan.peripheral(&left).map(|p| p.state), Some(ConnectionState::Disconnected));
}

#[tokio::test]
async fn reselect_connects_even_if_cancelling_fails() {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);
    let right = PeripheralId::new(RIGHT);
    transport.set_disconnect_failing(&left);

    scan.connect(&left).await.unwrap();
    scan.connect(&right).await.unwrap();
    assert_eq!(scan.selected(), Some(&right));
    assert_eq!(scan.roster().device(RosterSlot::Primary), Some(&right));
    assert!(transport.is_connected(&right));

    assert!(drain(&mut scan, &mut events).await.is_empty());
    assert_eq!(scan.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn reselect_can_be_rejected() {
    let config = ScanConfig { cancel_pending_on_reselect: false, ..ScanConfig::default() };
    let (transport, mut scan, _events) = scanning(config).await;
    let left = PeripheralId::new(LEFT);
    let right = PeripheralId::new(RIGHT);

    scan.connect(&left).await.unwrap();
    let err = scan.connect(&right).await.unwrap_err();

    match err {
        LinkError::ConnectConflict { pending, requested } => {
            assert_eq!(pending, left);
            assert_eq!(requested, right);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(scan.selected(), Some(&left));
    assert!(transport.is_connected(&left));
}

#[tokio::test]
async fn unexpected_connection_is_ignored() {
    let (_transport, mut scan, _events) = scanning(ScanConfig::default()).await;
    let right = PeripheralId::new(RIGHT);

    scan.handle_event(TransportEvent::Connected(right.clone())).await.unwrap();
    assert_eq!(scan.selected(), None);
    assert_eq!(scan.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn link_loss_of_selected_peripheral_clears_selection() -> Result<()> {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);

    scan.connect(&left).await?;
    drain(&mut scan, &mut events).await;
    scan.roster_mut().assign(RosterSlot::Left, left.clone());

    transport.drop_connection(&left);
    drain(&mut scan, &mut events).await;

    assert_eq!(scan.selected(), None);
    assert!(!scan.roster().is_connected(RosterSlot::Left));
    Ok(())
}

#[tokio::test]
async fn refresh_forgets_disconnected_peripherals() -> Result<()> {
    let (transport, mut scan, mut events) = scanning(ScanConfig::default()).await;
    let left = PeripheralId::new(LEFT);
    scan.connect(&left).await?;
    drain(&mut scan, &mut events).await;

    transport.stop_scan().await?;
    scan.refresh().await?;
    drain(&mut scan, &mut events).await;
    assert_eq!(scan.len(), 1);
    assert!(scan.peripheral(&left).is_some());

    assert_eq!(scan.refresh_rssi(&left).await?, -58);
    Ok(())
}
