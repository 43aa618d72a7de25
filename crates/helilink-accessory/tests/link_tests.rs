//! Accessory link manager tests
//!
//! Drives the link manager against the mock accessory host:
//! - Discovery and reconnect convergence
//! - Permission grant, denial and withdrawal
//! - Ordered writes under concurrent senders
//! - Read delivery (acks and frames)
//! - Fault handling (detach, write failure, read EOF)

use helilink_accessory::{
    ConnectionState, LinkConfig, LinkManager, LinkNotification, MIN_RECONNECT_INTERVAL,
};
use helilink_core::{Action, Command, Frame, PidGains, PidReport};
use helilink_test_utils::{
    recv_until, wait_for, wait_for_count, MockAccessoryHost, PermissionPolicy, DEFAULT_CHECK_INTERVAL,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const INTERVAL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

fn manager(host: &Arc<MockAccessoryHost>) -> (LinkManager, UnboundedReceiver<LinkNotification>) {
    LinkManager::new(
        host.clone(),
        LinkConfig {
            reconnect_interval: INTERVAL,
        },
    )
}

async fn connected(rx: &mut UnboundedReceiver<LinkNotification>) -> bool {
    recv_until(rx, WAIT, |n| matches!(n, LinkNotification::Connected { .. }))
        .await
        .is_some()
}

async fn disconnected(rx: &mut UnboundedReceiver<LinkNotification>) -> Option<Option<String>> {
    match recv_until(rx, WAIT, |n| matches!(n, LinkNotification::Disconnected { .. })).await {
        Some(LinkNotification::Disconnected { reason }) => Some(reason),
        _ => None,
    }
}

async fn wait_state(link: &LinkManager, state: ConnectionState) -> bool {
    wait_for(|| async { link.state() == state }, DEFAULT_CHECK_INTERVAL, WAIT).await
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_connects_to_attached_accessory() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    link.connect();

    match recv_until(&mut rx, WAIT, |n| matches!(n, LinkNotification::Connected { .. })).await {
        Some(LinkNotification::Connected { accessory }) => assert_eq!(accessory, host.accessory()),
        other => panic!("Expected Connected, got {:?}", other),
    }
    assert!(link.is_connected());
    assert!(link.is_reader_alive());
    assert_eq!(link.current_accessory(), Some(host.accessory()));
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnect_converges_after_k_ticks() {
    const K: u32 = 4;

    let host = MockAccessoryHost::new();
    host.set_present_after(K);
    let (link, mut rx) = manager(&host);

    let start = Instant::now();
    link.connect();
    assert!(connected(&mut rx).await, "Never connected");
    let elapsed = start.elapsed();

    // First tick fires immediately, so K enumerations span K - 1 intervals
    assert!(
        elapsed < INTERVAL * (K + 1) + Duration::from_millis(500),
        "Took {:?}",
        elapsed
    );
    assert_eq!(host.enumerations().load(Ordering::SeqCst), K);

    // The timer stops once connected
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(host.enumerations().load(Ordering::SeqCst), K);
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
    assert_eq!(host.max_open_handles(), 1);
}

#[tokio::test]
async fn test_zero_interval_is_clamped() {
    let host = MockAccessoryHost::new();
    host.set_present_after(3);
    let (link, mut rx) = LinkManager::new(
        host.clone(),
        LinkConfig {
            reconnect_interval: Duration::ZERO,
        },
    );
    assert_eq!(link.config().reconnect_interval, MIN_RECONNECT_INTERVAL);

    link.connect();
    assert!(connected(&mut rx).await);
    assert!(host.enumerations().load(Ordering::SeqCst) >= 3);
    assert_eq!(host.max_open_handles(), 1);
}

#[tokio::test]
async fn test_connect_is_noop_while_connected() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);

    link.connect();
    assert!(connected(&mut rx).await);

    link.connect();
    link.connect();
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
    assert_eq!(host.enumerations().load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_open_failure_retries_on_next_tick() {
    let host = MockAccessoryHost::new();
    host.set_fail_open(true);
    let (link, mut rx) = manager(&host);

    link.connect();
    assert!(wait_for_count(host.enumerations(), 3, WAIT).await);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    host.set_fail_open(false);
    assert!(connected(&mut rx).await);
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);

    // Before any connect
    link.disconnect();

    link.connect();
    assert!(connected(&mut rx).await);

    link.disconnect();
    link.disconnect();
    link.disconnect();

    assert_eq!(disconnected(&mut rx).await, Some(None));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert!(!link.is_reader_alive());

    // No second notification, no further discovery
    let enumerations = host.enumerations().load(Ordering::SeqCst);
    tokio::time::sleep(INTERVAL * 5).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(host.enumerations().load(Ordering::SeqCst), enumerations);
}

#[tokio::test]
async fn test_disconnect_stops_pending_discovery() {
    let host = MockAccessoryHost::new();
    host.set_present_after(u32::MAX);
    let (link, _rx) = manager(&host);

    link.connect();
    assert!(wait_for_count(host.enumerations(), 2, WAIT).await);
    link.disconnect();

    tokio::time::sleep(INTERVAL * 2).await;
    let enumerations = host.enumerations().load(Ordering::SeqCst);
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(host.enumerations().load(Ordering::SeqCst), enumerations);
}

// ============================================================================
// Permission
// ============================================================================

#[tokio::test]
async fn test_permission_denied_then_retried() {
    let host = MockAccessoryHost::new();
    host.set_permitted(false);
    host.set_permission_policy(PermissionPolicy::Deny);
    let (link, mut rx) = manager(&host);

    link.connect();
    assert!(wait_for_count(host.permission_requests(), 2, WAIT).await);
    assert_ne!(link.state(), ConnectionState::Connected);
    assert_eq!(host.opens().load(Ordering::SeqCst), 0);

    host.set_permission_policy(PermissionPolicy::Grant);
    assert!(connected(&mut rx).await);
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_permission_granted_later() {
    let host = MockAccessoryHost::new();
    host.set_permitted(false);
    host.set_permission_policy(PermissionPolicy::Hold);
    let (link, mut rx) = manager(&host);

    link.connect();
    assert!(wait_state(&link, ConnectionState::AwaitingPermission).await);

    // Ticks while waiting do not stack up requests
    tokio::time::sleep(INTERVAL * 4).await;
    assert_eq!(host.permission_requests().load(Ordering::SeqCst), 1);

    assert_eq!(host.answer_held(true), 1);
    assert!(connected(&mut rx).await);
    assert!(link.is_connected());
}

#[tokio::test]
async fn test_disconnect_withdraws_permission_request() {
    let host = MockAccessoryHost::new();
    host.set_permitted(false);
    host.set_permission_policy(PermissionPolicy::Hold);
    let (link, _rx) = manager(&host);

    link.connect();
    assert!(wait_state(&link, ConnectionState::AwaitingPermission).await);
    assert_eq!(host.held_requests(), 1);

    link.disconnect();
    assert_eq!(host.held_requests(), 0);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_detach_while_awaiting_permission() {
    let host = MockAccessoryHost::new();
    host.set_permitted(false);
    host.set_permission_policy(PermissionPolicy::Hold);
    let (link, mut rx) = manager(&host);

    link.connect();
    assert!(wait_state(&link, ConnectionState::AwaitingPermission).await);
    assert_eq!(host.held_requests(), 1);

    // The request for the unplugged accessory is withdrawn
    host.detach();
    assert!(wait_state(&link, ConnectionState::Disconnected).await);
    assert_eq!(host.held_requests(), 0);

    // Discovery keeps running and picks the accessory up again
    host.set_permission_policy(PermissionPolicy::Grant);
    host.attach();
    assert!(connected(&mut rx).await);
    assert_eq!(host.permission_requests().load(Ordering::SeqCst), 2);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sends_are_written_in_order() {
    const SENDERS: u8 = 4;
    const PER_SENDER: u8 = 50;

    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    let threads: Vec<_> = (0..SENDERS)
        .map(|sender| {
            let link = link.clone();
            std::thread::spawn(move || {
                for seq in 0..PER_SENDER {
                    link.send_command(Command::Control, Action::Sticks, vec![sender, seq, 0, 0]);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("sender thread");
    }

    let total = SENDERS as u32 * PER_SENDER as u32;
    assert!(wait_for_count(device.write_count(), total, WAIT).await);

    let written = device.written();
    assert_eq!(written.len(), total as usize);

    // Each sender's commands keep their submission order
    let mut next = [0u8; SENDERS as usize];
    for frame in &written {
        assert_eq!(&frame[..2], &[0x01, 0x03]);
        let sender = frame[2] as usize;
        assert_eq!(frame[3], next[sender], "Out of order frame {:?}", frame);
        next[sender] += 1;
    }

    // Sent notifications follow the wire order
    let mut sent = Vec::new();
    while sent.len() < written.len() {
        match recv_until(&mut rx, WAIT, |n| matches!(n, LinkNotification::CommandSent(_))).await {
            Some(LinkNotification::CommandSent(frame)) => sent.push(frame.encode().to_vec()),
            other => panic!("Expected CommandSent, got {:?}", other),
        }
    }
    assert_eq!(sent, written);
}

#[tokio::test]
async fn test_sequential_sends_keep_frame_structure() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    link.send_command(Command::Control, Action::Sticks, vec![0x0A, 0xFB, 0x00, 0x03]);
    link.send_command(Command::Control, Action::Standby, vec![0x01]);
    link.send_command(Command::Get, Action::Tune, Vec::new());

    assert!(wait_for_count(device.write_count(), 3, WAIT).await);
    assert_eq!(
        device.written(),
        vec![
            vec![0x01, 0x03, 0x0A, 0xFB, 0x00, 0x03],
            vec![0x01, 0x04, 0x01],
            vec![0x03, 0x05],
        ]
    );
}

#[tokio::test]
async fn test_send_while_never_connected_fails_cleanly() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);

    link.send_command(Command::Control, Action::Standby, vec![0x01]);

    match rx.recv().await {
        Some(LinkNotification::CommandFailed {
            command,
            action,
            reason,
        }) => {
            assert_eq!(command, Command::Control);
            assert_eq!(action, Action::Standby);
            assert_eq!(reason, "not connected");
        }
        other => panic!("Expected CommandFailed, got {:?}", other),
    }
    assert_eq!(host.opens().load(Ordering::SeqCst), 0);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_oversized_payload_is_rejected_not_written() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    link.send_command(Command::Settings, Action::Tune, vec![0u8; 300]);
    link.send_command(Command::Get, Action::Tune, Vec::new());

    let failed = recv_until(&mut rx, WAIT, |n| {
        matches!(n, LinkNotification::CommandFailed { .. })
    })
    .await;
    assert!(failed.is_some());
    assert!(wait_for_count(device.write_count(), 1, WAIT).await);
    assert_eq!(device.written(), vec![vec![0x03, 0x05]]);
    assert!(link.is_connected());
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_ack_and_frame_delivery() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    device.push_read(vec![0x01]);
    assert_eq!(rx.recv().await, Some(LinkNotification::Ack(true)));

    device.push_read(vec![0x00]);
    assert_eq!(rx.recv().await, Some(LinkNotification::Ack(false)));

    let report = PidReport {
        pitch: PidGains::new(1.5, 0.25, 0.125),
        roll: PidGains::new(1.5, 0.25, 0.125),
        yaw: PidGains::new(3.0, 0.0, 0.0),
    };
    let frame = Frame::new(Command::Response, Action::Tune, report.encode()).unwrap();
    device.push_read(frame.encode().to_vec());
    assert_eq!(rx.recv().await, Some(LinkNotification::Frame(frame)));

    assert!(link.is_reader_alive());
}

#[tokio::test]
async fn test_malformed_read_is_dropped() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    device.push_read(vec![0x09, 0x09, 0x00]);
    device.push_read(vec![0x07]);
    device.push_read(vec![0x01]);

    // Only the valid ack comes through and the loop keeps running
    assert_eq!(rx.recv().await, Some(LinkNotification::Ack(true)));
    assert!(link.is_reader_alive());
}

#[tokio::test]
async fn test_read_eof_fails_next_send_and_reconnects() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);
    let device = host.device().expect("device");

    device.close();
    assert!(wait_for(|| async { !link.is_reader_alive() }, DEFAULT_CHECK_INTERVAL, WAIT).await);

    // The link only notices on the next write
    assert!(link.is_connected());
    link.send_command(Command::Control, Action::Standby, vec![0x00]);

    let failed = recv_until(&mut rx, WAIT, |n| {
        matches!(n, LinkNotification::CommandFailed { .. })
    })
    .await;
    assert!(failed.is_some());
    assert!(disconnected(&mut rx).await.flatten().is_some());
    assert_eq!(device.write_count().load(Ordering::SeqCst), 0);

    assert!(connected(&mut rx).await);
    assert_eq!(host.opens().load(Ordering::SeqCst), 2);
}

// ============================================================================
// Faults
// ============================================================================

#[tokio::test]
async fn test_write_failure_disconnects_and_reconnects() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);

    let device = host.device().expect("device");
    device.fail_writes(true);
    link.send_command(Command::Control, Action::Sticks, vec![1, 2, 3, 4]);

    match recv_until(&mut rx, WAIT, |n| {
        matches!(n, LinkNotification::CommandFailed { .. })
    })
    .await
    {
        Some(LinkNotification::CommandFailed { command, action, .. }) => {
            assert_eq!(command, Command::Control);
            assert_eq!(action, Action::Sticks);
        }
        other => panic!("Expected CommandFailed, got {:?}", other),
    }

    let reason = disconnected(&mut rx).await.flatten();
    assert!(reason.is_some_and(|r| r.contains("device gone")));

    assert!(connected(&mut rx).await);
    assert_eq!(host.opens().load(Ordering::SeqCst), 2);

    // The new stream is usable
    let device = host.device().expect("device");
    link.send_command(Command::Get, Action::Tune, Vec::new());
    assert!(wait_for_count(device.write_count(), 1, WAIT).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_send_racing_a_write_failure_is_reported() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 50;
    const TOTAL: usize = SENDERS * PER_SENDER;

    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);

    host.device().expect("device").fail_writes(true);

    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let link = link.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                link.send_command(Command::Control, Action::Sticks, vec![sender as u8, i as u8, 0, 0]);
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Each command ends up either written or failed, exactly once
    let outcomes = tokio::time::timeout(WAIT, async {
        let mut outcomes = 0;
        while outcomes < TOTAL {
            match rx.recv().await {
                Some(LinkNotification::CommandSent(_)) | Some(LinkNotification::CommandFailed { .. }) => {
                    outcomes += 1
                }
                Some(_) => {}
                None => break,
            }
        }
        outcomes
    })
    .await
    .unwrap_or(0);
    assert_eq!(outcomes, TOTAL);

    tokio::time::sleep(INTERVAL * 3).await;
    while let Ok(notification) = rx.try_recv() {
        assert!(
            !matches!(
                notification,
                LinkNotification::CommandSent(_) | LinkNotification::CommandFailed { .. }
            ),
            "Extra outcome: {:?}",
            notification
        );
    }
}

#[tokio::test]
async fn test_detach_disconnects_and_attach_reconnects() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);

    host.detach();
    assert_eq!(
        disconnected(&mut rx).await,
        Some(Some("accessory detached".to_string()))
    );
    assert_eq!(link.state(), ConnectionState::Disconnected);

    // Nothing to find while unplugged
    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);

    host.attach();
    assert!(connected(&mut rx).await);
    assert_eq!(host.opens().load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_detach_after_disconnect_does_not_reconnect() {
    let host = MockAccessoryHost::new();
    let (link, mut rx) = manager(&host);
    link.connect();
    assert!(connected(&mut rx).await);

    link.disconnect();
    assert_eq!(disconnected(&mut rx).await, Some(None));

    host.detach();
    host.attach();
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(host.opens().load(Ordering::SeqCst), 1);
}
