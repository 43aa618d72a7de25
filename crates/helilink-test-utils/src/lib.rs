//! Common test helpers and utilities for helilink tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A scriptable accessory host with a recording device end
//! - Recording stand-ins for the bridge seams (command sink, liveness
//!   probe, control channel)

use async_trait::async_trait;
use bytes::Bytes;
use helilink_accessory::{
    AccessoryHost, AccessoryInfo, AccessoryStream, HostEventSink, LinkError, PermissionRequest,
};
use helilink_bridge::{BridgeError, ChannelEvent, CommandSink, ControlChannel, LivenessProbe};
use helilink_core::{Action, Command, Frame};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || async { flag.load(Ordering::SeqCst) },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Receive from a queue until `matches` accepts an item, or time out
pub async fn recv_until<T, F>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    max_wait: Duration,
    mut matches: F,
) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) if matches(&item) => return Some(item),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

// ============================================================================
// Mock Accessory Host
// ============================================================================

/// How the mock host answers permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    Grant,
    Deny,
    /// Keep the request until the test answers it
    Hold,
}

enum ReadChunk {
    Data(Vec<u8>),
    Eof,
}

struct OpenHandle {
    count: Arc<AtomicU32>,
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Device end of a stream opened through [`MockAccessoryHost`]
#[derive(Clone)]
pub struct MockDevice {
    to_host: std_mpsc::Sender<ReadChunk>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    write_count: Arc<AtomicU32>,
    fail_writes: Arc<AtomicBool>,
}

impl MockDevice {
    /// Make the next read on the host side return `data`
    pub fn push_read(&self, data: impl Into<Vec<u8>>) {
        let _ = self.to_host.send(ReadChunk::Data(data.into()));
    }

    /// End the host's read stream
    pub fn close(&self) {
        let _ = self.to_host.send(ReadChunk::Eof);
    }

    /// Every write received from the host, one entry per write call
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn write_count(&self) -> &AtomicU32 {
        &self.write_count
    }

    /// Make subsequent host writes fail with `BrokenPipe`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

struct MockReader {
    from_device: std_mpsc::Receiver<ReadChunk>,
    _handle: Arc<OpenHandle>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.from_device.recv_timeout(Duration::from_millis(5)) {
            Ok(ReadChunk::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Ok(ReadChunk::Eof) | Err(std_mpsc::RecvTimeoutError::Disconnected) => Ok(0),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

struct MockWriter {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    write_count: Arc<AtomicU32>,
    fail_writes: Arc<AtomicBool>,
    _handle: Arc<OpenHandle>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "device gone"));
        }
        self.written.lock().push(buf.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct MockState {
    attached: bool,
    present_after: u32,
    permitted: bool,
    policy: PermissionPolicy,
    fail_open: bool,
    held: Vec<PermissionRequest>,
    device: Option<MockDevice>,
    events: Option<HostEventSink>,
}

/// Scriptable accessory host
///
/// Presents a single accessory, optionally only after a number of
/// enumerations, and counts every interaction.
pub struct MockAccessoryHost {
    accessory: AccessoryInfo,
    state: Mutex<MockState>,
    enumerations: AtomicU32,
    permission_requests: AtomicU32,
    opens: AtomicU32,
    open_handles: Arc<AtomicU32>,
    max_open_handles: AtomicU32,
}

impl MockAccessoryHost {
    /// Host with one attached, permitted accessory
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accessory: AccessoryInfo {
                id: "mock-accessory-0".to_string(),
                manufacturer: Some("helilink".to_string()),
                product: Some("Mock ADK".to_string()),
                ..Default::default()
            },
            state: Mutex::new(MockState {
                attached: true,
                present_after: 0,
                permitted: true,
                policy: PermissionPolicy::Grant,
                fail_open: false,
                held: Vec::new(),
                device: None,
                events: None,
            }),
            enumerations: AtomicU32::new(0),
            permission_requests: AtomicU32::new(0),
            opens: AtomicU32::new(0),
            open_handles: Arc::new(AtomicU32::new(0)),
            max_open_handles: AtomicU32::new(0),
        })
    }

    pub fn accessory(&self) -> AccessoryInfo {
        self.accessory.clone()
    }

    /// Only list the accessory from the `n`-th enumeration on
    pub fn set_present_after(&self, n: u32) {
        self.state.lock().present_after = n;
    }

    pub fn set_permitted(&self, permitted: bool) {
        self.state.lock().permitted = permitted;
    }

    pub fn set_permission_policy(&self, policy: PermissionPolicy) {
        self.state.lock().policy = policy;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Plug the accessory in and report it to the watcher
    pub fn attach(&self) {
        let events = {
            let mut state = self.state.lock();
            state.attached = true;
            state.events.clone()
        };
        if let Some(events) = events {
            events.attached(self.accessory.clone());
        }
    }

    /// Unplug the accessory and report it to the watcher
    pub fn detach(&self) {
        let events = {
            let mut state = self.state.lock();
            state.attached = false;
            state.events.clone()
        };
        if let Some(events) = events {
            events.detached(self.accessory.clone());
        }
    }

    /// Answer every held permission request
    pub fn answer_held(&self, granted: bool) -> usize {
        let held: Vec<_> = self.state.lock().held.drain(..).collect();
        let count = held.len();
        for request in held {
            request.respond(granted);
        }
        count
    }

    pub fn held_requests(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Device end of the most recently opened stream
    pub fn device(&self) -> Option<MockDevice> {
        self.state.lock().device.clone()
    }

    pub fn enumerations(&self) -> &AtomicU32 {
        &self.enumerations
    }

    pub fn permission_requests(&self) -> &AtomicU32 {
        &self.permission_requests
    }

    pub fn opens(&self) -> &AtomicU32 {
        &self.opens
    }

    /// Streams opened and not yet dropped
    pub fn open_handles(&self) -> u32 {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn max_open_handles(&self) -> u32 {
        self.max_open_handles.load(Ordering::SeqCst)
    }
}

impl AccessoryHost for MockAccessoryHost {
    fn accessories(&self) -> helilink_accessory::Result<Vec<AccessoryInfo>> {
        let count = self.enumerations.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.lock();
        if state.attached && count >= state.present_after {
            Ok(vec![self.accessory.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn has_permission(&self, _accessory: &AccessoryInfo) -> bool {
        self.state.lock().permitted
    }

    fn request_permission(&self, request: PermissionRequest) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let policy = self.state.lock().policy;
        match policy {
            PermissionPolicy::Grant => {
                self.state.lock().permitted = true;
                request.grant();
            }
            PermissionPolicy::Deny => request.deny(),
            PermissionPolicy::Hold => self.state.lock().held.push(request),
        }
    }

    fn cancel_permission(&self, accessory: &AccessoryInfo) {
        self.state.lock().held.retain(|r| r.accessory() != accessory);
    }

    fn open(&self, accessory: &AccessoryInfo) -> helilink_accessory::Result<AccessoryStream> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(LinkError::OpenFailed(format!("{} refused to open", accessory)));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        let current = self.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_handles.fetch_max(current, Ordering::SeqCst);

        let handle = Arc::new(OpenHandle {
            count: self.open_handles.clone(),
        });
        let (to_host, from_device) = std_mpsc::channel();
        let device = MockDevice {
            to_host,
            written: Arc::new(Mutex::new(Vec::new())),
            write_count: Arc::new(AtomicU32::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        };

        let stream = AccessoryStream {
            reader: Box::new(MockReader {
                from_device,
                _handle: handle.clone(),
            }),
            writer: Box::new(MockWriter {
                written: device.written.clone(),
                write_count: device.write_count.clone(),
                fail_writes: device.fail_writes.clone(),
                _handle: handle,
            }),
        };

        state.device = Some(device);
        Ok(stream)
    }

    fn watch(&self, events: HostEventSink) {
        self.state.lock().events = Some(events);
    }
}

// ============================================================================
// Bridge Stand-ins
// ============================================================================

/// Command sink that records every command it receives
#[derive(Default)]
pub struct RecordingCommandSink {
    commands: Mutex<Vec<(Command, Action, Bytes)>>,
}

impl RecordingCommandSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<(Command, Action, Bytes)> {
        self.commands.lock().clone()
    }

    /// Recorded commands as they would appear on the wire
    pub fn wire(&self) -> Vec<Vec<u8>> {
        self.commands
            .lock()
            .iter()
            .filter_map(|(command, action, payload)| {
                Frame::new(*command, *action, payload.clone())
                    .ok()
                    .map(|frame| frame.encode().to_vec())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

impl CommandSink for RecordingCommandSink {
    fn send_command(&self, command: Command, action: Action, payload: Bytes) {
        self.commands.lock().push((command, action, payload));
    }
}

/// Liveness probe answering from a script, then from a default
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    default_ok: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(default_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default_ok: AtomicBool::new(default_ok),
            calls: AtomicU32::new(0),
        })
    }

    /// Queue the outcome of the next unscripted probe
    pub fn push_result(&self, ok: bool) {
        self.script.lock().push_back(ok);
    }

    pub fn set_default(&self, ok: bool) {
        self.default_ok.store(ok, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &AtomicU32 {
        &self.calls
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn probe(&self) -> helilink_bridge::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_ok.load(Ordering::SeqCst));
        if ok {
            Ok(())
        } else {
            Err(BridgeError::Probe("scripted failure".to_string()))
        }
    }
}

struct ChannelState {
    events: Option<mpsc::Sender<ChannelEvent>>,
    emitted: Vec<(String, Value)>,
    fail_start: bool,
}

/// In-memory control channel
///
/// Clones share state, so a test keeps one clone to inject events and
/// inspect what was emitted while the service owns the other.
#[derive(Clone)]
pub struct RecordingChannel {
    state: Arc<Mutex<ChannelState>>,
    starts: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
    emits: Arc<AtomicU32>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                events: None,
                emitted: Vec::new(),
                fail_start: false,
            })),
            starts: Arc::new(AtomicU32::new(0)),
            stops: Arc::new(AtomicU32::new(0)),
            emits: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Deliver an event as if it came from the server
    pub async fn inject(&self, event: ChannelEvent) -> bool {
        let tx = self.state.lock().events.clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a named event with its arguments
    pub async fn inject_event(&self, name: &str, args: Vec<Value>) -> bool {
        self.inject(ChannelEvent::Event {
            name: name.to_string(),
            args,
        })
        .await
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state.lock().emitted.clone()
    }

    pub fn starts(&self) -> &AtomicU32 {
        &self.starts
    }

    pub fn stops(&self) -> &AtomicU32 {
        &self.stops
    }

    pub fn emits(&self) -> &AtomicU32 {
        &self.emits
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlChannel for RecordingChannel {
    async fn start(&mut self) -> helilink_bridge::Result<mpsc::Receiver<ChannelEvent>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.fail_start {
            return Err(BridgeError::ConnectionFailed("scripted failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(100);
        let _ = tx.try_send(ChannelEvent::Connected);
        state.events = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> helilink_bridge::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.state.lock().events = None;
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> helilink_bridge::Result<()> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(BridgeError::Send("not connected".to_string()));
        }
        state.emitted.push((event.to_string(), payload));
        self.emits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().events.is_some()
    }
}
