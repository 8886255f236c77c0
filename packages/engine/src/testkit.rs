// packages/engine/src/testkit.rs
//! In-memory worker doubles for tests
//!
//! A scripted relay plus a fake process stand in for a real interpreter
//! runtime: the relay answers the pid handshake, obeys the stop command and
//! echoes data frames (optionally after a delay), while the fake process
//! tracks liveness, exit cause and a scripted RSS. Pool and supervisor
//! scenarios run hermetically on these.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::time::{sleep, timeout};

use crate::events::{Event, EventKind};
use crate::ipc::frame::Frame;
use crate::ipc::relay::{Relay, RelayError};
use crate::utils::errors::{EngineError, Result};
use crate::worker::allocator::WorkerFactory;
use crate::worker::handle::Worker;
use crate::worker::process::{ExitOutcome, ProcessHandle};

const CAUSE_RUNNING: u8 = 0;
const CAUSE_STOPPED: u8 = 1;
const CAUSE_KILLED: u8 = 2;

/// How the scripted worker answers data frames.
#[derive(Debug, Clone, Copy)]
pub enum ReplyMode {
    /// Reply immediately with the request payload.
    Echo,
    /// Handler that takes this long before echoing.
    SleepThenEcho(Duration),
}

/// How the scripted worker answers the pid handshake.
#[derive(Debug, Clone, Copy)]
pub enum HandshakeMode {
    Normal,
    /// Reply without the CONTROL flag.
    MissingControlFlag,
    /// Reply with a pid that fails validation.
    NegativePid,
    /// Never reply; the allocator must time out.
    Silent,
}

/// State shared between a fake process and its relay.
struct Shared {
    pid: u32,
    alive: AtomicBool,
    exit_cause: AtomicU8,
    exited: Notify,
    rss_mib: AtomicU64,
    ignore_stop: AtomicBool,
    kill_calls: AtomicU32,
}

impl Shared {
    fn new(pid: u32, rss_mib: u64, ignore_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            pid,
            alive: AtomicBool::new(true),
            exit_cause: AtomicU8::new(CAUSE_RUNNING),
            exited: Notify::new(),
            rss_mib: AtomicU64::new(rss_mib),
            ignore_stop: AtomicBool::new(ignore_stop),
            kill_calls: AtomicU32::new(0),
        })
    }

    fn exit(&self, cause: u8) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.exit_cause.store(cause, Ordering::Release);
            self.exited.notify_waiters();
        }
    }
}

/// Process double with scripted liveness and RSS.
pub struct FakeProcess {
    shared: Arc<Shared>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.shared.pid
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    fn kill(&self) {
        self.shared.kill_calls.fetch_add(1, Ordering::AcqRel);
        self.shared.exit(CAUSE_KILLED);
    }

    async fn wait(&self) -> ExitOutcome {
        loop {
            match self.shared.exit_cause.load(Ordering::Acquire) {
                CAUSE_STOPPED => return ExitOutcome::Exited(0),
                CAUSE_KILLED => return ExitOutcome::Killed,
                _ => {
                    // Bounded park: re-check even if the wakeup slipped in
                    // before this waiter registered.
                    let _ = timeout(Duration::from_millis(10), self.shared.exited.notified()).await;
                }
            }
        }
    }

    fn rss_mib(&self) -> u64 {
        self.shared.rss_mib.load(Ordering::Acquire)
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        // Factory contract: a dropped handle does not leak its process.
        if self.shared.alive.load(Ordering::Acquire) {
            self.kill();
        }
    }
}

/// Relay double speaking the control protocol.
pub struct ScriptedRelay {
    shared: Arc<Shared>,
    mode: ReplyMode,
    handshake: HandshakeMode,
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: AtomicBool,
    closed_notify: Notify,
    pending_err: StdMutex<Option<RelayError>>,
}

impl ScriptedRelay {
    fn new(shared: Arc<Shared>, mode: ReplyMode, handshake: HandshakeMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared,
            mode,
            handshake,
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            pending_err: StdMutex::new(None),
        }
    }

    /// Make the next receive fail with the given error.
    fn inject(&self, err: RelayError) {
        self.pending_err.lock().unwrap().replace(err);
    }

    fn handle_control(&self, frame: &Frame) {
        let value: serde_json::Value =
            serde_json::from_slice(frame.payload()).unwrap_or_default();

        if value.get("pid").is_some() {
            let reply = match self.handshake {
                HandshakeMode::Normal => Frame::control(
                    serde_json::to_vec(&serde_json::json!({ "pid": self.shared.pid })).unwrap(),
                ),
                HandshakeMode::MissingControlFlag => {
                    Frame::data(b"", &serde_json::to_vec(&serde_json::json!({ "pid": 1 })).unwrap())
                }
                HandshakeMode::NegativePid => Frame::control(b"{\"pid\":-1}".to_vec()),
                HandshakeMode::Silent => return,
            };
            let _ = self.tx.send(reply);
        } else if value.get("stop").is_some() && !self.shared.ignore_stop.load(Ordering::Acquire) {
            // The worker runtime exits voluntarily on stop.
            self.shared.exit(CAUSE_STOPPED);
        }
    }
}

#[async_trait]
impl Relay for ScriptedRelay {
    async fn send(&self, frame: Frame) -> std::result::Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(RelayError::Io("broken pipe".into()));
        }

        if frame.is_control() {
            self.handle_control(&frame);
            return Ok(());
        }

        match self.mode {
            ReplyMode::Echo => {
                let _ = self.tx.send(frame);
            }
            ReplyMode::SleepThenEcho(delay) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = tx.send(frame);
                });
            }
        }
        Ok(())
    }

    async fn receive(&self) -> std::result::Result<Frame, RelayError> {
        if let Some(err) = self.pending_err.lock().unwrap().take() {
            return Err(err);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed_notify.notified() => Err(RelayError::Closed),
            frame = rx.recv() => frame.ok_or(RelayError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.closed_notify.notify_one();
        }
    }
}

static NEXT_FAKE_PID: AtomicU32 = AtomicU32::new(40_000);

/// One scripted process/relay pair for worker-handle tests.
pub struct FakeWorker {
    shared: Arc<Shared>,
    relay: Arc<ScriptedRelay>,
}

impl FakeWorker {
    pub fn spawn(mode: ReplyMode) -> Self {
        let pid = NEXT_FAKE_PID.fetch_add(1, Ordering::Relaxed);
        let shared = Shared::new(pid, 0, false);
        let relay = Arc::new(ScriptedRelay::new(
            Arc::clone(&shared),
            mode,
            HandshakeMode::Normal,
        ));
        Self { shared, relay }
    }

    pub fn inject_receive_error(&self, err: RelayError) {
        self.relay.inject(err);
    }

    pub fn ignore_stop_command(&self) {
        self.shared.ignore_stop.store(true, Ordering::Release);
    }

    pub fn into_worker(self) -> Worker {
        let worker = Worker::new(
            Box::new(FakeProcess {
                shared: self.shared,
            }),
            self.relay,
        );
        worker.activate();
        worker
    }
}

struct SpawnedWorker {
    shared: Arc<Shared>,
    relay: Arc<ScriptedRelay>,
}

/// Factory double with scripted failure windows and per-worker knobs.
pub struct MockFactory {
    mode: ReplyMode,
    handshake: HandshakeMode,
    next_pid: AtomicU32,
    fail_until: StdMutex<Option<Instant>>,
    rss_next: AtomicU64,
    ignore_stop_default: AtomicBool,
    spawned: StdMutex<Vec<SpawnedWorker>>,
}

impl MockFactory {
    pub fn new(mode: ReplyMode) -> Self {
        Self {
            mode,
            handshake: HandshakeMode::Normal,
            next_pid: AtomicU32::new(10_000),
            fail_until: StdMutex::new(None),
            rss_next: AtomicU64::new(0),
            ignore_stop_default: AtomicBool::new(false),
            spawned: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_handshake(mut self, handshake: HandshakeMode) -> Self {
        self.handshake = handshake;
        self
    }

    /// Spawns fail for this long from now (the file-sentinel scenario).
    pub fn fail_spawns_for(&self, window: Duration) {
        *self.fail_until.lock().unwrap() = Some(Instant::now() + window);
    }

    /// Scripted RSS for the next spawned worker only; later ones report 0.
    pub fn set_rss_for_next(&self, rss_mib: u64) {
        self.rss_next.store(rss_mib, Ordering::Release);
    }

    /// Make every worker (existing and future) ignore the stop command.
    pub fn ignore_stop_commands(&self) {
        self.ignore_stop_default.store(true, Ordering::Release);
        for spawned in self.spawned.lock().unwrap().iter() {
            spawned.shared.ignore_stop.store(true, Ordering::Release);
        }
    }

    /// Fail the next receive on the most recently spawned worker's relay.
    pub fn inject_receive_error(&self, err: RelayError) {
        let spawned = self.spawned.lock().unwrap();
        spawned
            .last()
            .expect("no worker spawned yet")
            .relay
            .inject(err);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn total_kill_calls(&self) -> u32 {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.shared.kill_calls.load(Ordering::Acquire))
            .sum()
    }

    pub fn all_spawned_dead(&self) -> bool {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .all(|s| !s.shared.alive.load(Ordering::Acquire))
    }
}

#[async_trait]
impl WorkerFactory for MockFactory {
    async fn spawn(&self) -> Result<(Box<dyn ProcessHandle>, Arc<dyn Relay>)> {
        if let Some(until) = *self.fail_until.lock().unwrap() {
            if Instant::now() < until {
                return Err(EngineError::WorkerAllocate("spawn sentinel missing".into()));
            }
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let shared = Shared::new(
            pid,
            self.rss_next.swap(0, Ordering::AcqRel),
            self.ignore_stop_default.load(Ordering::Acquire),
        );
        let relay = Arc::new(ScriptedRelay::new(
            Arc::clone(&shared),
            self.mode,
            self.handshake,
        ));

        self.spawned.lock().unwrap().push(SpawnedWorker {
            shared: Arc::clone(&shared),
            relay: Arc::clone(&relay),
        });

        let process: Box<dyn ProcessHandle> = Box::new(FakeProcess { shared });
        let relay: Arc<dyn Relay> = relay;
        Ok((process, relay))
    }
}

/// Drain the bus until an event of the given kind shows up, skipping others
/// and lag gaps. Panics once the deadline passes.
pub async fn next_event_of(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
    deadline: Duration,
) -> Event {
    let end = Instant::now() + deadline;
    loop {
        let remaining = end.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for {:?}", kind);
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if event.kind == kind => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("event bus closed while waiting for {:?}", kind)
            }
            Err(_) => panic!("timed out waiting for {:?}", kind),
        }
    }
}
