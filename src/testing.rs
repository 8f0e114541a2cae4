//! Loopback links and recording collaborators for unit tests.

use crate::{
    channel::{Connector, Link},
    error::{Result, StationError},
    persistence::PersistencePort,
    snapshot::{SnapshotRequest, SnapshotSink},
};
use anyhow::anyhow;
use async_trait::async_trait;
use hil_processor::{HilConfig, HilState};
use station_protocol::{
    request::{Command, CommandEnvelope},
    response::{Event, EventEnvelope},
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::{mpsc::unbounded_channel, Notify};

/// Ordered log of externally visible effects shared by every test double.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<String>>>);

impl Timeline {
    pub fn note(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e == entry)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Short label for a command, e.g. `move:motor1:1250` or `led:green`.
pub fn label(command: &Command) -> String {
    match command {
        Command::Move {
            position, motor_id, ..
        } => format!("move:{motor_id}:{position}"),
        Command::LedControl { color } => format!("led:{color:?}").to_lowercase(),
        Command::EepromWrite { judge_result, .. } => match judge_result {
            Some(judge) => format!("eeprom_write:{judge}"),
            None => "eeprom_write".to_string(),
        },
        other => other.name().to_string(),
    }
}

#[derive(Default)]
struct ScriptState {
    link: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    sent: Vec<CommandEnvelope>,
    connect_calls: usize,
    fail_always: bool,
    fail_next: usize,
}

/// Link whose inbound side is driven by hand from the test.
pub struct ScriptedConnector {
    script: Script,
}

#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl ScriptedConnector {
    /// A backend that never answers on its own.
    pub fn silent() -> (Self, Script) {
        let script = Script::default();
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> anyhow::Result<Link> {
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<String>();

        {
            let mut state = lock(&self.script.0);
            state.connect_calls += 1;
            if state.fail_always || state.fail_next > 0 {
                state.fail_next = state.fail_next.saturating_sub(1);
                return Err(anyhow!("connection refused"));
            }

            state.link = Some(in_tx);
        }

        let script = self.script.clone();
        tokio::task::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Ok(envelope) = serde_json::from_str::<CommandEnvelope>(&frame) {
                    lock(&script.0).sent.push(envelope);
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

impl Script {
    pub fn push(&self, event: Event) {
        self.push_envelope(EventEnvelope::untagged(event));
    }

    pub fn push_envelope(&self, envelope: EventEnvelope) {
        let state = lock(&self.0);
        if let (Some(link), Ok(json)) = (state.link.as_ref(), serde_json::to_string(&envelope)) {
            _ = link.send(json);
        }
    }

    pub fn drop_link(&self) {
        lock(&self.0).link.take();
    }

    pub fn fail_connects(&self, fail: bool) {
        lock(&self.0).fail_always = fail;
    }

    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.0).fail_next = count;
    }

    pub fn sent(&self) -> Vec<CommandEnvelope> {
        lock(&self.0).sent.clone()
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.0).connect_calls
    }
}

/// Link backed by a simulated backend ticking every `tick_ms`.
pub struct HilConnector {
    handle: HilHandle,
}

#[derive(Clone)]
pub struct HilHandle {
    hil: Arc<Mutex<HilState>>,
    pub timeline: Timeline,
    kill: Arc<Notify>,
}

impl HilConnector {
    pub fn new(config: HilConfig) -> (Self, HilHandle) {
        let handle = HilHandle {
            hil: Arc::new(Mutex::new(HilState::new(config, |_, _| {}))),
            timeline: Timeline::default(),
            kill: Arc::new(Notify::new()),
        };

        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl Connector for HilConnector {
    async fn connect(&self, _url: &str) -> anyhow::Result<Link> {
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<String>();
        let handle = self.handle.clone();
        let tick_ms = handle.with(|hil| hil.config.tick_ms.max(1));

        tokio::task::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
            let flush = |handle: &HilHandle| {
                for packet in handle.with(|hil| hil.take_packets()) {
                    if let Ok(json) = serde_json::to_string(&packet) {
                        _ = in_tx.send(json);
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = handle.kill.notified() => break,
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let Ok(envelope) = serde_json::from_str::<CommandEnvelope>(&frame) else {
                            continue;
                        };

                        handle.timeline.note(label(&envelope.command));
                        handle.with(|hil| hil.feed(envelope));
                        flush(&handle);
                    }
                    _ = tick.tick() => {
                        handle.with(|hil| hil.process());
                        flush(&handle);
                    }
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

impl HilHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut HilState) -> R) -> R {
        f(&mut lock(&self.hil))
    }

    /// Commands received so far, oldest first.
    pub fn journal(&self) -> Vec<Command> {
        self.with(|hil| hil.journal.clone())
    }

    pub fn drop_link(&self) {
        self.kill.notify_one();
    }
}

/// Returns a fixed PNG header and records each request.
pub struct StubSnapshot {
    pub requests: Mutex<Vec<SnapshotRequest>>,
    timeline: Timeline,
    fail: bool,
}

impl StubSnapshot {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            timeline,
            fail: false,
        }
    }

    pub fn failing(timeline: Timeline) -> Self {
        Self {
            fail: true,
            ..Self::new(timeline)
        }
    }
}

#[async_trait]
impl SnapshotSink for StubSnapshot {
    async fn capture_annotated_composite(&self, request: &SnapshotRequest) -> Result<Vec<u8>> {
        self.timeline.note("snapshot");
        lock(&self.requests).push(request.clone());
        if self.fail {
            return Err(StationError::Snapshot("camera offline".to_string()));
        }

        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

/// Records saves after an artificial write delay.
pub struct StubPersistence {
    pub saved: Mutex<Vec<PathBuf>>,
    timeline: Timeline,
    delay: Duration,
    fail: bool,
}

impl StubPersistence {
    pub fn new(timeline: Timeline, delay: Duration) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            timeline,
            delay,
            fail: false,
        }
    }

    /// Every save fails after the delay, like a full disk.
    pub fn failing(timeline: Timeline, delay: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(timeline, delay)
        }
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl PersistencePort for StubPersistence {
    async fn ensure_dir(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn save(&self, path: &Path, _bytes: &[u8]) -> Result<()> {
        self.timeline.note("save:start");
        tokio::time::sleep(self.delay).await;
        if self.fail {
            self.timeline.note("save:failed");
            return Err(StationError::Io(std::io::Error::other("no space left on device")));
        }

        lock(&self.saved).push(path.to_path_buf());
        self.timeline.note("save:done");
        Ok(())
    }
}
