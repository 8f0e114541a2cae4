use super::{request::Correlator, Connector, Link};
use crate::error::{Result, StationError};
use serde::Serialize;
use station_protocol::{
    request::{Command, CommandEnvelope},
    response::{Event, EventEnvelope},
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc::UnboundedSender, watch},
    task::JoinHandle,
};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    /// Reconnect attempts exhausted. Terminal until `connect` is called again.
    ConnectionFailed,
}

/// The one persistent connection to the hardware-control backend.
///
/// Cloning is cheap; every clone shares the same link, subscribers and
/// in-flight requests.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<Event>,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    correlator: Mutex<Correlator>,
    generation: AtomicU64,
    user_closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    pub fn new(connector: impl Connector) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            inner: Arc::new(TransportInner {
                connector: Arc::new(connector),
                state,
                events,
                outbound: Mutex::new(None),
                correlator: Mutex::new(Correlator::default()),
                generation: AtomicU64::new(0),
                user_closed: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Starts (or restarts) the connection task. Returns immediately; watch
    /// [`ChannelTransport::watch_state`] for the outcome.
    pub fn connect(&self, url: &str) {
        self.inner.user_closed.store(false, Ordering::SeqCst);

        let handle = tokio::task::spawn(connection_task(self.clone(), url.to_string()));
        if let Some(old) = lock(&self.inner.task).replace(handle) {
            old.abort();
        }
    }

    /// User-initiated close. Does not trigger reconnects.
    pub fn disconnect(&self) {
        self.inner.user_closed.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
        }

        self.drop_link();
        self.set_state(ConnectionState::Closed);
        tracing::info!("Disconnected from backend");
    }

    /// Fire-and-forget. Commands issued while the link is down are dropped,
    /// not queued.
    pub fn send(&self, command: Command) -> Result<()> {
        self.send_envelope(CommandEnvelope::untagged(command))
    }

    pub(crate) fn send_envelope(&self, envelope: CommandEnvelope) -> Result<()> {
        let outbound = lock(&self.inner.outbound);
        let Some(tx) = outbound.as_ref() else {
            tracing::warn!("Not connected, dropping {} command", envelope.command.name());
            return Err(StationError::NotConnected);
        };

        let json = serde_json::to_string(&envelope)?;
        tracing::trace!(file = "channel", "-> {json}");
        tx.send(json).map_err(|_| StationError::NotConnected)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Incremented on every successful open.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Resolves once the link is open, or errors if the transport gave up.
    pub async fn wait_open(&self) -> Result<()> {
        let mut rx = self.watch_state();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::ConnectionFailed))
            .await
            .map_err(|_| StationError::NotConnected)?;

        match *state {
            ConnectionState::Open => Ok(()),
            _ => Err(StationError::ConnectionFailed {
                attempts: MAX_RECONNECT_ATTEMPTS,
            }),
        }
    }

    pub(crate) fn correlator(&self) -> MutexGuard<'_, Correlator> {
        lock(&self.inner.correlator)
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    fn drop_link(&self) {
        lock(&self.inner.outbound).take();
        self.correlator().fail_all();
    }

    fn dispatch(&self, raw: &str) {
        tracing::trace!(file = "channel", "<- {raw}");

        let envelope: EventEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Unparsable event frame ({e}): {raw}");
                return;
            }
        };

        if let Event::Error { message } = &envelope.event {
            tracing::error!("Backend error: {message}");
        }

        self.correlator().resolve(&envelope);
        _ = self.inner.events.send(envelope.event);
    }

    async fn run_link(&self, link: Link) {
        let Link {
            outbound,
            mut inbound,
        } = link;

        lock(&self.inner.outbound).replace(outbound);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Open);

        while let Some(frame) = inbound.recv().await {
            self.dispatch(&frame);
        }

        self.drop_link();
    }
}

async fn connection_task(transport: ChannelTransport, url: String) {
    let mut attempts: u32 = 0;

    loop {
        transport.set_state(ConnectionState::Connecting);
        match transport.inner.connector.connect(&url).await {
            Ok(link) => {
                tracing::info!("Connected to backend at {url}");
                attempts = 0;
                transport.run_link(link).await;

                if transport.inner.user_closed.load(Ordering::SeqCst) {
                    transport.set_state(ConnectionState::Closed);
                    return;
                }

                tracing::warn!("Backend connection closed unexpectedly");
            }
            Err(e) => {
                tracing::error!("Backend connect error: {e:?}");
            }
        }

        transport.set_state(ConnectionState::Closed);
        if transport.inner.user_closed.load(Ordering::SeqCst) {
            return;
        }

        if attempts >= MAX_RECONNECT_ATTEMPTS {
            tracing::error!("Giving up after {attempts} reconnect attempts");
            transport.set_state(ConnectionState::ConnectionFailed);
            return;
        }

        attempts += 1;
        tracing::info!(
            "Reconnecting in {RECONNECT_DELAY:?} ({attempts}/{MAX_RECONNECT_ATTEMPTS})"
        );
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
