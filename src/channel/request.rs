use super::ChannelTransport;
use crate::error::{Result, StationError};
use station_protocol::{
    request::{Command, CommandEnvelope},
    response::{Event, EventEnvelope, EventKind},
};
use std::time::Duration;
use tokio::sync::oneshot;

pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

struct PendingRequest {
    id: u32,
    kind: EventKind,
    predicate: Option<Predicate>,
    reply: oneshot::Sender<Result<Event>>,
}

/// In-flight requests, oldest first.
///
/// An event that echoes a `request_id` resolves exactly that request (or
/// nothing, if it already timed out). Untagged events resolve the oldest
/// request waiting on the same type whose predicate accepts the payload.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: Vec<PendingRequest>,
}

impl Correlator {
    fn register(
        &mut self,
        kind: EventKind,
        predicate: Option<Predicate>,
        reply: oneshot::Sender<Result<Event>>,
    ) -> u32 {
        let mut id: u32 = rand::random();
        while self.pending.iter().any(|p| p.id == id) {
            id = rand::random();
        }

        self.pending.push(PendingRequest {
            id,
            kind,
            predicate,
            reply,
        });
        id
    }

    pub(crate) fn resolve(&mut self, envelope: &EventEnvelope) -> bool {
        let event = &envelope.event;
        let idx = match envelope.request_id {
            Some(id) => self.pending.iter().position(|p| p.id == id),
            None => self.pending.iter().position(|p| {
                p.kind == event.kind() && p.predicate.as_ref().map_or(true, |f| f(event))
            }),
        };

        let Some(idx) = idx else {
            return false;
        };

        let pending = self.pending.remove(idx);
        _ = pending.reply.send(Ok(event.clone()));
        true
    }

    fn cancel(&mut self, id: u32) {
        self.pending.retain(|p| p.id != id);
    }

    /// Fails every waiter; used when the link drops under them.
    pub(crate) fn fail_all(&mut self) {
        for pending in self.pending.drain(..) {
            _ = pending
                .reply
                .send(Err(StationError::Disconnected(pending.kind)));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

impl ChannelTransport {
    /// Sends `command` and waits for the first event of type `kind` that
    /// satisfies `predicate`.
    ///
    /// Rejects with [`StationError::Timeout`] once `timeout` elapses, with
    /// [`StationError::Disconnected`] if the link drops first, and with
    /// [`StationError::NotConnected`] if nothing could be sent.
    pub async fn request(
        &self,
        command: Command,
        kind: EventKind,
        predicate: Option<Predicate>,
        timeout: Duration,
    ) -> Result<Event> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let name = command.name();

        // registered before sending so a fast reply can't slip past
        let id = self.correlator().register(kind, predicate, reply_tx);
        if let Err(e) = self.send_envelope(CommandEnvelope {
            request_id: Some(id),
            command,
        }) {
            self.correlator().cancel(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(StationError::Disconnected(kind)),
            Err(_) => {
                self.correlator().cancel(id);
                tracing::warn!("{name} ({id}) got no {kind} reply within {timeout:?}");
                Err(StationError::Timeout { kind, timeout })
            }
        }
    }

    /// Number of requests still waiting for a reply.
    #[cfg(test)]
    pub fn pending_requests(&self) -> usize {
        self.correlator().len()
    }
}
