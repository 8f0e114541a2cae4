use crate::{
    channel::{ChannelTransport, ConnectionState},
    cycle::InspectionCycle,
    structs::SharedLiveState,
};
use station_protocol::{response::Event, JudgeResult};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Folds backend events into the live state and forwards operator inputs
/// (tip edges and GPIO buttons) to the cycle.
pub fn spawn_event_watcher(
    transport: &ChannelTransport,
    live: SharedLiveState,
    cycle: InspectionCycle,
) {
    let mut events = transport.subscribe();
    tokio::task::spawn(async move {
        let mut tip = false;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event watcher lagged, skipped {skipped} events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                Event::Status(status) => {
                    live.inner.write().await.apply_status(&status);
                    if status.gpio.needle_tip != tip {
                        tip = status.gpio.needle_tip;
                        info!("Needle tip {}", if tip { "seated" } else { "removed" });
                        cycle.on_tip(tip);
                    }
                }
                Event::GpioStartButton => cycle.start(),
                Event::GpioPassButton => cycle.judge(JudgeResult::Pass),
                Event::GpioNgButton => cycle.judge(JudgeResult::Ng),
                _ => {}
            }
        }
    });
}

/// Aborts an in-flight cycle whenever an open link goes away, including a
/// drop and reconnect that happens between two state observations.
pub fn spawn_link_watcher(transport: &ChannelTransport, cycle: InspectionCycle) {
    let transport = transport.clone();
    let mut states = transport.watch_state();
    tokio::task::spawn(async move {
        let mut was_open = *states.borrow() == ConnectionState::Open;
        let mut generation = transport.generation();

        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            let current = transport.generation();

            if was_open && (state != ConnectionState::Open || current != generation) {
                warn!("Backend link lost ({state:?})");
                cycle.on_link_lost();
            }
            if state == ConnectionState::ConnectionFailed {
                error!("Backend unreachable, giving up until restart");
            }

            was_open = state == ConnectionState::Open;
            generation = current;
        }
    });
}
