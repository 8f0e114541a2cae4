use crate::{
    channel::ChannelTransport,
    error::{Result, StationError},
};
use station_protocol::{
    request::Command,
    response::{Event, EventKind, ResistancePayload},
};
use std::time::Duration;
use tracing::info;

pub const RESISTANCE_TIMEOUT: Duration = Duration::from_secs(10);
/// Raw readings are milliohms.
pub const OHMS_PER_RAW: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Normal,
    Abnormal,
}

/// Either channel over the threshold makes the part abnormal.
pub fn classify(reading: &ResistancePayload, threshold_ohms: f64) -> Verdict {
    let ohms1 = reading.resistance1 as f64 * OHMS_PER_RAW;
    let ohms2 = reading.resistance2 as f64 * OHMS_PER_RAW;

    if ohms1 > threshold_ohms || ohms2 > threshold_ohms {
        Verdict::Abnormal
    } else {
        Verdict::Normal
    }
}

#[derive(Clone)]
pub struct ResistanceCoordinator {
    transport: ChannelTransport,
}

impl ResistanceCoordinator {
    pub fn new(transport: ChannelTransport) -> Self {
        Self { transport }
    }

    pub async fn measure(&self) -> Result<ResistancePayload> {
        let event = self
            .transport
            .request(
                Command::MeasureResistance,
                EventKind::Resistance,
                None,
                RESISTANCE_TIMEOUT,
            )
            .await?;

        match event {
            Event::Resistance(reading) => {
                info!(
                    "Resistance: {} / {} ({} / {})",
                    reading.resistance1, reading.resistance2, reading.status1, reading.status2
                );
                Ok(reading)
            }
            other => Err(StationError::CommandRejected(format!(
                "unexpected {} reply to measure_resistance",
                other.kind()
            ))),
        }
    }
}
