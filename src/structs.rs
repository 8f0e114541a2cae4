use serde::Serialize;
use station_protocol::{
    response::{GpioLines, StatusPayload},
    EepromRecord, MotorId,
};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MotorState {
    pub position: i32,
    pub connected: bool,
    pub last_error: Option<String>,
}

/// Latest telemetry from the backend, refreshed by every `status` event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveState {
    pub motors: [MotorState; 2],
    pub gpio: GpioLines,
    pub eeprom: Option<EepromRecord>,
    pub queue_depth: u32,
    pub status_count: u64,
}

impl LiveState {
    pub fn motor(&self, id: MotorId) -> &MotorState {
        &self.motors[id.index()]
    }

    pub fn apply_status(&mut self, status: &StatusPayload) {
        for id in MotorId::ALL {
            let reported = status.motor(id);
            let motor = &mut self.motors[id.index()];
            motor.position = reported.position;
            motor.connected = reported.connected;
            if reported.error.is_some() {
                motor.last_error = reported.error.clone();
            }
        }

        self.gpio = status.gpio;
        self.eeprom = status.eeprom.clone();
        self.queue_depth = status.queue_depth;
        self.status_count += 1;
    }

    pub fn record_serial(&mut self, id: MotorId, connected: bool, error: Option<String>) {
        let motor = &mut self.motors[id.index()];
        motor.connected = connected;
        motor.last_error = error;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedLiveState {
    pub inner: Arc<RwLock<LiveState>>,
}

impl SharedLiveState {
    pub async fn snapshot(&self) -> LiveState {
        self.inner.read().await.clone()
    }
}
