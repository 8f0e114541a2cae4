use crate::{EepromRecord, MotorId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,

    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    pub fn untagged(event: Event) -> Self {
        Self {
            request_id: None,
            event,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Serial(SerialResult),
    Status(StatusPayload),
    Resistance(ResistancePayload),
    EepromWrite(EepromResult),
    EepromRead(EepromResult),
    GpioStartButton,
    GpioPassButton,
    GpioNgButton,
    Error { message: String },
}

/// Discriminant of [`Event`], used to declare which reply a request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Serial,
    Status,
    Resistance,
    EepromWrite,
    EepromRead,
    GpioStartButton,
    GpioPassButton,
    GpioNgButton,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Serial => "serial",
            EventKind::Status => "status",
            EventKind::Resistance => "resistance",
            EventKind::EepromWrite => "eeprom_write",
            EventKind::EepromRead => "eeprom_read",
            EventKind::GpioStartButton => "gpio_start_button",
            EventKind::GpioPassButton => "gpio_pass_button",
            EventKind::GpioNgButton => "gpio_ng_button",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Serial(_) => EventKind::Serial,
            Event::Status(_) => EventKind::Status,
            Event::Resistance(_) => EventKind::Resistance,
            Event::EepromWrite(_) => EventKind::EepromWrite,
            Event::EepromRead(_) => EventKind::EepromRead,
            Event::GpioStartButton => EventKind::GpioStartButton,
            Event::GpioPassButton => EventKind::GpioPassButton,
            Event::GpioNgButton => EventKind::GpioNgButton,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

/// Result of a serial `connect`/`disconnect` attempt. The backend reports free
/// text; `success` is only present on newer backends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerialResult {
    pub result: String,

    #[serde(default)]
    pub motor_id: Option<MotorId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl SerialResult {
    pub fn is_success(&self) -> bool {
        if let Some(success) = self.success {
            return success;
        }

        let text = self.result.to_lowercase();
        (text.contains("connected") || text.contains("success")) && !text.contains("fail")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MotorStatus {
    #[serde(default)]
    pub position: i32,

    #[serde(default)]
    pub connected: bool,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpioLines {
    /// Part seated in the fixture.
    #[serde(default)]
    pub needle_tip: bool,

    /// Short between needle contacts.
    #[serde(default)]
    pub short_sense: bool,

    #[serde(default)]
    pub start_button: bool,

    #[serde(default)]
    pub pass_button: bool,

    #[serde(default)]
    pub ng_button: bool,
}

/// Continuous telemetry, pushed by the backend roughly every 100ms.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StatusPayload {
    #[serde(default)]
    pub motor1: MotorStatus,

    #[serde(default)]
    pub motor2: MotorStatus,

    #[serde(default)]
    pub gpio: GpioLines,

    #[serde(default)]
    pub eeprom: Option<EepromRecord>,

    #[serde(default)]
    pub queue_depth: u32,
}

impl StatusPayload {
    pub fn motor(&self, id: MotorId) -> &MotorStatus {
        match id {
            MotorId::Needle => &self.motor1,
            MotorId::Probe => &self.motor2,
        }
    }
}

/// Raw readings are milliohms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResistancePayload {
    pub resistance1: i64,
    pub resistance2: i64,

    #[serde(default)]
    pub status1: String,

    #[serde(default)]
    pub status2: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EepromResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EepromRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
