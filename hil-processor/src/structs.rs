use serde::{Deserialize, Serialize};
use station_protocol::{
    request::{Command, LedColor},
    response::{EventEnvelope, GpioLines},
    EepromRecord,
};

#[derive(Clone)]
pub struct HilState {
    pub motors: [HilMotor; 2],
    pub gpio: GpioLines,
    pub eeprom: Option<EepromRecord>,
    pub led: Option<LedColor>,
    pub config: HilConfig,

    /// Every command received, oldest first.
    pub journal: Vec<Command>,
    pub packet_queue: Vec<EventEnvelope>,

    pub log_fn: fn(&str, String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HilMotor {
    pub position: i32,
    pub target: i32,
    pub speed: Option<u32>,
    pub connected: bool,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct HilConfig {
    /// Raw milliohm readings reported by `measure_resistance`.
    pub resistance1: i64,
    pub resistance2: i64,

    /// Uniform noise added to each reading, in raw units.
    pub jitter: i64,

    /// Units per second used when a move carries no speed.
    pub default_speed: u32,
    pub tick_ms: u64,

    pub echo_request_ids: bool,
    pub needle_tip: bool,
    pub faults: HilFaults,
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            resistance1: 48_000,
            resistance2: 51_000,
            jitter: 0,
            default_speed: 2_000,
            tick_ms: 100,
            echo_request_ids: true,
            needle_tip: true,
            faults: HilFaults::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HilFaults {
    pub reject_eeprom_write: bool,
    pub drop_eeprom_write: bool,
    pub drop_eeprom_read: bool,
    pub drop_resistance: bool,
    pub stall_probe: bool,
    pub fail_serial_connect: bool,
}
