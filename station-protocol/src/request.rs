use crate::{JudgeResult, MotorId};
use serde::{Deserialize, Serialize};

/// Outbound frame. `request_id` is optional on the wire; a backend that echoes
/// it back lets the station resolve the exact request instead of matching by
/// event type.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,

    #[serde(flatten)]
    pub command: Command,
}

impl CommandEnvelope {
    pub fn untagged(command: Command) -> Self {
        Self {
            request_id: None,
            command,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MoveMode {
    Position,
    Speed,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Green,
    Red,
    Off,
}

impl From<JudgeResult> for LedColor {
    fn from(result: JudgeResult) -> Self {
        match result {
            JudgeResult::Pass => LedColor::Green,
            JudgeResult::Ng => LedColor::Red,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Connect {
        port: String,
        baudrate: u32,
        motor_id: MotorId,
    },
    Disconnect {
        motor_id: MotorId,
    },
    Move {
        position: i32,
        mode: MoveMode,
        motor_id: MotorId,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        needle_speed: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    EepromWrite {
        tip_type: Option<u16>,
        shot_count: u32,
        year: u16,
        month: u8,
        day: u8,
        maker_code: u16,
        mtr_version: String,
        country: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        inspector_code: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        judge_result: Option<JudgeResult>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        daily_serial: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    EepromRead {
        mtr_version: String,
        country: String,
    },
    MeasureResistance,
    LedControl {
        #[serde(rename = "type")]
        color: LedColor,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::Move { .. } => "move",
            Command::EepromWrite { .. } => "eeprom_write",
            Command::EepromRead { .. } => "eeprom_read",
            Command::MeasureResistance => "measure_resistance",
            Command::LedControl { .. } => "led_control",
        }
    }
}
