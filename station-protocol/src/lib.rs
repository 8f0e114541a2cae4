use serde::{Deserialize, Serialize};

pub mod request;
pub mod response;

/// Motors are addressed by number on the wire (`motor_id: 1 | 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MotorId {
    /// Motor 1, needle positioning.
    Needle,
    /// Motor 2, resistance probe positioning (multi-needle parts only).
    Probe,
}

impl MotorId {
    pub const ALL: [MotorId; 2] = [MotorId::Needle, MotorId::Probe];

    pub fn index(&self) -> usize {
        match self {
            MotorId::Needle => 0,
            MotorId::Probe => 1,
        }
    }
}

impl From<MotorId> for u8 {
    fn from(id: MotorId) -> u8 {
        match id {
            MotorId::Needle => 1,
            MotorId::Probe => 2,
        }
    }
}

impl TryFrom<u8> for MotorId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MotorId::Needle),
            2 => Ok(MotorId::Probe),
            other => Err(format!("unknown motor id {other}")),
        }
    }
}

impl std::fmt::Display for MotorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "motor{}", u8::from(*self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JudgeResult {
    Pass,
    Ng,
}

impl JudgeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeResult::Pass => "PASS",
            JudgeResult::Ng => "NG",
        }
    }
}

impl std::fmt::Display for JudgeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of the part's EEPROM as written by the station and read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EepromRecord {
    pub tip_type: Option<u16>,
    pub shot_count: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub maker_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_result: Option<JudgeResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_serial: Option<u32>,
}

impl EepromRecord {
    /// Manufacturing date as `YYMMDD`.
    pub fn date_code(&self) -> String {
        format!("{:02}{:02}{:02}", self.year % 100, self.month, self.day)
    }
}
