use chrono::{DateTime, Local};
use serde::Serialize;
use station_protocol::{response::ResistancePayload, EepromRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    /// Part seated, ready for START.
    Armed,
    EepromPending,
    ShortCheck,
    Positioning,
    ResistanceGate,
    JudgeReady,
    Capturing,

    /// Needle tip absent. Pre-empts every other status.
    Disconnected,
    WriteFailed,
    ReadFailed,
    NeedleShort,
    ResistanceAbnormal,
    MotionFailed,
    MeasureFailed,
    /// Cycle interrupted by a lost link or a removed part.
    Aborted,
}

impl Phase {
    /// A cycle is in flight and owns the hardware.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Phase::EepromPending
                | Phase::ShortCheck
                | Phase::Positioning
                | Phase::ResistanceGate
                | Phase::Capturing
        )
    }

    pub fn controls(&self) -> JudgeControls {
        match self {
            Phase::JudgeReady => JudgeControls { pass: true, ng: true },
            Phase::WriteFailed
            | Phase::ReadFailed
            | Phase::ResistanceAbnormal
            | Phase::MotionFailed
            | Phase::MeasureFailed
            | Phase::Aborted => JudgeControls {
                pass: false,
                ng: true,
            },
            _ => JudgeControls::default(),
        }
    }

    /// Operator-facing status text.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Waiting => "대기",
            Phase::Armed => "니들 연결됨",
            Phase::EepromPending => "EEPROM 기록 중",
            Phase::ShortCheck => "쇼트 검사 중",
            Phase::Positioning => "모터 이동 중",
            Phase::ResistanceGate => "저항 측정 중",
            Phase::JudgeReady => "판정 대기",
            Phase::Capturing => "저장 중",
            Phase::Disconnected => "니들 미연결",
            Phase::WriteFailed => "쓰기 실패",
            Phase::ReadFailed => "읽기 실패",
            Phase::NeedleShort => "니들 쇼트",
            Phase::ResistanceAbnormal => "저항 비정상",
            Phase::MotionFailed => "모터 이동 실패",
            Phase::MeasureFailed => "저항 측정 실패",
            Phase::Aborted => "검사 중단",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JudgeControls {
    pub pass: bool,
    pub ng: bool,
}

/// Shown next to the phase label until the next START.
pub const NOTICE_SAVE_FAILED: &str = "저장 실패";
pub const NOTICE_JUDGE_EEPROM_FAILED: &str = "EEPROM 재기록 실패";

#[derive(Debug, Clone, PartialEq)]
pub struct InspectionSession {
    pub phase: Phase,
    /// Bumped on START, STOP and every interruption; results tagged with an
    /// older epoch are dropped.
    pub epoch: u64,
    pub started_at: Option<DateTime<Local>>,
    pub needle_tip_connected: bool,
    pub short_detected: bool,
    pub last_eeprom: Option<EepromRecord>,
    pub resistance: Option<ResistancePayload>,
    pub resistance_abnormal: bool,
    /// Serial the next judged part will carry.
    pub daily_serial: u32,
    pub multi_needle: bool,
    pub notice: Option<&'static str>,

    /// Phase to restore when the tip comes back.
    pub(crate) held: Option<Phase>,
}

impl InspectionSession {
    pub fn new(multi_needle: bool, daily_serial: u32) -> Self {
        Self {
            phase: Phase::Waiting,
            epoch: 0,
            started_at: None,
            needle_tip_connected: false,
            short_detected: false,
            last_eeprom: None,
            resistance: None,
            resistance_abnormal: false,
            daily_serial,
            multi_needle,
            notice: None,
            held: None,
        }
    }

    pub fn controls(&self) -> JudgeControls {
        self.phase.controls()
    }

    pub(crate) fn clear_cycle(&mut self) {
        self.started_at = None;
        self.short_detected = false;
        self.last_eeprom = None;
        self.resistance = None;
        self.resistance_abnormal = false;
        self.held = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            label: self.phase.label(),
            notice: self.notice,
            epoch: self.epoch,
            controls: self.controls(),
            started_at: self.started_at,
            needle_tip_connected: self.needle_tip_connected,
            short_detected: self.short_detected,
            last_eeprom: self.last_eeprom.clone(),
            resistance: self.resistance.clone(),
            resistance_abnormal: self.resistance_abnormal,
            daily_serial: self.daily_serial,
            multi_needle: self.multi_needle,
        }
    }
}

/// Read-only projection published after every transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: Phase,
    pub label: &'static str,
    pub notice: Option<&'static str>,
    pub epoch: u64,
    pub controls: JudgeControls,
    pub started_at: Option<DateTime<Local>>,
    pub needle_tip_connected: bool,
    pub short_detected: bool,
    pub last_eeprom: Option<EepromRecord>,
    pub resistance: Option<ResistancePayload>,
    pub resistance_abnormal: bool,
    pub daily_serial: u32,
    pub multi_needle: bool,
}
