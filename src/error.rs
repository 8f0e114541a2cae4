use station_protocol::{response::EventKind, MotorId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromStage {
    Write,
    Read,
}

impl std::fmt::Display for EepromStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EepromStage::Write => f.write_str("write"),
            EepromStage::Read => f.write_str("read"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StationError {
    /// Transport gave up reconnecting; needs an external restart.
    #[error("connection failed after {attempts} reconnect attempts")]
    ConnectionFailed { attempts: u32 },

    #[error("not connected to backend")]
    NotConnected,

    /// Link dropped while a request was waiting for its reply.
    #[error("connection lost while waiting for {0}")]
    Disconnected(EventKind),

    #[error("no {kind} reply within {timeout:?}")]
    Timeout { kind: EventKind, timeout: Duration },

    #[error("{motor} did not reach {target} within {timeout:?}")]
    MotionTimeout {
        motor: MotorId,
        target: i32,
        timeout: Duration,
    },

    #[error("backend rejected command: {0}")]
    CommandRejected(String),

    #[error("eeprom {stage} failed: {source}")]
    Eeprom {
        stage: EepromStage,
        #[source]
        source: Box<StationError>,
    },

    #[error("needle short circuit detected")]
    ShortCircuit,

    #[error("resistance abnormal: {ohms1:.3} / {ohms2:.3} ohm")]
    ResistanceAbnormal { ohms1: f64, ohms2: f64 },

    #[error("needle tip not present")]
    NeedleTipAbsent,

    /// Superseded by STOP or a lost link.
    #[error("cycle cancelled")]
    Cancelled,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StationError {
    pub fn eeprom(stage: EepromStage, source: StationError) -> Self {
        StationError::Eeprom {
            stage,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, StationError>;
