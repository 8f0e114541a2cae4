use anyhow::{anyhow, Result};
use std::{path::PathBuf, str::FromStr};

/// Product line whose multi-needle parts carry the probe motor.
pub const MULTI_NEEDLE_MIN_MTR_VERSION: f32 = 4.0;
pub const MULTI_NEEDLE_FAMILY: &str = "MULTI";

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub backend_url: String,
    pub control_port: u16,
    pub logs_dir: PathBuf,

    pub part: PartProfile,
    pub worker_code: String,
    pub motion: MotionConfig,
    pub resistance_threshold_ohms: f64,

    pub needle_port: Option<String>,
    pub probe_port: Option<String>,
    pub baudrate: u32,

    pub catalog_path: PathBuf,
    pub users_path: PathBuf,
    pub save_dir: PathBuf,
    pub serial_state_path: PathBuf,
    pub snapshot_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartProfile {
    pub mtr_version: String,
    pub country: String,
    pub needle_label: String,
    pub maker_code: u16,
}

impl PartProfile {
    /// Multi-needle parts only exist on the newer rig.
    pub fn is_multi_needle(&self) -> bool {
        let newer = self
            .mtr_version
            .trim()
            .parse::<f32>()
            .map(|v| v >= MULTI_NEEDLE_MIN_MTR_VERSION)
            .unwrap_or(false);

        newer
            && self
                .needle_label
                .trim()
                .to_uppercase()
                .starts_with(MULTI_NEEDLE_FAMILY)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    pub needle_offset_mm: f64,
    pub needle_protrusion_mm: f64,
    pub needle_initial_mm: f64,
    pub needle_speed: Option<u32>,

    pub probe_target_mm: f64,
    pub probe_rest_mm: f64,
    pub probe_speed: Option<u32>,
    pub slowdown: Option<SlowdownConfig>,

    /// Allowed |position - target| in device units.
    pub tolerance: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowdownConfig {
    pub within_mm: f64,
    pub speed: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            needle_offset_mm: 0.0,
            needle_protrusion_mm: 0.0,
            needle_initial_mm: 0.0,
            needle_speed: None,
            probe_target_mm: 0.0,
            probe_rest_mm: 0.0,
            probe_speed: None,
            slowdown: None,
            tolerance: 5,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            backend_url: "ws://127.0.0.1:8765/ws".to_string(),
            control_port: 8700,
            logs_dir: PathBuf::from("logs"),
            part: PartProfile {
                mtr_version: "2.0".to_string(),
                country: "KR".to_string(),
                needle_label: String::new(),
                maker_code: 0,
            },
            worker_code: String::new(),
            motion: MotionConfig::default(),
            resistance_threshold_ohms: 100.0,
            needle_port: None,
            probe_port: None,
            baudrate: 19200,
            catalog_path: PathBuf::from("data/catalog.csv"),
            users_path: PathBuf::from("data/users.csv"),
            save_dir: PathBuf::from("captures"),
            serial_state_path: PathBuf::from("data/daily_serial.json"),
            snapshot_url: "http://127.0.0.1:8710/snapshot".to_string(),
        }
    }
}

impl StationConfig {
    pub fn from_env() -> Result<Self> {
        let d = StationConfig::default();

        let slowdown = match env_opt::<f64>("PROBE_SLOWDOWN_MM")? {
            Some(within_mm) => Some(SlowdownConfig {
                within_mm,
                speed: env_or("PROBE_SLOW_SPEED", 200)?,
            }),
            None => None,
        };

        Ok(Self {
            backend_url: env_or("BACKEND_URL", d.backend_url)?,
            control_port: env_or("CONTROL_PORT", d.control_port)?,
            logs_dir: env_or("LOGS_DIR", d.logs_dir)?,
            part: PartProfile {
                mtr_version: env_or("MTR_VERSION", d.part.mtr_version)?,
                country: env_or("COUNTRY", d.part.country)?,
                needle_label: env_or("NEEDLE_LABEL", d.part.needle_label)?,
                maker_code: env_or("MAKER_CODE", d.part.maker_code)?,
            },
            worker_code: env_or("WORKER_CODE", d.worker_code)?,
            motion: MotionConfig {
                needle_offset_mm: env_or("NEEDLE_OFFSET_MM", d.motion.needle_offset_mm)?,
                needle_protrusion_mm: env_or("NEEDLE_PROTRUSION_MM", d.motion.needle_protrusion_mm)?,
                needle_initial_mm: env_or("NEEDLE_INITIAL_MM", d.motion.needle_initial_mm)?,
                needle_speed: env_opt("NEEDLE_SPEED")?,
                probe_target_mm: env_or("PROBE_TARGET_MM", d.motion.probe_target_mm)?,
                probe_rest_mm: env_or("PROBE_REST_MM", d.motion.probe_rest_mm)?,
                probe_speed: env_opt("PROBE_SPEED")?,
                slowdown,
                tolerance: env_or("POSITION_TOLERANCE", d.motion.tolerance)?,
            },
            resistance_threshold_ohms: env_or(
                "RESISTANCE_THRESHOLD_OHMS",
                d.resistance_threshold_ohms,
            )?,
            needle_port: env_opt("NEEDLE_MOTOR_PORT")?,
            probe_port: env_opt("PROBE_MOTOR_PORT")?,
            baudrate: env_or("MOTOR_BAUDRATE", d.baudrate)?,
            catalog_path: env_or("CATALOG_PATH", d.catalog_path)?,
            users_path: env_or("USERS_PATH", d.users_path)?,
            save_dir: env_or("SAVE_DIR", d.save_dir)?,
            serial_state_path: env_or("SERIAL_STATE_PATH", d.serial_state_path)?,
            snapshot_url: env_or("SNAPSHOT_URL", d.snapshot_url)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid value for {key} ({value:?}): {e}")),
        Err(_) => Ok(None),
    }
}
