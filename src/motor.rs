use crate::{
    channel::ChannelTransport,
    config::MotionConfig,
    cycle::EpochGuard,
    error::{Result, StationError},
    structs::SharedLiveState,
};
use station_protocol::{
    request::{Command, MoveMode},
    response::{Event, EventKind},
    MotorId,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Motor 1 units per mm for the initial (DOWN) position.
pub const NEEDLE_INITIAL_UNITS_PER_MM: f64 = 100.0;
/// Motor 1 units per mm for offset + protrusion strokes.
pub const NEEDLE_STROKE_UNITS_PER_MM: f64 = 125.0;
pub const PROBE_UNITS_PER_MM: f64 = 40.0;

/// A wait never resolves earlier than this after it started, so status frames
/// from before the move can't satisfy it.
pub const SETTLE_MIN_ELAPSED: Duration = Duration::from_millis(500);
/// Consecutive in-tolerance status samples required (status cadence ~100ms).
pub const SETTLE_MIN_SAMPLES: u32 = 10;
pub const MOTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub fn needle_initial_units(mm: f64) -> i32 {
    (mm * NEEDLE_INITIAL_UNITS_PER_MM).round() as i32
}

pub fn needle_stroke_units(offset_mm: f64, protrusion_mm: f64) -> i32 {
    ((offset_mm + protrusion_mm) * NEEDLE_STROKE_UNITS_PER_MM).round() as i32
}

pub fn probe_units(mm: f64) -> i32 {
    (mm * PROBE_UNITS_PER_MM).round() as i32
}

/// One-shot slow approach near the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slowdown {
    pub within: i32,
    pub speed: u32,
}

/// Device-unit targets derived from [`MotionConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub needle_down: i32,
    pub needle_stroke: i32,
    pub needle_speed: Option<u32>,
    pub probe_target: i32,
    pub probe_rest: i32,
    pub probe_speed: Option<u32>,
    pub slowdown: Option<Slowdown>,
    pub tolerance: i32,
}

impl From<&MotionConfig> for MotionPlan {
    fn from(cfg: &MotionConfig) -> Self {
        Self {
            needle_down: needle_initial_units(cfg.needle_initial_mm),
            needle_stroke: needle_stroke_units(cfg.needle_offset_mm, cfg.needle_protrusion_mm),
            needle_speed: cfg.needle_speed,
            probe_target: probe_units(cfg.probe_target_mm),
            probe_rest: probe_units(cfg.probe_rest_mm),
            probe_speed: cfg.probe_speed,
            slowdown: cfg.slowdown.map(|s| Slowdown {
                within: probe_units(s.within_mm),
                speed: s.speed,
            }),
            tolerance: cfg.tolerance,
        }
    }
}

impl MotionPlan {
    /// DOWN/rest target for `motor`.
    pub fn down(&self, motor: MotorId) -> i32 {
        match motor {
            MotorId::Needle => self.needle_down,
            MotorId::Probe => self.probe_rest,
        }
    }
}

pub struct WaitOptions {
    pub tolerance: i32,
    pub timeout: Duration,
    pub slowdown: Option<Slowdown>,
    /// Abandons the wait (and suppresses the slowdown move) once stale.
    pub guard: Option<EpochGuard>,
}

impl WaitOptions {
    pub fn new(tolerance: i32) -> Self {
        Self {
            tolerance,
            timeout: MOTION_TIMEOUT,
            slowdown: None,
            guard: None,
        }
    }
}

#[derive(Clone)]
pub struct MotorController {
    transport: ChannelTransport,
    live: SharedLiveState,
}

impl MotorController {
    pub fn new(transport: ChannelTransport, live: SharedLiveState) -> Self {
        Self { transport, live }
    }

    /// Fire-and-forget position move.
    pub fn move_to(&self, motor: MotorId, position: i32, speed: Option<u32>) -> Result<()> {
        debug!("Move {motor} -> {position} (speed: {speed:?})");
        self.transport.send(Command::Move {
            position,
            mode: MoveMode::Position,
            motor_id: motor,
            needle_speed: speed,
        })
    }

    /// Opens the motor's serial port on the backend.
    pub async fn connect_motor(&self, motor: MotorId, port: &str, baudrate: u32) -> Result<()> {
        let event = self
            .transport
            .request(
                Command::Connect {
                    port: port.to_string(),
                    baudrate,
                    motor_id: motor,
                },
                EventKind::Serial,
                Some(Box::new(move |e: &Event| {
                    matches!(e, Event::Serial(s) if s.motor_id.map_or(true, |id| id == motor))
                })),
                SERIAL_TIMEOUT,
            )
            .await;

        let mut live = self.live.inner.write().await;
        let result = match event {
            Ok(Event::Serial(result)) => result,
            Ok(other) => {
                return Err(StationError::CommandRejected(format!(
                    "unexpected {} reply to connect",
                    other.kind()
                )))
            }
            Err(e) => {
                live.record_serial(motor, false, Some(e.to_string()));
                return Err(e);
            }
        };

        if !result.is_success() {
            warn!("{motor} serial connect failed: {}", result.result);
            live.record_serial(motor, false, Some(result.result.clone()));
            return Err(StationError::CommandRejected(result.result));
        }

        info!("{motor} connected on {port} @ {baudrate}");
        live.record_serial(motor, true, None);
        Ok(())
    }

    /// Resolves once `motor` has settled within `tolerance` of `target`.
    ///
    /// Watches `status` telemetry rather than waiting for a reply; see
    /// [`SETTLE_MIN_ELAPSED`] and [`SETTLE_MIN_SAMPLES`].
    pub async fn wait_until_reached(
        &self,
        motor: MotorId,
        target: i32,
        opts: WaitOptions,
    ) -> Result<()> {
        let WaitOptions {
            tolerance,
            timeout,
            slowdown,
            mut guard,
        } = opts;

        let mut events = self.transport.subscribe();
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        let mut in_tolerance: u32 = 0;
        let mut slowdown_fired = false;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("{motor} did not reach {target} within {timeout:?}");
                    return Err(StationError::MotionTimeout { motor, target, timeout });
                }
                _ = stale(&mut guard) => return Err(StationError::Cancelled),
            };

            let status = match event {
                Ok(Event::Status(status)) => status,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Err(StationError::NotConnected),
            };

            let remaining = (target - status.motor(motor).position).abs();
            if let Some(slow) = slowdown {
                if !slowdown_fired && remaining <= slow.within && remaining > tolerance {
                    slowdown_fired = true;
                    if guard.as_ref().map_or(true, EpochGuard::is_current) {
                        debug!("{motor} within {remaining} of {target}, slowing down");
                        self.move_to(motor, target, Some(slow.speed))?;
                    }
                }
            }

            if remaining <= tolerance {
                in_tolerance += 1;
            } else {
                in_tolerance = 0;
            }

            if in_tolerance >= SETTLE_MIN_SAMPLES && started.elapsed() >= SETTLE_MIN_ELAPSED {
                return Ok(());
            }
        }
    }
}

async fn stale(guard: &mut Option<EpochGuard>) {
    match guard {
        Some(guard) => guard.stale().await,
        None => std::future::pending().await,
    }
}
