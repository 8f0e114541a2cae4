//! Hardware-in-the-loop stand-in for the motor/EEPROM/GPIO backend.
//!
//! [`HilState::feed`] consumes one command at a time and queues the events a
//! real backend would answer with; [`HilState::process`] advances motion by one
//! tick and queues a `status` frame. Both return nothing directly, callers
//! drain with [`HilState::take_packets`] so that replies and telemetry keep
//! their relative order.

use rand::Rng as _;
use station_protocol::{
    request::{Command, CommandEnvelope},
    response::{
        EepromResult, Event, EventEnvelope, MotorStatus, ResistancePayload, SerialResult,
        StatusPayload,
    },
    EepromRecord, MotorId,
};

pub use structs::{HilConfig, HilFaults, HilMotor, HilState};
pub mod structs;

#[allow(unused_macros)]
#[macro_export]
macro_rules! info {
    ($self:ident, $($arg:tt)+) => (
        $self.log("INFO", format!($($arg)+));
    );
}

#[allow(unused_macros)]
#[macro_export]
macro_rules! warn {
    ($self:ident, $($arg:tt)+) => (
        $self.log("WARN", format!($($arg)+));
    );
}

#[allow(unused_macros)]
#[macro_export]
macro_rules! trace {
    ($self:ident, $($arg:tt)+) => (
        $self.log("TRACE", format!($($arg)+));
    );
}

/// Physical buttons wired to the backend's GPIO header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HilButton {
    Start,
    Pass,
    Ng,
}

impl HilState {
    pub fn new(config: HilConfig, log_fn: fn(&str, String)) -> Self {
        let mut gpio = station_protocol::response::GpioLines::default();
        gpio.needle_tip = config.needle_tip;

        Self {
            motors: [HilMotor::default(), HilMotor::default()],
            gpio,
            eeprom: None,
            led: None,
            config,
            journal: Vec::new(),
            packet_queue: Vec::new(),
            log_fn,
        }
    }

    pub fn log(&self, tag: &str, content: String) {
        (self.log_fn)(tag, content);
    }

    pub fn feed(&mut self, envelope: CommandEnvelope) {
        trace!(self, "Feed: {envelope:?}");
        let tag = envelope.request_id;
        self.journal.push(envelope.command.clone());

        match envelope.command {
            Command::Connect { port, motor_id, .. } => {
                let motor = &mut self.motors[motor_id.index()];
                let result = if self.config.faults.fail_serial_connect {
                    motor.connected = false;
                    motor.error = Some(format!("failed to open {port}"));
                    SerialResult {
                        result: format!("Connection failed: {port} busy"),
                        motor_id: Some(motor_id),
                        success: Some(false),
                    }
                } else {
                    motor.connected = true;
                    motor.error = None;
                    SerialResult {
                        result: format!("Motor {} connected on {port}", u8::from(motor_id)),
                        motor_id: Some(motor_id),
                        success: Some(true),
                    }
                };

                self.reply(tag, Event::Serial(result));
            }
            Command::Disconnect { motor_id } => {
                self.motors[motor_id.index()].connected = false;
                self.reply(
                    tag,
                    Event::Serial(SerialResult {
                        result: format!("Motor {} disconnected", u8::from(motor_id)),
                        motor_id: Some(motor_id),
                        success: Some(true),
                    }),
                );
            }
            Command::Move {
                position,
                motor_id,
                needle_speed,
                ..
            } => {
                let motor = &mut self.motors[motor_id.index()];
                motor.target = position;
                motor.speed = needle_speed;
            }
            Command::EepromWrite {
                tip_type,
                shot_count,
                year,
                month,
                day,
                maker_code,
                judge_result,
                daily_serial,
                ..
            } => {
                if self.config.faults.drop_eeprom_write {
                    warn!(self, "Dropping eeprom_write reply");
                    return;
                }

                let result = if self.config.faults.reject_eeprom_write {
                    EepromResult {
                        success: false,
                        data: None,
                        error: Some("write verify failed".to_string()),
                    }
                } else {
                    self.eeprom = Some(EepromRecord {
                        tip_type,
                        shot_count,
                        year,
                        month,
                        day,
                        maker_code,
                        judge_result,
                        daily_serial,
                    });

                    EepromResult {
                        success: true,
                        data: None,
                        error: None,
                    }
                };

                self.reply(tag, Event::EepromWrite(result));
            }
            Command::EepromRead { .. } => {
                if self.config.faults.drop_eeprom_read {
                    warn!(self, "Dropping eeprom_read reply");
                    return;
                }

                let result = match &self.eeprom {
                    Some(record) => EepromResult {
                        success: true,
                        data: Some(record.clone()),
                        error: None,
                    },
                    None => EepromResult {
                        success: false,
                        data: None,
                        error: Some("EEPROM blank".to_string()),
                    },
                };

                self.reply(tag, Event::EepromRead(result));
            }
            Command::MeasureResistance => {
                if self.config.faults.drop_resistance {
                    warn!(self, "Dropping resistance reply");
                    return;
                }

                let payload = ResistancePayload {
                    resistance1: self.noisy(self.config.resistance1),
                    resistance2: self.noisy(self.config.resistance2),
                    status1: "OK".to_string(),
                    status2: "OK".to_string(),
                };

                self.reply(tag, Event::Resistance(payload));
            }
            Command::LedControl { color } => {
                info!(self, "LED -> {color:?}");
                self.led = Some(color);
            }
        }
    }

    /// Advances every motor by one tick and queues a `status` frame.
    pub fn process(&mut self) {
        let tick_ms = self.config.tick_ms.max(1);
        for id in MotorId::ALL {
            if id == MotorId::Probe && self.config.faults.stall_probe {
                continue;
            }

            let default_speed = self.config.default_speed;
            let motor = &mut self.motors[id.index()];
            let speed = motor.speed.unwrap_or(default_speed) as u64;
            let step = ((speed * tick_ms) / 1000).max(1) as i32;

            let remaining = motor.target - motor.position;
            if remaining.abs() <= step {
                motor.position = motor.target;
            } else {
                motor.position += step * remaining.signum();
            }
        }

        let status = self.status();
        self.packet_queue
            .push(EventEnvelope::untagged(Event::Status(status)));
    }

    pub fn status(&self) -> StatusPayload {
        let motor_status = |m: &HilMotor| MotorStatus {
            position: m.position,
            connected: m.connected,
            error: m.error.clone(),
        };

        StatusPayload {
            motor1: motor_status(&self.motors[0]),
            motor2: motor_status(&self.motors[1]),
            gpio: self.gpio,
            eeprom: self.eeprom.clone(),
            queue_depth: 0,
        }
    }

    pub fn press(&mut self, button: HilButton) {
        let event = match button {
            HilButton::Start => Event::GpioStartButton,
            HilButton::Pass => Event::GpioPassButton,
            HilButton::Ng => Event::GpioNgButton,
        };

        self.packet_queue.push(EventEnvelope::untagged(event));
    }

    pub fn take_packets(&mut self) -> Vec<EventEnvelope> {
        self.packet_queue.drain(..).collect()
    }

    pub fn motor(&self, id: MotorId) -> &HilMotor {
        &self.motors[id.index()]
    }

    fn reply(&mut self, tag: Option<u32>, event: Event) {
        let request_id = if self.config.echo_request_ids { tag } else { None };
        self.packet_queue.push(EventEnvelope { request_id, event });
    }

    fn noisy(&self, value: i64) -> i64 {
        if self.config.jitter <= 0 {
            return value;
        }

        value + rand::rng().random_range(-self.config.jitter..=self.config.jitter)
    }
}
