use crate::{
    catalog::CatalogLookup,
    channel::ChannelTransport,
    config::{PartProfile, StationConfig},
    eeprom::{EepromCoordinator, EepromRequest},
    error::{EepromStage, StationError},
    motor::{MotionPlan, MotorController, WaitOptions, MOTION_TIMEOUT},
    persistence::{self, CaptureName, DailySerialStore, PersistencePort},
    resistance::{ResistanceCoordinator, OHMS_PER_RAW},
    snapshot::{SnapshotRequest, SnapshotSink},
    structs::SharedLiveState,
    users::{UserDirectory, Worker},
};
use chrono::Local;
use station_protocol::{request::Command, response::ResistancePayload, EepromRecord, JudgeResult};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    watch,
};
use tracing::{error, info, warn};

pub mod machine;
pub mod session;

pub use machine::{CycleSettings, Effect, Input, ProbeLeg};
pub use session::{InspectionSession, JudgeControls, Phase, SessionView};

use machine::{transition, CaptureOutcome, EepromFailure};

/// Current cycle epoch, observable by long-running waits.
#[derive(Clone)]
pub struct Epoch {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Epoch {
    fn default() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }
}

impl Epoch {
    pub fn guard_for(&self, epoch: u64) -> EpochGuard {
        EpochGuard {
            rx: self.tx.subscribe(),
            epoch,
        }
    }

    #[cfg(test)]
    pub fn bump(&self) {
        self.tx.send_modify(|e| *e += 1);
    }

    fn publish(&self, epoch: u64) {
        self.tx.send_if_modified(|e| {
            let changed = *e != epoch;
            *e = epoch;
            changed
        });
    }
}

pub struct EpochGuard {
    rx: watch::Receiver<u64>,
    epoch: u64,
}

impl EpochGuard {
    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.epoch
    }

    /// Completes once the epoch has moved on.
    pub async fn stale(&mut self) {
        let epoch = self.epoch;
        let moved_on = self.rx.wait_for(|e| *e != epoch).await.is_ok();
        if !moved_on {
            std::future::pending::<()>().await;
        }
    }
}

/// Collaborators the cycle drives.
pub struct CycleDeps {
    pub transport: ChannelTransport,
    pub live: SharedLiveState,
    pub catalog: Arc<dyn CatalogLookup>,
    pub users: Arc<UserDirectory>,
    pub snapshot: Arc<dyn SnapshotSink>,
    pub persistence: Arc<dyn PersistencePort>,
    pub serials: Arc<DailySerialStore>,
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub part: PartProfile,
    pub worker_code: String,
    pub save_dir: PathBuf,
    pub settings: CycleSettings,
}

impl From<&StationConfig> for CycleConfig {
    fn from(cfg: &StationConfig) -> Self {
        Self {
            part: cfg.part.clone(),
            worker_code: cfg.worker_code.clone(),
            save_dir: cfg.save_dir.clone(),
            settings: CycleSettings {
                plan: MotionPlan::from(&cfg.motion),
                threshold_ohms: cfg.resistance_threshold_ohms,
            },
        }
    }
}

/// Handle to the running inspection cycle. Cheap to clone.
#[derive(Clone)]
pub struct InspectionCycle {
    inputs: UnboundedSender<Input>,
    views: watch::Receiver<SessionView>,
}

impl InspectionCycle {
    pub async fn spawn(deps: CycleDeps, config: CycleConfig) -> Self {
        let serial = deps.serials.current(persistence::today()).await;
        let multi = config.part.is_multi_needle();
        let session = InspectionSession::new(multi, serial);
        info!(
            "Inspection cycle ready ({} path, next serial {serial:03})",
            if multi { "multi-needle" } else { "single-needle" }
        );

        let (inputs, rx) = unbounded_channel();
        let (views_tx, views) = watch::channel(session.view());
        let driver = Arc::new(Driver {
            motors: MotorController::new(deps.transport.clone(), deps.live.clone()),
            eeprom: EepromCoordinator::new(deps.transport.clone()),
            resistance: ResistanceCoordinator::new(deps.transport.clone()),
            deps,
            config,
            epoch: Epoch::default(),
            inputs: inputs.clone(),
        });
        tokio::task::spawn(driver.run(session, rx, views_tx));

        Self { inputs, views }
    }

    pub fn start(&self) {
        self.send(Input::Start { at: Local::now() });
    }

    pub fn stop(&self) {
        self.send(Input::Stop);
    }

    pub fn judge(&self, result: JudgeResult) {
        self.send(Input::Judge(result));
    }

    pub fn on_tip(&self, present: bool) {
        self.send(Input::TipPresence(present));
    }

    pub fn on_link_lost(&self) {
        self.send(Input::LinkLost);
    }

    pub fn view(&self) -> SessionView {
        self.views.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.views.clone()
    }

    fn send(&self, input: Input) {
        if self.inputs.send(input).is_err() {
            error!("Inspection cycle task is gone");
        }
    }
}

struct Driver {
    deps: CycleDeps,
    config: CycleConfig,
    motors: MotorController,
    eeprom: EepromCoordinator,
    resistance: ResistanceCoordinator,
    epoch: Epoch,
    inputs: UnboundedSender<Input>,
}

impl Driver {
    async fn run(
        self: Arc<Self>,
        mut session: InspectionSession,
        mut rx: UnboundedReceiver<Input>,
        views: watch::Sender<SessionView>,
    ) {
        while let Some(input) = rx.recv().await {
            let before = session.phase;
            let (next, effects) = transition(session, input, &self.config.settings);
            session = next;
            self.epoch.publish(session.epoch);

            if session.phase != before {
                info!(
                    "Cycle {before:?} -> {:?} [{}] (epoch {})",
                    session.phase,
                    session.phase.label(),
                    session.epoch
                );
                if let Some(e) = blocking_error(&session) {
                    warn!("Judgment held: {e}");
                }
            }
            views.send_replace(session.view());

            for effect in effects {
                self.execute(effect).await;
            }
        }
    }

    fn feed(&self, input: Input) {
        _ = self.inputs.send(input);
    }

    async fn execute(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::EepromTransaction { epoch } => {
                let this = self.clone();
                tokio::task::spawn(async move {
                    let request = this.eeprom_request();
                    let result = this
                        .eeprom
                        .write_then_read(&request, this.deps.catalog.as_ref())
                        .await
                        .map_err(|e| {
                            warn!("EEPROM transaction failed: {e}");
                            eeprom_failure(e)
                        });

                    this.feed(Input::EepromDone { epoch, result });
                });
            }
            Effect::CheckShort { epoch } => {
                let asserted = self.deps.live.inner.read().await.gpio.short_sense;
                self.feed(Input::ShortChecked { epoch, asserted });
            }
            Effect::Move {
                motor,
                position,
                speed,
            } => {
                if let Err(e) = self.motors.move_to(motor, position, speed) {
                    error!("Move {motor} -> {position} not sent: {e}");
                }
            }
            Effect::WaitReached {
                epoch,
                leg,
                motor,
                target,
                slowdown,
            } => {
                let this = self.clone();
                tokio::task::spawn(async move {
                    let opts = WaitOptions {
                        tolerance: this.config.settings.plan.tolerance,
                        timeout: MOTION_TIMEOUT,
                        slowdown,
                        guard: Some(this.epoch.guard_for(epoch)),
                    };

                    let result = match this.motors.wait_until_reached(motor, target, opts).await {
                        Err(StationError::Cancelled) => return,
                        res => res.map_err(|e| e.to_string()),
                    };
                    this.feed(Input::MotionDone { epoch, leg, result });
                });
            }
            Effect::MeasureResistance { epoch } => {
                let this = self.clone();
                tokio::task::spawn(async move {
                    let result = this.resistance.measure().await.map_err(|e| {
                        warn!("Resistance measurement failed: {e}");
                        e.to_string()
                    });
                    this.feed(Input::Measured { epoch, result });
                });
            }
            Effect::Capture {
                epoch,
                judge,
                last_eeprom,
                resistance,
            } => {
                let this = self.clone();
                tokio::task::spawn(async move {
                    if let Some(outcome) = this.capture(epoch, judge, last_eeprom, resistance).await {
                        this.feed(Input::Captured(Box::new(outcome)));
                    }
                });
            }
            Effect::Save {
                judge,
                eeprom,
                daily_serial,
                image,
            } => {
                let this = self.clone();
                tokio::task::spawn(async move {
                    if let Err(e) = this.save(judge, eeprom, daily_serial, image).await {
                        error!("Failed to save {judge} capture #{daily_serial:03}: {e}");
                        this.feed(Input::SaveFailed);
                    }
                });
            }
        }
    }

    fn eeprom_request(&self) -> EepromRequest {
        let mut request = EepromRequest::new(self.config.part.clone(), persistence::today());
        if !self.config.worker_code.is_empty() {
            request.inspector_code = Some(self.config.worker_code.clone());
        }
        request
    }

    /// Judgment rewrite, LED, then the annotated snapshot.
    ///
    /// The daily serial is consumed as the rewrite goes out. Returns `None`
    /// once the cycle has been stopped; LED and snapshot are then skipped.
    async fn capture(
        &self,
        epoch: u64,
        judge: JudgeResult,
        last_eeprom: Option<EepromRecord>,
        resistance: Option<ResistancePayload>,
    ) -> Option<CaptureOutcome> {
        let guard = self.epoch.guard_for(epoch);
        if !guard.is_current() {
            info!("{judge} judgment withdrawn before the EEPROM rewrite");
            return None;
        }

        let daily_serial = self.deps.serials.reserve(persistence::today()).await;
        self.feed(Input::SerialReserved {
            next: daily_serial + 1,
        });
        let request = self.eeprom_request().judged(judge, daily_serial);

        // the part has to leave the fixture either way
        let (eeprom, rewrite_failed) = match self
            .eeprom
            .write_then_read(&request, self.deps.catalog.as_ref())
            .await
        {
            Ok(record) => (Some(record), false),
            Err(e) => {
                warn!("Judgment EEPROM rewrite failed, keeping last record: {e}");
                (last_eeprom, true)
            }
        };

        if !guard.is_current() {
            warn!("Cycle stopped after {judge} #{daily_serial:03} was written, no LED or snapshot");
            return None;
        }

        if let Err(e) = self.deps.transport.send(Command::LedControl {
            color: judge.into(),
        }) {
            warn!("LED command not sent: {e}");
        }

        let snapshot = SnapshotRequest {
            capture_id: uuid::Uuid::new_v4(),
            judge_result: judge,
            eeprom: eeprom.clone(),
            resistance,
        };
        let image = self
            .deps
            .snapshot
            .capture_annotated_composite(&snapshot)
            .await
            .map_err(|e| {
                error!("Snapshot {} failed: {e}", snapshot.capture_id);
                e.to_string()
            });

        Some(CaptureOutcome {
            epoch,
            judge,
            eeprom,
            rewrite_failed,
            daily_serial,
            image,
        })
    }

    async fn save(
        &self,
        judge: JudgeResult,
        eeprom: Option<EepromRecord>,
        daily_serial: u32,
        image: Vec<u8>,
    ) -> crate::error::Result<PathBuf> {
        let code = &self.config.worker_code;
        let worker = self.deps.users.find(code).unwrap_or_else(|| {
            warn!("Worker {code:?} not in user directory");
            Worker {
                code: code.clone(),
                name: code.clone(),
                birth_last4: "0000".to_string(),
            }
        });

        let date_code = eeprom
            .as_ref()
            .map(EepromRecord::date_code)
            .unwrap_or_else(|| persistence::today().format("%y%m%d").to_string());

        let name = CaptureName {
            inspector_code: code,
            date_code,
            daily_serial,
            judge,
            tip_type: eeprom.as_ref().and_then(|r| r.tip_type),
            worker: &worker,
        };

        let path = name.path_in(&self.config.save_dir);
        if let Some(dir) = path.parent() {
            self.deps.persistence.ensure_dir(dir).await?;
        }
        self.deps.persistence.save(&path, &image).await?;

        info!(file = "cycle", "{judge} #{daily_serial:03} -> {}", path.display());
        Ok(path)
    }
}

/// Typed reason the current phase is holding back judgment, if any.
fn blocking_error(session: &InspectionSession) -> Option<StationError> {
    match session.phase {
        Phase::NeedleShort => Some(StationError::ShortCircuit),
        Phase::ResistanceAbnormal => {
            session
                .resistance
                .as_ref()
                .map(|r| StationError::ResistanceAbnormal {
                    ohms1: r.resistance1 as f64 * OHMS_PER_RAW,
                    ohms2: r.resistance2 as f64 * OHMS_PER_RAW,
                })
        }
        Phase::Disconnected => Some(StationError::NeedleTipAbsent),
        _ => None,
    }
}

fn eeprom_failure(e: StationError) -> EepromFailure {
    let stage = match &e {
        StationError::Eeprom { stage, .. } => *stage,
        _ => EepromStage::Write,
    };

    EepromFailure {
        stage,
        reason: e.to_string(),
    }
}
