//! Inspection cycle transitions.
//!
//! [`transition`] is pure: it maps the current session and one input to the
//! next session plus the side effects to run, in order. Results of long
//! running effects come back as inputs tagged with the epoch they were issued
//! under; anything tagged with an older epoch is ignored.

use super::session::{
    InspectionSession, Phase, NOTICE_JUDGE_EEPROM_FAILED, NOTICE_SAVE_FAILED,
};
use crate::{
    error::EepromStage,
    motor::{MotionPlan, Slowdown},
    resistance::{classify, Verdict},
};
use chrono::{DateTime, Local};
use station_protocol::{response::ResistancePayload, EepromRecord, JudgeResult, MotorId};

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub plan: MotionPlan,
    pub threshold_ohms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeLeg {
    Approach,
    Retract,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EepromFailure {
    pub stage: EepromStage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub epoch: u64,
    pub judge: JudgeResult,
    /// Record after the judgment rewrite, or the last known one if it failed.
    pub eeprom: Option<EepromRecord>,
    pub rewrite_failed: bool,
    pub daily_serial: u32,
    pub image: Result<Vec<u8>, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start { at: DateTime<Local> },
    Stop,
    Judge(JudgeResult),
    TipPresence(bool),
    LinkLost,

    EepromDone {
        epoch: u64,
        result: Result<EepromRecord, EepromFailure>,
    },
    ShortChecked {
        epoch: u64,
        asserted: bool,
    },
    MotionDone {
        epoch: u64,
        leg: ProbeLeg,
        result: Result<(), String>,
    },
    Measured {
        epoch: u64,
        result: Result<ResistancePayload, String>,
    },
    Captured(Box<CaptureOutcome>),
    /// A judgment consumed a daily serial. Applies even after STOP, since the
    /// serial may already be in the part's EEPROM.
    SerialReserved { next: u32 },
    SaveFailed,
}

impl Input {
    fn epoch(&self) -> Option<u64> {
        match self {
            Input::EepromDone { epoch, .. }
            | Input::ShortChecked { epoch, .. }
            | Input::MotionDone { epoch, .. }
            | Input::Measured { epoch, .. } => Some(*epoch),
            Input::Captured(outcome) => Some(outcome.epoch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Unjudged EEPROM write + read-back.
    EepromTransaction { epoch: u64 },
    CheckShort { epoch: u64 },
    Move {
        motor: MotorId,
        position: i32,
        speed: Option<u32>,
    },
    WaitReached {
        epoch: u64,
        leg: ProbeLeg,
        motor: MotorId,
        target: i32,
        slowdown: Option<Slowdown>,
    },
    MeasureResistance { epoch: u64 },
    /// Judgment rewrite, LED, then snapshot.
    Capture {
        epoch: u64,
        judge: JudgeResult,
        last_eeprom: Option<EepromRecord>,
        resistance: Option<ResistancePayload>,
    },
    Save {
        judge: JudgeResult,
        eeprom: Option<EepromRecord>,
        daily_serial: u32,
        image: Vec<u8>,
    },
}

pub fn transition(
    mut s: InspectionSession,
    input: Input,
    settings: &CycleSettings,
) -> (InspectionSession, Vec<Effect>) {
    if let Some(epoch) = input.epoch() {
        if epoch != s.epoch {
            return (s, vec![]);
        }
    }

    let plan = &settings.plan;
    let mut fx = Vec::new();

    match input {
        Input::Start { at } => match s.phase {
            Phase::Waiting | Phase::Armed | Phase::Disconnected => {
                if !s.needle_tip_connected {
                    s.phase = Phase::Disconnected;
                    return (s, fx);
                }

                s.clear_cycle();
                s.epoch += 1;
                s.started_at = Some(at);
                s.notice = None;
                s.phase = Phase::EepromPending;
                fx.push(Effect::EepromTransaction { epoch: s.epoch });
            }
            _ => {}
        },

        Input::Stop => {
            s.epoch += 1;
            s.clear_cycle();
            s.phase = if s.needle_tip_connected {
                Phase::Waiting
            } else {
                Phase::Disconnected
            };
            push_down(&mut fx, plan);
        }

        Input::Judge(judge) => {
            let controls = s.controls();
            let allowed = match judge {
                JudgeResult::Pass => controls.pass,
                JudgeResult::Ng => controls.ng,
            };
            if !allowed {
                return (s, fx);
            }

            s.phase = Phase::Capturing;
            fx.push(Effect::Capture {
                epoch: s.epoch,
                judge,
                last_eeprom: s.last_eeprom.clone(),
                resistance: if s.multi_needle {
                    s.resistance.clone()
                } else {
                    None
                },
            });
        }

        Input::TipPresence(present) => {
            s.needle_tip_connected = present;
            if present {
                if s.phase == Phase::Disconnected {
                    s.phase = s.held.take().unwrap_or(Phase::Armed);
                } else if s.phase == Phase::Waiting {
                    s.phase = Phase::Armed;
                }
                return (s, fx);
            }

            match s.phase {
                // the part is released while capturing
                Phase::Capturing | Phase::Disconnected => {}
                Phase::Waiting | Phase::Armed => {
                    s.held = None;
                    s.phase = Phase::Disconnected;
                }
                p if p.is_active() || p == Phase::JudgeReady => {
                    s.epoch += 1;
                    s.held = Some(Phase::Aborted);
                    s.phase = Phase::Disconnected;
                }
                p => {
                    s.held = Some(p);
                    s.phase = Phase::Disconnected;
                }
            }
        }

        Input::LinkLost => {
            if s.phase.is_active() || s.phase == Phase::JudgeReady {
                s.epoch += 1;
                s.phase = Phase::Aborted;
            }
        }

        Input::EepromDone { epoch, result } => {
            if s.phase != Phase::EepromPending {
                return (s, fx);
            }

            match result {
                Ok(record) => {
                    s.last_eeprom = Some(record);
                    s.phase = Phase::ShortCheck;
                    fx.push(Effect::CheckShort { epoch });
                }
                Err(EepromFailure {
                    stage: EepromStage::Write,
                    ..
                }) => s.phase = Phase::WriteFailed,
                Err(EepromFailure {
                    stage: EepromStage::Read,
                    ..
                }) => s.phase = Phase::ReadFailed,
            }
        }

        Input::ShortChecked { epoch, asserted } => {
            if s.phase != Phase::ShortCheck {
                return (s, fx);
            }

            if asserted {
                s.short_detected = true;
                s.phase = Phase::NeedleShort;
            } else if s.multi_needle {
                s.phase = Phase::Positioning;
                fx.push(Effect::Move {
                    motor: MotorId::Probe,
                    position: plan.probe_target,
                    speed: plan.probe_speed,
                });
                fx.push(Effect::WaitReached {
                    epoch,
                    leg: ProbeLeg::Approach,
                    motor: MotorId::Probe,
                    target: plan.probe_target,
                    slowdown: plan.slowdown,
                });
            } else {
                s.phase = Phase::JudgeReady;
                push_needle_stroke(&mut fx, plan);
            }
        }

        Input::MotionDone { epoch, leg, result } => {
            if s.phase != Phase::Positioning {
                return (s, fx);
            }

            match (leg, result) {
                (_, Err(_)) => s.phase = Phase::MotionFailed,
                (ProbeLeg::Approach, Ok(())) => {
                    s.phase = Phase::ResistanceGate;
                    fx.push(Effect::MeasureResistance { epoch });
                }
                (ProbeLeg::Retract, Ok(())) => {
                    s.phase = Phase::JudgeReady;
                    push_needle_stroke(&mut fx, plan);
                }
            }
        }

        Input::Measured { epoch, result } => {
            if s.phase != Phase::ResistanceGate {
                return (s, fx);
            }

            let reading = match result {
                Ok(reading) => reading,
                Err(_) => {
                    s.phase = Phase::MeasureFailed;
                    return (s, fx);
                }
            };

            let verdict = classify(&reading, settings.threshold_ohms);
            s.resistance = Some(reading);
            if verdict == Verdict::Abnormal {
                s.resistance_abnormal = true;
                s.phase = Phase::ResistanceAbnormal;
                return (s, fx);
            }

            s.phase = Phase::Positioning;
            fx.push(Effect::Move {
                motor: MotorId::Probe,
                position: plan.probe_rest,
                speed: plan.probe_speed,
            });
            fx.push(Effect::WaitReached {
                epoch,
                leg: ProbeLeg::Retract,
                motor: MotorId::Probe,
                target: plan.probe_rest,
                slowdown: None,
            });
        }

        Input::Captured(outcome) => {
            if s.phase != Phase::Capturing {
                return (s, fx);
            }

            let CaptureOutcome {
                judge,
                eeprom,
                rewrite_failed,
                daily_serial,
                image,
                ..
            } = *outcome;

            push_down(&mut fx, plan);
            match image {
                Ok(image) => fx.push(Effect::Save {
                    judge,
                    eeprom,
                    daily_serial,
                    image,
                }),
                Err(_) => s.notice = Some(NOTICE_SAVE_FAILED),
            }

            if rewrite_failed && s.notice.is_none() {
                s.notice = Some(NOTICE_JUDGE_EEPROM_FAILED);
            }

            s.clear_cycle();
            s.phase = Phase::Waiting;
        }

        Input::SerialReserved { next } => s.daily_serial = next,
        Input::SaveFailed => s.notice = Some(NOTICE_SAVE_FAILED),
    }

    (s, fx)
}

fn push_down(fx: &mut Vec<Effect>, plan: &MotionPlan) {
    for motor in MotorId::ALL {
        fx.push(Effect::Move {
            motor,
            position: plan.down(motor),
            speed: None,
        });
    }
}

fn push_needle_stroke(fx: &mut Vec<Effect>, plan: &MotionPlan) {
    fx.push(Effect::Move {
        motor: MotorId::Needle,
        position: plan.needle_stroke,
        speed: plan.needle_speed,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::session::JudgeControls;

    fn settings() -> CycleSettings {
        CycleSettings {
            plan: MotionPlan {
                needle_down: 500,
                needle_stroke: 1563,
                needle_speed: Some(800),
                probe_target: 400,
                probe_rest: 40,
                probe_speed: None,
                slowdown: Some(Slowdown {
                    within: 80,
                    speed: 100,
                }),
                tolerance: 5,
            },
            threshold_ohms: 100.0,
        }
    }

    fn step(s: InspectionSession, input: Input) -> (InspectionSession, Vec<Effect>) {
        transition(s, input, &settings())
    }

    fn start() -> Input {
        Input::Start { at: Local::now() }
    }

    fn record() -> EepromRecord {
        EepromRecord {
            tip_type: Some(30),
            shot_count: 0,
            year: 2026,
            month: 10,
            day: 16,
            maker_code: 4,
            judge_result: None,
            daily_serial: None,
        }
    }

    fn reading(r1: i64, r2: i64) -> ResistancePayload {
        ResistancePayload {
            resistance1: r1,
            resistance2: r2,
            status1: "OK".to_string(),
            status2: "OK".to_string(),
        }
    }

    fn armed(multi: bool) -> InspectionSession {
        step(InspectionSession::new(multi, 1), Input::TipPresence(true)).0
    }

    /// Armed session driven through EEPROM and a clean short check.
    fn past_short_check(multi: bool) -> (InspectionSession, Vec<Effect>) {
        let (s, _) = step(armed(multi), start());
        let epoch = s.epoch;
        let (s, _) = step(
            s,
            Input::EepromDone {
                epoch,
                result: Ok(record()),
            },
        );
        step(
            s,
            Input::ShortChecked {
                epoch,
                asserted: false,
            },
        )
    }

    fn down_moves(fx: &[Effect]) -> Vec<(MotorId, i32)> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Move {
                    motor, position, ..
                } => Some((*motor, *position)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_without_tip_stays_disconnected() {
        let mut s = InspectionSession::new(false, 1);
        for _ in 0..3 {
            let (next, fx) = step(s, start());
            assert_eq!(next.phase, Phase::Disconnected);
            assert_eq!(next.controls(), JudgeControls::default());
            assert!(fx.is_empty());
            s = next;
        }
        assert_eq!(s.epoch, 0);
    }

    #[test]
    fn start_runs_eeprom_transaction_under_new_epoch() {
        let (s, fx) = step(armed(false), start());
        assert_eq!(s.phase, Phase::EepromPending);
        assert_eq!(s.epoch, 1);
        assert_eq!(fx, vec![Effect::EepromTransaction { epoch: 1 }]);
        assert!(s.started_at.is_some());
    }

    #[test]
    fn start_while_cycle_in_flight_is_ignored() {
        let (s, _) = step(armed(false), start());
        let (again, fx) = step(s.clone(), start());
        assert_eq!(again, s);
        assert!(fx.is_empty());
    }

    #[test]
    fn single_needle_enables_judge_right_after_stroke_move() {
        let (s, fx) = past_short_check(false);
        assert_eq!(s.phase, Phase::JudgeReady);
        assert_eq!(s.controls(), JudgeControls { pass: true, ng: true });
        assert_eq!(
            fx,
            vec![Effect::Move {
                motor: MotorId::Needle,
                position: 1563,
                speed: Some(800),
            }]
        );
    }

    #[test]
    fn short_blocks_both_judgments_and_keeps_record() {
        let (s, _) = step(armed(false), start());
        let (s, _) = step(
            s,
            Input::EepromDone {
                epoch: 1,
                result: Ok(record()),
            },
        );
        let (s, fx) = step(
            s,
            Input::ShortChecked {
                epoch: 1,
                asserted: true,
            },
        );

        assert_eq!(s.phase, Phase::NeedleShort);
        assert_eq!(s.phase.label(), "니들 쇼트");
        assert_eq!(s.controls(), JudgeControls::default());
        assert_eq!(s.last_eeprom, Some(record()));
        assert!(fx.is_empty());

        let (s, fx) = step(s, Input::Judge(JudgeResult::Ng));
        assert_eq!(s.phase, Phase::NeedleShort);
        assert!(fx.is_empty());
    }

    #[test]
    fn eeprom_failures_are_ng_only() {
        for (stage, phase) in [
            (EepromStage::Write, Phase::WriteFailed),
            (EepromStage::Read, Phase::ReadFailed),
        ] {
            let (s, _) = step(armed(false), start());
            let (s, _) = step(
                s,
                Input::EepromDone {
                    epoch: 1,
                    result: Err(EepromFailure {
                        stage,
                        reason: "timeout".to_string(),
                    }),
                },
            );
            assert_eq!(s.phase, phase);
            assert_eq!(s.controls(), JudgeControls { pass: false, ng: true });

            let (s, fx) = step(s, Input::Judge(JudgeResult::Pass));
            assert_eq!(s.phase, phase);
            assert!(fx.is_empty());

            // only STOP clears a failed cycle
            let (s, fx) = step(s, start());
            assert_eq!(s.phase, phase);
            assert!(fx.is_empty());
        }
    }

    #[test]
    fn multi_needle_approach_measure_retract_then_stroke() {
        let (s, fx) = past_short_check(true);
        assert_eq!(s.phase, Phase::Positioning);
        assert_eq!(
            fx,
            vec![
                Effect::Move {
                    motor: MotorId::Probe,
                    position: 400,
                    speed: None,
                },
                Effect::WaitReached {
                    epoch: 1,
                    leg: ProbeLeg::Approach,
                    motor: MotorId::Probe,
                    target: 400,
                    slowdown: Some(Slowdown {
                        within: 80,
                        speed: 100,
                    }),
                },
            ]
        );
        assert_eq!(s.controls(), JudgeControls::default());

        let (s, fx) = step(
            s,
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Approach,
                result: Ok(()),
            },
        );
        assert_eq!(s.phase, Phase::ResistanceGate);
        assert_eq!(fx, vec![Effect::MeasureResistance { epoch: 1 }]);

        let (s, fx) = step(
            s,
            Input::Measured {
                epoch: 1,
                result: Ok(reading(48_000, 51_000)),
            },
        );
        assert_eq!(s.phase, Phase::Positioning);
        assert!(matches!(
            fx[1],
            Effect::WaitReached {
                leg: ProbeLeg::Retract,
                target: 40,
                slowdown: None,
                ..
            }
        ));

        let (s, fx) = step(
            s,
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Retract,
                result: Ok(()),
            },
        );
        assert_eq!(s.phase, Phase::JudgeReady);
        assert_eq!(down_moves(&fx), vec![(MotorId::Needle, 1563)]);
    }

    #[test]
    fn abnormal_resistance_blocks_pass_only() {
        let (s, _) = past_short_check(true);
        let (s, _) = step(
            s,
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Approach,
                result: Ok(()),
            },
        );
        let (s, fx) = step(
            s,
            Input::Measured {
                epoch: 1,
                result: Ok(reading(150_000, 10)),
            },
        );

        assert_eq!(s.phase, Phase::ResistanceAbnormal);
        assert!(s.resistance_abnormal);
        assert_eq!(s.controls(), JudgeControls { pass: false, ng: true });
        assert!(fx.is_empty());
    }

    #[test]
    fn motion_and_measure_failures() {
        let (s, _) = past_short_check(true);
        let (failed, _) = step(
            s.clone(),
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Approach,
                result: Err("timeout".to_string()),
            },
        );
        assert_eq!(failed.phase, Phase::MotionFailed);

        let (s, _) = step(
            s,
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Approach,
                result: Ok(()),
            },
        );
        let (s, _) = step(
            s,
            Input::Measured {
                epoch: 1,
                result: Err("timeout".to_string()),
            },
        );
        assert_eq!(s.phase, Phase::MeasureFailed);
        assert!(s.controls().ng);
    }

    #[test]
    fn stop_sends_down_once_from_any_phase() {
        let tip_pulled = step(armed(false), Input::TipPresence(false)).0;
        let phases: Vec<InspectionSession> = vec![
            InspectionSession::new(false, 1),
            tip_pulled,
            armed(false),
            step(armed(false), start()).0,
            past_short_check(false).0,
            past_short_check(true).0,
        ];

        for s in phases {
            let before = s.epoch;
            let (s, fx) = step(s, Input::Stop);
            let expected = if s.needle_tip_connected {
                Phase::Waiting
            } else {
                Phase::Disconnected
            };
            assert_eq!(s.phase, expected);
            assert_eq!(s.epoch, before + 1);
            assert!(s.resistance.is_none());
            assert!(s.last_eeprom.is_none());
            assert_eq!(
                down_moves(&fx),
                vec![(MotorId::Needle, 500), (MotorId::Probe, 40)]
            );
            assert_eq!(fx.len(), 2);
        }
    }

    #[test]
    fn results_from_before_stop_are_discarded() {
        let (s, _) = past_short_check(true);
        let (s, _) = step(s, Input::Stop);

        let (after, fx) = step(
            s.clone(),
            Input::MotionDone {
                epoch: 1,
                leg: ProbeLeg::Approach,
                result: Ok(()),
            },
        );
        assert_eq!(after, s);
        assert!(fx.is_empty());
    }

    #[test]
    fn judge_captures_then_releases_before_saving() {
        let (s, _) = past_short_check(false);
        let (s, fx) = step(s, Input::Judge(JudgeResult::Pass));
        assert_eq!(s.phase, Phase::Capturing);
        assert_eq!(
            fx,
            vec![Effect::Capture {
                epoch: 1,
                judge: JudgeResult::Pass,
                last_eeprom: Some(record()),
                resistance: None,
            }]
        );

        // second click while capturing does nothing
        let (s, fx) = step(s, Input::Judge(JudgeResult::Ng));
        assert!(fx.is_empty());

        let (s, fx) = step(
            s,
            Input::Captured(Box::new(CaptureOutcome {
                epoch: 1,
                judge: JudgeResult::Pass,
                eeprom: Some(record()),
                rewrite_failed: false,
                daily_serial: 7,
                image: Ok(vec![1, 2, 3]),
            })),
        );

        assert_eq!(s.phase, Phase::Waiting);
        assert!(s.last_eeprom.is_none());
        assert_eq!(fx.len(), 3);
        assert!(matches!(fx[0], Effect::Move { motor: MotorId::Needle, position: 500, .. }));
        assert!(matches!(fx[1], Effect::Move { motor: MotorId::Probe, position: 40, .. }));
        assert!(matches!(fx[2], Effect::Save { daily_serial: 7, .. }));
    }

    #[test]
    fn stop_with_tip_absent_shows_disconnected() {
        let (s, _) = step(armed(false), Input::TipPresence(false));
        let (s, fx) = step(s, Input::Stop);
        assert_eq!(s.phase, Phase::Disconnected);
        assert_eq!(s.phase.label(), "니들 미연결");
        assert_eq!(down_moves(&fx).len(), 2);

        let (s, _) = step(s, Input::TipPresence(true));
        assert_eq!(s.phase, Phase::Armed);
    }

    #[test]
    fn serial_reservation_survives_stop_during_capture() {
        let (s, _) = past_short_check(false);
        let (s, _) = step(s, Input::Judge(JudgeResult::Pass));
        let (s, _) = step(s, Input::Stop);
        assert_eq!(s.phase, Phase::Waiting);

        let (s, fx) = step(s, Input::SerialReserved { next: 2 });
        assert_eq!(s.daily_serial, 2);
        assert!(fx.is_empty());

        // the withdrawn capture never reports back, but if it did it is stale
        let (s, fx) = step(
            s,
            Input::Captured(Box::new(CaptureOutcome {
                epoch: 1,
                judge: JudgeResult::Pass,
                eeprom: Some(record()),
                rewrite_failed: false,
                daily_serial: 1,
                image: Ok(vec![1]),
            })),
        );
        assert_eq!(s.phase, Phase::Waiting);
        assert!(fx.is_empty());
    }

    #[test]
    fn failed_snapshot_still_releases_and_advances() {
        let (s, _) = past_short_check(false);
        let (s, _) = step(s, Input::Judge(JudgeResult::Ng));
        let (s, fx) = step(
            s,
            Input::Captured(Box::new(CaptureOutcome {
                epoch: 1,
                judge: JudgeResult::Ng,
                eeprom: None,
                rewrite_failed: true,
                daily_serial: 2,
                image: Err("camera offline".to_string()),
            })),
        );

        assert_eq!(s.phase, Phase::Waiting);
        assert_eq!(s.notice, Some(NOTICE_SAVE_FAILED));
        assert_eq!(down_moves(&fx).len(), 2);
        assert!(!fx.iter().any(|e| matches!(e, Effect::Save { .. })));
        assert_eq!(fx.len(), 2);
    }

    #[test]
    fn removing_tip_mid_cycle_aborts_it() {
        let (s, _) = step(armed(false), start());
        let (s, _) = step(s, Input::TipPresence(false));
        assert_eq!(s.phase, Phase::Disconnected);
        assert_eq!(s.epoch, 2);

        // late EEPROM result belongs to the aborted cycle
        let (s, fx) = step(
            s,
            Input::EepromDone {
                epoch: 1,
                result: Ok(record()),
            },
        );
        assert!(fx.is_empty());

        let (s, _) = step(s, Input::TipPresence(true));
        assert_eq!(s.phase, Phase::Aborted);
        assert_eq!(s.controls(), JudgeControls { pass: false, ng: true });
    }

    #[test]
    fn tip_bounce_restores_failure_state() {
        let (s, _) = step(armed(false), start());
        let (s, _) = step(
            s,
            Input::EepromDone {
                epoch: 1,
                result: Ok(record()),
            },
        );
        let (s, _) = step(
            s,
            Input::ShortChecked {
                epoch: 1,
                asserted: true,
            },
        );

        let (s, _) = step(s, Input::TipPresence(false));
        assert_eq!(s.phase, Phase::Disconnected);
        let (s, _) = step(s, Input::TipPresence(true));
        assert_eq!(s.phase, Phase::NeedleShort);
    }

    #[test]
    fn idle_tip_edges_toggle_armed() {
        let s = InspectionSession::new(false, 1);
        let (s, _) = step(s, Input::TipPresence(true));
        assert_eq!(s.phase, Phase::Armed);
        let (s, _) = step(s, Input::TipPresence(false));
        assert_eq!(s.phase, Phase::Disconnected);
        let (s, _) = step(s, Input::TipPresence(true));
        assert_eq!(s.phase, Phase::Armed);
    }

    #[test]
    fn link_loss_aborts_active_cycle_only() {
        let (idle, fx) = step(armed(false), Input::LinkLost);
        assert_eq!(idle.phase, Phase::Armed);
        assert!(fx.is_empty());

        let (s, _) = past_short_check(true);
        let (s, _) = step(s, Input::LinkLost);
        assert_eq!(s.phase, Phase::Aborted);
        assert_eq!(s.epoch, 2);
        assert!(s.controls().ng);
    }
}
