use cutter_geom::{position_to_mm, Position};
use cutter_planner::{Action, ActionKind, Planner, PlannerAdapter};
use cutter_protocol::Mode;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::homing::{HomingController, HomingOutcome, HomingSession};
use crate::hw::{Hardware, Input, Output, TickTimer};
use crate::interpreter::Interpreter;
use crate::jog::{Axis, Direction, JogController, JogStatus};
use crate::poll::{wait_for_idle, Cancel, Never};
use crate::{FeedResult, MachineConfig, MotionError, Shared};

/// How long [`Engine::release_jog`] waits for a jog tick before giving up on
/// the timer.
pub const JOG_STALL_MS: u32 = 100;

/// Everything that the foreground loop needs in order to drive the machine.
///
/// The engine borrows the [`Shared`] state (which the jog interrupt also sees)
/// and owns everything else: the planner, the jog timer, a delay for homing,
/// and the interpreter state.
pub struct Engine<'a, P, H, T, D> {
    pub(crate) shared: &'a Shared<H>,
    pub(crate) planner: PlannerAdapter<P>,
    timer: T,
    delay: D,
    pub(crate) config: MachineConfig,
    pub(crate) interpreter: Interpreter,
    jog: JogController,
    pub(crate) homing: HomingController,
}

impl<'a, P, H, T, D> Engine<'a, P, H, T, D>
where
    P: Planner,
    H: Hardware,
    T: TickTimer,
    D: DelayUs<u32> + DelayMs<u32>,
{
    pub fn new(shared: &'a Shared<H>, planner: P, timer: T, delay: D, config: MachineConfig) -> Self {
        let planner = PlannerAdapter::new(planner);
        let interpreter = Interpreter::new(&config);
        let mut engine = Engine {
            shared,
            planner,
            timer,
            delay,
            config,
            interpreter,
            jog: JogController::new(),
            homing: HomingController::new(),
        };
        engine.reset();
        engine
    }

    pub fn shared(&self) -> &'a Shared<H> {
        self.shared
    }

    pub fn planner(&self) -> &PlannerAdapter<P> {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut PlannerAdapter<P> {
        &mut self.planner
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    pub fn is_home(&self) -> bool {
        self.homing.is_home()
    }

    pub fn homing_session(&self) -> &HomingSession {
        self.homing.session()
    }

    /// Puts the outputs and the planner into a known state, and forgets any
    /// partially-read command.
    pub fn reset(&mut self) {
        let hw = &self.shared.hw;
        if self.jog.is_active() {
            self.timer.detach();
            self.shared.jog.disarm();
        }
        for out in [
            Output::XStep,
            Output::YStep,
            Output::ZStep,
            Output::XDir,
            Output::YDir,
            Output::ZDir,
        ] {
            hw.write(out, false);
        }
        hw.write(Output::Enable, self.config.enable_level);
        hw.write(Output::Laser, false);
        hw.pull_up(Input::Cover);
        self.shared.safety.override_safety(hw, false);

        self.jog = JogController::new();
        self.planner.reset();
        self.planner.reset_origin();
        self.interpreter.reset();
        log::debug!("engine reset");
    }

    /// Feeds one word of a job. Move-producing commands need room in the
    /// queue, so check [`is_ready`](Self::is_ready) first.
    pub fn feed(&mut self, word: i32, mode: Mode) -> Result<FeedResult, MotionError> {
        self.feed_with_cancel(word, mode, &mut Never)
    }

    /// Like [`feed`](Self::feed), but any wait for the queue to drain can be
    /// cancelled.
    pub fn feed_with_cancel(
        &mut self,
        word: i32,
        mode: Mode,
        cancel: &mut impl Cancel,
    ) -> Result<FeedResult, MotionError> {
        let shared = self.shared;
        self.interpreter
            .feed(word, mode, &mut self.planner, &self.config, |planner| {
                wait_for_idle(planner, shared, cancel)
            })
    }

    pub fn is_ready(&mut self) -> bool {
        self.planner.ready()
    }

    pub fn queue_depth(&mut self) -> u32 {
        self.planner.queue_depth()
    }

    /// The absolute position, once everything queued has been executed.
    pub fn position(&self) -> Position {
        self.planner.get_position()
    }

    /// Makes the current position the origin for subsequent jobs.
    pub fn set_origin(&mut self) -> Result<(), MotionError> {
        if self.planner.queue_depth() != 0 {
            return Err(MotionError::Busy);
        }
        self.planner.set_origin();
        Ok(())
    }

    pub fn jog(&mut self, axis: Axis, direction: Direction) -> Result<(), MotionError> {
        self.jog.start(
            axis,
            direction,
            self.shared,
            &mut self.timer,
            &mut self.planner,
            &self.config,
        )
    }

    /// Call this regularly while the jog key is held.
    pub fn service_jog(&mut self) -> JogStatus {
        self.jog
            .service(self.shared, &mut self.timer, &mut self.planner, &self.config)
    }

    /// Releases the jog key and waits for the axis to slow down and stop.
    ///
    /// If the timer stops ticking for [`JOG_STALL_MS`], the axis is stopped
    /// where it is.
    pub fn release_jog(&mut self) -> JogStatus {
        self.jog.release();
        let mut stalled_ms = 0;
        loop {
            match self.service_jog() {
                JogStatus::Running { .. } | JogStatus::Stopping => {}
                done => return done,
            }
            let before = (self.shared.jog.steps(), self.shared.jog.ticks());
            self.delay.delay_ms(1);
            if (self.shared.jog.steps(), self.shared.jog.ticks()) != before {
                stalled_ms = 0;
                continue;
            }
            stalled_ms += 1;
            if stalled_ms >= JOG_STALL_MS {
                log::warn!("no jog ticks for {JOG_STALL_MS}ms, stopping");
                let position =
                    self.jog
                        .halt(self.shared, &mut self.timer, &mut self.planner, &self.config);
                return JogStatus::Stopped { position };
            }
        }
    }

    /// Homes to the configured home position.
    pub fn home(&mut self, force: bool) -> Result<HomingOutcome, MotionError> {
        self.home_to(self.config.home, force)
    }

    pub fn home_to(&mut self, target: Position, force: bool) -> Result<HomingOutcome, MotionError> {
        self.home_with_cancel(target, force, &mut Never)
    }

    pub fn home_with_cancel(
        &mut self,
        target: Position,
        force: bool,
        cancel: &mut impl Cancel,
    ) -> Result<HomingOutcome, MotionError> {
        self.homing.home(
            target,
            force,
            self.shared,
            &mut self.planner,
            &mut self.delay,
            &self.config,
            cancel,
        )
    }

    /// Queues a travel move to `user`, which is relative to the origin, at
    /// `speed_percent` of the base speed.
    pub fn move_to(&mut self, user: Position, speed_percent: u32) -> Result<(), MotionError> {
        let feed_rate = speed_percent as f64 * 60.0 * self.config.speed as f64 / 100.0;
        let action = self
            .planner
            .action_to(user, feed_rate, ActionKind::Move, 0)
            .ok_or(MotionError::OutOfRange)?;
        self.planner.enqueue(action)?;
        Ok(())
    }

    /// Queues a travel move to the configured rest position.
    pub fn move_to_rest(&mut self) -> Result<(), MotionError> {
        let rest = self.config.rest;
        self.planner.enqueue(Action {
            target: position_to_mm(&rest),
            feed_rate: self.config.travel_feed_rate(),
            kind: ActionKind::Move,
            power: 0,
        })?;
        Ok(())
    }

    pub fn endstop_reached(&self) -> bool {
        self.shared.safety.endstop_reached(&self.shared.hw)
    }

    pub fn clear_endstop(&self) {
        self.shared.safety.clear_endstop();
    }

    pub fn is_start_allowed(&self) -> bool {
        self.shared.safety.is_start_allowed(&self.shared.hw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDelay, SimHardware, SimTimer};
    use crate::{BoundsViolation, ConfigBuilder};
    use cutter_geom::{MmPoint, PlanePoint};
    use cutter_planner::{PlannerCall, SimPlanner};
    use cutter_protocol::{encode, Command};

    type TestEngine<'a> = Engine<'a, SimPlanner, SimHardware, SimTimer, SimDelay>;

    fn config() -> MachineConfig {
        ConfigBuilder::default()
            .with_speed(200)
            .with_enable_level(true)
            .with_rest(Position::new(5000, 5000, 0))
            .build()
    }

    fn engine(shared: &Shared<SimHardware>) -> TestEngine<'_> {
        Engine::new(
            shared,
            SimPlanner::new(8),
            SimTimer::default(),
            SimDelay::new(),
            config(),
        )
    }

    fn feed_all(engine: &mut TestEngine, words: &[i32], mode: Mode) -> Vec<FeedResult> {
        words.iter().map(|&w| engine.feed(w, mode).unwrap()).collect()
    }

    #[test]
    fn reset_on_startup() {
        let shared = Shared::new(SimHardware::new(), &config());
        let engine = engine(&shared);
        assert!(shared.hw.output(Output::Enable));
        assert!(!shared.hw.output(Output::Laser));
        assert!(shared.hw.is_pulled_up(Input::Cover));
        assert!(shared.hw.output(Output::SafetyOverride));
        assert_eq!(engine.planner().planner().calls(), &[PlannerCall::Reset]);
    }

    #[test]
    fn move_scenario() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        feed_all(&mut engine, &[0, 1000, 2000], Mode::Run);

        let pushed: Vec<_> = engine.planner().planner().pushed().copied().collect();
        assert_eq!(
            pushed,
            vec![Action {
                target: MmPoint::new(1.0, 2.0, 0.0),
                feed_rate: 12_000.0,
                kind: ActionKind::Move,
                power: crate::interpreter::DEFAULT_POWER,
            }]
        );
        assert_eq!(engine.queue_depth(), 1);
    }

    #[test]
    fn power_scenario() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        feed_all(&mut engine, &[7, 101, 500], Mode::Run);
        assert_eq!(engine.planner().planner().calls().len(), 1);

        feed_all(&mut engine, &encode(&Command::Line { x: 10, y: 10 }), Mode::Run);
        let last = engine.planner().planner().pushed().last().copied();
        assert_eq!(last.map(|a| (a.kind, a.power)), Some((ActionKind::Laser, 500)));
    }

    #[test]
    fn origin_round_trip() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        feed_all(&mut engine, &[4, 40_000, 30_000, 1000], Mode::Run);
        engine.set_origin().unwrap();

        feed_all(&mut engine, &[0, 0, 0], Mode::Run);
        let target = engine.planner().planner().pushed().last().map(|a| a.target);
        assert_eq!(target, Some(MmPoint::new(40.0, 30.0, 1.0)));

        // Not while moving.
        assert_eq!(engine.set_origin(), Err(MotionError::Busy));
        engine.planner_mut().planner_mut().complete_all();
        assert_eq!(engine.set_origin(), Ok(()));

        // A reset forgets the origin.
        engine.reset();
        assert_eq!(engine.planner().origin(), cutter_geom::Offset::zero());
    }

    #[test]
    fn simulate_rejects_without_planner_calls() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        let results = feed_all(&mut engine, &[1, 700_000, 0], Mode::Simulate);
        assert_eq!(
            results[2],
            FeedResult::Reject(BoundsViolation {
                target: PlanePoint::new(700_000, 0)
            })
        );
        assert_eq!(engine.planner().planner().calls(), &[PlannerCall::Reset]);
    }

    #[test]
    fn move_to_rest() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        engine.move_to_rest().unwrap();
        engine.planner_mut().planner_mut().complete_all();
        assert_eq!(engine.position(), Position::new(5000, 5000, 0));
    }

    #[test]
    fn jog_through_the_engine() {
        let config = config();
        let shared = Shared::new(SimHardware::new(), &config);
        // Every millisecond of waiting, the interrupt fires a few times.
        let delay = SimDelay::with_callback(|_| {
            for _ in 0..10 {
                shared.on_jog_tick();
            }
        });
        let mut engine = Engine::new(
            &shared,
            SimPlanner::new(8),
            SimTimer::default(),
            delay,
            config,
        );

        engine.jog(Axis::Y, Direction::Positive).unwrap();
        assert!(engine.timer().period_us.is_some());
        assert_eq!(engine.jog(Axis::X, Direction::Positive), Err(MotionError::Busy));

        for _ in 0..32 {
            shared.on_jog_tick();
        }
        assert_eq!(
            engine.service_jog(),
            JogStatus::Running {
                position: Position::new(0, 100, 0)
            }
        );

        let JogStatus::Stopped { position } = engine.release_jog() else {
            panic!("jog didn't stop");
        };
        assert_eq!(position.y, 100);
        assert_eq!(engine.position(), position);
        assert_eq!(engine.timer().period_us, None);
    }

    #[test]
    fn move_to_is_relative() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        feed_all(&mut engine, &[4, 40_000, 30_000, 1000], Mode::Run);
        engine.set_origin().unwrap();

        engine.move_to(Position::new(1000, 0, -500), 50).unwrap();
        let last = engine.planner().planner().pushed().last().copied();
        assert_eq!(
            last,
            Some(Action {
                target: MmPoint::new(41.0, 30.0, 0.5),
                feed_rate: 6000.0,
                kind: ActionKind::Move,
                power: 0,
            })
        );

        assert_eq!(
            engine.move_to(Position::new(i32::MAX, 0, 0), 100),
            Err(MotionError::OutOfRange)
        );
        assert_eq!(engine.queue_depth(), 1);
    }

    #[test]
    fn xy_moves_keep_a_jogged_z() {
        let config = config();
        let shared = Shared::new(SimHardware::new(), &config);
        let delay = SimDelay::with_callback(|_| {
            for _ in 0..10 {
                shared.on_jog_tick();
            }
        });
        let mut engine = Engine::new(
            &shared,
            SimPlanner::new(8),
            SimTimer::default(),
            delay,
            config,
        );

        engine.jog(Axis::Z, Direction::Positive).unwrap();
        for _ in 0..320 {
            shared.on_jog_tick();
        }
        let JogStatus::Stopped { position } = engine.release_jog() else {
            panic!("jog didn't stop");
        };
        assert!(position.z > 0);

        for w in [0, 1000, 2000] {
            engine.feed(w, Mode::Run).unwrap();
        }
        let target = engine.planner().planner().pushed().last().map(|a| a.target);
        assert_eq!(
            target,
            Some(position_to_mm(&Position::new(1000, 2000, position.z)))
        );
    }

    #[test]
    fn xy_moves_keep_the_homed_z() {
        let config = ConfigBuilder::default()
            .with_speed(200)
            .with_rest(Position::new(5000, 5000, 3000))
            .build();
        let shared = Shared::new(SimHardware::new(), &config);
        let mut engine = Engine::new(
            &shared,
            SimPlanner::new(8).draining(),
            SimTimer::default(),
            SimDelay::new(),
            config,
        );
        shared.hw.set_input(Input::XHome, false);
        shared.hw.set_input(Input::YHome, false);

        assert_eq!(
            engine.home_to(Position::new(0, 0, 3000), false),
            Ok(HomingOutcome::Homed)
        );
        assert_eq!(engine.position(), Position::new(5000, 5000, 3000));

        feed_all(&mut engine, &[0, 1000, 2000], Mode::Run);
        let target = engine.planner().planner().pushed().last().map(|a| a.target);
        assert_eq!(target, Some(MmPoint::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn release_without_ticks_stops() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = engine(&shared);
        engine.jog(Axis::X, Direction::Positive).unwrap();

        // Get up to speed, so that releasing has to ramp down.
        for _ in 0..10 {
            for _ in 0..crate::jog::RAMP_TICKS {
                shared.on_jog_tick();
            }
            assert!(matches!(engine.service_jog(), JogStatus::Running { .. }));
        }

        // Now the timer goes quiet.
        let JogStatus::Stopped { position } = engine.release_jog() else {
            panic!("jog didn't stop");
        };
        assert_eq!(engine.delay().elapsed_us, JOG_STALL_MS as u64 * 1000);
        assert_eq!(engine.timer().period_us, None);
        assert!(position.x > 0);
        assert_eq!(engine.position(), position);

        let steps = shared.jog.steps();
        shared.on_jog_tick();
        shared.on_jog_tick();
        assert_eq!(shared.jog.steps(), steps);
    }

    #[test]
    fn endstop_queries() {
        let shared = Shared::new(SimHardware::new(), &config());
        let engine = engine(&shared);
        assert!(engine.is_start_allowed());
        assert!(!engine.endstop_reached());

        shared.hw.set_input(Input::YHome, false);
        shared.safety.latch_if_reached(&shared.hw);
        shared.hw.set_input(Input::YHome, true);
        assert!(engine.endstop_reached());
        engine.clear_endstop();
        assert!(!engine.endstop_reached());
    }

    #[test]
    fn home_through_the_engine() {
        let shared = Shared::new(SimHardware::new(), &config());
        let mut engine = Engine::new(
            &shared,
            SimPlanner::new(8).draining(),
            SimTimer::default(),
            SimDelay::new(),
            config(),
        );
        shared.hw.set_input(Input::XHome, false);
        shared.hw.set_input(Input::YHome, false);

        assert_eq!(engine.home(false), Ok(HomingOutcome::Homed));
        assert!(engine.is_home());
        assert_eq!(engine.position(), Position::new(5000, 5000, 0));
        assert_eq!(engine.home(false), Ok(HomingOutcome::AlreadyHome));
    }
}
