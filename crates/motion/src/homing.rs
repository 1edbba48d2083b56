//! Finding the machine's zero.
//!
//! Homing drives the axes into their home switches, one step at a time, with
//! no help from the planner. Z goes first (if it's set up to home at all),
//! then X and Y together. Once both XY switches read triggered, the planner is
//! told where we are and the head is parked at the rest position.
//!
//! The home switches are usually outside the interlocked travel envelope, so
//! the safety circuit is overridden for the whole operation.

use cutter_geom::{position_to_mm, Position};
use cutter_planner::{Action, ActionKind, Planner, PlannerAdapter};
use embedded_hal::blocking::delay::DelayUs;

use crate::hw::{Hardware, Input, Output};
use crate::poll::{interruption, wait_for_idle, Cancel};
use crate::{MachineConfig, MotionError, Shared};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HomingPhase {
    Idle,
    HomingZ,
    HomingXY,
    Done,
    Cancelled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HomingSession {
    pub phase: HomingPhase,
    /// The position that the home switches correspond to.
    pub target: Position,
    /// Step iterations so far, across both phases.
    pub iterations: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HomingOutcome {
    /// We were already homed, so nothing moved.
    AlreadyHome,
    Homed,
}

pub struct HomingController {
    session: HomingSession,
    is_home: bool,
}

impl Default for HomingController {
    fn default() -> Self {
        Self::new()
    }
}

impl HomingController {
    pub fn new() -> Self {
        HomingController {
            session: HomingSession {
                phase: HomingPhase::Idle,
                target: Position::origin(),
                iterations: 0,
            },
            is_home: false,
        }
    }

    pub fn is_home(&self) -> bool {
        self.is_home
    }

    /// Forgets that we were homed, for example because a job was cancelled
    /// mid-move.
    pub fn invalidate(&mut self) {
        self.is_home = false;
    }

    pub fn session(&self) -> &HomingSession {
        &self.session
    }

    /// Homes the machine, and declares that the home switches are at
    /// `target`.
    ///
    /// Does nothing if we're already homed, unless `force` is set or the cover
    /// has been opened since.
    #[allow(clippy::too_many_arguments)]
    pub fn home<P: Planner, H: Hardware, D: DelayUs<u32>>(
        &mut self,
        target: Position,
        force: bool,
        shared: &Shared<H>,
        planner: &mut PlannerAdapter<P>,
        delay: &mut D,
        config: &MachineConfig,
        cancel: &mut impl Cancel,
    ) -> Result<HomingOutcome, MotionError> {
        if self.is_home && !force && !shared.safety.cover_opened() {
            return Ok(HomingOutcome::AlreadyHome);
        }
        if planner.queue_depth() != 0 {
            return Err(MotionError::Busy);
        }
        // Only forget about the cover once we're committed to homing.
        shared.safety.take_cover_opened();

        self.is_home = false;
        self.session = HomingSession {
            phase: HomingPhase::Idle,
            target,
            iterations: 0,
        };

        log::info!("homing to {target:?}");
        match self.run(shared, planner, delay, config, cancel) {
            Ok(()) => {
                log::info!("homed after {} iterations", self.session.iterations);
                self.session.phase = HomingPhase::Done;
                self.is_home = true;
                Ok(HomingOutcome::Homed)
            }
            Err(e) => {
                log::warn!("homing cancelled: {e}");
                self.session.phase = HomingPhase::Cancelled;
                Err(e)
            }
        }
    }

    fn run<P: Planner, H: Hardware, D: DelayUs<u32>>(
        &mut self,
        shared: &Shared<H>,
        planner: &mut PlannerAdapter<P>,
        delay: &mut D,
        config: &MachineConfig,
        cancel: &mut impl Cancel,
    ) -> Result<(), MotionError> {
        let hw = &shared.hw;
        if !shared.safety.is_start_allowed(hw) {
            return Err(MotionError::CoverOpen);
        }

        let _guard = shared.safety.guard(hw);
        planner.reset_origin();
        hw.write(Output::XDir, config.x.home_dir);
        hw.write(Output::YDir, config.y.home_dir);
        hw.write(Output::ZDir, config.z.home_dir);

        // Check for cancellation about once every 5mm.
        let check_every = (config.x.scale.steps_per_mm() * 5).max(1);
        let half_period = config.home_period_us;

        if config.auto_z_home {
            self.session.phase = HomingPhase::HomingZ;
            let mut n = 0;
            while !z_triggered(hw, config) {
                if n % check_every == 0 {
                    if let Some(e) = interruption(shared, cancel) {
                        return Err(e);
                    }
                }
                hw.write(Output::ZStep, false);
                delay.delay_us(half_period);
                hw.write(Output::ZStep, true);
                delay.delay_us(half_period);
                n += 1;
                self.session.iterations += 1;
            }
            hw.write(Output::ZStep, false);
        }

        self.session.phase = HomingPhase::HomingXY;
        let mut n = 0;
        loop {
            if n % check_every == 0 {
                if let Some(e) = interruption(shared, cancel) {
                    return Err(e);
                }
            }
            hw.write(Output::XStep, false);
            hw.write(Output::YStep, false);
            delay.delay_us(half_period);

            // Each axis only steps until its own switch triggers.
            let (x_home, y_home) = xy_triggered(hw, config);
            hw.write(Output::XStep, !x_home);
            hw.write(Output::YStep, !y_home);
            delay.delay_us(half_period);

            hw.write(Output::XHomeLed, x_home);
            hw.write(Output::YHomeLed, y_home);
            hw.write(Output::Heartbeat, self.session.iterations & 0x10000 != 0);
            n += 1;
            self.session.iterations += 1;

            if xy_triggered(hw, config) == (true, true) {
                break;
            }
        }
        hw.write(Output::XStep, false);
        hw.write(Output::YStep, false);

        planner.set_position(self.session.target);
        planner.enqueue(Action {
            target: position_to_mm(&config.rest),
            feed_rate: config.travel_feed_rate(),
            kind: ActionKind::Move,
            power: 0,
        })?;
        if let Err(e) = wait_for_idle(planner, shared, cancel) {
            planner.clear_queue();
            return Err(e);
        }
        Ok(())
    }
}

fn z_triggered(hw: &impl Hardware, config: &MachineConfig) -> bool {
    let pol = config.z.polarity;
    hw.read(Input::ZMin) == pol || hw.read(Input::ZMax) == pol
}

fn xy_triggered(hw: &impl Hardware, config: &MachineConfig) -> (bool, bool) {
    (
        hw.read(Input::XHome) == config.x.polarity,
        hw.read(Input::YHome) == config.y.polarity,
    )
}
