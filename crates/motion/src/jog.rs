//! Moving one axis by hand.
//!
//! Jogging bypasses the planner altogether: a periodic interrupt toggles the
//! step output directly, and the foreground ramps the interrupt period up and
//! down. When the jog is over, the steps that were actually taken get folded
//! back into the planner's position.
//!
//! The split is:
//! - [`JogIsr`] is the interrupt half. It only touches atomics and the
//!   hardware, and never the planner.
//! - [`JogController`] is the foreground half, which owns the timer and the
//!   ramp, and talks to the planner once the interrupt has been detached.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use cutter_geom::Position;
use cutter_planner::{Planner, PlannerAdapter};

use crate::hw::{Hardware, Output, TickTimer};
use crate::{MachineConfig, MotionError, Shared};

/// The number of interrupt ticks between adjustments of the jog speed.
pub const RAMP_TICKS: u32 = 50;

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn step_output(self) -> Output {
        match self {
            Axis::X => Output::XStep,
            Axis::Y => Output::YStep,
            Axis::Z => Output::ZStep,
        }
    }

    pub fn dir_output(self) -> Output {
        match self {
            Axis::X => Output::XDir,
            Axis::Y => Output::YDir,
            Axis::Z => Output::ZDir,
        }
    }

    fn from_u8(x: u8) -> Option<Axis> {
        match x {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    fn coord(self, p: &mut Position) -> &mut i32 {
        match self {
            Axis::X => &mut p.x,
            Axis::Y => &mut p.y,
            Axis::Z => &mut p.z,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

const NO_AXIS: u8 = u8::MAX;

/// The state shared between the jog interrupt and the foreground.
pub struct JogIsr {
    busy: AtomicBool,
    axis: AtomicU8,
    level: AtomicBool,
    steps: AtomicU32,
    ticks: AtomicU32,
}

impl Default for JogIsr {
    fn default() -> Self {
        Self::new()
    }
}

impl JogIsr {
    pub const fn new() -> Self {
        JogIsr {
            busy: AtomicBool::new(false),
            axis: AtomicU8::new(NO_AXIS),
            level: AtomicBool::new(false),
            steps: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
        }
    }

    /// The interrupt body.
    ///
    /// If a tick arrives while the previous one is still running, it's dropped
    /// instead of waiting.
    pub fn on_tick(&self, hw: &impl Hardware, safety: &crate::SafetyMonitor) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        if let Some(axis) = Axis::from_u8(self.axis.load(Ordering::Acquire)) {
            let level = !self.level.load(Ordering::Relaxed);
            self.level.store(level, Ordering::Relaxed);
            hw.write(axis.step_output(), level);
            safety.latch_if_reached(hw);
            if level {
                self.steps.fetch_add(1, Ordering::Relaxed);
            }
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }

        self.busy.store(false, Ordering::Release);
    }

    /// Starts stepping `axis` on the following ticks, from a count of zero.
    pub fn arm(&self, axis: Axis) {
        self.steps.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.level.store(false, Ordering::Relaxed);
        self.axis.store(axis.to_u8(), Ordering::Release);
    }

    /// Stops stepping. Call this after detaching the timer.
    pub fn disarm(&self) {
        self.axis.store(NO_AXIS, Ordering::Release);
    }

    pub fn axis(&self) -> Option<Axis> {
        Axis::from_u8(self.axis.load(Ordering::Acquire))
    }

    /// Full step pulses since the last [`arm`](Self::arm).
    pub fn steps(&self) -> u32 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn reset_ticks(&self) {
        self.ticks.store(0, Ordering::Relaxed);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JogStatus {
    /// Still moving at (or ramping up to) jogging speed.
    Running { position: Position },
    /// Slowing down after the key was released.
    Stopping,
    /// Finished, and the position has been committed.
    Stopped { position: Position },
    /// Stopped short by an endstop or the cover. The steps that were taken
    /// have been committed.
    Aborted {
        position: Position,
        reason: MotionError,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopping,
}

pub struct JogController {
    phase: Phase,
    axis: Axis,
    direction: Direction,
    // Where the jog started.
    start: Position,
    period_us: u32,
}

impl Default for JogController {
    fn default() -> Self {
        Self::new()
    }
}

impl JogController {
    pub fn new() -> Self {
        JogController {
            phase: Phase::Idle,
            axis: Axis::X,
            direction: Direction::Positive,
            start: Position::origin(),
            period_us: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Key down: sets the direction and starts stepping slowly.
    pub fn start<P: Planner, H: Hardware>(
        &mut self,
        axis: Axis,
        direction: Direction,
        shared: &Shared<H>,
        timer: &mut impl TickTimer,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> Result<(), MotionError> {
        if self.is_active() || planner.queue_depth() != 0 {
            return Err(MotionError::Busy);
        }
        if !shared.safety.is_start_allowed(&shared.hw) {
            return Err(MotionError::CoverOpen);
        }
        if shared.safety.endstop_reached(&shared.hw) {
            return Err(MotionError::EndstopReached);
        }

        let inverted = config.axis(axis).scale.inverted();
        let level = (direction == Direction::Positive) != inverted;
        shared.hw.write(axis.dir_output(), level);

        self.axis = axis;
        self.direction = direction;
        self.start = planner.get_position();
        self.period_us = config.manual_period_us.saturating_mul(4);
        self.phase = Phase::Running;

        log::debug!("jog {axis:?} {direction:?} from {:?}", self.start);
        shared.jog.arm(axis);
        timer.attach(self.period_us);
        Ok(())
    }

    /// Key up: starts slowing down. Keep calling [`service`](Self::service)
    /// until the jog has stopped.
    pub fn release(&mut self) {
        if self.phase == Phase::Running {
            self.phase = Phase::Stopping;
        }
    }

    /// The foreground half of the jog, to be called regularly while jogging.
    pub fn service<P: Planner, H: Hardware>(
        &mut self,
        shared: &Shared<H>,
        timer: &mut impl TickTimer,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> JogStatus {
        if self.phase == Phase::Idle {
            return JogStatus::Stopped {
                position: planner.get_position(),
            };
        }

        let abort = if shared.safety.is_latched() {
            Some(MotionError::EndstopReached)
        } else if !shared.safety.is_start_allowed(&shared.hw) {
            Some(MotionError::CoverOpen)
        } else {
            None
        };
        if let Some(reason) = abort {
            log::warn!("jog aborted: {reason}");
            let position = self.finish(shared, timer, planner, config);
            return JogStatus::Aborted { position, reason };
        }

        let manual = config.manual_period_us;
        match self.phase {
            Phase::Running => {
                if shared.jog.ticks() >= RAMP_TICKS {
                    shared.jog.reset_ticks();
                    if self.period_us > manual {
                        self.period_us = ((self.period_us as f64 / 1.1) as u32).max(manual);
                        timer.attach(self.period_us);
                    }
                }
                JogStatus::Running {
                    position: self.live_position(shared, config),
                }
            }
            Phase::Stopping => {
                if self.period_us >= manual.saturating_mul(2) {
                    let position = self.finish(shared, timer, planner, config);
                    return JogStatus::Stopped { position };
                }
                if shared.jog.ticks() >= RAMP_TICKS {
                    shared.jog.reset_ticks();
                    let slower = (self.period_us as f64 * 1.05) as u32;
                    self.period_us = slower.max(self.period_us + 1);
                    timer.attach(self.period_us);
                }
                JogStatus::Stopping
            }
            Phase::Idle => JogStatus::Stopped {
                position: planner.get_position(),
            },
        }
    }

    /// Stops dead, without ramping down, and commits the steps taken so far.
    pub fn halt<P: Planner, H: Hardware>(
        &mut self,
        shared: &Shared<H>,
        timer: &mut impl TickTimer,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> Position {
        if self.phase == Phase::Idle {
            return planner.get_position();
        }
        self.finish(shared, timer, planner, config)
    }

    /// Where the jog would leave us if it stopped right now.
    pub fn live_position<H: Hardware>(&self, shared: &Shared<H>, config: &MachineConfig) -> Position {
        let mut pos = self.start;
        let um = config
            .axis(self.axis)
            .scale
            .steps_to_um(shared.jog.steps());
        let delta = match self.direction {
            Direction::Positive => um,
            Direction::Negative => -um,
        };
        *self.axis.coord(&mut pos) += delta;
        pos
    }

    fn finish<P: Planner, H: Hardware>(
        &mut self,
        shared: &Shared<H>,
        timer: &mut impl TickTimer,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> Position {
        timer.detach();
        shared.jog.disarm();
        shared.hw.write(self.axis.step_output(), false);

        let position = self.live_position(shared, config);
        log::debug!(
            "jog done after {} steps, at {position:?}",
            shared.jog.steps()
        );
        planner.set_position(position);
        self.phase = Phase::Idle;
        self.period_us = 0;
        position
    }
}
