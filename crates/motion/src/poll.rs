//! Waiting for things, without ever waiting blindly.
//!
//! There's no scheduler here: a wait is a loop that polls a condition. Every
//! iteration also checks whether the wait should be abandoned (operator
//! cancel, cover open, endstop), so a wait never outlives a reason to stop.

use cutter_planner::{Planner, PlannerAdapter};

use crate::hw::Hardware;
use crate::{MotionError, Shared};

/// Something the operator can use to cancel a long-running operation.
pub trait Cancel {
    fn cancel_requested(&mut self) -> bool;
}

impl<F: FnMut() -> bool> Cancel for F {
    fn cancel_requested(&mut self) -> bool {
        self()
    }
}

/// An operator who never cancels anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

impl Cancel for Never {
    fn cancel_requested(&mut self) -> bool {
        false
    }
}

/// Polls `done` until it returns true, or until `abort` comes up with a
/// reason to stop. `abort` is checked first on every iteration.
pub fn wait_until(
    mut done: impl FnMut() -> bool,
    mut abort: impl FnMut() -> Option<MotionError>,
) -> Result<(), MotionError> {
    loop {
        if let Some(e) = abort() {
            return Err(e);
        }
        if done() {
            return Ok(());
        }
    }
}

/// Is there a reason to stop moving? While the safety override is active,
/// the endstops are expected to trigger and are ignored.
pub fn interruption<H: Hardware>(
    shared: &Shared<H>,
    cancel: &mut impl Cancel,
) -> Option<MotionError> {
    if cancel.cancel_requested() {
        Some(MotionError::Cancelled)
    } else if !shared.safety.is_start_allowed(&shared.hw) {
        Some(MotionError::CoverOpen)
    } else if !shared.safety.is_overridden() && shared.safety.endstop_reached(&shared.hw) {
        Some(MotionError::EndstopReached)
    } else {
        None
    }
}

/// Waits for the planner's queue to empty.
pub fn wait_for_idle<P: Planner, H: Hardware>(
    planner: &mut PlannerAdapter<P>,
    shared: &Shared<H>,
    cancel: &mut impl Cancel,
) -> Result<(), MotionError> {
    wait_until(|| planner.queue_depth() == 0, || interruption(shared, cancel))
}

/// Waits for room in the planner's queue.
pub fn wait_for_ready<P: Planner, H: Hardware>(
    planner: &mut PlannerAdapter<P>,
    shared: &Shared<H>,
    cancel: &mut impl Cancel,
) -> Result<(), MotionError> {
    wait_until(|| planner.ready(), || interruption(shared, cancel))
}
