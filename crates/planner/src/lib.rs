//! The cutter's view of the trajectory planner.
//!
//! The planner itself (the thing that turns queued moves into step pulses,
//! with acceleration and all that) lives below us, and we only ever talk to it
//! through the [`Planner`] trait. It works in floating-point millimeters; we
//! work in integer micrometers. [`PlannerAdapter`] does the translation, and
//! also applies the user's origin offset to every move.

use cutter_geom::{position_from_mm, position_to_mm, MmPoint, Offset, Position};
use serde::Serialize;

pub mod sim;

pub use sim::{PlannerCall, SimPlanner};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ActionKind {
    /// Move with the laser off.
    Move,
    /// Move with the laser firing at the action's power.
    Laser,
    /// Move while firing the uploaded bitmap line.
    BitmapRun,
    /// Move while pretending to fire the uploaded bitmap line.
    BitmapTest,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Action {
    pub target: MmPoint,
    /// In millimeters per minute.
    pub feed_rate: f64,
    pub kind: ActionKind,
    pub power: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("the planner queue is full")]
pub struct QueueFull;

/// The lower-level planner and step generator.
///
/// Queued actions are executed asynchronously. The methods take `&mut self`
/// because asking about the queue may involve talking to the hardware.
pub trait Planner {
    /// Appends an action to the queue. This never blocks: if there's no room,
    /// it fails.
    fn push(&mut self, action: Action) -> Result<(), QueueFull>;

    fn queue_len(&mut self) -> u32;

    fn is_full(&mut self) -> bool;

    /// The position that the planner will be at once its queue is empty.
    fn position(&self) -> MmPoint;

    /// Overwrites the current position. Only valid when the queue is empty.
    fn set_position(&mut self, position: MmPoint);

    /// Drops everything in the queue, including the block being executed.
    fn clear(&mut self);

    /// Re-zeroes the pulse generator.
    fn reset(&mut self);
}

pub struct PlannerAdapter<P> {
    planner: P,
    origin: Offset,
}

impl<P: Planner> PlannerAdapter<P> {
    pub fn new(planner: P) -> Self {
        PlannerAdapter {
            planner,
            origin: Offset::zero(),
        }
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut P {
        &mut self.planner
    }

    pub fn into_inner(self) -> P {
        self.planner
    }

    /// Queues an action. Callers are expected to check [`ready`](Self::ready)
    /// first.
    pub fn enqueue(&mut self, action: Action) -> Result<(), QueueFull> {
        if self.planner.is_full() {
            return Err(QueueFull);
        }
        log::trace!("enqueue {action:?}");
        self.planner.push(action)
    }

    pub fn ready(&mut self) -> bool {
        !self.planner.is_full()
    }

    pub fn queue_depth(&mut self) -> u32 {
        self.planner.queue_len()
    }

    pub fn get_position(&self) -> Position {
        position_from_mm(&self.planner.position())
    }

    /// Hard-sets the absolute position, and drops the origin offset.
    ///
    /// The queue must be empty, or the move in flight will jump.
    pub fn set_position(&mut self, position: Position) {
        log::debug!("set position {position:?}");
        self.planner.set_position(position_to_mm(&position));
        self.origin = Offset::zero();
    }

    pub fn clear_queue(&mut self) {
        self.planner.clear();
    }

    pub fn reset(&mut self) {
        self.planner.reset();
    }

    pub fn origin(&self) -> Offset {
        self.origin
    }

    /// Makes the current absolute position the new origin. Like
    /// [`set_position`](Self::set_position), only call this at stand-still.
    pub fn set_origin(&mut self) {
        self.origin = self.get_position().to_vector();
        log::info!("origin set to {:?}", self.origin);
    }

    pub fn reset_origin(&mut self) {
        self.origin = Offset::zero();
    }

    /// Converts a position relative to the origin into an absolute one, or
    /// `None` if that doesn't fit in an `i32`.
    pub fn absolute(&self, user: Position) -> Option<Position> {
        Some(Position::new(
            user.x.checked_add(self.origin.x)?,
            user.y.checked_add(self.origin.y)?,
            user.z.checked_add(self.origin.z)?,
        ))
    }

    /// Builds (but doesn't queue) an action that goes to `user`, which is
    /// relative to the origin.
    pub fn action_to(
        &self,
        user: Position,
        feed_rate: f64,
        kind: ActionKind,
        power: i32,
    ) -> Option<Action> {
        Some(Action {
            target: position_to_mm(&self.absolute(user)?),
            feed_rate,
            kind,
            power,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn adapter(capacity: usize) -> PlannerAdapter<SimPlanner> {
        PlannerAdapter::new(SimPlanner::new(capacity))
    }

    #[test]
    fn enqueue_respects_capacity() {
        let mut a = adapter(2);
        let act = a
            .action_to(Position::new(1000, 0, 0), 600.0, ActionKind::Move, 0)
            .unwrap();
        assert!(a.ready());
        a.enqueue(act).unwrap();
        a.enqueue(act).unwrap();
        assert!(!a.ready());
        assert_eq!(a.enqueue(act), Err(QueueFull));
        assert_eq!(a.queue_depth(), 2);
        assert_eq!(a.planner().pushed().count(), 2);

        a.clear_queue();
        assert_eq!(a.queue_depth(), 0);
    }

    #[test]
    fn origin_round_trip() {
        let mut a = adapter(4);
        a.set_position(Position::new(12_345, 678, -90));
        a.set_origin();
        assert_eq!(a.origin(), Offset::new(12_345, 678, -90));

        let act = a
            .action_to(Position::new(0, 0, -90), 60.0, ActionKind::Laser, 10)
            .unwrap();
        a.enqueue(act).unwrap();
        a.planner_mut().complete_all();
        assert_eq!(a.get_position(), Position::new(12_345, 678, -180));

        // Setting the position forgets the origin.
        a.set_position(Position::new(0, 0, 0));
        assert_eq!(a.origin(), Offset::zero());
    }

    #[test]
    fn offsets_that_overflow() {
        let mut a = adapter(1);
        a.set_position(Position::new(1000, -1000, 0));
        a.set_origin();
        assert_eq!(a.absolute(Position::new(i32::MAX, 0, 0)), None);
        assert_eq!(a.absolute(Position::new(0, i32::MIN, 0)), None);
        assert_eq!(a.action_to(Position::new(i32::MAX, 0, 0), 1.0, ActionKind::Move, 0), None);
        assert_eq!(
            a.absolute(Position::new(-1000, 1000, 0)),
            Some(Position::new(0, 0, 0))
        );
    }

    proptest! {
        #[test]
        fn targets_are_offset(ox in -1_000_000..1_000_000i32, oy in -1_000_000..1_000_000i32,
                              x in -1_000_000..1_000_000i32, y in -1_000_000..1_000_000i32,
                              kind: ActionKind) {
            let mut a = adapter(1);
            a.set_position(Position::new(ox, oy, 0));
            a.set_origin();
            let act = a.action_to(Position::new(x, y, 0), 1.0, kind, 0).unwrap();
            assert_eq!(act.kind, kind);
            assert_eq!(
                cutter_geom::position_from_mm(&act.target),
                Position::new(ox + x, oy + y, 0)
            );
        }
    }
}
