use std::collections::VecDeque;

use cutter_geom::MmPoint;

use crate::{Action, Planner, QueueFull};

/// Everything that was asked of a [`SimPlanner`], in order.
#[derive(Clone, Debug, PartialEq)]
pub enum PlannerCall {
    Push(Action),
    SetPosition(MmPoint),
    Clear,
    Reset,
}

/// A planner that doesn't plan anything: actions sit in a bounded queue until
/// they're completed, at which point the position jumps to their target.
///
/// By default blocks only complete when asked to. With
/// [`draining`](SimPlanner::draining), one block completes every time the queue
/// is inspected, which is enough to let polling loops make progress.
#[derive(Clone, Debug)]
pub struct SimPlanner {
    capacity: usize,
    queue: VecDeque<Action>,
    // Where the last completed block left us.
    executed: MmPoint,
    drain_on_poll: bool,
    calls: Vec<PlannerCall>,
}

impl SimPlanner {
    pub fn new(capacity: usize) -> Self {
        SimPlanner {
            capacity,
            queue: VecDeque::with_capacity(capacity),
            executed: MmPoint::origin(),
            drain_on_poll: false,
            calls: Vec::new(),
        }
    }

    pub fn draining(mut self) -> Self {
        self.drain_on_poll = true;
        self
    }

    pub fn complete_one(&mut self) -> Option<Action> {
        let action = self.queue.pop_front()?;
        self.executed = action.target;
        Some(action)
    }

    pub fn complete_all(&mut self) {
        while self.complete_one().is_some() {}
    }

    pub fn calls(&self) -> &[PlannerCall] {
        &self.calls
    }

    pub fn pushed(&self) -> impl Iterator<Item = &Action> + '_ {
        self.calls.iter().filter_map(|c| match c {
            PlannerCall::Push(a) => Some(a),
            _ => None,
        })
    }

    pub fn set_position_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, PlannerCall::SetPosition(_)))
            .count()
    }

    fn poll(&mut self) {
        if self.drain_on_poll {
            self.complete_one();
        }
    }
}

impl Planner for SimPlanner {
    fn push(&mut self, action: Action) -> Result<(), QueueFull> {
        if self.queue.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.calls.push(PlannerCall::Push(action));
        self.queue.push_back(action);
        Ok(())
    }

    fn queue_len(&mut self) -> u32 {
        self.poll();
        self.queue.len() as u32
    }

    fn is_full(&mut self) -> bool {
        self.poll();
        self.queue.len() >= self.capacity
    }

    fn position(&self) -> MmPoint {
        self.queue.back().map_or(self.executed, |a| a.target)
    }

    fn set_position(&mut self, position: MmPoint) {
        self.calls.push(PlannerCall::SetPosition(position));
        self.executed = position;
    }

    fn clear(&mut self) {
        self.calls.push(PlannerCall::Clear);
        self.queue.clear();
    }

    fn reset(&mut self) {
        self.calls.push(PlannerCall::Reset);
    }
}
