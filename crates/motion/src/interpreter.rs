//! Executes decoded job commands.

use cutter_geom::{position_to_mm, Position};
use cutter_planner::{Action, ActionKind, Planner, PlannerAdapter};
use cutter_protocol::{Command, Decoded, Decoder, Mode, Opcode, Param};

use crate::bitmap::BitmapBuffer;
use crate::{BoundsViolation, FeedResult, MachineConfig, MotionError};

pub const DEFAULT_POWER: i32 = 10_000;

pub struct Interpreter {
    decoder: Decoder,
    bitmap: BitmapBuffer,
    // In millimeters per second.
    mark_speed: u32,
    power: i32,
}

impl Interpreter {
    pub fn new(config: &MachineConfig) -> Self {
        Interpreter {
            decoder: Decoder::new(),
            bitmap: BitmapBuffer::new(),
            mark_speed: config.speed,
            power: DEFAULT_POWER,
        }
    }

    /// Gets ready for a new job: drops any half-read command or unused bitmap.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.bitmap.disable();
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn bitmap(&self) -> &BitmapBuffer {
        &self.bitmap
    }

    pub fn mark_speed(&self) -> u32 {
        self.mark_speed
    }

    pub fn power(&self) -> i32 {
        self.power
    }

    /// Consumes one word of a job.
    ///
    /// Some commands need the machine to be at a stand-still before they can
    /// take effect; for those, `wait_idle` is called before the word is
    /// consumed. If it fails, the word is left unconsumed and the error is
    /// returned.
    pub fn feed<P: Planner>(
        &mut self,
        word: i32,
        mode: Mode,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
        mut wait_idle: impl FnMut(&mut PlannerAdapter<P>) -> Result<(), MotionError>,
    ) -> Result<FeedResult, MotionError> {
        if self.needs_stand_still(mode) {
            wait_idle(planner)?;
        }

        match self.decoder.push(word) {
            Decoded::Pending => Ok(FeedResult::Continue),
            Decoded::Unknown(w) => {
                log::warn!("unknown opcode {w}, skipping it");
                Ok(FeedResult::Continue)
            }
            Decoded::Command(cmd) => self.execute(cmd, mode, planner, config),
            Decoded::BitmapHeader { bpp, width, words } => {
                self.bitmap.begin_upload(bpp, width);
                if words == 0 {
                    Ok(FeedResult::ConsumedBitmapUpload)
                } else {
                    Ok(FeedResult::Continue)
                }
            }
            Decoded::BitmapWord { value, last, .. } => {
                self.bitmap.write_word(value);
                if last {
                    Ok(FeedResult::ConsumedBitmapUpload)
                } else {
                    Ok(FeedResult::Continue)
                }
            }
        }
    }

    // The bitmap width mustn't change under a move that's still using the
    // old bitmap, and setting the position mid-move would make it jump.
    fn needs_stand_still(&self, mode: Mode) -> bool {
        if self.decoder.awaiting_bitmap_width() {
            return true;
        }
        let state = self.decoder.command_state();
        mode != Mode::Simulate && state.opcode == Some(Opcode::SetPosition) && state.step == 2
    }

    fn execute<P: Planner>(
        &mut self,
        cmd: Command,
        mode: Mode,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> Result<FeedResult, MotionError> {
        match cmd {
            Command::Move { x, y } => self.xy_move(x, y, false, mode, planner, config),
            Command::Line { x, y } => self.xy_move(x, y, true, mode, planner, config),
            Command::MoveZ { z } => {
                let z = planner
                    .absolute(Position::new(0, 0, z))
                    .ok_or(MotionError::OutOfRange)?
                    .z;
                if mode != Mode::Simulate {
                    let current = planner.get_position();
                    let target = Position::new(current.x, current.y, z);
                    planner.enqueue(Action {
                        target: position_to_mm(&target),
                        feed_rate: config.travel_feed_rate(),
                        kind: ActionKind::Move,
                        power: self.power,
                    })?;
                }
                Ok(FeedResult::Continue)
            }
            Command::SetPosition { x, y, z } => {
                if mode != Mode::Simulate {
                    planner.set_position(Position::new(x, y, z));
                }
                Ok(FeedResult::Continue)
            }
            Command::Nop => Ok(FeedResult::Continue),
            Command::SetParam { index, value } => {
                match Param::from_index(index) {
                    Some(Param::MarkSpeed) => {
                        let fraction = value.clamp(1, 10_000) as u64;
                        // Never zero, or lines would never finish.
                        self.mark_speed =
                            ((fraction * config.speed as u64 / 10_000) as u32).max(1);
                        log::debug!("mark speed {} mm/s", self.mark_speed);
                    }
                    Some(Param::Power) => {
                        self.power = value;
                        log::debug!("power {value}");
                    }
                    None => log::warn!("ignoring unknown parameter {index} = {value}"),
                }
                Ok(FeedResult::Continue)
            }
        }
    }

    fn xy_move<P: Planner>(
        &mut self,
        x: i32,
        y: i32,
        laser: bool,
        mode: Mode,
        planner: &mut PlannerAdapter<P>,
        config: &MachineConfig,
    ) -> Result<FeedResult, MotionError> {
        let xy = planner
            .absolute(Position::new(x, y, 0))
            .ok_or(MotionError::OutOfRange)?
            .xy();

        let mut kind = if laser && mode != Mode::Test {
            ActionKind::Laser
        } else {
            ActionKind::Move
        };
        if laser && self.bitmap.take() {
            kind = match mode {
                Mode::Run => ActionKind::BitmapRun,
                Mode::Test => ActionKind::BitmapTest,
                Mode::Simulate => kind,
            };
        }

        if mode == Mode::Simulate {
            // Travel moves are allowed outside the working area.
            if laser && !config.work_area.contains(xy) {
                return Ok(FeedResult::Reject(BoundsViolation { target: xy }));
            }
            return Ok(FeedResult::Continue);
        }

        // XY moves leave Z wherever the queue leaves it.
        let target = Position::new(xy.x, xy.y, planner.get_position().z);

        let speed = if laser { self.mark_speed } else { config.speed };
        planner.enqueue(Action {
            target: position_to_mm(&target),
            feed_rate: 60.0 * speed as f64,
            kind,
            power: self.power,
        })?;
        Ok(FeedResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutter_geom::{MmPoint, PlanePoint, WorkArea};
    use cutter_planner::{PlannerCall, SimPlanner};
    use proptest::prelude::*;

    struct Rig {
        interp: Interpreter,
        planner: PlannerAdapter<SimPlanner>,
        config: MachineConfig,
        waits: u32,
    }

    impl Rig {
        fn new() -> Self {
            let config = crate::ConfigBuilder::default()
                .with_speed(100)
                .with_work_area(WorkArea::new(
                    PlanePoint::new(0, 0),
                    PlanePoint::new(100_000, 50_000),
                ))
                .build();
            let planner = PlannerAdapter::new(SimPlanner::new(16));
            let mut interp = Interpreter::new(&config);
            interp.reset();
            Rig {
                interp,
                planner,
                config,
                waits: 0,
            }
        }

        fn feed(&mut self, words: &[i32], mode: Mode) -> Vec<FeedResult> {
            let waits = &mut self.waits;
            words
                .iter()
                .map(|&w| {
                    self.interp
                        .feed(w, mode, &mut self.planner, &self.config, |_| {
                            *waits += 1;
                            Ok(())
                        })
                        .unwrap()
                })
                .collect()
        }

        fn pushed(&self) -> Vec<Action> {
            self.planner.planner().pushed().copied().collect()
        }
    }

    #[test]
    fn plain_move() {
        let mut rig = Rig::new();
        rig.feed(&[0, 1000, 2000], Mode::Run);
        let pushed = rig.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].target, MmPoint::new(1.0, 2.0, 0.0));
        assert_eq!(pushed[0].kind, ActionKind::Move);
        assert_eq!(pushed[0].feed_rate, 6000.0);
    }

    #[test]
    fn power_parameter() {
        let mut rig = Rig::new();
        rig.feed(&[7, 101, 500], Mode::Run);
        assert!(rig.planner.planner().calls().is_empty());

        rig.feed(&[1, 10, 10], Mode::Run);
        let pushed = rig.pushed();
        assert_eq!(pushed[0].kind, ActionKind::Laser);
        assert_eq!(pushed[0].power, 500);
    }

    #[test]
    fn mark_speed_is_clamped() {
        let mut rig = Rig::new();
        rig.feed(&[7, 100, 5000], Mode::Run);
        assert_eq!(rig.interp.mark_speed(), 50);
        rig.feed(&[7, 100, -3], Mode::Run);
        assert_eq!(rig.interp.mark_speed(), 1);
        rig.feed(&[7, 100, 20_000], Mode::Run);
        assert_eq!(rig.interp.mark_speed(), 100);

        rig.feed(&[7, 100, 2500, 1, 5, 5], Mode::Run);
        assert_eq!(rig.pushed()[0].feed_rate, 60.0 * 25.0);
    }

    #[test]
    fn test_mode_never_fires() {
        let mut rig = Rig::new();
        rig.feed(&[1, 10, 10, 0, 20, 20], Mode::Test);
        let kinds: Vec<_> = rig.pushed().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Move, ActionKind::Move]);
        // Lines still go at marking speed.
        assert_eq!(rig.pushed()[0].feed_rate, 6000.0);
    }

    #[test]
    fn simulate_checks_lines_only() {
        let mut rig = Rig::new();
        let results = rig.feed(&[0, 200_000, 10, 1, 200_000, 10], Mode::Simulate);
        assert_eq!(results[2], FeedResult::Continue);
        assert_eq!(
            results[5],
            FeedResult::Reject(BoundsViolation {
                target: PlanePoint::new(200_000, 10)
            })
        );
        assert!(rig.planner.planner().calls().is_empty());

        // The interpreter is still usable afterwards.
        let results = rig.feed(&[1, 100, 100], Mode::Simulate);
        assert_eq!(results[2], FeedResult::Continue);
    }

    #[test]
    fn z_moves_and_set_position() {
        let mut rig = Rig::new();
        rig.feed(&[2, 3000], Mode::Run);
        rig.feed(&[0, 1000, 1000], Mode::Run);
        let pushed = rig.pushed();
        assert_eq!(pushed[0].target.z, 3.0);
        assert_eq!(pushed[1].target, MmPoint::new(1.0, 1.0, 3.0));

        rig.planner.planner_mut().complete_all();
        rig.feed(&[4, 5, 6, 7], Mode::Run);
        assert_eq!(rig.waits, 1);
        assert_eq!(
            rig.planner.planner().calls().last(),
            Some(&PlannerCall::SetPosition(MmPoint::new(0.005, 0.006, 0.007)))
        );
        assert_eq!(rig.planner.get_position(), Position::new(5, 6, 7));
    }

    #[test]
    fn set_position_is_skipped_when_simulating() {
        let mut rig = Rig::new();
        rig.feed(&[4, 5, 6, 7], Mode::Simulate);
        assert!(rig.planner.planner().calls().is_empty());
        assert_eq!(rig.waits, 0);
    }

    #[test]
    fn bitmap_goes_to_the_next_line() {
        let mut rig = Rig::new();
        let results = rig.feed(&[9, 1, 48, 0x0f0f, 0xf0f0], Mode::Run);
        assert_eq!(rig.waits, 1);
        assert_eq!(results[4], FeedResult::ConsumedBitmapUpload);
        assert!(rig.interp.bitmap().is_enabled());

        // A travel move doesn't use up the bitmap.
        rig.feed(&[0, 0, 0, 1, 6000, 0, 1, 0, 0], Mode::Run);
        let kinds: Vec<_> = rig.pushed().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Move, ActionKind::BitmapRun, ActionKind::Laser]
        );
        assert_eq!(rig.interp.bitmap().words(), &[0x0f0f, 0xf0f0]);
    }

    #[test]
    fn bitmap_in_test_mode() {
        let mut rig = Rig::new();
        rig.feed(&[9, 8, 4, 0x01020304, 1, 10, 0], Mode::Test);
        assert_eq!(rig.pushed()[0].kind, ActionKind::BitmapTest);
    }

    #[test]
    fn failed_wait_leaves_the_word() {
        let mut rig = Rig::new();
        rig.feed(&[9, 1], Mode::Run);
        let err = rig
            .interp
            .feed(32, Mode::Run, &mut rig.planner, &rig.config, |_| {
                Err(MotionError::Cancelled)
            });
        assert_eq!(err, Err(MotionError::Cancelled));
        assert!(rig.interp.decoder().awaiting_bitmap_width());
    }

    #[test]
    fn origin_offsets_targets() {
        let mut rig = Rig::new();
        rig.planner.set_position(Position::new(40_000, 30_000, 0));
        rig.planner.set_origin();
        rig.feed(&[0, 0, 0], Mode::Run);
        assert_eq!(rig.pushed()[0].target, MmPoint::new(40.0, 30.0, 0.0));
    }

    #[test]
    fn z_follows_the_planner() {
        let mut rig = Rig::new();
        // Someone else moved Z, and the interpreter didn't see it.
        rig.planner.set_position(Position::new(0, 0, 4000));
        rig.feed(&[0, 1000, 2000], Mode::Run);
        assert_eq!(rig.pushed()[0].target, MmPoint::new(1.0, 2.0, 4.0));
    }

    #[test]
    fn targets_out_of_range() {
        let mut rig = Rig::new();
        rig.planner.set_position(Position::new(1000, 0, 1000));
        rig.planner.set_origin();
        for mode in [Mode::Simulate, Mode::Test, Mode::Run] {
            let mut results = Vec::new();
            for w in [1, i32::MAX, 0] {
                results.push(rig.interp.feed(w, mode, &mut rig.planner, &rig.config, |_| Ok(())));
            }
            assert_eq!(results[2], Err(MotionError::OutOfRange));

            let last = rig
                .interp
                .feed(2, mode, &mut rig.planner, &rig.config, |_| Ok(()))
                .and_then(|_| {
                    rig.interp
                        .feed(i32::MAX, mode, &mut rig.planner, &rig.config, |_| Ok(()))
                });
            assert_eq!(last, Err(MotionError::OutOfRange));
        }
        assert!(rig.planner.planner().calls().iter().all(|c| !matches!(c, PlannerCall::Push(_))));

        // The command was consumed, so the stream carries on.
        rig.feed(&[0, -1000, 0], Mode::Run);
        assert_eq!(rig.pushed()[0].target, MmPoint::new(0.0, 0.0, 1.0));
    }

    proptest! {
        // Garbage never reaches the planner.
        #[test]
        fn unknown_opcodes_dont_move(word in any::<i32>().prop_filter("unknown", |w| Opcode::from_word(*w).is_none())) {
            let mut rig = Rig::new();
            let results = rig.feed(&[word], Mode::Run);
            assert_eq!(results, vec![FeedResult::Continue]);
            assert_eq!(rig.interp.decoder().command_state().step, 0);
            assert!(rig.planner.planner().calls().is_empty());
        }

        #[test]
        fn simulated_bounds(x in -50_000..150_000i32, y in -50_000..100_000i32) {
            let mut rig = Rig::new();
            let results = rig.feed(&[1, x, y], Mode::Simulate);
            let inside = (0..=100_000).contains(&x) && (0..=50_000).contains(&y);
            assert_eq!(results[2] == FeedResult::Continue, inside);
            assert!(rig.planner.planner().calls().is_empty());
        }
    }
}
