//! Running a whole job, unattended.

use cutter_planner::Planner;
use cutter_protocol::Mode;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::hw::{Hardware, TickTimer};
use crate::poll::{wait_for_idle, wait_for_ready, Cancel};
use crate::{BoundsViolation, Engine, FeedResult, MotionError};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        words: usize,
    },
    /// Simulation found a line outside the working area. `word` is the index
    /// of the word that completed the offending command.
    Rejected {
        word: usize,
        violation: BoundsViolation,
    },
}

impl<'a, P, H, T, D> Engine<'a, P, H, T, D>
where
    P: Planner,
    H: Hardware,
    T: TickTimer,
    D: DelayUs<u32> + DelayMs<u32>,
{
    pub fn run_job(
        &mut self,
        words: &[i32],
        mode: Mode,
        cancel: &mut impl Cancel,
    ) -> Result<JobOutcome, MotionError> {
        self.run_job_with_progress(words, mode, cancel, |_| {})
    }

    /// Runs a job from start to finish.
    ///
    /// Unless simulating, the machine is homed first (if it isn't already),
    /// and parked at the rest position afterwards. `progress` is told how many
    /// words have been consumed so far.
    ///
    /// If the job is cancelled, or stopped by the cover or an endstop, the
    /// queue is dropped and the engine is reset. Since the head stopped
    /// somewhere in the middle of a move, the machine needs homing again.
    pub fn run_job_with_progress(
        &mut self,
        words: &[i32],
        mode: Mode,
        cancel: &mut impl Cancel,
        mut progress: impl FnMut(usize),
    ) -> Result<JobOutcome, MotionError> {
        log::info!("running a job of {} words in {mode:?} mode", words.len());
        if mode != Mode::Simulate {
            let home = self.config.home;
            self.home_with_cancel(home, false, cancel)?;
        }
        self.interpreter.reset();

        match self.feed_job(words, mode, cancel, &mut progress) {
            Ok(outcome) => {
                log::info!("job finished: {outcome:?}");
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("job aborted: {e}");
                self.planner.clear_queue();
                self.reset();
                self.homing.invalidate();
                Err(e)
            }
        }
    }

    fn feed_job(
        &mut self,
        words: &[i32],
        mode: Mode,
        cancel: &mut impl Cancel,
        progress: &mut impl FnMut(usize),
    ) -> Result<JobOutcome, MotionError> {
        let shared = self.shared;
        for (i, &word) in words.iter().enumerate() {
            if mode == Mode::Simulate {
                if cancel.cancel_requested() {
                    return Err(MotionError::Cancelled);
                }
            } else {
                wait_for_ready(&mut self.planner, shared, cancel)?;
            }

            match self.feed_with_cancel(word, mode, cancel)? {
                FeedResult::Reject(violation) => {
                    log::warn!("word {i}: line to {:?} is outside the working area", violation.target);
                    return Ok(JobOutcome::Rejected { word: i, violation });
                }
                FeedResult::Continue | FeedResult::ConsumedBitmapUpload => progress(i + 1),
            }
        }

        if mode != Mode::Simulate {
            wait_for_idle(&mut self.planner, shared, cancel)?;
            self.move_to_rest()?;
            wait_for_idle(&mut self.planner, shared, cancel)?;
        }
        Ok(JobOutcome::Completed { words: words.len() })
    }
}
