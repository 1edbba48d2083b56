//! The motion engine of the cutter.
//!
//! This sits between whoever is driving the machine (the menu, or an
//! unattended job runner) and the trajectory planner. It decodes job streams,
//! handles raster uploads, jogs axes by hand, homes the machine, and keeps an
//! eye on the cover interlock and the endstops while doing all of that.
//!
//! There's exactly one piece of concurrency: the periodic interrupt that
//! steps an axis while jogging. Everything that the interrupt touches lives in
//! [`Shared`], and is either atomic or behind the `&self` methods of
//! [`Hardware`]. The rest of the engine belongs to the foreground loop.

use cutter_geom::PlanePoint;
use cutter_planner::QueueFull;

pub mod bitmap;
pub mod config;
pub mod engine;
pub mod homing;
pub mod hw;
pub mod interpreter;
pub mod jog;
pub mod poll;
pub mod runner;
pub mod safety;
pub mod sim;

pub use config::{AxisConfig, ConfigBuilder, MachineConfig};
pub use engine::Engine;
pub use homing::{HomingOutcome, HomingPhase, HomingSession};
pub use hw::{Hardware, Input, Output, TickTimer};
pub use jog::{Axis, Direction, JogIsr, JogStatus};
pub use poll::Cancel;
pub use runner::JobOutcome;
pub use safety::{SafetyMonitor, SafetyOverride};

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MotionError {
    #[error("the planner queue is full")]
    QueueFull,
    #[error("the machine needs to be at a stand-still")]
    Busy,
    #[error("an endstop was reached")]
    EndstopReached,
    #[error("the cover is open")]
    CoverOpen,
    #[error("cancelled")]
    Cancelled,
    #[error("the target is out of range")]
    OutOfRange,
}

impl From<QueueFull> for MotionError {
    fn from(_: QueueFull) -> Self {
        MotionError::QueueFull
    }
}

/// A line that would leave the working area.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoundsViolation {
    /// The absolute target of the offending line.
    pub target: PlanePoint,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeedResult {
    Continue,
    /// Only happens when simulating: the job isn't valid at this point.
    Reject(BoundsViolation),
    /// The last word of a bitmap upload was accepted.
    ConsumedBitmapUpload,
}

/// The state that the jog interrupt shares with the foreground.
///
/// On the real machine this lives in a `static`, and the timer interrupt calls
/// [`Shared::on_jog_tick`].
pub struct Shared<H> {
    pub hw: H,
    pub safety: SafetyMonitor,
    pub jog: JogIsr,
}

impl<H: Hardware> Shared<H> {
    pub fn new(hw: H, config: &MachineConfig) -> Self {
        Shared {
            hw,
            safety: SafetyMonitor::new(config),
            jog: JogIsr::new(),
        }
    }

    pub fn on_jog_tick(&self) {
        self.jog.on_tick(&self.hw, &self.safety);
    }
}
