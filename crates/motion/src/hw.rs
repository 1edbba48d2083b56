//! The pins and timers that the engine needs.
//!
//! Pins are addressed by what they do rather than by number, and are accessed
//! through `&self`: the jog interrupt writes step outputs and reads endstops
//! while the foreground owns the engine, so implementations have to be
//! interrupt-safe (which single register writes usually are).

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Input {
    XHome,
    YHome,
    ZMin,
    ZMax,
    XEndstop,
    YEndstop,
    /// High when the cover is closed.
    Cover,
}

impl Input {
    pub const COUNT: usize = 7;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Output {
    XStep,
    XDir,
    YStep,
    YDir,
    ZStep,
    ZDir,
    /// Motor driver enable.
    Enable,
    Laser,
    /// Active low: pulling it down bypasses the interlock circuit.
    SafetyOverride,
    XHomeLed,
    YHomeLed,
    Heartbeat,
}

impl Output {
    pub const COUNT: usize = 12;
}

pub trait Hardware: Sync {
    fn read(&self, input: Input) -> bool;

    fn write(&self, output: Output, level: bool);

    /// Enables the internal pull-up on an input.
    fn pull_up(&self, input: Input);
}

impl<H: Hardware> Hardware for &H {
    fn read(&self, input: Input) -> bool {
        (**self).read(input)
    }

    fn write(&self, output: Output, level: bool) {
        (**self).write(output, level)
    }

    fn pull_up(&self, input: Input) {
        (**self).pull_up(input)
    }
}

/// The periodic interrupt used for jogging.
pub trait TickTimer {
    /// Starts calling the jog interrupt every `period_us` microseconds. If it's
    /// already running, the period changes.
    fn attach(&mut self, period_us: u32);

    fn detach(&mut self);
}
