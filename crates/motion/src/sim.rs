//! A machine made of atomics, for running jobs without hardware (and for
//! testing).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::hw::{Hardware, Input, Output, TickTimer};

pub struct SimHardware {
    inputs: [AtomicBool; Input::COUNT],
    pulled_up: [AtomicBool; Input::COUNT],
    outputs: [AtomicBool; Output::COUNT],
    rising_edges: [AtomicU32; Output::COUNT],
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHardware {
    /// A machine at rest: every input reads high, which means the cover is
    /// closed and (with the default active-low polarity) no switch is
    /// triggered.
    pub fn new() -> Self {
        SimHardware {
            inputs: std::array::from_fn(|_| AtomicBool::new(true)),
            pulled_up: std::array::from_fn(|_| AtomicBool::new(false)),
            outputs: std::array::from_fn(|_| AtomicBool::new(false)),
            rising_edges: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn set_input(&self, input: Input, level: bool) {
        self.inputs[input as usize].store(level, Ordering::SeqCst);
    }

    pub fn output(&self, output: Output) -> bool {
        self.outputs[output as usize].load(Ordering::SeqCst)
    }

    /// How many times `output` went from low to high.
    pub fn rising_edges(&self, output: Output) -> u32 {
        self.rising_edges[output as usize].load(Ordering::SeqCst)
    }

    pub fn is_pulled_up(&self, input: Input) -> bool {
        self.pulled_up[input as usize].load(Ordering::SeqCst)
    }
}

impl Hardware for SimHardware {
    fn read(&self, input: Input) -> bool {
        self.inputs[input as usize].load(Ordering::SeqCst)
    }

    fn write(&self, output: Output, level: bool) {
        let old = self.outputs[output as usize].swap(level, Ordering::SeqCst);
        if level && !old {
            self.rising_edges[output as usize].fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pull_up(&self, input: Input) {
        self.pulled_up[input as usize].store(true, Ordering::SeqCst);
    }
}

/// A timer that only remembers what it was told. Ticks have to be delivered
/// by hand, with [`Shared::on_jog_tick`](crate::Shared::on_jog_tick).
#[derive(Debug, Default)]
pub struct SimTimer {
    pub period_us: Option<u32>,
    pub history: Vec<u32>,
}

impl TickTimer for SimTimer {
    fn attach(&mut self, period_us: u32) {
        self.period_us = Some(period_us);
        self.history.push(period_us);
    }

    fn detach(&mut self) {
        self.period_us = None;
    }
}

/// A delay that returns immediately, after telling a callback how long it
/// was supposed to take.
pub struct SimDelay<F = fn(u32)> {
    pub elapsed_us: u64,
    on_delay: F,
}

impl SimDelay {
    pub fn new() -> Self {
        SimDelay {
            elapsed_us: 0,
            on_delay: |_| {},
        }
    }
}

impl Default for SimDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FnMut(u32)> SimDelay<F> {
    pub fn with_callback(on_delay: F) -> Self {
        SimDelay {
            elapsed_us: 0,
            on_delay,
        }
    }
}

impl<F: FnMut(u32)> DelayUs<u32> for SimDelay<F> {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
        (self.on_delay)(us);
    }
}

impl<F: FnMut(u32)> DelayMs<u32> for SimDelay<F> {
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}
