//! The cover interlock and the endstops.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hw::{Hardware, Input, Output};
use crate::MachineConfig;

#[derive(Clone, Copy, Debug)]
struct EndstopConfig {
    x_polarity: bool,
    y_polarity: bool,
    x_has_endstop: bool,
    y_has_endstop: bool,
}

/// Watches the interlock and endstop inputs.
///
/// Reaching an endstop is sticky: the jog interrupt latches it as soon as it
/// sees it, so a short pulse that happens between two foreground polls isn't
/// lost. Only [`clear_endstop`](Self::clear_endstop) resets the latch.
pub struct SafetyMonitor {
    endstops: EndstopConfig,
    latched: AtomicBool,
    overridden: AtomicBool,
    cover_opened: AtomicBool,
}

impl SafetyMonitor {
    pub fn new(config: &MachineConfig) -> Self {
        SafetyMonitor {
            endstops: EndstopConfig {
                x_polarity: config.x.polarity,
                y_polarity: config.y.polarity,
                x_has_endstop: config.x.has_endstop,
                y_has_endstop: config.y.has_endstop,
            },
            latched: AtomicBool::new(false),
            overridden: AtomicBool::new(false),
            cover_opened: AtomicBool::new(false),
        }
    }

    /// Is the cover closed? Also remembers if it wasn't.
    pub fn is_start_allowed(&self, hw: &impl Hardware) -> bool {
        let closed = hw.read(Input::Cover);
        if !closed {
            self.cover_opened.store(true, Ordering::Release);
        }
        closed
    }

    /// Has the cover been seen open since the last
    /// [`take_cover_opened`](Self::take_cover_opened)?
    pub fn cover_opened(&self) -> bool {
        self.cover_opened.load(Ordering::Acquire)
    }

    /// Like [`cover_opened`](Self::cover_opened), but also forgets about it.
    pub fn take_cover_opened(&self) -> bool {
        self.cover_opened.swap(false, Ordering::AcqRel)
    }

    /// Reads the home switches and endstops right now, ignoring the latch.
    pub fn endstop_test(&self, hw: &impl Hardware) -> bool {
        let e = &self.endstops;
        hw.read(Input::XHome) == e.x_polarity
            || hw.read(Input::YHome) == e.y_polarity
            || (e.x_has_endstop && hw.read(Input::XEndstop) == e.x_polarity)
            || (e.y_has_endstop && hw.read(Input::YEndstop) == e.y_polarity)
    }

    /// Tests the endstops and latches the result. Safe to call from the jog
    /// interrupt.
    pub fn latch_if_reached(&self, hw: &impl Hardware) -> bool {
        let reached = self.endstop_test(hw);
        if reached {
            self.latched.store(true, Ordering::Release);
        }
        reached
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    pub fn endstop_reached(&self, hw: &impl Hardware) -> bool {
        self.is_latched() || self.endstop_test(hw)
    }

    pub fn clear_endstop(&self) {
        log::info!("endstop cleared");
        self.latched.store(false, Ordering::Release);
    }

    pub fn override_safety(&self, hw: &impl Hardware, enable: bool) {
        log::debug!("safety override {}", if enable { "on" } else { "off" });
        self.overridden.store(enable, Ordering::Release);
        hw.write(Output::SafetyOverride, !enable);
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden.load(Ordering::Acquire)
    }

    /// Overrides the safety circuit until the returned guard is dropped.
    pub fn guard<'a, H: Hardware>(&'a self, hw: &'a H) -> SafetyOverride<'a, H> {
        self.override_safety(hw, true);
        SafetyOverride { monitor: self, hw }
    }
}

/// Keeps the safety override asserted while alive.
#[must_use]
pub struct SafetyOverride<'a, H: Hardware> {
    monitor: &'a SafetyMonitor,
    hw: &'a H,
}

impl<'a, H: Hardware> Drop for SafetyOverride<'a, H> {
    fn drop(&mut self) {
        self.monitor.override_safety(self.hw, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHardware;
    use crate::{AxisConfig, ConfigBuilder};
    use crate::jog::Axis;

    fn monitor() -> (SafetyMonitor, SimHardware) {
        let config = ConfigBuilder::default()
            .with_axis(
                Axis::X,
                AxisConfig {
                    has_endstop: true,
                    ..AxisConfig::default()
                },
            )
            .build();
        (SafetyMonitor::new(&config), SimHardware::new())
    }

    #[test]
    fn latch_survives_the_sensor() {
        let (safety, hw) = monitor();
        assert!(!safety.endstop_reached(&hw));

        // A short pulse on the home switch, seen by the interrupt.
        hw.set_input(Input::YHome, false);
        assert!(safety.latch_if_reached(&hw));
        hw.set_input(Input::YHome, true);

        assert!(!safety.endstop_test(&hw));
        assert!(safety.endstop_reached(&hw));

        safety.clear_endstop();
        assert!(!safety.endstop_reached(&hw));
    }

    #[test]
    fn clearing_doesnt_hide_a_live_endstop() {
        let (safety, hw) = monitor();
        hw.set_input(Input::XEndstop, false);
        safety.latch_if_reached(&hw);
        safety.clear_endstop();
        assert!(!safety.is_latched());
        assert!(safety.endstop_reached(&hw));
    }

    #[test]
    fn endstop_inputs_are_optional() {
        let (safety, hw) = monitor();
        // Y has no endstop configured, so its input is ignored.
        hw.set_input(Input::YEndstop, false);
        assert!(!safety.endstop_test(&hw));
    }

    #[test]
    fn cover_opening_is_remembered() {
        let (safety, hw) = monitor();
        assert!(safety.is_start_allowed(&hw));
        assert!(!safety.take_cover_opened());

        hw.set_input(Input::Cover, false);
        assert!(!safety.is_start_allowed(&hw));
        hw.set_input(Input::Cover, true);
        assert!(safety.is_start_allowed(&hw));
        assert!(safety.cover_opened());
        assert!(safety.take_cover_opened());
        assert!(!safety.cover_opened());
        assert!(!safety.take_cover_opened());
    }

    #[test]
    fn override_guard() {
        let (safety, hw) = monitor();
        {
            let _guard = safety.guard(&hw);
            assert!(safety.is_overridden());
            assert!(!hw.output(Output::SafetyOverride));
        }
        assert!(!safety.is_overridden());
        assert!(hw.output(Output::SafetyOverride));
    }
}
