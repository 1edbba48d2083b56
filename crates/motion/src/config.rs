use cutter_geom::{AxisScale, PlanePoint, Position, WorkArea};
use serde::{Deserialize, Serialize};

use crate::jog::Axis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub scale: AxisScale,
    /// The input level at which this axis' home switch (or endstop) counts as
    /// triggered.
    pub polarity: bool,
    /// The direction output level that moves towards the home switch.
    pub home_dir: bool,
    /// Does this axis have an endstop, in addition to the home switch?
    pub has_endstop: bool,
}

impl Default for AxisConfig {
    fn default() -> Self {
        AxisConfig {
            scale: AxisScale::new(160_000),
            polarity: false,
            home_dir: false,
            has_endstop: false,
        }
    }
}

/// Everything the engine needs to know about the machine it's driving.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub x: AxisConfig,
    pub y: AxisConfig,
    pub z: AxisConfig,
    /// Travel speed, in millimeters per second. Marking speed is a fraction of
    /// this.
    pub speed: u32,
    /// The jog interrupt period at full jogging speed, in microseconds.
    pub manual_period_us: u32,
    /// Half the period of a homing step, in microseconds.
    pub home_period_us: u32,
    /// Home the Z axis before X and Y.
    pub auto_z_home: bool,
    /// The position that the home switches correspond to.
    pub home: Position,
    /// Where the head parks after homing and after a job.
    pub rest: Position,
    /// Where lines are allowed to go (checked when simulating).
    pub work_area: WorkArea,
    /// The level of the motor enable output while the machine is running.
    pub enable_level: bool,
}

impl MachineConfig {
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Travel feed rate for the planner, in millimeters per minute.
    pub fn travel_feed_rate(&self) -> f64 {
        60.0 * self.speed as f64
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

pub struct ConfigBuilder {
    config: MachineConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: MachineConfig {
                x: AxisConfig::default(),
                y: AxisConfig::default(),
                z: AxisConfig::default(),
                speed: 100,
                manual_period_us: 100,
                home_period_us: 200,
                auto_z_home: false,
                home: Position::origin(),
                rest: Position::origin(),
                work_area: WorkArea::new(
                    PlanePoint::new(0, 0),
                    PlanePoint::new(600_000, 400_000),
                ),
                enable_level: false,
            },
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> MachineConfig {
        self.config
    }

    pub fn with_axis(&mut self, axis: Axis, config: AxisConfig) -> &mut Self {
        match axis {
            Axis::X => self.config.x = config,
            Axis::Y => self.config.y = config,
            Axis::Z => self.config.z = config,
        }
        self
    }

    pub fn with_speed(&mut self, mm_per_s: u32) -> &mut Self {
        self.config.speed = mm_per_s;
        self
    }

    pub fn with_manual_period(&mut self, us: u32) -> &mut Self {
        self.config.manual_period_us = us;
        self
    }

    pub fn with_home_period(&mut self, us: u32) -> &mut Self {
        self.config.home_period_us = us;
        self
    }

    pub fn with_auto_z_home(&mut self, enabled: bool) -> &mut Self {
        self.config.auto_z_home = enabled;
        self
    }

    pub fn with_home(&mut self, home: Position) -> &mut Self {
        self.config.home = home;
        self
    }

    pub fn with_rest(&mut self, rest: Position) -> &mut Self {
        self.config.rest = rest;
        self
    }

    pub fn with_work_area(&mut self, area: WorkArea) -> &mut Self {
        self.config.work_area = area;
        self
    }

    pub fn with_enable_level(&mut self, level: bool) -> &mut Self {
        self.config.enable_level = level;
        self
    }
}
