use cutter_motion::sim::SimHardware;
use cutter_motion::{Hardware, Input, MachineConfig, Output};

/// A machine on the bench: no head, no switches, just outputs going nowhere.
///
/// The home switches are faked. While the safety circuit is overridden (which
/// only happens during homing), a switch reads as triggered once its axis has
/// taken `travel` steps. The rest of the time, every switch reads as released.
pub struct Bench {
    pub io: SimHardware,
    travel: u32,
    x_polarity: bool,
    y_polarity: bool,
    z_polarity: bool,
}

impl Bench {
    pub fn new(config: &MachineConfig, travel: u32) -> Self {
        Bench {
            io: SimHardware::new(),
            travel,
            x_polarity: config.x.polarity,
            y_polarity: config.y.polarity,
            z_polarity: config.z.polarity,
        }
    }

    fn homing(&self) -> bool {
        !self.io.output(Output::SafetyOverride)
    }

    fn switch(&self, step: Output, polarity: bool) -> bool {
        let triggered = self.homing() && self.io.rising_edges(step) >= self.travel;
        if triggered {
            polarity
        } else {
            !polarity
        }
    }
}

impl Hardware for Bench {
    fn read(&self, input: Input) -> bool {
        match input {
            Input::XHome => self.switch(Output::XStep, self.x_polarity),
            Input::YHome => self.switch(Output::YStep, self.y_polarity),
            Input::ZMin => self.switch(Output::ZStep, self.z_polarity),
            Input::XEndstop => !self.x_polarity,
            Input::YEndstop => !self.y_polarity,
            Input::ZMax => !self.z_polarity,
            Input::Cover => self.io.read(Input::Cover),
        }
    }

    fn write(&self, output: Output, level: bool) {
        self.io.write(output, level)
    }

    fn pull_up(&self, input: Input) {
        self.io.pull_up(input)
    }
}
