//! The job format understood by the cutter.
//!
//! A job is a flat sequence of 32-bit signed integers ("words"). The first
//! word of every command is its opcode, and the opcode determines how many
//! argument words follow. Coordinates are in micrometers, relative to the
//! current origin.
//!
//! | opcode | arguments          | meaning                          |
//! |--------|--------------------|----------------------------------|
//! | 0      | x, y               | move with the laser off          |
//! | 1      | x, y               | line (move with the laser on)    |
//! | 2      | z                  | move the Z axis                  |
//! | 4      | x, y, z            | set the absolute position        |
//! | 5      |                    | nothing                          |
//! | 7      | index, value       | set a runtime parameter          |
//! | 9      | bpp, width, data.. | upload one line of raster bitmap |

#![cfg_attr(not(feature = "std"), no_std)]

use serde::{Deserialize, Serialize};

mod decoder;

pub use decoder::{CommandState, Decoded, Decoder};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Move,
    Line,
    MoveZ,
    SetPosition,
    Nop,
    SetParam,
    Bitmap,
}

impl Opcode {
    pub fn from_word(word: i32) -> Option<Opcode> {
        match word {
            0 => Some(Opcode::Move),
            1 => Some(Opcode::Line),
            2 => Some(Opcode::MoveZ),
            4 => Some(Opcode::SetPosition),
            5 => Some(Opcode::Nop),
            7 => Some(Opcode::SetParam),
            9 => Some(Opcode::Bitmap),
            _ => None,
        }
    }

    pub fn word(self) -> i32 {
        match self {
            Opcode::Move => 0,
            Opcode::Line => 1,
            Opcode::MoveZ => 2,
            Opcode::SetPosition => 4,
            Opcode::Nop => 5,
            Opcode::SetParam => 7,
            Opcode::Bitmap => 9,
        }
    }

    /// The number of argument words following the opcode.
    ///
    /// Bitmap uploads have a two-word header followed by a payload whose length
    /// depends on the header, so they return `None`.
    pub fn arg_count(self) -> Option<u32> {
        match self {
            Opcode::Move | Opcode::Line => Some(2),
            Opcode::MoveZ => Some(1),
            Opcode::SetPosition => Some(3),
            Opcode::Nop => Some(0),
            Opcode::SetParam => Some(2),
            Opcode::Bitmap => None,
        }
    }
}

/// How a decoded move gets executed. The mode isn't part of the job stream:
/// the same job is typically simulated first, and then run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Check lines against the working area, but don't move.
    Simulate,
    /// Move, but never fire the laser.
    Test,
    /// The real thing.
    Run,
}

/// Runtime parameters that can be changed with [`Opcode::SetParam`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Param {
    /// Marking speed, in ten-thousandths of the configured base speed.
    MarkSpeed,
    /// Laser power, passed through to the planner.
    Power,
}

impl Param {
    pub fn from_index(index: i32) -> Option<Param> {
        match index {
            100 => Some(Param::MarkSpeed),
            101 => Some(Param::Power),
            _ => None,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            Param::MarkSpeed => 100,
            Param::Power => 101,
        }
    }
}

/// A fully-decoded command (other than bitmap uploads, which are streamed).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Move { x: i32, y: i32 },
    Line { x: i32, y: i32 },
    MoveZ { z: i32 },
    SetPosition { x: i32, y: i32, z: i32 },
    Nop,
    SetParam { index: i32, value: i32 },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Move { .. } => Opcode::Move,
            Command::Line { .. } => Opcode::Line,
            Command::MoveZ { .. } => Opcode::MoveZ,
            Command::SetPosition { .. } => Opcode::SetPosition,
            Command::Nop => Opcode::Nop,
            Command::SetParam { .. } => Opcode::SetParam,
        }
    }
}

/// How many 32-bit words a bitmap line of `width` pixels at `bpp` bits per
/// pixel occupies. The last word is padded.
pub fn bitmap_words(bpp: u32, width: u32) -> u32 {
    let bits = bpp as u64 * width as u64;
    u32::try_from(bits.div_ceil(32)).unwrap_or(u32::MAX)
}

#[cfg(feature = "std")]
pub fn encode(cmd: &Command) -> Vec<i32> {
    let op = cmd.opcode().word();
    match *cmd {
        Command::Move { x, y } | Command::Line { x, y } => vec![op, x, y],
        Command::MoveZ { z } => vec![op, z],
        Command::SetPosition { x, y, z } => vec![op, x, y, z],
        Command::Nop => vec![op],
        Command::SetParam { index, value } => vec![op, index, value],
    }
}

/// Encodes a bitmap upload. `data` should contain exactly
/// `bitmap_words(bpp, width)` words.
#[cfg(feature = "std")]
pub fn encode_bitmap(bpp: u32, width: u32, data: &[u32]) -> Vec<i32> {
    let mut ret = vec![Opcode::Bitmap.word(), bpp as i32, width as i32];
    ret.extend(data.iter().map(|&w| w as i32));
    ret
}

/// Splits the contents of a job file into words. Job files are written in the
/// controller's native byte order; a trailing partial word is ignored.
#[cfg(feature = "std")]
pub fn read_words(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(feature = "std")]
pub fn write_words(words: &[i32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}
