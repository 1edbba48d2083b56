use crate::{bitmap_words, Command, Opcode};

/// Where the decoder is inside the current command.
///
/// `step` is the number of argument words consumed so far, and is only
/// meaningful while `opcode` is set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandState {
    pub opcode: Option<Opcode>,
    pub step: u32,
    pub scratch: [i32; 3],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    AwaitingOpcode,
    // A command with a fixed number of arguments, `got` of which we've seen.
    Args {
        opcode: Opcode,
        got: u32,
        scratch: [i32; 3],
    },
    BitmapBpp,
    BitmapWidth {
        bpp: u32,
    },
    BitmapData {
        index: u32,
        total: u32,
    },
}

/// The result of feeding one word to the [`Decoder`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// The word was consumed, but the command isn't finished yet.
    Pending,
    Command(Command),
    /// The header of a bitmap upload; `words` payload words follow. If `words`
    /// is zero, the upload is already finished.
    BitmapHeader { bpp: u32, width: u32, words: u32 },
    /// One payload word of a bitmap upload.
    BitmapWord { index: u32, value: u32, last: bool },
    /// The word isn't an opcode. It's dropped, and the next word is treated
    /// as an opcode.
    Unknown(i32),
}

/// A pull parser for the job word stream: feed it one word at a time.
#[derive(Clone, Debug)]
pub struct Decoder {
    state: State,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            state: State::AwaitingOpcode,
        }
    }

    /// Forgets any partially-decoded command.
    pub fn reset(&mut self) {
        self.state = State::AwaitingOpcode;
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingOpcode
    }

    /// Is the next word the width of a bitmap upload? The width is what fixes
    /// the size of the upload, so callers use this to make sure that nothing
    /// is still using the previous bitmap.
    pub fn awaiting_bitmap_width(&self) -> bool {
        matches!(self.state, State::BitmapWidth { .. })
    }

    pub fn command_state(&self) -> CommandState {
        match self.state {
            State::AwaitingOpcode => CommandState::default(),
            State::Args {
                opcode,
                got,
                scratch,
            } => CommandState {
                opcode: Some(opcode),
                step: got,
                scratch,
            },
            State::BitmapBpp => CommandState {
                opcode: Some(Opcode::Bitmap),
                step: 0,
                scratch: [0; 3],
            },
            State::BitmapWidth { bpp } => CommandState {
                opcode: Some(Opcode::Bitmap),
                step: 1,
                scratch: [bpp as i32, 0, 0],
            },
            State::BitmapData { index, total } => CommandState {
                opcode: Some(Opcode::Bitmap),
                step: 2 + index,
                scratch: [0, total as i32, 0],
            },
        }
    }

    pub fn push(&mut self, word: i32) -> Decoded {
        match self.state {
            State::AwaitingOpcode => self.start(word),
            State::Args {
                opcode,
                got,
                mut scratch,
            } => {
                scratch[got as usize] = word;
                let got = got + 1;
                if Some(got) == opcode.arg_count() {
                    self.state = State::AwaitingOpcode;
                    Decoded::Command(finish(opcode, scratch))
                } else {
                    self.state = State::Args {
                        opcode,
                        got,
                        scratch,
                    };
                    Decoded::Pending
                }
            }
            State::BitmapBpp => {
                self.state = State::BitmapWidth {
                    bpp: word.max(0) as u32,
                };
                Decoded::Pending
            }
            State::BitmapWidth { bpp } => {
                let width = word.max(0) as u32;
                let words = bitmap_words(bpp, width);
                self.state = if words == 0 {
                    State::AwaitingOpcode
                } else {
                    State::BitmapData {
                        index: 0,
                        total: words,
                    }
                };
                Decoded::BitmapHeader { bpp, width, words }
            }
            State::BitmapData { index, total } => {
                let last = index + 1 == total;
                self.state = if last {
                    State::AwaitingOpcode
                } else {
                    State::BitmapData {
                        index: index + 1,
                        total,
                    }
                };
                Decoded::BitmapWord {
                    index,
                    value: word as u32,
                    last,
                }
            }
        }
    }

    fn start(&mut self, word: i32) -> Decoded {
        let Some(opcode) = Opcode::from_word(word) else {
            return Decoded::Unknown(word);
        };
        match opcode.arg_count() {
            None => {
                self.state = State::BitmapBpp;
                Decoded::Pending
            }
            Some(0) => Decoded::Command(finish(opcode, [0; 3])),
            Some(_) => {
                self.state = State::Args {
                    opcode,
                    got: 0,
                    scratch: [0; 3],
                };
                Decoded::Pending
            }
        }
    }
}

fn finish(opcode: Opcode, args: [i32; 3]) -> Command {
    let [a, b, c] = args;
    match opcode {
        Opcode::Move => Command::Move { x: a, y: b },
        Opcode::Line => Command::Line { x: a, y: b },
        Opcode::MoveZ => Command::MoveZ { z: a },
        Opcode::SetPosition => Command::SetPosition { x: a, y: b, z: c },
        Opcode::Nop => Command::Nop,
        Opcode::SetParam => Command::SetParam { index: a, value: b },
        // Bitmaps never go through the fixed-argument path.
        Opcode::Bitmap => Command::Nop,
    }
}
