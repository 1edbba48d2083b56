//! Storage for one line of raster data.
//!
//! A bitmap upload fills the buffer, and the next laser move consumes it: the
//! planner fires the pixels along that move. The buffer itself knows nothing
//! about pulse timing.

use cutter_protocol::bitmap_words;

pub const BITMAP_PIXELS: usize = 8192;
pub const BITMAP_WORDS: usize = BITMAP_PIXELS / 32;

pub struct BitmapBuffer {
    // A ring: uploads longer than the buffer wrap around.
    words: [u32; BITMAP_WORDS],
    bpp: u32,
    width: u32,
    expected: u32,
    written: u32,
    enabled: bool,
}

impl Default for BitmapBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapBuffer {
    pub fn new() -> Self {
        BitmapBuffer {
            words: [0; BITMAP_WORDS],
            bpp: 1,
            width: 0,
            expected: 0,
            written: 0,
            enabled: false,
        }
    }

    pub fn begin_upload(&mut self, bpp: u32, width: u32) {
        self.bpp = bpp;
        self.width = width;
        self.expected = bitmap_words(bpp, width);
        self.written = 0;
        self.enabled = self.expected == 0;
        log::debug!(
            "bitmap upload: {width} pixels at {bpp} bpp, {} words",
            self.expected
        );
    }

    /// Stores the next payload word. Returns false (and drops the word) if the
    /// upload is already complete.
    pub fn write_word(&mut self, value: u32) -> bool {
        if self.written >= self.expected {
            return false;
        }
        self.words[self.written as usize % BITMAP_WORDS] = value;
        self.written += 1;
        if self.is_complete() {
            self.enabled = true;
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.expected
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Hands the bitmap to a laser move. Returns whether there was one.
    pub fn take(&mut self) -> bool {
        core::mem::replace(&mut self.enabled, false)
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn words(&self) -> &[u32] {
        let len = (self.written as usize).min(BITMAP_WORDS);
        &self.words[..len]
    }
}
