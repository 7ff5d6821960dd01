//! Replay Window for Packet Id Deduplication
//!
//! Sliding bitmap over the most recent packet ids of one receive direction.
//! Ids are grouped into epochs by their sender timestamp:
//!
//! - a newer timestamp starts a fresh epoch and is accepted
//! - an older timestamp is rejected outright
//! - within the current epoch any id above the highest seen is accepted,
//!   an id up to `size - 1` below it is accepted once, anything older is
//!   rejected
//!
//! Testing and recording are separate steps so a packet that later fails
//! authentication never moves the window.

use tracing::{debug, trace};

/// Default window size in packets
pub const DEFAULT_WINDOW_SIZE: usize = 64;

/// Largest configurable window
pub const MAX_WINDOW_SIZE: usize = 65536;

/// Bitmap replay window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayWindow {
    /// One bit per slot, slot = id mod size
    bits: Vec<u64>,
    /// Window size in packets
    size: usize,
    /// Highest id accepted in the current epoch, 0 before the first packet
    highest_id: u32,
    /// Timestamp of the current epoch
    time: u32,
}

impl ReplayWindow {
    /// Create a window of [`DEFAULT_WINDOW_SIZE`] packets
    pub fn new() -> Self {
        Self::with_size(DEFAULT_WINDOW_SIZE)
    }

    /// Create a window of `size` packets, clamped into `1..=MAX_WINDOW_SIZE`
    pub fn with_size(size: usize) -> Self {
        let size = size.clamp(1, MAX_WINDOW_SIZE);
        Self {
            bits: vec![0u64; size.div_ceil(64)],
            size,
            highest_id: 0,
            time: 0,
        }
    }

    /// Would `(id, time)` be accepted? Does not modify the window.
    pub fn test(&self, id: u32, time: u32) -> bool {
        if id == 0 {
            trace!("packet id 0 is never valid");
            return false;
        }

        if self.highest_id == 0 || time > self.time {
            return true;
        }

        if time < self.time {
            trace!(time, epoch = self.time, "packet id timestamp went backwards");
            return false;
        }

        if id > self.highest_id {
            return true;
        }

        let diff = (self.highest_id - id) as usize;
        if diff >= self.size {
            trace!(id, highest = self.highest_id, "packet id outside replay window");
            return false;
        }

        !self.is_set(id)
    }

    /// Record `(id, time)` as seen. Call only after [`test`](Self::test)
    /// passed and the packet authenticated.
    pub fn add(&mut self, id: u32, time: u32) {
        if id == 0 || time < self.time {
            return;
        }

        if self.highest_id == 0 || time > self.time {
            self.clear_bits();
            self.time = time;
            self.highest_id = id;
        } else if id > self.highest_id {
            let gap = (id - self.highest_id) as usize;
            if gap >= self.size {
                self.clear_bits();
            } else {
                for slot_id in self.highest_id + 1..id {
                    self.clear(slot_id);
                }
            }
            self.highest_id = id;
        } else if ((self.highest_id - id) as usize) >= self.size {
            return;
        }

        self.set(id);
    }

    /// Test and record in one step
    pub fn check_and_add(&mut self, id: u32, time: u32) -> bool {
        if !self.test(id, time) {
            return false;
        }
        self.add(id, time);
        true
    }

    /// Forget everything, e.g. after a key change
    pub fn reset(&mut self) {
        self.clear_bits();
        self.highest_id = 0;
        self.time = 0;
        debug!(size = self.size, "Replay window reset");
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Current window statistics
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            size: self.size,
            highest_id: self.highest_id,
            epoch: self.time,
        }
    }

    fn slot(&self, id: u32) -> (usize, u64) {
        let slot = id as usize % self.size;
        (slot / 64, 1u64 << (slot % 64))
    }

    fn is_set(&self, id: u32) -> bool {
        let (word, mask) = self.slot(id);
        self.bits[word] & mask != 0
    }

    fn set(&mut self, id: u32) {
        let (word, mask) = self.slot(id);
        self.bits[word] |= mask;
    }

    fn clear(&mut self, id: u32) {
        let (word, mask) = self.slot(id);
        self.bits[word] &= !mask;
    }

    fn clear_bits(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the replay window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    /// Window size in packets
    pub size: usize,
    /// Highest id seen in the current epoch
    pub highest_id: u32,
    /// Timestamp of the current epoch
    pub epoch: u32,
}
