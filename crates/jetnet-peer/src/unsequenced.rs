//! Duplicate suppression for unsequenced commands using a sliding window.
//!
//! Every unsequenced command carries a group id, one higher than the last the
//! sender used. The receiver remembers which groups it has seen in a bitmap
//! covering `unsequenced_window_size` groups starting at an aligned base:
//! - a group past the end of the window rebases the window on it and forgets
//!   everything older
//! - a group before the base, or whose bit is already set, is a duplicate
//!
//! Group ids are 32 bits and compared without wrapping.

/// Sliding-window state for unsequenced groups, plus the outgoing group counter.
#[derive(Debug, Clone)]
pub struct UnsequencedState {
    /// First group covered by the window.
    incoming_unsequenced_group: u32,
    /// One bit per group in the window.
    unsequenced_window: Vec<u32>,
    /// Last group id handed out for sending.
    outgoing_unsequenced_group: u32,
}

impl UnsequencedState {
    /// Creates an empty window covering `window_size` groups (rounded up to a multiple of 32).
    pub fn new(window_size: u32) -> Self {
        let words = (window_size.max(32) as usize).div_ceil(32);
        Self { incoming_unsequenced_group: 0, unsequenced_window: vec![0; words], outgoing_unsequenced_group: 0 }
    }

    fn window_size(&self) -> u32 {
        self.unsequenced_window.len() as u32 * 32
    }

    /// Claims the next outgoing group id.
    pub fn next_outgoing_group(&mut self) -> u32 {
        self.outgoing_unsequenced_group = self.outgoing_unsequenced_group.wrapping_add(1);
        self.outgoing_unsequenced_group
    }

    /// Returns the current incoming window base.
    pub fn incoming_group(&self) -> u32 {
        self.incoming_unsequenced_group
    }

    /// Records `group` as received. Returns false if it is a duplicate or too old.
    pub fn accept(&mut self, group: u32) -> bool {
        let window_size = self.window_size();
        let index = group % window_size;

        if group as u64 >= self.incoming_unsequenced_group as u64 + window_size as u64 {
            self.incoming_unsequenced_group = group - index;
            self.unsequenced_window.fill(0);
        } else if group < self.incoming_unsequenced_group || self.is_marked(index) {
            return false;
        }

        self.unsequenced_window[(index / 32) as usize] |= 1 << (index % 32);
        true
    }

    fn is_marked(&self, index: u32) -> bool {
        self.unsequenced_window[(index / 32) as usize] & (1 << (index % 32)) != 0
    }

    /// Forgets all groups and restarts both counters.
    pub fn reset(&mut self) {
        self.incoming_unsequenced_group = 0;
        self.outgoing_unsequenced_group = 0;
        self.unsequenced_window.fill(0);
    }
}
