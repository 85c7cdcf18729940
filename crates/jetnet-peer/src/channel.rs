//! Per-channel sequencing and reorder buffering.

use std::collections::VecDeque;

use jetnet_protocol::packet::Packet;

use crate::command_queue::{IncomingCommand, IncomingPayload};

/// Sequencing state of one channel of one peer.
///
/// Reliable and unreliable traffic are numbered independently. Unreliable
/// commands also carry the reliable sequence number current when they were
/// sent, so they are never delivered ahead of reliable data that preceded them.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Last reliable sequence number assigned to an outgoing command.
    pub outgoing_reliable_sequence_number: u32,
    /// Last unreliable sequence number assigned to an outgoing command.
    pub outgoing_unreliable_sequence_number: u32,
    /// Last reliable sequence number delivered to the application.
    pub incoming_reliable_sequence_number: u32,
    /// Last unreliable sequence number delivered to the application.
    pub incoming_unreliable_sequence_number: u32,
    incoming_reliable_commands: VecDeque<IncomingCommand>,
    incoming_unreliable_commands: VecDeque<IncomingCommand>,
}

impl Channel {
    /// Creates a channel with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a reliable command in sequence order. Returns false if its
    /// sequence number was already delivered or is already buffered.
    pub fn queue_reliable(&mut self, command: IncomingCommand) -> bool {
        let sequence = command.reliable_sequence_number;
        if sequence <= self.incoming_reliable_sequence_number {
            return false;
        }

        let mut position = self.incoming_reliable_commands.len();
        for (index, queued) in self.incoming_reliable_commands.iter().enumerate().rev() {
            if queued.reliable_sequence_number == sequence {
                return false;
            }
            if queued.reliable_sequence_number < sequence {
                break;
            }
            position = index;
        }
        self.incoming_reliable_commands.insert(position, command);
        true
    }

    /// Buffers an unreliable command in unreliable sequence order. Returns
    /// false if it is stale or a duplicate.
    pub fn queue_unreliable(&mut self, command: IncomingCommand) -> bool {
        let sequence = command.unreliable_sequence_number;
        if command.reliable_sequence_number < self.incoming_reliable_sequence_number
            || sequence <= self.incoming_unreliable_sequence_number
        {
            return false;
        }

        let mut position = self.incoming_unreliable_commands.len();
        for (index, queued) in self.incoming_unreliable_commands.iter().enumerate().rev() {
            if queued.unreliable_sequence_number == sequence {
                return false;
            }
            if queued.unreliable_sequence_number < sequence {
                break;
            }
            position = index;
        }
        self.incoming_unreliable_commands.insert(position, command);
        true
    }

    /// Buffers an unsequenced command ahead of any sequenced unreliable ones,
    /// so a held-back command never blocks it.
    pub fn queue_unsequenced(&mut self, command: IncomingCommand) {
        let position = self
            .incoming_unreliable_commands
            .iter()
            .position(|queued| queued.unreliable_sequence_number > 0)
            .unwrap_or(self.incoming_unreliable_commands.len());
        self.incoming_unreliable_commands.insert(position, command);
    }

    /// The buffered fragment run starting at `start_sequence_number`, if any.
    /// `Err` means the sequence number is taken by something other than a run.
    pub fn fragment_run_mut(&mut self, start_sequence_number: u32) -> Result<Option<&mut IncomingCommand>, ()> {
        match self
            .incoming_reliable_commands
            .iter_mut()
            .find(|queued| queued.reliable_sequence_number == start_sequence_number)
        {
            None => Ok(None),
            Some(queued) if matches!(queued.payload, IncomingPayload::Fragmented(_)) => Ok(Some(queued)),
            Some(_) => Err(()),
        }
    }

    /// Takes the next deliverable packet, if any.
    ///
    /// An unreliable command at the head is preferred unless it must wait for
    /// reliable data sent before it. Otherwise the head reliable command is
    /// delivered if it is complete and next in order; stale heads are dropped.
    pub fn receive(&mut self) -> Option<Packet> {
        if let Some(head) = self.incoming_unreliable_commands.front() {
            let held_back = head.unreliable_sequence_number > 0
                && head.reliable_sequence_number > self.incoming_reliable_sequence_number;
            if !held_back {
                let command = self.incoming_unreliable_commands.pop_front()?;
                if command.unreliable_sequence_number > 0 {
                    self.incoming_unreliable_sequence_number = command.unreliable_sequence_number;
                }
                return Some(command.into_packet());
            }
        }

        loop {
            let head = self.incoming_reliable_commands.front()?;
            if head.fragments_remaining() > 0
                || head.reliable_sequence_number as u64 > self.incoming_reliable_sequence_number as u64 + 1
            {
                return None;
            }
            if head.reliable_sequence_number > self.incoming_reliable_sequence_number {
                break;
            }
            self.incoming_reliable_commands.pop_front();
        }

        let command = self.incoming_reliable_commands.pop_front()?;
        self.incoming_reliable_sequence_number =
            command.reliable_sequence_number.wrapping_add(command.sequence_span() - 1);
        Some(command.into_packet())
    }

    /// Number of buffered commands of both kinds.
    pub fn pending(&self) -> usize {
        self.incoming_reliable_commands.len() + self.incoming_unreliable_commands.len()
    }

    /// Drops all buffered commands and zeroes the counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
