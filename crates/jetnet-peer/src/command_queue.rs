//! Entries of the per-peer command queues.
//!
//! Outgoing commands wait in the outgoing queues until a datagram has room
//! for them; reliable ones then move to the sent queue until acknowledged.
//! Incoming data commands wait in channel queues until they can be delivered
//! in order. Acknowledgements owed to the remote side wait until the next
//! datagram.

use jetnet_protocol::{
    command::{Command, CommandType},
    packet::Packet,
};

use crate::fragment_buffer::FragmentBuffer;

/// A command queued for sending, with its retransmission bookkeeping.
#[derive(Debug, Clone)]
pub struct OutgoingCommand {
    /// The command, sequence number already assigned.
    pub command: Command,
    /// Host time the command last went on the wire.
    pub sent_time: u32,
    /// Current retransmission timeout, 0 until first sent.
    pub round_trip_timeout: u32,
    /// Timeout at which the peer is given up on.
    pub round_trip_timeout_limit: u32,
}

impl OutgoingCommand {
    /// Wraps a command that has not been sent yet.
    pub fn new(command: Command) -> Self {
        Self { command, sent_time: 0, round_trip_timeout: 0, round_trip_timeout_limit: 0 }
    }

    /// Payload bytes this command carries, counted against the reliable window.
    pub fn payload_length(&self) -> u32 {
        self.command.kind.payload().map_or(0, |data| data.len() as u32)
    }

    /// True if the command carries application data.
    pub fn has_payload(&self) -> bool {
        self.command.kind.payload().is_some()
    }
}

/// What an incoming data command delivers.
#[derive(Debug, Clone)]
pub enum IncomingPayload {
    /// A payload that arrived whole.
    Complete(Packet),
    /// A fragment run under reassembly.
    Fragmented(FragmentBuffer),
}

/// A received data command waiting for in-order delivery.
#[derive(Debug, Clone)]
pub struct IncomingCommand {
    /// Reliable sequence number, or the run's start for fragments.
    pub reliable_sequence_number: u32,
    /// Unreliable sequence number, 0 for reliable and unsequenced commands.
    pub unreliable_sequence_number: u32,
    /// The payload.
    pub payload: IncomingPayload,
}

impl IncomingCommand {
    /// Entry for a payload that arrived whole.
    pub fn complete(reliable_sequence_number: u32, unreliable_sequence_number: u32, packet: Packet) -> Self {
        Self { reliable_sequence_number, unreliable_sequence_number, payload: IncomingPayload::Complete(packet) }
    }

    /// Entry for a fragment run starting at `start_sequence_number`.
    pub fn fragmented(start_sequence_number: u32, buffer: FragmentBuffer) -> Self {
        Self {
            reliable_sequence_number: start_sequence_number,
            unreliable_sequence_number: 0,
            payload: IncomingPayload::Fragmented(buffer),
        }
    }

    /// Fragments still missing, 0 for whole payloads.
    pub fn fragments_remaining(&self) -> u32 {
        match &self.payload {
            IncomingPayload::Complete(_) => 0,
            IncomingPayload::Fragmented(buffer) => buffer.fragments_remaining(),
        }
    }

    /// Number of reliable sequence numbers this entry spans.
    pub fn sequence_span(&self) -> u32 {
        match &self.payload {
            IncomingPayload::Complete(_) => 1,
            IncomingPayload::Fragmented(buffer) => buffer.fragment_count().max(1),
        }
    }

    /// Turns the entry into the packet handed to the application.
    pub fn into_packet(self) -> Packet {
        match self.payload {
            IncomingPayload::Complete(packet) => packet,
            IncomingPayload::Fragmented(buffer) => Packet::reliable(buffer.into_data()),
        }
    }
}

/// An acknowledgement owed to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Channel of the acknowledged command.
    pub channel_id: u8,
    /// Reliable sequence number of the acknowledged command.
    pub reliable_sequence_number: u32,
    /// Header send time of the datagram that carried the command.
    pub sent_time: u32,
    /// Tag of the acknowledged command.
    pub command_type: CommandType,
}

impl Acknowledgement {
    /// Acknowledgement for `command`, received in a datagram sent at `sent_time`.
    pub fn for_command(command: &Command, sent_time: u32) -> Self {
        Self {
            channel_id: command.channel_id,
            reliable_sequence_number: command.reliable_sequence_number,
            sent_time,
            command_type: command.command_type(),
        }
    }
}
