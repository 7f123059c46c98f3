use crate::safe_converter::{PrecheckedCast, SafeCast};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Strict in-order delivery for one message type of one connection.
///
/// Messages are released only in the order of their sequence numbers, starting with 0. Messages
///  arriving early are buffered until the gap before them is filled; messages with a sequence
///  number below the next expected one were delivered already and are dropped.
///
/// A gap that is not filled within the configured stall time is given up on (see
///  `skip_stalled`), so that a message that will never arrive does not block the channel forever.
pub struct SequencerChannel<T> {
    next_expected: u32,
    /// `pending[i]` holds the message with sequence number `next_expected + i` if it arrived
    ///  already. `pending[0]` is empty between calls since that message is delivered on arrival.
    pending: VecDeque<Option<T>>,
    max_gap: u32,
    /// when the channel started waiting for `next_expected` while later messages were buffered
    stalled_since: Option<Instant>,
}

impl<T> SequencerChannel<T> {
    pub fn new(max_gap: u32) -> SequencerChannel<T> {
        SequencerChannel {
            next_expected: 0,
            pending: VecDeque::new(),
            max_gap,
            stalled_since: None,
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn num_pending(&self) -> usize {
        self.pending.iter().filter(|m| m.is_some()).count()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled_since.is_some()
    }

    /// returns the messages that can be delivered now, in order
    pub fn on_message(&mut self, sequence_number: u32, message: T, now: Instant) -> Vec<T> {
        if sequence_number < self.next_expected {
            trace!("sequence number {} was delivered already (next expected is {}) - dropping", sequence_number, self.next_expected);
            return Vec::new();
        }

        let index = sequence_number - self.next_expected;
        if index > self.max_gap {
            warn!("sequence number {} is too far ahead of next expected {} - dropping", sequence_number, self.next_expected);
            return Vec::new();
        }

        let index: usize = index.safe_cast();
        if self.pending.len() <= index {
            self.pending.resize_with(index + 1, || None);
        }
        if self.pending[index].is_some() {
            trace!("sequence number {} is buffered already - dropping duplicate", sequence_number);
            return Vec::new();
        }
        self.pending[index] = Some(message);

        self.drain_ready(now)
    }

    /// Gives up on the missing messages if the channel has been waiting for longer than
    ///  `max_stall`: the channel continues with the first buffered message, and the messages
    ///  that can be delivered then are returned.
    pub fn skip_stalled(&mut self, now: Instant, max_stall: Duration) -> Vec<T> {
        let Some(stalled_since) = self.stalled_since else {
            return Vec::new();
        };
        if now.saturating_duration_since(stalled_since) <= max_stall {
            return Vec::new();
        }

        let Some(first_buffered) = self.pending.iter().position(|m| m.is_some()) else {
            self.stalled_since = None;
            return Vec::new();
        };

        warn!("sequence numbers {} to {} did not arrive within {:?} - skipping them",
            self.next_expected, self.next_expected.wrapping_add(first_buffered.prechecked_cast()).wrapping_sub(1), max_stall);

        self.pending.drain(..first_buffered);
        self.next_expected = self.next_expected.wrapping_add(first_buffered.prechecked_cast());
        self.drain_ready(now)
    }

    fn drain_ready(&mut self, now: Instant) -> Vec<T> {
        let mut result = Vec::new();
        while let Some(Some(_)) = self.pending.front() {
            if let Some(Some(message)) = self.pending.pop_front() {
                result.push(message);
            }
            self.next_expected = self.next_expected.wrapping_add(1);
        }

        // the last pending entry is always a buffered message, so anything left means a gap
        if self.pending.is_empty() {
            self.stalled_since = None;
        }
        else if !result.is_empty() || self.stalled_since.is_none() {
            self.stalled_since = Some(now);
        }
        result
    }
}

/// All sequencer channels of a connection, created lazily per message type
pub struct Sequencer<T> {
    channels: FxHashMap<u16, SequencerChannel<T>>,
    max_gap: u32,
}

impl<T> Sequencer<T> {
    pub fn new(max_gap: u32) -> Sequencer<T> {
        Sequencer {
            channels: FxHashMap::default(),
            max_gap,
        }
    }

    pub fn on_message(&mut self, message_type: u16, sequence_number: u32, message: T, now: Instant) -> Vec<T> {
        let max_gap = self.max_gap;
        self.channels
            .entry(message_type)
            .or_insert_with(|| SequencerChannel::new(max_gap))
            .on_message(sequence_number, message, now)
    }

    /// `skip_stalled` for all channels, returning the deliverable messages with their type
    pub fn skip_stalled(&mut self, now: Instant, max_stall: Duration) -> Vec<(u16, T)> {
        let mut result = Vec::new();
        for (message_type, channel) in self.channels.iter_mut() {
            if channel.is_stalled() {
                result.extend(channel.skip_stalled(now, max_stall)
                    .into_iter()
                    .map(|message| (*message_type, message)));
            }
        }
        result
    }

    pub fn channel(&self, message_type: u16) -> Option<&SequencerChannel<T>> {
        self.channels.get(&message_type)
    }
}
