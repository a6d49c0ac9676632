// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Modulo-64 block sequencing for both directions of a link.
//!
//! Each direction tracks `good`, the last block confirmed contiguously, and
//! `end`, the highest block seen. Both start at 63 so the first block is 0.
//! All comparisons go through [`seq_distance`], which measures forward
//! distance around the circle.

use std::collections::{BTreeMap, VecDeque};

use crate::error::FrameError;
use crate::frame::{decode_seq, encode_seq};
use crate::protocol::{MAX_WINDOW, SEQ_MODULUS};

const INITIAL_SEQ: u8 = SEQ_MODULUS - 1;

pub fn seq_add(seq: u8, n: u8) -> u8 {
    ((seq as u16 + n as u16) % SEQ_MODULUS as u16) as u8
}

/// Forward distance from `from` to `to`, in `0..64`
pub fn seq_distance(from: u8, to: u8) -> u8 {
    ((to as u16 + SEQ_MODULUS as u16 - from as u16) % SEQ_MODULUS as u16) as u8
}

/// Blocks strictly between `good` and `end` (circularly) for which `present`
/// is false. `end` itself has been seen and is never missing.
///
/// With `good = 61` and `end = 2` the candidates are 62, 63, 0, 1.
pub fn missing_between(good: u8, end: u8, present: impl Fn(u8) -> bool) -> Vec<u8> {
    (1..seq_distance(good, end))
        .map(|n| seq_add(good, n))
        .filter(|&seq| !present(seq))
        .collect()
}

/// Receiver's view of the link, carried by status frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub good: u8,
    pub end: u8,
    pub missing: Vec<u8>,
}

impl StatusReport {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.missing.len());
        payload.push(encode_seq(self.good));
        payload.push(encode_seq(self.end));
        payload.extend(self.missing.iter().map(|&seq| encode_seq(seq)));
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < 2 {
            return Err(FrameError::Format("status too short"));
        }
        let seqs = payload
            .iter()
            .map(|&b| decode_seq(b))
            .collect::<Option<Vec<u8>>>()
            .ok_or(FrameError::Format("bad sequence number in status"))?;
        Ok(StatusReport {
            good: seqs[0],
            end: seqs[1],
            missing: seqs[2..].to_vec(),
        })
    }
}

/// An unacknowledged outbound block
#[derive(Debug, Clone)]
pub struct Block {
    pub seq: u8,
    pub data: Vec<u8>,
    pub transmissions: u32,
}

/// What a status report did to the transmit side
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub released: usize,
    pub retransmit: usize,
}

#[derive(Debug)]
pub struct Sequencer {
    window: u8,

    tx_good: u8,
    next_tx: u8,
    /// In sequence order starting at `tx_good + 1`
    outstanding: VecDeque<Block>,
    retransmit: VecDeque<u8>,

    rx_good: u8,
    rx_end: u8,
    pending: BTreeMap<u8, Vec<u8>>,
}

impl Sequencer {
    /// `window` is clamped to `1..=MAX_WINDOW`.
    pub fn new(window: u8) -> Self {
        Sequencer {
            window: window.clamp(1, MAX_WINDOW),
            tx_good: INITIAL_SEQ,
            next_tx: 0,
            outstanding: VecDeque::new(),
            retransmit: VecDeque::new(),
            rx_good: INITIAL_SEQ,
            rx_end: INITIAL_SEQ,
            pending: BTreeMap::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Sequencer::new(self.window);
    }

    // ------------------------------------------------------------------------
    // Transmit side
    // ------------------------------------------------------------------------

    /// Hand out the next outbound sequence number, wrapping 63 to 0.
    pub fn next_tx_number(&mut self) -> u8 {
        let seq = self.next_tx;
        self.next_tx = seq_add(seq, 1);
        seq
    }

    pub fn window_open(&self) -> bool {
        self.outstanding.len() < self.window as usize
    }

    /// Number and track a fresh block. `None` while the window is full.
    pub fn track(&mut self, data: Vec<u8>) -> Option<u8> {
        if !self.window_open() {
            return None;
        }
        let seq = self.next_tx_number();
        self.outstanding.push_back(Block { seq, data, transmissions: 1 });
        debug_assert!(
            (self.outstanding.len() as u8) < SEQ_MODULUS,
            "send window aliases the sequence space"
        );
        Some(seq)
    }

    /// Apply a receiver's report: release everything up to `good` and queue
    /// the reported gaps, plus anything sent after `end`, for retransmission.
    ///
    /// Reports that would acknowledge blocks never sent are stale and ignored.
    pub fn record_ack(&mut self, good: u8, end: u8, missing: &[u8]) -> AckOutcome {
        let advance = seq_distance(self.tx_good, good) as usize;
        if advance > self.outstanding.len() {
            return AckOutcome::default();
        }

        self.outstanding.drain(..advance);
        self.tx_good = good;

        let end_offset = seq_distance(good, end);
        self.retransmit = self
            .outstanding
            .iter()
            .map(|block| block.seq)
            .filter(|&seq| seq_distance(good, seq) > end_offset || missing.contains(&seq))
            .collect();

        AckOutcome {
            released: advance,
            retransmit: self.retransmit.len(),
        }
    }

    /// Queue the whole outstanding window again (retry timer expiry).
    pub fn retransmit_all(&mut self) {
        self.retransmit = self.outstanding.iter().map(|block| block.seq).collect();
    }

    /// Up to `limit` blocks flagged for retransmission, oldest first.
    pub fn take_retransmits(&mut self, limit: usize) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        while out.len() < limit {
            let Some(seq) = self.retransmit.pop_front() else {
                break;
            };
            if let Some(block) = self.outstanding.iter_mut().find(|b| b.seq == seq) {
                block.transmissions += 1;
                out.push((seq, block.data.clone()));
            }
        }
        out
    }

    pub fn has_retransmits(&self) -> bool {
        !self.retransmit.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn tx_good(&self) -> u8 {
        self.tx_good
    }

    /// Highest sequence number handed out so far
    pub fn tx_end(&self) -> u8 {
        seq_add(self.next_tx, SEQ_MODULUS - 1)
    }

    // ------------------------------------------------------------------------
    // Receive side
    // ------------------------------------------------------------------------

    /// Store a received block and return every block that is now contiguous,
    /// in order. Duplicates and blocks outside the window are dropped.
    pub fn record_rx(&mut self, seq: u8, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let offset = seq_distance(self.rx_good, seq);
        if offset == 0 || offset > MAX_WINDOW {
            return Vec::new();
        }
        if offset > seq_distance(self.rx_good, self.rx_end) {
            self.rx_end = seq;
        }
        self.pending.entry(seq).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(data) = self.pending.remove(&seq_add(self.rx_good, 1)) {
            self.rx_good = seq_add(self.rx_good, 1);
            ready.push(data);
        }
        ready
    }

    pub fn missing_blocks(&self) -> Vec<u8> {
        missing_between(self.rx_good, self.rx_end, |seq| self.pending.contains_key(&seq))
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            good: self.rx_good,
            end: self.rx_end,
            missing: self.missing_blocks(),
        }
    }

    pub fn rx_good(&self) -> u8 {
        self.rx_good
    }

    pub fn rx_end(&self) -> u8 {
        self.rx_end
    }
}

// ============================================================================
// Tests
// ============================================================================
