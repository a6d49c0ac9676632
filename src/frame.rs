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

//! Wire frame codec.
//!
//! ```text
//! SOH <ver><stream><type><marker|seq> <payload 0..512> <CRC 4 hex> SOH|EOT
//! ```
//!
//! The payload has no length field: it runs from the header to the four
//! checksum characters in front of the next delimiter. A frame followed by
//! another one in the same burst is terminated by that frame's SOH, so a
//! burst is `SOH f1 SOH f2 ... SOH fn EOT`.
//!
//! [`FrameScanner`] accepts demodulated bytes in arbitrary chunks and keeps
//! partial frames across calls.

use bytes::{Buf, BytesMut};

use crate::crc::{crc16, crc_hex, parse_crc_hex};
use crate::error::FrameError;
use crate::protocol::*;

/// Largest complete frame, delimiters excluded
const MAX_BODY: usize = HEADER_LEN + MAX_PAYLOAD + CRC_LEN;

// ============================================================================
// Header Fields
// ============================================================================

/// Session stream identifier: `'0'` for no session, `'1'..'9'` or `'A'..'Z'`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u8);

impl StreamId {
    pub const NONE: StreamId = StreamId(NO_STREAM);
    pub const FIRST: StreamId = StreamId(b'1');

    pub fn new(byte: u8) -> Option<Self> {
        match byte {
            NO_STREAM | b'1'..=b'9' | b'A'..=b'Z' => Some(StreamId(byte)),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Next session id in the cycle `1..9, A..Z`
    pub fn next_session(self) -> Self {
        match self.0 {
            b'9' => StreamId(b'A'),
            b'Z' | NO_STREAM => StreamId(b'1'),
            b => StreamId(b + 1),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    ConnectRequest,
    ConnectAck,
    DisconnectRequest,
    DisconnectAck,
    Status,
    /// Application block with its sequence number (0..=63)
    Data(u8),
    Poll,
    Abort,
}

impl BlockType {
    fn type_byte(self) -> u8 {
        match self {
            BlockType::ConnectRequest => CONNECT_REQUEST,
            BlockType::ConnectAck => CONNECT_ACK,
            BlockType::DisconnectRequest => DISCONNECT_REQUEST,
            BlockType::DisconnectAck => DISCONNECT_ACK,
            BlockType::Status => STATUS,
            BlockType::Data(_) => DATA,
            BlockType::Poll => POLL,
            BlockType::Abort => ABORT,
        }
    }

    fn marker(self) -> u8 {
        match self {
            BlockType::Data(seq) => encode_seq(seq),
            _ => STX,
        }
    }

    fn from_header(type_byte: u8, marker: u8) -> Result<Self, FrameError> {
        let kind = match type_byte {
            CONNECT_REQUEST => BlockType::ConnectRequest,
            CONNECT_ACK => BlockType::ConnectAck,
            DISCONNECT_REQUEST => BlockType::DisconnectRequest,
            DISCONNECT_ACK => BlockType::DisconnectAck,
            STATUS => BlockType::Status,
            POLL => BlockType::Poll,
            ABORT => BlockType::Abort,
            DATA => {
                let seq = decode_seq(marker).ok_or(FrameError::Format("bad sequence number"))?;
                return Ok(BlockType::Data(seq));
            }
            _ => return Err(FrameError::Format("unknown block type")),
        };
        if marker != STX {
            return Err(FrameError::Format("missing payload marker"));
        }
        Ok(kind)
    }

    /// Frames the peer must answer; their transmission arms the retry timer
    pub fn expects_reply(self) -> bool {
        matches!(
            self,
            BlockType::ConnectRequest | BlockType::Poll | BlockType::DisconnectRequest
        )
    }
}

/// Sequence number as a printable character
pub fn encode_seq(seq: u8) -> u8 {
    SEQ_OFFSET + (seq % SEQ_MODULUS)
}

pub fn decode_seq(byte: u8) -> Option<u8> {
    match byte {
        b if (SEQ_OFFSET..SEQ_OFFSET + SEQ_MODULUS).contains(&b) => Some(b - SEQ_OFFSET),
        _ => None,
    }
}

// ============================================================================
// Frame
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamId,
    pub kind: BlockType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn control(stream: StreamId, kind: BlockType, payload: Vec<u8>) -> Self {
        Frame { stream, kind, payload }
    }

    pub fn data(stream: StreamId, seq: u8, payload: Vec<u8>) -> Self {
        Frame { stream, kind: BlockType::Data(seq), payload }
    }

    /// Header, payload and checksum, without delimiters
    pub fn encode_body(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::Format("payload exceeds 512 bytes"));
        }
        if self.payload.iter().any(|&b| b == SOH || b == EOT) {
            return Err(FrameError::Format("payload contains a delimiter"));
        }

        let mut body = Vec::with_capacity(HEADER_LEN + self.payload.len() + CRC_LEN);
        body.extend_from_slice(&[
            VERSION,
            self.stream.as_byte(),
            self.kind.type_byte(),
            self.kind.marker(),
        ]);
        body.extend_from_slice(&self.payload);
        let crc = crc16(&body);
        body.extend_from_slice(&crc_hex(crc));
        Ok(body)
    }

    /// A single frame closed with EOT
    pub fn build(&self) -> Result<Vec<u8>, FrameError> {
        build_burst(std::slice::from_ref(self))
    }
}

/// Pack frames back to back: each frame's terminator is the next one's SOH
/// and only the last is closed with EOT.
pub fn build_burst(frames: &[Frame]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    for frame in frames {
        out.push(SOH);
        out.extend_from_slice(&frame.encode_body()?);
    }
    if !out.is_empty() {
        out.push(EOT);
    }
    Ok(out)
}

/// Decode the bytes between SOH and the terminating delimiter.
pub fn decode_body(body: &[u8]) -> Result<Frame, FrameError> {
    if body.len() < HEADER_LEN + CRC_LEN {
        return Err(FrameError::Format("frame too short"));
    }
    if body.len() > MAX_BODY {
        return Err(FrameError::Format("frame too long"));
    }

    let (covered, crc_text) = body.split_at(body.len() - CRC_LEN);
    let carried = parse_crc_hex(crc_text).ok_or(FrameError::Format("bad checksum characters"))?;
    let computed = crc16(covered);
    if carried != computed {
        return Err(FrameError::Checksum { carried, computed });
    }

    if covered[0] != VERSION {
        return Err(FrameError::Format("unsupported protocol version"));
    }
    let stream = StreamId::new(covered[1]).ok_or(FrameError::Format("bad stream id"))?;
    let kind = BlockType::from_header(covered[2], covered[3])?;

    Ok(Frame {
        stream,
        kind,
        payload: covered[HEADER_LEN..].to_vec(),
    })
}

/// Parse one complete frame starting at SOH.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    match bytes.first() {
        None => return Err(FrameError::Incomplete),
        Some(&SOH) => {}
        Some(_) => return Err(FrameError::Format("missing start delimiter")),
    }
    let end = bytes[1..]
        .iter()
        .position(|&b| b == SOH || b == EOT)
        .ok_or(FrameError::Incomplete)?;
    decode_body(&bytes[1..1 + end])
}

// ============================================================================
// Incremental Scanner
// ============================================================================

/// Buffers demodulated bytes and yields frames as their terminators arrive.
///
/// `scanned` remembers how far past the leading SOH the buffer has already
/// been searched, so feeding a long frame byte by byte stays linear.
pub struct FrameScanner {
    buffer: BytesMut,
    scanned: usize,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    pub fn new() -> Self {
        FrameScanner {
            buffer: BytesMut::with_capacity(2 * (MAX_BODY + 2)),
            scanned: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Push bytes and drain every frame they complete.
    pub fn frames(&mut self, data: &[u8]) -> Vec<Result<Frame, FrameError>> {
        self.push(data);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Bytes held while waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            if self.buffer.is_empty() {
                return None;
            }

            // Noise between bursts: resynchronise on the next SOH
            if self.buffer[0] != SOH {
                let skip = self
                    .buffer
                    .iter()
                    .position(|&b| b == SOH)
                    .unwrap_or(self.buffer.len());
                self.buffer.advance(skip);
                self.scanned = 0;
                continue;
            }

            let start = self.scanned.max(1);
            let found = self.buffer[start..]
                .iter()
                .position(|&b| b == SOH || b == EOT)
                .map(|offset| start + offset);

            let Some(end) = found else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > MAX_BODY + 1 {
                    // Lost terminator; drop this SOH and hunt for the next
                    self.buffer.advance(1);
                    self.scanned = 0;
                    return Some(Err(FrameError::Format("frame too long")));
                }
                return None;
            };

            let frame = self.buffer.split_to(end);
            if self.buffer[0] == EOT {
                self.buffer.advance(1);
            }
            self.scanned = 0;

            // SOH SOH or SOH EOT: stray delimiter, nothing to decode
            if frame.len() == 1 {
                continue;
            }
            return Some(decode_body(&frame[1..]));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
