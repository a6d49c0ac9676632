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

//! Error types for the ARQ link.

use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, ArqError>;

/// Why a received frame was discarded.
///
/// Frame errors never reach the application: the sender's retry timer
/// recovers the lost frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("checksum mismatch: frame carries {carried:04X}, computed {computed:04X}")]
    Checksum { carried: u16, computed: u16 },

    #[error("malformed frame: {0}")]
    Format(&'static str),

    /// The frame is not complete yet; more bytes are needed.
    #[error("incomplete frame")]
    Incomplete,
}

/// Rejected configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid callsign {0:?}")]
    Callsign(String),

    #[error("block size {0} outside 16..=512")]
    BlockSize(usize),

    #[error("window {0} outside 1..=32")]
    Window(u8),

    #[error("max frames per burst must be at least 2, got {0}")]
    Burst(usize),

    #[error("max retries must be at least 1")]
    Retries,

    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    #[error("configuration can only change while the link is down")]
    LinkActive,
}

/// Errors surfaced to the application.
#[derive(Error, Debug)]
pub enum ArqError {
    /// Retry budget exhausted while connecting or transferring
    #[error("link timed out after exhausting retries")]
    Timeout,

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("link aborted by remote")]
    AbortedByRemote,

    #[error("link aborted locally")]
    AbortedByLocal,

    #[error("not connected")]
    NotConnected,

    #[error("link busy: already {0}")]
    LinkBusy(String),

    /// Payload contains a frame delimiter byte
    #[error("payload contains a frame delimiter at offset {0}")]
    InvalidPayload(usize),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
