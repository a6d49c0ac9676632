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

//! ARQ link protocol constants

/// Start of header - opens every frame, and terminates a frame that is
/// immediately followed by another one in the same burst
pub const SOH: u8 = 0x01;

/// Start of text - fourth header byte of every control frame
pub const STX: u8 = 0x02;

/// End of transmission - terminates the last frame of a burst
pub const EOT: u8 = 0x04;

/// Protocol version carried in the first header byte
pub const VERSION: u8 = b'0';

/// Stream id used when no session exists
pub const NO_STREAM: u8 = b'0';

/// Connection request - initiator asks the remote to open a session
pub const CONNECT_REQUEST: u8 = b'c';

/// Connection ack - responder accepts the session
pub const CONNECT_ACK: u8 = b'k';

/// Disconnect request - either side closes the session
pub const DISCONNECT_REQUEST: u8 = b'd';

/// Disconnect ack - peer confirms the session is closed
pub const DISCONNECT_ACK: u8 = b'b';

/// Status - receiver reports good/end and the missing block list
pub const STATUS: u8 = b's';

/// Data - carries one application block
pub const DATA: u8 = b't';

/// Poll - sender asks the receiver for a status report
pub const POLL: u8 = b'p';

/// Abort - session torn down immediately
pub const ABORT: u8 = b'a';

/// Size of the sequence number space
pub const SEQ_MODULUS: u8 = 64;

/// Offset added to sequence numbers so they travel as printable characters
pub const SEQ_OFFSET: u8 = 0x20;

/// Largest send window; half the sequence space keeps old and new blocks apart
pub const MAX_WINDOW: u8 = 32;

/// Largest payload a single frame may carry
pub const MAX_PAYLOAD: usize = 512;

/// Header bytes following SOH: version, stream, type, marker/sequence
pub const HEADER_LEN: usize = 4;

/// Hex characters of the trailing checksum
pub const CRC_LEN: usize = 4;
