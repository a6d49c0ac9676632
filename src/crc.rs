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

//! CRC-16 used by every frame: reflected polynomial 0xA001, register
//! preset to 0xFFFF, no final xor. Identical input must give identical
//! output on every implementation of the link.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Four uppercase hex characters, as carried at the end of a frame
pub fn crc_hex(crc: u16) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(hex::encode_upper(crc.to_be_bytes()).as_bytes());
    out
}

/// Parse the four checksum characters of a received frame.
/// Lowercase hex is not accepted.
pub fn parse_crc_hex(text: &[u8]) -> Option<u16> {
    if text.len() != 4 || !text.iter().all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(c)) {
        return None;
    }
    let s = std::str::from_utf8(text).ok()?;
    u16::from_str_radix(s, 16).ok()
}

// ============================================================================
// Tests
// ============================================================================
