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

//! Text and file envelopes carried over the link.
//!
//! The link moves a byte stream; this module gives it line-oriented
//! structure. Ordinary lines are text. A file travels as
//!
//! ```text
//! ~FILE <name> <length>
//! <uppercase hex, 64 characters per line>
//! ~END
//! ```
//!
//! Hex keeps frame delimiters out of the payload whatever the file holds.

use std::path::Path;

const FILE_TAG: &str = "~FILE ";
const END_TAG: &str = "~END";
const HEX_LINE: usize = 64;

pub fn encode_file(name: &str, contents: &[u8]) -> Vec<u8> {
    let name = safe_file_name(name).unwrap_or_else(|| "unnamed".to_string());
    let mut out = format!("{FILE_TAG}{name} {}\n", contents.len()).into_bytes();
    let encoded = hex::encode_upper(contents);
    for line in encoded.as_bytes().chunks(HEX_LINE) {
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out.extend_from_slice(END_TAG.as_bytes());
    out.push(b'\n');
    out
}

/// Final path component with spaces replaced, or `None` if nothing usable
/// remains. Received names go through this before touching the disk.
pub fn safe_file_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_str()?;
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    File { name: String, contents: Vec<u8> },
    /// Envelope ended with bad hex, a length mismatch, or a dropped link
    Corrupt { name: String },
}

struct PendingFile {
    name: String,
    length: usize,
    hex: String,
}

/// Rebuilds text lines and files from delivered blocks.
#[derive(Default)]
pub struct TransferAssembler {
    line: Vec<u8>,
    file: Option<PendingFile>,
}

impl TransferAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Delivery> {
        let mut out = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                let text = String::from_utf8_lossy(&line);
                if let Some(delivery) = self.process_line(text.trim_end_matches('\r')) {
                    out.push(delivery);
                }
            } else {
                self.line.push(byte);
            }
        }
        out
    }

    /// Flush what is left when the link closes.
    pub fn finish(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        let line = std::mem::take(&mut self.line);
        if let Some(file) = self.file.take() {
            // The partial line is hex belonging to the broken file
            out.push(Delivery::Corrupt { name: file.name });
        } else if !line.is_empty() {
            out.push(Delivery::Text(String::from_utf8_lossy(&line).into_owned()));
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<Delivery> {
        if let Some(file) = self.file.as_mut() {
            if line != END_TAG {
                file.hex.push_str(line.trim());
                return None;
            }
            let file = self.file.take()?;
            return Some(match hex::decode(&file.hex) {
                Ok(contents) if contents.len() == file.length => Delivery::File {
                    name: file.name,
                    contents,
                },
                _ => Delivery::Corrupt { name: file.name },
            });
        }

        if let Some(header) = line.strip_prefix(FILE_TAG) {
            if let Some((name, length)) = header.rsplit_once(' ') {
                if let (Some(name), Ok(length)) = (safe_file_name(name), length.parse()) {
                    self.file = Some(PendingFile { name, length, hex: String::new() });
                    return None;
                }
            }
        }
        Some(Delivery::Text(line.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
