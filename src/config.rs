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

//! Link configuration

use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::{MAX_PAYLOAD, MAX_WINDOW};

const MIN_BLOCK_SIZE: usize = 16;
const MAX_CALLSIGN: usize = 16;

/// Parameters fixed for the lifetime of a link.
///
/// Build one, adjust fields, and hand it to [`crate::engine::ArqEngine::new`],
/// which validates it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqConfig {
    /// Local station identifier, carried in connection frames
    pub callsign: String,
    /// Application bytes per data frame
    pub block_size: usize,
    /// Wait for a reply before resending a request or window
    pub retry_interval: Duration,
    /// Expiries tolerated before the link is declared dead
    pub max_retries: u32,
    /// Silence on a connected link before a keep-alive poll
    pub idle_timeout: Duration,
    /// Minimum gap between two bursts
    pub tx_delay: Duration,
    /// How often the host should call `tick()`
    pub tick_interval: Duration,
    /// Frames per burst, poll included
    pub max_frames_per_burst: usize,
    /// Unacknowledged blocks allowed in flight
    pub window: u8,
}

impl Default for ArqConfig {
    fn default() -> Self {
        ArqConfig {
            callsign: "NOCALL".to_string(),
            block_size: 128,
            retry_interval: Duration::from_secs(10),
            max_retries: 5,
            idle_timeout: Duration::from_secs(60),
            tx_delay: Duration::from_millis(500),
            tick_interval: Duration::from_millis(100),
            max_frames_per_burst: 8,
            window: 16,
        }
    }
}

impl ArqConfig {
    pub fn with_callsign(callsign: impl Into<String>) -> Self {
        ArqConfig {
            callsign: callsign.into(),
            ..ArqConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !valid_callsign(&self.callsign) {
            return Err(ConfigError::Callsign(self.callsign.clone()));
        }
        if !(MIN_BLOCK_SIZE..=MAX_PAYLOAD).contains(&self.block_size) {
            return Err(ConfigError::BlockSize(self.block_size));
        }
        if !(1..=MAX_WINDOW).contains(&self.window) {
            return Err(ConfigError::Window(self.window));
        }
        if self.max_frames_per_burst < 2 {
            return Err(ConfigError::Burst(self.max_frames_per_burst));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Retries);
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("retry interval"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("idle timeout"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("tick interval"));
        }
        Ok(())
    }

    /// Data frames that fit in one burst next to the trailing poll
    pub fn data_frames_per_burst(&self) -> usize {
        self.max_frames_per_burst - 1
    }
}

pub fn valid_callsign(callsign: &str) -> bool {
    !callsign.is_empty()
        && callsign.len() <= MAX_CALLSIGN
        && callsign
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'/' || b == b'-')
}

// ============================================================================
// Tests
// ============================================================================
