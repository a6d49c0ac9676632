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

//! ARQ data link for HF radio.
//!
//! The [`engine::ArqEngine`] carries a reliable, ordered byte stream between
//! two stations over a noisy half-duplex channel. Data is cut into blocks,
//! sent in bursts numbered modulo 64, and repaired by selective repeat using
//! the receiver's status reports. Every frame carries a CRC-16/MODBUS.
//!
//! The engine is driven entirely from outside: bytes in through `feed`,
//! time through `tick`, bursts out through a [`serial::Transport`].

pub mod config;
pub mod crc;
pub mod engine;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod sequencer;
pub mod serial;
pub mod state;
pub mod transfer;

pub use config::ArqConfig;
pub use engine::{ArqEngine, ArqStats, Link};
pub use error::{ArqError, ConfigError, FrameError, Result};
pub use state::ConnectionState;
pub use transfer::{Delivery, TransferAssembler};
