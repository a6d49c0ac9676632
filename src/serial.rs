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

#[cfg(test)]
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

/// Outbound half of the channel: whatever turns a burst of frame bytes into
/// a transmission (a modem, a TNC on a serial line, a test harness)
pub trait Transport: Send {
    fn transmit(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Serial line to a modem, wrapping the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }

    /// Second handle on the same port, so the host loop can read while the
    /// engine owns the writer
    pub fn try_clone(&self) -> Result<Self, serialport::Error> {
        Ok(RealSerialPort { port: self.port.try_clone()? })
    }

    /// Read whatever arrives within `timeout`; a timeout yields 0 bytes.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        match self.port.read(buf) {
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }
}

impl Transport for RealSerialPort {
    fn transmit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

/// Records every burst; clones share the same log so a test can keep one
/// handle while the engine owns another.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockTransport {
    bursts: Arc<Mutex<Vec<Vec<u8>>>>,
    fail: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the bursts transmitted so far
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.bursts.lock().unwrap())
    }

    /// Make every following transmit fail
    pub fn break_link(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn transmit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Mock transmitter failure"
            ));
        }
        self.bursts.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}
