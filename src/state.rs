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

//! Connection lifecycle.
//!
//! ```text
//!  Down ──connect──▶ Connecting ──ack──▶ Connected ◀──drained── Sending
//!   ▲ ▲                  │                 │    └──data queued──▶ │
//!   │ └──retries spent───┘                 └─────disconnect───┐   │
//!   │                                                         ▼   │
//!   └────────ack/expiry────────────── Disconnecting ◀─────────────┘
//!
//!  any ──abort──▶ Aborting ──flushed──▶ Down
//! ```
//!
//! [`ConnectionState::on_event`] is the whole transition table. The engine
//! performs the side effects; an event the table rejects is ignored.

/// State of the single link an engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Down,
    Connecting,
    Connected,
    /// Connected with blocks awaiting acknowledgement
    Sending,
    Disconnecting,
    Aborting,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    LocalConnect,
    /// Valid connection request addressed to us
    ConnectRequest,
    ConnectAck,
    /// Retry timer fired; `retries_left` is the budget after this expiry
    RetryExpired { retries_left: u32 },
    DataQueued,
    /// Status processed; `drained` when nothing is queued or outstanding
    StatusReceived { drained: bool },
    LocalDisconnect,
    DisconnectRequest,
    DisconnectAck,
    /// Abort frame, local abort, or a fatal local error
    Abort,
    /// Queues flushed after an abort
    Flushed,
}

impl ConnectionState {
    /// Next state for `event`, or `None` when the event does not apply here.
    pub fn on_event(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self, event) {
            (_, Abort) => Some(Aborting),
            (Aborting, Flushed) => Some(Down),
            (Aborting, _) => None,

            (Down, LocalConnect) => Some(Connecting),
            (Down, ConnectRequest) => Some(Connected),
            (Down, _) => None,

            (Connecting, ConnectAck) => Some(Connected),
            (Connecting, RetryExpired { retries_left: 0 }) => Some(Down),
            (Connecting, RetryExpired { .. }) => Some(Connecting),

            // Keep-alive polls on an idle link
            (Connected, RetryExpired { retries_left: 0 }) => Some(Down),
            (Connected, RetryExpired { .. }) => Some(Connected),
            (Connected, ConnectRequest) => Some(Connected),
            (Connected, DataQueued) => Some(Sending),
            (Connected, StatusReceived { .. }) => Some(Connected),

            (Sending, DataQueued) => Some(Sending),
            (Sending, StatusReceived { drained: true }) => Some(Connected),
            (Sending, StatusReceived { drained: false }) => Some(Sending),
            (Sending, RetryExpired { retries_left: 0 }) => Some(Aborting),
            (Sending, RetryExpired { .. }) => Some(Sending),
            (Sending, ConnectRequest) => Some(Sending),

            (Disconnecting, DisconnectAck | DisconnectRequest | RetryExpired { .. }) => Some(Down),

            (Connecting | Connected | Sending, LocalDisconnect) => Some(Disconnecting),
            (Connected | Sending, DisconnectRequest) => Some(Down),

            (Connecting | Connected | Sending | Disconnecting, _) => None,
        }
    }

    /// A session exists and application data may flow
    pub fn is_linked(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Sending)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

// ============================================================================
// Tests
// ============================================================================
