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

//! The ARQ protocol engine.
//!
//! One engine manages one link to one remote station. It never blocks and
//! never reads the clock itself: the host feeds it demodulated bytes with
//! [`ArqEngine::feed`] and drives every timer with [`ArqEngine::tick`].
//!
//! `feed()` applies each complete frame at once (sequencer updates, state
//! changes, replies owed), but what to transmit next is decided in `tick()`,
//! after everything that arrived in the batch has been seen. Outbound frames
//! collect in an outbox and leave as one chained burst per tick, no sooner
//! than the configured inter-transmission delay after the previous burst.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{valid_callsign, ArqConfig};
use crate::error::{ArqError, ConfigError, FrameError, Result};
use crate::frame::{build_burst, BlockType, Frame, FrameScanner, StreamId};
use crate::protocol::{EOT, SOH};
use crate::sequencer::{Sequencer, StatusReport};
use crate::serial::Transport;
use crate::state::{ConnectionState, LinkEvent};
use crate::transfer::encode_file;

pub type DataCallback = Box<dyn FnMut(&[u8]) + Send>;
pub type StateCallback = Box<dyn FnMut(ConnectionState, ConnectionState) + Send>;
pub type FailureCallback = Box<dyn FnMut(&ArqError) + Send>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArqStats {
    /// Frames transmitted, retransmissions included
    pub frames_sent: u64,
    /// Checksum-valid frames received
    pub frames_received: u64,
    pub checksum_errors: u64,
    pub format_errors: u64,
    pub retransmissions: u64,
    pub blocks_delivered: u64,
}

/// The session with the remote station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub remote: String,
    pub stream: StreamId,
    /// Negotiated with the remote during connect
    pub block_size: usize,
}

pub struct ArqEngine {
    config: ArqConfig,
    transport: Box<dyn Transport>,
    scanner: FrameScanner,
    sequencer: Sequencer,
    state: ConnectionState,
    link: Option<Link>,
    last_stream: StreamId,

    send_queue: VecDeque<Vec<u8>>,
    outbox: Vec<Frame>,

    now: Option<Instant>,
    retries_left: u32,
    retry_deadline: Option<Instant>,
    last_activity: Option<Instant>,
    last_tx: Option<Instant>,

    /// Peer polled us; a status report goes out with the next burst
    status_due: bool,
    /// Our last burst ended with a poll that has not been answered
    awaiting_status: bool,
    /// A status arrived for the window in flight
    status_received: bool,
    keepalive_sent: bool,
    disconnect_pending: bool,

    failure: Option<ArqError>,
    stats: ArqStats,
    on_data: Option<DataCallback>,
    on_state_change: Option<StateCallback>,
    on_failure: Option<FailureCallback>,
}

impl ArqEngine {
    pub fn new(config: ArqConfig, transport: Box<dyn Transport>) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let retries = config.max_retries;
        Ok(ArqEngine {
            sequencer: Sequencer::new(config.window),
            config,
            transport,
            scanner: FrameScanner::new(),
            state: ConnectionState::Down,
            link: None,
            last_stream: StreamId::NONE,
            send_queue: VecDeque::new(),
            outbox: Vec::new(),
            now: None,
            retries_left: retries,
            retry_deadline: None,
            last_activity: None,
            last_tx: None,
            status_due: false,
            awaiting_status: false,
            status_received: false,
            keepalive_sent: false,
            disconnect_pending: false,
            failure: None,
            stats: ArqStats::default(),
            on_data: None,
            on_state_change: None,
            on_failure: None,
        })
    }

    /// Replace the configuration. Only allowed while the link is down.
    pub fn reconfigure(&mut self, config: ArqConfig) -> std::result::Result<(), ConfigError> {
        if self.state != ConnectionState::Down {
            return Err(ConfigError::LinkActive);
        }
        config.validate()?;
        self.sequencer = Sequencer::new(config.window);
        self.retries_left = config.max_retries;
        self.config = config;
        Ok(())
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Called once per block, in sequence order, without gaps
    pub fn on_data(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.on_data = Some(Box::new(callback));
    }

    pub fn on_state_change(
        &mut self,
        callback: impl FnMut(ConnectionState, ConnectionState) + Send + 'static,
    ) {
        self.on_state_change = Some(Box::new(callback));
    }

    /// Called once per failed link, after queues are flushed
    pub fn on_failure(&mut self, callback: impl FnMut(&ArqError) + Send + 'static) {
        self.on_failure = Some(Box::new(callback));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub fn remote(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.remote.as_str())
    }

    pub fn stats(&self) -> &ArqStats {
        &self.stats
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Blocks waiting for a sequence number
    pub fn queued_blocks(&self) -> usize {
        self.send_queue.len()
    }

    /// Blocks sent but not yet acknowledged
    pub fn outstanding_blocks(&self) -> usize {
        self.sequencer.outstanding()
    }

    /// Nothing queued, in flight, or waiting to be transmitted
    pub fn is_idle(&self) -> bool {
        self.send_queue.is_empty() && self.sequencer.outstanding() == 0 && self.outbox.is_empty()
    }

    /// The most recent link failure, if not already taken
    pub fn take_failure(&mut self) -> Option<ArqError> {
        self.failure.take()
    }

    // ========================================================================
    // Public Operations
    // ========================================================================

    pub fn connect(&mut self, remote: &str) -> Result<()> {
        if self.state != ConnectionState::Down {
            return Err(ArqError::LinkBusy(self.state.to_string()));
        }
        if !valid_callsign(remote) {
            return Err(ConfigError::Callsign(remote.to_string()).into());
        }

        let stream = self.last_stream.next_session();
        self.last_stream = stream;
        self.close_session(None);
        self.failure = None;
        self.link = Some(Link {
            remote: remote.to_string(),
            stream,
            block_size: self.config.block_size,
        });

        info!("connecting to {} on stream {}", remote, stream);
        self.apply(LinkEvent::LocalConnect);
        self.queue_connect_request();
        Ok(())
    }

    /// Close the link. Blocks already in flight are allowed to finish first.
    pub fn disconnect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Down => Err(ArqError::NotConnected),
            ConnectionState::Sending => {
                debug!("disconnect deferred until the window drains");
                self.disconnect_pending = true;
                Ok(())
            }
            ConnectionState::Disconnecting | ConnectionState::Aborting => Ok(()),
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.begin_disconnect();
                Ok(())
            }
        }
    }

    /// Tear the link down now, dropping everything queued or in flight.
    pub fn abort(&mut self) {
        if self.state == ConnectionState::Down {
            return;
        }
        self.abort_link(ArqError::AbortedByLocal, true);
    }

    pub fn send_text(&mut self, text: &str) -> Result<usize> {
        self.send_bytes(text.as_bytes())
    }

    /// Split `data` into blocks and queue them. Returns the number of blocks.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<usize> {
        let block_size = match (&self.link, self.state.is_linked()) {
            (Some(link), true) if !self.disconnect_pending => link.block_size,
            _ => return Err(ArqError::NotConnected),
        };
        if let Some(pos) = data.iter().position(|&b| b == SOH || b == EOT) {
            return Err(ArqError::InvalidPayload(pos));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let before = self.send_queue.len();
        self.send_queue.extend(data.chunks(block_size).map(<[u8]>::to_vec));
        let blocks = self.send_queue.len() - before;
        debug!("queued {} bytes as {} blocks", data.len(), blocks);

        if self.state == ConnectionState::Connected {
            self.apply(LinkEvent::DataQueued);
        }
        Ok(blocks)
    }

    /// Queue a file wrapped in a transfer envelope.
    pub fn send_file(&mut self, path: &Path) -> Result<usize> {
        let contents = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        info!("sending {} ({} bytes)", name, contents.len());
        self.send_bytes(&encode_file(name, &contents))
    }

    /// Accept newly demodulated bytes, in chunks of any size.
    pub fn feed(&mut self, data: &[u8]) {
        for result in self.scanner.frames(data) {
            match result {
                Ok(frame) => {
                    self.stats.frames_received += 1;
                    self.handle_frame(frame);
                }
                Err(e @ FrameError::Checksum { .. }) => {
                    self.stats.checksum_errors += 1;
                    warn!("discarding frame: {}", e);
                }
                Err(e) => {
                    self.stats.format_errors += 1;
                    warn!("discarding frame: {}", e);
                }
            }
        }
    }

    /// Drive timers and transmit whatever is due.
    ///
    /// An `Err` means the transport failed; the link has already been
    /// aborted when it is returned.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        self.now = Some(now);
        if self.link.is_some() && self.last_activity.is_none() {
            self.last_activity = Some(now);
        }
        self.run_timers(now);
        self.service();
        self.flush(now)
    }

    // ========================================================================
    // State Handling
    // ========================================================================

    fn apply(&mut self, event: LinkEvent) -> bool {
        match self.state.on_event(event) {
            Some(next) => {
                self.set_state(next);
                true
            }
            None => {
                debug!("ignoring {:?} in state {}", event, self.state);
                false
            }
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        let old = self.state;
        self.state = next;
        info!("link state {} -> {}", old, next);
        if let Some(callback) = self.on_state_change.as_mut() {
            callback(old, next);
        }
    }

    /// Forget the session. Only abort and disconnect-ack frames survive in
    /// the outbox.
    fn close_session(&mut self, failure: Option<ArqError>) {
        self.link = None;
        self.send_queue.clear();
        self.sequencer.reset();
        self.outbox
            .retain(|f| matches!(f.kind, BlockType::Abort | BlockType::DisconnectAck));
        self.retries_left = self.config.max_retries;
        self.retry_deadline = None;
        self.last_activity = None;
        self.status_due = false;
        self.awaiting_status = false;
        self.status_received = false;
        self.keepalive_sent = false;
        self.disconnect_pending = false;

        if let Some(err) = failure {
            warn!("link failed: {}", err);
            if let Some(callback) = self.on_failure.as_mut() {
                callback(&err);
            }
            self.failure = Some(err);
        }
    }

    fn abort_link(&mut self, failure: ArqError, notify_peer: bool) {
        let stream = self.link.as_ref().map(|l| l.stream);
        self.apply(LinkEvent::Abort);
        self.outbox.clear();
        if let (true, Some(stream)) = (notify_peer, stream) {
            self.outbox.push(Frame::control(stream, BlockType::Abort, Vec::new()));
        }
        self.close_session(Some(failure));
        self.apply(LinkEvent::Flushed);
    }

    fn begin_disconnect(&mut self) {
        self.apply(LinkEvent::LocalDisconnect);
        self.disconnect_pending = false;
        self.retry_deadline = None;
        self.retries_left = self.config.max_retries;
        if let Some(stream) = self.stream() {
            self.outbox
                .push(Frame::control(stream, BlockType::DisconnectRequest, Vec::new()));
        }
    }

    fn stream(&self) -> Option<StreamId> {
        self.link.as_ref().map(|l| l.stream)
    }

    fn queue_connect_request(&mut self) {
        if let Some(link) = &self.link {
            let payload = format!("{} {} {}", self.config.callsign, link.remote, link.block_size);
            self.outbox.push(Frame::control(
                link.stream,
                BlockType::ConnectRequest,
                payload.into_bytes(),
            ));
        }
    }

    // ========================================================================
    // Inbound Frames
    // ========================================================================

    fn handle_frame(&mut self, frame: Frame) {
        debug!(
            "received {:?} on stream {} ({} bytes)",
            frame.kind,
            frame.stream,
            frame.payload.len()
        );

        if frame.kind == BlockType::ConnectRequest {
            self.handle_connect_request(&frame);
            return;
        }

        match self.stream() {
            Some(stream) if stream == frame.stream => {}
            Some(stream) => {
                debug!("frame for stream {} while session is {}", frame.stream, stream);
                return;
            }
            None => {
                debug!("no session, ignoring {:?}", frame.kind);
                return;
            }
        }
        self.last_activity = self.now;

        match frame.kind {
            BlockType::ConnectAck => self.handle_connect_ack(&frame.payload),
            BlockType::Data(seq) => self.handle_data(seq, frame.payload),
            BlockType::Poll => {
                if self.state.is_linked() {
                    self.status_due = true;
                }
            }
            BlockType::Status => self.handle_status(&frame.payload),
            BlockType::DisconnectRequest => self.handle_disconnect_request(frame.stream),
            BlockType::DisconnectAck => {
                if self.apply(LinkEvent::DisconnectAck) {
                    info!("disconnected");
                    self.close_session(None);
                }
            }
            BlockType::Abort => {
                let failure = match (self.state, self.remote()) {
                    (ConnectionState::Connecting, Some(remote)) => {
                        ArqError::ConnectionRefused(remote.to_string())
                    }
                    _ => ArqError::AbortedByRemote,
                };
                self.abort_link(failure, false);
            }
            BlockType::ConnectRequest => {}
        }
    }

    fn handle_connect_request(&mut self, frame: &Frame) {
        let Some((from, to, proposed)) = parse_connect_payload(&frame.payload) else {
            self.stats.format_errors += 1;
            warn!("malformed connection request");
            return;
        };
        if !to.eq_ignore_ascii_case(&self.config.callsign) {
            debug!("connection request for {}, not us", to);
            return;
        }
        if frame.stream == StreamId::NONE {
            warn!("connection request from {} without a session id", from);
            return;
        }

        let current = self.link.as_ref().map(|link| {
            let same = link.stream == frame.stream && link.remote.eq_ignore_ascii_case(&from);
            (same, link.block_size)
        });

        match current {
            None if self.state == ConnectionState::Down => {
                let block_size = proposed.min(self.config.block_size).max(1);
                self.close_session(None);
                self.failure = None;
                self.link = Some(Link {
                    remote: from.clone(),
                    stream: frame.stream,
                    block_size,
                });
                self.last_activity = self.now;
                info!("accepting {} on stream {}, block size {}", from, frame.stream, block_size);
                self.apply(LinkEvent::ConnectRequest);
                self.queue_connect_ack(frame.stream, &from, block_size);
            }
            Some((true, block_size)) => {
                // Our ack was lost; the initiator is retrying
                self.last_activity = self.now;
                if self.apply(LinkEvent::ConnectRequest) {
                    self.queue_connect_ack(frame.stream, &from, block_size);
                }
            }
            _ => debug!("busy, ignoring connection request from {}", from),
        }
    }

    fn queue_connect_ack(&mut self, stream: StreamId, remote: &str, block_size: usize) {
        let payload = format!("{} {} {}", self.config.callsign, remote, block_size);
        self.outbox
            .push(Frame::control(stream, BlockType::ConnectAck, payload.into_bytes()));
    }

    fn handle_connect_ack(&mut self, payload: &[u8]) {
        if self.state != ConnectionState::Connecting {
            debug!("connection ack in state {}", self.state);
            return;
        }
        let Some((from, _, accepted)) = parse_connect_payload(payload) else {
            self.stats.format_errors += 1;
            warn!("malformed connection ack");
            return;
        };
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if !from.eq_ignore_ascii_case(&link.remote) {
            warn!("connection ack from {}, expected {}", from, link.remote);
            return;
        }

        link.block_size = accepted.min(link.block_size).max(1);
        info!("connected to {}, block size {}", link.remote, link.block_size);
        self.retry_deadline = None;
        self.retries_left = self.config.max_retries;
        self.apply(LinkEvent::ConnectAck);
    }

    fn handle_data(&mut self, seq: u8, payload: Vec<u8>) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Sending | ConnectionState::Disconnecting
        ) {
            debug!("data block {} in state {}", seq, self.state);
            return;
        }
        for block in self.sequencer.record_rx(seq, payload) {
            self.stats.blocks_delivered += 1;
            if let Some(callback) = self.on_data.as_mut() {
                callback(&block);
            }
        }
    }

    fn handle_status(&mut self, payload: &[u8]) {
        let report = match StatusReport::from_payload(payload) {
            Ok(report) => report,
            Err(e) => {
                self.stats.format_errors += 1;
                warn!("discarding status: {}", e);
                return;
            }
        };

        match self.state {
            ConnectionState::Sending if self.awaiting_status => {
                let outcome = self.sequencer.record_ack(report.good, report.end, &report.missing);
                debug!(
                    "status good={} end={} missing={:?}: {} released, {} to resend",
                    report.good, report.end, report.missing, outcome.released, outcome.retransmit
                );
                self.awaiting_status = false;
                self.status_received = true;
                self.keepalive_sent = false;
                self.retry_deadline = None;
                self.retries_left = self.config.max_retries;
            }
            // Answer to a keep-alive poll; data queued meanwhile waits for it
            ConnectionState::Connected | ConnectionState::Sending if self.keepalive_sent => {
                debug!("keep-alive answered");
                self.keepalive_sent = false;
                self.retry_deadline = None;
                self.retries_left = self.config.max_retries;
                if self.state == ConnectionState::Connected {
                    self.apply(LinkEvent::StatusReceived { drained: true });
                }
            }
            ConnectionState::Connected => {
                self.retry_deadline = None;
                self.retries_left = self.config.max_retries;
                self.apply(LinkEvent::StatusReceived { drained: true });
            }
            _ => debug!("unsolicited status in state {}", self.state),
        }
    }

    fn handle_disconnect_request(&mut self, stream: StreamId) {
        let lost = self.send_queue.len() + self.sequencer.outstanding();
        if !self.apply(LinkEvent::DisconnectRequest) {
            return;
        }
        if lost > 0 {
            warn!("remote disconnected with {} blocks undelivered", lost);
        }
        info!("remote closed the link");
        self.outbox.clear();
        self.outbox
            .push(Frame::control(stream, BlockType::DisconnectAck, Vec::new()));
        self.close_session(None);
    }

    // ========================================================================
    // Timers and Outbound
    // ========================================================================

    fn run_timers(&mut self, now: Instant) {
        if let Some(deadline) = self.retry_deadline {
            if now >= deadline {
                self.retry_deadline = None;
                self.retries_left = self.retries_left.saturating_sub(1);
                self.on_retry_expired();
            }
        }

        let idle = self
            .last_activity
            .is_some_and(|last| now.duration_since(last) >= self.config.idle_timeout);
        if self.state == ConnectionState::Connected
            && idle
            && self.retry_deadline.is_none()
            && !self.keepalive_sent
        {
            debug!("link idle, sending keep-alive poll");
            self.keepalive_sent = true;
            self.retries_left = self.config.max_retries;
            self.queue_poll();
        }
    }

    fn on_retry_expired(&mut self) {
        let retries_left = self.retries_left;
        let event = LinkEvent::RetryExpired { retries_left };
        warn!("retry timer expired in {}, {} retries left", self.state, retries_left);

        match self.state {
            ConnectionState::Connecting => {
                self.apply(event);
                if retries_left == 0 {
                    self.close_session(Some(ArqError::Timeout));
                } else {
                    self.queue_connect_request();
                }
            }
            ConnectionState::Sending => {
                self.apply(event);
                self.keepalive_sent = false;
                if retries_left == 0 {
                    self.abort_link(ArqError::Timeout, true);
                } else {
                    self.sequencer.retransmit_all();
                    self.compose_burst();
                }
            }
            ConnectionState::Connected => {
                self.apply(event);
                if retries_left == 0 {
                    self.close_session(Some(ArqError::Timeout));
                } else {
                    self.queue_poll();
                }
            }
            ConnectionState::Disconnecting => {
                self.apply(event);
                info!("no disconnect ack, closing");
                self.close_session(None);
            }
            ConnectionState::Down | ConnectionState::Aborting => {}
        }
    }

    /// Decide what the link transmits next, once per tick.
    fn service(&mut self) {
        if self.status_due {
            self.status_due = false;
            if let Some(stream) = self.stream() {
                let report = self.sequencer.status();
                debug!("reporting good={} end={} missing={:?}", report.good, report.end, report.missing);
                self.outbox
                    .push(Frame::control(stream, BlockType::Status, report.to_payload()));
            }
        }

        if self.state != ConnectionState::Sending {
            return;
        }
        if self.status_received {
            self.status_received = false;
            let drained = self.send_queue.is_empty() && self.sequencer.outstanding() == 0;
            self.apply(LinkEvent::StatusReceived { drained });
            if !drained {
                self.compose_burst();
            } else if self.disconnect_pending {
                self.begin_disconnect();
            }
        } else if !self.awaiting_status && !self.keepalive_pending() {
            self.compose_burst();
        }
    }

    /// A keep-alive poll is out and its status has not come back. A data
    /// burst sent now could be acknowledged by that stale status.
    fn keepalive_pending(&self) -> bool {
        self.keepalive_sent && self.retry_deadline.is_some()
    }

    /// Retransmissions first, then fresh blocks while the window allows,
    /// then a poll.
    fn compose_burst(&mut self) {
        let Some(stream) = self.stream() else {
            return;
        };
        let limit = self
            .config
            .data_frames_per_burst()
            .saturating_sub(self.outbox.len());

        let mut count = 0;
        for (seq, data) in self.sequencer.take_retransmits(limit) {
            self.stats.retransmissions += 1;
            self.outbox.push(Frame::data(stream, seq, data));
            count += 1;
        }
        while count < limit && self.sequencer.window_open() {
            let Some(data) = self.send_queue.pop_front() else {
                break;
            };
            let Some(seq) = self.sequencer.track(data.clone()) else {
                self.send_queue.push_front(data);
                break;
            };
            self.outbox.push(Frame::data(stream, seq, data));
            count += 1;
        }

        self.queue_poll();
        self.awaiting_status = true;
    }

    fn queue_poll(&mut self) {
        if let Some(stream) = self.stream() {
            self.outbox.push(Frame::control(stream, BlockType::Poll, Vec::new()));
        }
    }

    fn flush(&mut self, now: Instant) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        if let Some(last) = self.last_tx {
            if now.duration_since(last) < self.config.tx_delay {
                return Ok(());
            }
        }

        let frames = std::mem::take(&mut self.outbox);
        let bytes = build_burst(&frames)?;
        if let Err(e) = self.transport.transmit(&bytes) {
            warn!("transmit failed: {}", e);
            if self.state != ConnectionState::Down {
                self.abort_link(ArqError::AbortedByLocal, false);
            }
            return Err(ArqError::Io(e));
        }

        debug!("transmitted {} frames ({} bytes)", frames.len(), bytes.len());
        self.stats.frames_sent += frames.len() as u64;
        self.last_tx = Some(now);
        if self.state != ConnectionState::Down && frames.iter().any(|f| f.kind.expects_reply()) {
            self.retry_deadline = Some(now + self.config.retry_interval);
        }
        Ok(())
    }
}

/// `"<from> <to> <block size>"` as carried by connection frames
fn parse_connect_payload(payload: &[u8]) -> Option<(String, String, usize)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut parts = text.split_whitespace();
    let from = parts.next()?;
    let to = parts.next()?;
    let block_size = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !valid_callsign(from) || !valid_callsign(to) {
        return None;
    }
    Some((from.to_string(), to.to_string(), block_size))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockTransport;
    use crate::transfer::{Delivery, TransferAssembler};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(100);

    fn config(callsign: &str) -> ArqConfig {
        ArqConfig {
            tx_delay: Duration::ZERO,
            ..ArqConfig::with_callsign(callsign)
        }
    }

    fn frames_of(burst: &[u8]) -> Vec<Frame> {
        FrameScanner::new()
            .frames(burst)
            .into_iter()
            .map(|r| r.expect("transmitted frame must parse"))
            .collect()
    }

    fn kinds(burst: &[u8]) -> Vec<BlockType> {
        frames_of(burst).into_iter().map(|f| f.kind).collect()
    }

    fn collector(engine: &mut ArqEngine) -> Arc<Mutex<Vec<u8>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        engine.on_data(move |block| sink.lock().unwrap().extend_from_slice(block));
        received
    }

    fn text(len: usize) -> String {
        (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
    }

    /// Two engines joined by an in-memory channel
    struct Pair {
        a: ArqEngine,
        b: ArqEngine,
        wire_a: MockTransport,
        wire_b: MockTransport,
        got_a: Arc<Mutex<Vec<u8>>>,
        got_b: Arc<Mutex<Vec<u8>>>,
        now: Instant,
        /// Drop everything in both directions
        cut: bool,
        /// Drop the next N bursts from b
        drop_from_b: usize,
    }

    impl Pair {
        fn new(config_a: ArqConfig, config_b: ArqConfig) -> Self {
            let wire_a = MockTransport::new();
            let wire_b = MockTransport::new();
            let mut a = ArqEngine::new(config_a, Box::new(wire_a.clone())).unwrap();
            let mut b = ArqEngine::new(config_b, Box::new(wire_b.clone())).unwrap();
            let got_a = collector(&mut a);
            let got_b = collector(&mut b);
            Pair {
                a,
                b,
                wire_a,
                wire_b,
                got_a,
                got_b,
                now: Instant::now(),
                cut: false,
                drop_from_b: 0,
            }
        }

        fn connected() -> Self {
            Self::connected_with(config("N0CALL"), config("W1AW"))
        }

        fn connected_with(config_a: ArqConfig, config_b: ArqConfig) -> Self {
            let mut pair = Pair::new(config_a, config_b);
            pair.a.connect("W1AW").unwrap();
            assert!(pair.run_until(
                |p| p.a.state() == ConnectionState::Connected
                    && p.b.state() == ConnectionState::Connected,
                10
            ));
            pair
        }

        fn step(&mut self) {
            self.step_with(|_| {});
        }

        fn step_with(&mut self, mut a_to_b: impl FnMut(&mut Vec<u8>)) {
            self.now += TICK;
            self.a.tick(self.now).unwrap();
            for mut burst in self.wire_a.take() {
                if self.cut {
                    continue;
                }
                a_to_b(&mut burst);
                self.b.feed(&burst);
            }
            self.b.tick(self.now).unwrap();
            for burst in self.wire_b.take() {
                if self.cut {
                    continue;
                }
                if self.drop_from_b > 0 {
                    self.drop_from_b -= 1;
                    continue;
                }
                self.a.feed(&burst);
            }
        }

        fn run_until(&mut self, done: impl Fn(&Pair) -> bool, max_steps: usize) -> bool {
            for _ in 0..max_steps {
                if done(self) {
                    return true;
                }
                self.step();
            }
            done(self)
        }

        fn run_for(&mut self, duration: Duration) {
            let end = self.now + duration;
            while self.now < end {
                self.step();
            }
        }

        fn transfer_done(&self) -> bool {
            self.a.is_idle() && self.a.state() == ConnectionState::Connected
        }
    }

    // ------------------------------------------------------------------------
    // Connection setup
    // ------------------------------------------------------------------------

    #[test]
    fn test_connect_handshake() {
        let pair = Pair::connected();
        assert_eq!(pair.a.remote(), Some("W1AW"));
        assert_eq!(pair.b.remote(), Some("N0CALL"));
        assert_eq!(pair.a.link().unwrap().stream, StreamId::FIRST);
        assert_eq!(pair.b.link().unwrap().stream, StreamId::FIRST);
    }

    #[test]
    fn test_block_size_negotiated_down() {
        let config_b = ArqConfig { block_size: 64, ..config("W1AW") };
        let pair = Pair::connected_with(config("N0CALL"), config_b);
        assert_eq!(pair.a.link().unwrap().block_size, 64);
        assert_eq!(pair.b.link().unwrap().block_size, 64);
    }

    #[test]
    fn test_connect_request_frame() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire.clone())).unwrap();
        engine.connect("W1AW").unwrap();
        assert_eq!(engine.state(), ConnectionState::Connecting);
        engine.tick(Instant::now()).unwrap();

        let bursts = wire.take();
        assert_eq!(bursts.len(), 1);
        assert_eq!(
            frames_of(&bursts[0]),
            vec![Frame::control(
                StreamId::FIRST,
                BlockType::ConnectRequest,
                b"N0CALL W1AW 128".to_vec()
            )]
        );
    }

    #[test]
    fn test_connect_timeout_after_retry_budget() {
        let wire = MockTransport::new();
        let config = ArqConfig { max_retries: 3, ..config("N0CALL") };
        let mut engine = ArqEngine::new(config, Box::new(wire.clone())).unwrap();
        let t0 = Instant::now();

        engine.connect("W1AW").unwrap();
        engine.tick(t0).unwrap();
        engine.tick(t0 + Duration::from_millis(9_900)).unwrap();
        assert_eq!(wire.take().len(), 1);

        engine.tick(t0 + Duration::from_secs(10)).unwrap();
        engine.tick(t0 + Duration::from_secs(20)).unwrap();
        assert_eq!(engine.state(), ConnectionState::Connecting);
        assert_eq!(wire.take().len(), 2);

        engine.tick(t0 + Duration::from_secs(30)).unwrap();
        assert_eq!(engine.state(), ConnectionState::Down);
        assert!(matches!(engine.take_failure(), Some(ArqError::Timeout)));
        assert!(wire.take().is_empty());

        // Usable again after the failure
        engine.connect("W1AW").unwrap();
        assert_eq!(engine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_abort_during_connect_is_refusal() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire.clone())).unwrap();
        engine.connect("W1AW").unwrap();
        engine.tick(Instant::now()).unwrap();

        let abort = Frame::control(StreamId::FIRST, BlockType::Abort, Vec::new());
        engine.feed(&abort.build().unwrap());
        assert_eq!(engine.state(), ConnectionState::Down);
        assert!(matches!(
            engine.take_failure(),
            Some(ArqError::ConnectionRefused(remote)) if remote == "W1AW"
        ));
    }

    #[test]
    fn test_request_for_other_station_ignored() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("W1AW"), Box::new(wire.clone())).unwrap();
        let request = Frame::control(StreamId::FIRST, BlockType::ConnectRequest, b"N0CALL K1ABC 128".to_vec());
        engine.feed(&request.build().unwrap());
        engine.tick(Instant::now()).unwrap();
        assert_eq!(engine.state(), ConnectionState::Down);
        assert!(wire.take().is_empty());
    }

    #[test]
    fn test_lost_connect_ack_is_repeated() {
        let mut pair = Pair::new(config("N0CALL"), config("W1AW"));
        pair.drop_from_b = 1;
        pair.a.connect("W1AW").unwrap();
        pair.step();
        assert_eq!(pair.b.state(), ConnectionState::Connected);
        assert_eq!(pair.a.state(), ConnectionState::Connecting);

        assert!(pair.run_until(|p| p.a.state() == ConnectionState::Connected, 120));
        assert_eq!(pair.b.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_operation_errors() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire)).unwrap();
        assert!(matches!(engine.send_text("hi"), Err(ArqError::NotConnected)));
        assert!(matches!(engine.disconnect(), Err(ArqError::NotConnected)));
        assert!(matches!(engine.connect("bad call"), Err(ArqError::Config(_))));

        engine.connect("W1AW").unwrap();
        assert!(matches!(engine.connect("W1AW"), Err(ArqError::LinkBusy(_))));
        assert!(matches!(engine.send_text("early"), Err(ArqError::NotConnected)));

        let mut pair = Pair::connected();
        assert!(matches!(pair.a.send_bytes(b"a\x01b"), Err(ArqError::InvalidPayload(1))));
        assert_eq!(pair.a.send_bytes(b"").unwrap(), 0);
    }

    #[test]
    fn test_reconfigure_only_when_down() {
        let mut pair = Pair::connected();
        assert_eq!(pair.a.reconfigure(config("N0CALL")), Err(ConfigError::LinkActive));

        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire)).unwrap();
        let bad = ArqConfig { window: 40, ..config("N0CALL") };
        assert_eq!(engine.reconfigure(bad), Err(ConfigError::Window(40)));
        let good = ArqConfig { block_size: 32, ..config("N0CALL") };
        assert!(engine.reconfigure(good).is_ok());
        assert_eq!(engine.config().block_size, 32);
    }

    #[test]
    fn test_state_change_notifications() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.on_state_change(move |old, new| sink.lock().unwrap().push((old, new)));

        engine.connect("W1AW").unwrap();
        engine.abort();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ConnectionState::Down, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Aborting),
                (ConnectionState::Aborting, ConnectionState::Down),
            ]
        );
    }

    // ------------------------------------------------------------------------
    // Data transfer
    // ------------------------------------------------------------------------

    #[test]
    fn test_300_bytes_become_three_blocks() {
        let mut pair = Pair::connected();
        let message = text(300);
        assert_eq!(pair.a.send_text(&message).unwrap(), 3);
        assert_eq!(pair.a.queued_blocks(), 3);
        assert_eq!(pair.a.state(), ConnectionState::Sending);

        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        let bursts = pair.wire_a.take();
        assert_eq!(bursts.len(), 1);
        assert_eq!(
            kinds(&bursts[0]),
            vec![BlockType::Data(0), BlockType::Data(1), BlockType::Data(2), BlockType::Poll]
        );
        pair.b.feed(&bursts[0]);

        assert!(pair.run_until(|p| p.transfer_done(), 10));
        assert_eq!(pair.a.sequencer().tx_good(), 2);
        assert_eq!(pair.b.sequencer().rx_good(), 2);
        assert_eq!(*pair.got_b.lock().unwrap(), message.into_bytes());
    }

    #[test]
    fn test_burst_respects_frame_limit() {
        let mut pair = Pair::connected();
        pair.a.send_text(&text(128 * 10)).unwrap();
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        let bursts = pair.wire_a.take();
        let frames = kinds(&bursts[0]);
        assert_eq!(frames.len(), 8);
        assert_eq!(frames[7], BlockType::Poll);
        assert_eq!(pair.a.outstanding_blocks(), 7);
        assert_eq!(pair.a.queued_blocks(), 3);
    }

    #[test]
    fn test_transfer_across_sequence_wrap() {
        let config_a = ArqConfig { block_size: 16, ..config("N0CALL") };
        let mut pair = Pair::connected_with(config_a, config("W1AW"));
        let message = text(16 * 100 + 5);
        assert_eq!(pair.a.send_text(&message).unwrap(), 101);

        assert!(pair.run_until(|p| p.transfer_done(), 200));
        assert_eq!(*pair.got_b.lock().unwrap(), message.into_bytes());
        assert_eq!(pair.b.stats().blocks_delivered, 101);
        assert_eq!(pair.a.sequencer().tx_good(), 100 % 64);
    }

    #[test]
    fn test_corrupted_block_is_retransmitted() {
        let mut pair = Pair::connected();
        let message = text(128 * 8);
        pair.a.send_text(&message).unwrap();

        let mut corrupted = false;
        for _ in 0..50 {
            pair.step_with(|burst| {
                if corrupted {
                    return;
                }
                let second = burst
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| **b == SOH)
                    .nth(1)
                    .map(|(i, _)| i);
                if let Some(i) = second {
                    burst[i + 6] ^= 0x01;
                    corrupted = true;
                }
            });
            if pair.transfer_done() {
                break;
            }
        }

        assert!(corrupted);
        assert!(pair.transfer_done());
        assert_eq!(*pair.got_b.lock().unwrap(), message.into_bytes());
        assert_eq!(pair.b.stats().checksum_errors, 1);
        assert!(pair.a.stats().retransmissions >= 1);
    }

    #[test]
    fn test_flipped_bit_leaves_receiver_untouched() {
        let mut pair = Pair::connected();
        let mut bytes = Frame::data(StreamId::FIRST, 0, b"payload".to_vec()).build().unwrap();
        bytes[7] ^= 0x02;
        pair.b.feed(&bytes);

        assert_eq!(pair.b.sequencer().rx_good(), 63);
        assert_eq!(pair.b.sequencer().rx_end(), 63);
        assert_eq!(pair.b.stats().checksum_errors, 1);
        assert_eq!(pair.b.stats().blocks_delivered, 0);
        assert!(pair.got_b.lock().unwrap().is_empty());
        assert_eq!(pair.b.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_missing_block_sent_before_new_block() {
        let mut pair = Pair::connected();
        pair.a.send_text(&text(256)).unwrap();
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        pair.wire_a.take();

        // Receiver got block 1 but not block 0
        let status = StatusReport { good: 63, end: 1, missing: vec![0] };
        let frame = Frame::control(StreamId::FIRST, BlockType::Status, status.to_payload());
        pair.a.feed(&frame.build().unwrap());
        pair.a.send_text(&text(10)).unwrap();

        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        let bursts = pair.wire_a.take();
        assert_eq!(
            kinds(&bursts[0]),
            vec![BlockType::Data(0), BlockType::Data(2), BlockType::Poll]
        );
    }

    #[test]
    fn test_lost_status_triggers_window_resend() {
        let mut pair = Pair::connected();
        let message = text(200);
        pair.a.send_text(&message).unwrap();
        pair.drop_from_b = 1;

        pair.step();
        assert_eq!(pair.a.outstanding_blocks(), 2);
        assert_eq!(pair.a.state(), ConnectionState::Sending);

        assert!(pair.run_until(|p| p.transfer_done(), 150));
        assert_eq!(pair.a.stats().retransmissions, 2);
        // Duplicates were dropped by the receiver
        assert_eq!(*pair.got_b.lock().unwrap(), message.into_bytes());
    }

    #[test]
    fn test_batch_processed_before_retransmission_decision() {
        let mut pair = Pair::connected();
        pair.a.send_text(&text(256)).unwrap();
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        pair.wire_a.take();

        let status = StatusReport { good: 1, end: 1, missing: vec![] };
        let batch = build_burst(&[
            Frame::control(StreamId::FIRST, BlockType::Status, status.to_payload()),
            Frame::data(StreamId::FIRST, 0, b"from the peer".to_vec()),
            Frame::control(StreamId::FIRST, BlockType::Poll, Vec::new()),
        ])
        .unwrap();
        pair.a.feed(&batch);

        // Applied at once, acted on at the next tick
        assert_eq!(pair.a.outstanding_blocks(), 0);
        assert_eq!(*pair.got_a.lock().unwrap(), b"from the peer".to_vec());
        assert_eq!(pair.a.state(), ConnectionState::Sending);
        assert!(pair.wire_a.take().is_empty());

        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        assert_eq!(pair.a.state(), ConnectionState::Connected);
        let bursts = pair.wire_a.take();
        assert_eq!(
            frames_of(&bursts[0]),
            vec![Frame::control(StreamId::FIRST, BlockType::Status, vec![0x20, 0x20])]
        );
    }

    #[test]
    fn test_both_directions_at_once() {
        let mut pair = Pair::connected();
        let ab = text(700);
        let ba = text(450).to_uppercase();
        pair.a.send_text(&ab).unwrap();
        pair.b.send_text(&ba).unwrap();

        assert!(pair.run_until(
            |p| p.transfer_done() && p.b.is_idle() && p.b.state() == ConnectionState::Connected,
            50
        ));
        assert_eq!(*pair.got_b.lock().unwrap(), ab.into_bytes());
        assert_eq!(*pair.got_a.lock().unwrap(), ba.into_bytes());
    }

    #[test]
    fn test_send_file_delivers_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.bin");
        let contents: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        std::fs::write(&path, &contents).unwrap();

        let mut pair = Pair::connected();
        pair.a.send_file(&path).unwrap();
        assert!(pair.run_until(|p| p.transfer_done(), 50));

        let mut assembler = TransferAssembler::new();
        let deliveries = assembler.push(&pair.got_b.lock().unwrap());
        assert_eq!(
            deliveries,
            vec![Delivery::File { name: "report.bin".into(), contents }]
        );
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    #[test]
    fn test_abort_mid_transfer_drops_everything() {
        let mut pair = Pair::connected();
        pair.a.send_text(&text(128 * 5)).unwrap();
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        pair.wire_a.take();
        assert_eq!(pair.a.outstanding_blocks(), 5);

        pair.a.abort();
        assert_eq!(pair.a.state(), ConnectionState::Down);
        assert_eq!(pair.a.outstanding_blocks(), 0);
        assert_eq!(pair.a.queued_blocks(), 0);
        assert!(matches!(pair.a.take_failure(), Some(ArqError::AbortedByLocal)));

        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        let bursts = pair.wire_a.take();
        assert_eq!(bursts.len(), 1);
        assert_eq!(kinds(&bursts[0]), vec![BlockType::Abort]);

        for _ in 0..5 {
            pair.now += Duration::from_secs(10);
            pair.a.tick(pair.now).unwrap();
        }
        assert!(pair.wire_a.take().is_empty());

        // The peer honours the abort
        pair.b.feed(&bursts[0]);
        assert_eq!(pair.b.state(), ConnectionState::Down);
        assert!(matches!(pair.b.take_failure(), Some(ArqError::AbortedByRemote)));
    }

    #[test]
    fn test_graceful_disconnect_waits_for_window() {
        let mut pair = Pair::connected();
        let message = text(128 * 9);
        pair.a.send_text(&message).unwrap();
        pair.step();
        assert_eq!(pair.a.state(), ConnectionState::Sending);

        pair.a.disconnect().unwrap();
        assert_eq!(pair.a.state(), ConnectionState::Sending);
        assert!(matches!(pair.a.send_text("more"), Err(ArqError::NotConnected)));

        assert!(pair.run_until(
            |p| p.a.state() == ConnectionState::Down && p.b.state() == ConnectionState::Down,
            20
        ));
        assert_eq!(*pair.got_b.lock().unwrap(), message.into_bytes());
        assert!(pair.a.take_failure().is_none());
        assert!(pair.b.take_failure().is_none());
    }

    #[test]
    fn test_disconnect_without_ack_times_out() {
        let mut pair = Pair::connected();
        pair.a.disconnect().unwrap();
        assert_eq!(pair.a.state(), ConnectionState::Disconnecting);
        pair.cut = true;

        pair.run_for(Duration::from_secs(9));
        assert_eq!(pair.a.state(), ConnectionState::Disconnecting);
        pair.run_for(Duration::from_secs(2));
        assert_eq!(pair.a.state(), ConnectionState::Down);
        assert!(pair.a.take_failure().is_none());
    }

    #[test]
    fn test_send_retries_exhausted_aborts() {
        let config_a = ArqConfig { max_retries: 2, ..config("N0CALL") };
        let mut pair = Pair::connected_with(config_a, config("W1AW"));
        let failures = Arc::new(Mutex::new(0));
        let count = failures.clone();
        pair.a.on_failure(move |_| *count.lock().unwrap() += 1);

        pair.cut = true;
        pair.a.send_text(&text(300)).unwrap();
        pair.step();
        assert_eq!(pair.a.state(), ConnectionState::Sending);

        pair.run_for(Duration::from_secs(15));
        assert_eq!(pair.a.state(), ConnectionState::Sending);
        assert_eq!(pair.a.stats().retransmissions, 3);

        let mut last = Vec::new();
        for _ in 0..100 {
            pair.now += TICK;
            pair.a.tick(pair.now).unwrap();
            last.extend(pair.wire_a.take());
            if pair.a.state() == ConnectionState::Down {
                break;
            }
        }
        assert_eq!(pair.a.state(), ConnectionState::Down);
        assert!(matches!(pair.a.take_failure(), Some(ArqError::Timeout)));
        assert_eq!(*failures.lock().unwrap(), 1);
        assert_eq!(kinds(&last[0]), vec![BlockType::Abort]);
    }

    #[test]
    fn test_idle_link_keepalive_and_timeout() {
        let config_a = ArqConfig { max_retries: 2, ..config("N0CALL") };
        let config_b = ArqConfig { idle_timeout: Duration::from_secs(600), ..config("W1AW") };
        let mut pair = Pair::connected_with(config_a, config_b);

        // Answered keep-alives keep the link up
        pair.run_for(Duration::from_secs(130));
        assert_eq!(pair.a.state(), ConnectionState::Connected);
        assert!(pair.a.stats().frames_sent >= 3);

        pair.cut = true;
        pair.run_for(Duration::from_secs(59));
        assert_eq!(pair.a.state(), ConnectionState::Connected);
        pair.run_for(Duration::from_secs(30));
        assert_eq!(pair.a.state(), ConnectionState::Down);
        assert!(matches!(pair.a.take_failure(), Some(ArqError::Timeout)));
    }

    /// Tick only `a` until its idle timer sends a keep-alive poll.
    fn keepalive_from_a(pair: &mut Pair) -> Vec<u8> {
        loop {
            pair.now += TICK;
            pair.a.tick(pair.now).unwrap();
            if let Some(burst) = pair.wire_a.take().pop() {
                assert_eq!(kinds(&burst), vec![BlockType::Poll]);
                return burst;
            }
        }
    }

    fn patient_peer() -> ArqConfig {
        ArqConfig { idle_timeout: Duration::from_secs(600), ..config("W1AW") }
    }

    #[test]
    fn test_keepalive_reply_not_taken_as_data_ack() {
        let mut pair = Pair::connected_with(config("N0CALL"), patient_peer());
        let poll = keepalive_from_a(&mut pair);
        pair.b.feed(&poll);
        pair.b.tick(pair.now).unwrap();
        let reply = pair.wire_b.take();
        assert_eq!(reply.len(), 1);

        // Data queued while the keep-alive is unanswered is held back
        pair.a.send_text("hello").unwrap();
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        assert!(pair.wire_a.take().is_empty());
        assert_eq!(pair.a.outstanding_blocks(), 0);

        pair.a.feed(&reply[0]);
        pair.now += TICK;
        pair.a.tick(pair.now).unwrap();
        let bursts = pair.wire_a.take();
        assert_eq!(kinds(&bursts[0]), vec![BlockType::Data(0), BlockType::Poll]);
        pair.b.feed(&bursts[0]);

        assert!(pair.run_until(|p| p.transfer_done(), 10));
        assert_eq!(pair.a.stats().retransmissions, 0);
        assert_eq!(*pair.got_b.lock().unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_idle_timeout_survives_lost_keepalive_reply() {
        let config_a = ArqConfig { max_retries: 2, ..config("N0CALL") };
        let mut pair = Pair::connected_with(config_a, patient_peer());

        // Keep-alive poll lost, then data queued behind it
        keepalive_from_a(&mut pair);
        pair.a.send_text("hello").unwrap();
        assert!(pair.run_until(|p| p.transfer_done(), 200));
        assert_eq!(*pair.got_b.lock().unwrap(), b"hello".to_vec());

        // Back in Connected the idle timer must still detect a dead peer
        pair.cut = true;
        pair.run_for(Duration::from_secs(90));
        assert_eq!(pair.a.state(), ConnectionState::Down);
        assert!(matches!(pair.a.take_failure(), Some(ArqError::Timeout)));
    }

    #[test]
    fn test_tx_delay_spaces_bursts() {
        let wire = MockTransport::new();
        let config = ArqConfig { tx_delay: Duration::from_millis(500), ..config("N0CALL") };
        let mut engine = ArqEngine::new(config, Box::new(wire.clone())).unwrap();
        let t0 = Instant::now();

        engine.connect("W1AW").unwrap();
        engine.tick(t0).unwrap();
        assert_eq!(wire.take().len(), 1);

        engine.abort();
        engine.tick(t0 + Duration::from_millis(100)).unwrap();
        assert!(wire.take().is_empty());
        engine.tick(t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(wire.take().len(), 1);
    }

    #[test]
    fn test_transport_failure_aborts_link() {
        let wire = MockTransport::new();
        let mut engine = ArqEngine::new(config("N0CALL"), Box::new(wire.clone())).unwrap();
        wire.break_link();
        engine.connect("W1AW").unwrap();

        assert!(matches!(engine.tick(Instant::now()), Err(ArqError::Io(_))));
        assert_eq!(engine.state(), ConnectionState::Down);
        assert!(matches!(engine.take_failure(), Some(ArqError::AbortedByLocal)));
    }

    #[test]
    fn test_parse_connect_payload() {
        assert_eq!(
            parse_connect_payload(b"N0CALL W1AW 128"),
            Some(("N0CALL".into(), "W1AW".into(), 128))
        );
        assert_eq!(parse_connect_payload(b"N0CALL W1AW"), None);
        assert_eq!(parse_connect_payload(b"N0CALL W1AW big"), None);
        assert_eq!(parse_connect_payload(b"N0CALL W1AW 128 extra"), None);
    }
}
