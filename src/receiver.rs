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

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use crate::config::Config;
use crate::error::{into_outcome, Fault, XmodemError};
use crate::observer::{EventObserver, NullObserver};
use crate::packet;
use crate::protocol::*;
use crate::transport::Transport;

// ============================================================================
// States
// ============================================================================

pub(crate) struct Start;
pub(crate) struct AwaitPacket;
pub(crate) struct HandlePacket;

// ============================================================================
// FSM Structure
// ============================================================================

/// Per-transfer receiver state. Lives for one `receive` call.
pub(crate) struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    transport: &'a mut dyn Transport,
    observer: &'a dyn EventObserver,
    config: Config,
    // Result slot of the owning XmodemReceiver, filled on success
    received: &'a mut Option<Vec<u8>>,
    payload: Vec<u8>,
    expected_block: u8,
    // Last frame read; None when the read was abandoned
    frame: Option<Vec<u8>>,
    consecutive_errors: u32,
    total_errors: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub(crate) trait ReceiverState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, XmodemError>;
}

type BoxedState<'a> = Box<dyn ReceiverState<'a> + 'a>;

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<'a, S> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            transport: self.transport,
            observer: self.observer,
            config: self.config,
            received: self.received,
            payload: self.payload,
            expected_block: self.expected_block,
            frame: self.frame,
            consecutive_errors: self.consecutive_errors,
            total_errors: self.total_errors,
        })
    }

    fn io_error(&self, e: std::io::Error) -> XmodemError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        XmodemError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn write(&mut self, byte: u8) -> Result<(), XmodemError> {
        log::debug!("> [{}]", byte_name(byte).unwrap_or("??"));
        self.transport.write_bytes(&[byte]).map_err(|e| self.io_error(e))
    }

    fn send_ack(&mut self) -> Result<(), XmodemError> {
        self.write(ACK)
    }

    /// Let the line go quiet first so the sender sees the NAK after it has
    /// finished whatever it was sending.
    fn send_nak(&mut self) -> Result<(), XmodemError> {
        self.drain()?;
        self.write(NAK)
    }

    fn send_can(&mut self) -> Result<(), XmodemError> {
        self.write(CAN)
    }

    fn drain(&mut self) -> Result<(), XmodemError> {
        let ignored = self.transport
            .drain(self.config.drain_window)
            .map_err(|e| self.io_error(e))?;
        if !ignored.is_empty() {
            log::debug!("< [IGNORED: {}]", hex_dump(&ignored));
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, XmodemError> {
        let mut buf = [0u8; 1];
        let count = self.transport.read_bytes(&mut buf).map_err(|e| self.io_error(e))?;
        if count != 1 {
            return Err(XmodemError::TransportClosed);
        }
        Ok(buf[0])
    }

    fn reset_errors(&mut self) {
        self.total_errors += self.consecutive_errors;
        self.consecutive_errors = 0;
    }

    /// Returns true once the consecutive error limit is reached.
    fn count_error(&mut self, fault: Fault) -> bool {
        self.consecutive_errors += 1;
        log::warn!("Expecting block #{}: {} ({} consecutive)", self.expected_block, fault, self.consecutive_errors);
        if self.consecutive_errors >= self.config.max_errors {
            log::warn!("< [ERRORS={}]", self.consecutive_errors);
            return true;
        }
        false
    }

    fn finish(&self, outcome: XmodemError) -> XmodemError {
        log::info!("errors={} total_errors={}", self.consecutive_errors, self.total_errors + self.consecutive_errors);
        outcome
    }

    /// Read one frame: a single EOT or CAN byte, or a validated 132-byte
    /// packet. Garbage, corrupt packets and silence are retried here, NAKing
    /// where appropriate. Returns None once too many errors in a row occur.
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>, XmodemError> {
        let mut frame: Vec<u8> = Vec::with_capacity(PACKET_SIZE);
        // Renewed only after a timeout; a NAK for a bad packet or stray byte
        // leaves the resend whatever remains of this window
        let mut deadline = Instant::now() + self.config.response_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ready = self.transport
                .wait_for_data(remaining, self.config.poll_interval)
                .map_err(|e| self.io_error(e))?;

            if !ready {
                log::debug!("< [TIMEOUT]");
                if self.count_error(Fault::Timeout) {
                    return Ok(None);
                }
                if !self.observer.timeout() {
                    self.send_nak()?;
                }
                frame.clear();
                deadline = Instant::now() + self.config.response_timeout;
                continue;
            }

            if frame.is_empty() {
                match self.read_byte()? {
                    byte @ (CAN | EOT) => {
                        log::debug!("< [{}]", byte_name(byte).unwrap_or("??"));
                        self.reset_errors();
                        return Ok(Some(vec![byte]));
                    }
                    SOH => frame.push(SOH),
                    other => {
                        log::debug!("< [?? {:02X}]", other);
                        self.drain()?;
                        if self.count_error(Fault::Unexpected) {
                            return Ok(None);
                        }
                    }
                }
                continue;
            }

            // Take whatever is available, up to the end of the packet
            let mut chunk = [0u8; PACKET_SIZE];
            let wanted = PACKET_SIZE - frame.len();
            let count = self.transport
                .read_bytes(&mut chunk[..wanted])
                .map_err(|e| self.io_error(e))?;
            if count == 0 {
                return Err(XmodemError::TransportClosed);
            }
            frame.extend_from_slice(&chunk[..count]);

            if frame.len() < PACKET_SIZE {
                continue;
            }

            if packet::validate(&frame) {
                log::debug!("< [#{}]: {}", packet::block_number(&frame), hex_dump(&frame));
                self.reset_errors();
                return Ok(Some(frame));
            }

            log::debug!("< [?? {}]", hex_dump(&frame));
            frame.clear();
            if self.count_error(Fault::Framing) {
                return Ok(None);
            }
            if !self.observer.invalid_packet() {
                self.send_nak()?;
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, Start> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;

        // A sender that already started needs no prompt
        let appears_started = fsm.transport.data_available().map_err(|e| fsm.io_error(e))?;
        if !appears_started {
            fsm.send_nak()?;
        }

        let next = fsm.transition::<AwaitPacket>();
        Ok(next as BoxedState<'a>)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, AwaitPacket> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.frame = fsm.read_packet()?;
        let next = fsm.transition::<HandlePacket>();
        Ok(next as BoxedState<'a>)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, HandlePacket> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;

        let Some(frame) = fsm.frame.take() else {
            return fsm.protocol_failed();
        };

        match frame[0] {
            EOT => fsm.end_of_transmission(),
            CAN => fsm.cancel(),
            SOH => fsm.block(&frame),
            other => fsm.unexpected_state(other),
        }
    }
}

impl<'a> ReceiverFsm<'a, HandlePacket> {
    fn await_next(self) -> Result<BoxedState<'a>, XmodemError> {
        let next = self.transition::<AwaitPacket>();
        Ok(next as BoxedState<'a>)
    }

    fn protocol_failed(mut self) -> Result<BoxedState<'a>, XmodemError> {
        if self.observer.protocol_failed() {
            return self.await_next();
        }
        *self.received = None;
        Err(self.finish(XmodemError::RetriesExhausted(self.consecutive_errors)))
    }

    fn end_of_transmission(mut self) -> Result<BoxedState<'a>, XmodemError> {
        if self.observer.end_of_transmission() {
            return self.await_next();
        }
        self.send_ack()?;
        *self.received = Some(std::mem::take(&mut self.payload));
        Err(self.finish(XmodemError::TransferComplete))
    }

    fn cancel(mut self) -> Result<BoxedState<'a>, XmodemError> {
        if self.observer.cancel() {
            return self.await_next();
        }
        self.send_ack()?;
        *self.received = None;
        Err(self.finish(XmodemError::Cancelled))
    }

    fn block(mut self, frame: &[u8]) -> Result<BoxedState<'a>, XmodemError> {
        let block_number = packet::block_number(frame);

        if block_number == self.expected_block {
            if !self.observer.good_block() {
                self.payload.extend_from_slice(packet::payload(frame));
                self.send_ack()?;
                self.expected_block = self.expected_block.wrapping_add(1);
            }
        } else if block_number == self.expected_block.wrapping_sub(1) {
            // Our ACK was lost and the sender repeated the block
            if !self.observer.repeated_block() {
                self.send_ack()?;
            }
        } else {
            log::debug!("< [BLK#{} unexpected.  Should have been {}]", block_number, self.expected_block);
            log::warn!("Expecting block #{}: {} (got #{})", self.expected_block, Fault::Sequence, block_number);
            if !self.observer.unexpected_block() {
                self.send_nak()?;
            }
        }

        self.await_next()
    }

    fn unexpected_state(mut self, byte: u8) -> Result<BoxedState<'a>, XmodemError> {
        log::warn!("< [UNEXPECTED state. Cannot continue]");
        self.send_can()?;
        *self.received = None;
        Err(self.finish(XmodemError::UnexpectedState(byte)))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> ReceiverFsm<'a, Start> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        observer: &'a dyn EventObserver,
        config: Config,
        received: &'a mut Option<Vec<u8>>,
    ) -> Box<Self> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Start>,
            transport,
            observer,
            config,
            received,
            payload: Vec::new(),
            expected_block: 1,
            frame: None,
            consecutive_errors: 0,
            total_errors: 0,
        })
    }
}

fn run<'a>(mut state: BoxedState<'a>) -> Result<(), XmodemError> {
    loop {
        state = state.step()?;
    }
}

/// Receives a buffer over a borrowed transport.
pub struct XmodemReceiver<'t> {
    transport: &'t mut dyn Transport,
    observer: Arc<dyn EventObserver>,
    config: Config,
    received: Option<Vec<u8>>,
}

impl<'t> XmodemReceiver<'t> {
    pub fn new(transport: &'t mut dyn Transport) -> Self {
        XmodemReceiver {
            transport,
            observer: Arc::new(NullObserver),
            config: Config::default(),
            received: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Run a transfer to completion.
    ///
    /// On success the data is available from [`XmodemReceiver::received`],
    /// padded with SUB to a whole number of blocks. Returns `Ok(false)` when
    /// the sender cancels or too many errors occur in a row, and `Err` when
    /// the transport fails or closes.
    pub fn receive(&mut self) -> Result<bool, XmodemError> {
        log::info!("Receiving");
        self.received = None;
        let fsm = ReceiverFsm::new(&mut *self.transport, &*self.observer, self.config, &mut self.received);
        into_outcome(run(fsm))
    }

    /// Data from the last successful transfer.
    pub fn received(&self) -> Option<&[u8]> {
        self.received.as_deref()
    }

    pub fn into_received(self) -> Option<Vec<u8>> {
        self.received
    }

    /// Receive, then save into the current directory under the base name
    /// of `path`.
    pub fn receive_file<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, XmodemError> {
        self.receive_file_in(".", path)
    }

    /// Receive, then save into `dir` under the base name of `path`.
    pub fn receive_file_in<D: AsRef<Path>, P: AsRef<Path>>(&mut self, dir: D, path: P) -> Result<bool, XmodemError> {
        let name = path.as_ref().file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("No file name in {}", path.as_ref().display()),
            )
        })?;
        let target = dir.as_ref().join(name);

        if !self.receive()? {
            return Ok(false);
        }

        let data = self.received.as_deref().unwrap_or_default();
        std::fs::write(&target, data)?;
        log::info!("Wrote {} bytes to {}", data.len(), target.display());
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
