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
use crate::config::Config;
use crate::error::{into_outcome, Fault, XmodemError};
use crate::packet;
use crate::protocol::*;
use crate::transport::Transport;

// ============================================================================
// States
// ============================================================================

pub(crate) struct AwaitStart;
pub(crate) struct SendBlock;
pub(crate) struct AwaitResponse;
pub(crate) struct EotHandshake;

// ============================================================================
// FSM Structure
// ============================================================================

/// Per-transfer sender state. Lives for one `send` call.
pub(crate) struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    transport: &'a mut dyn Transport,
    config: Config,
    data: &'a [u8],
    offset: usize,
    block_number: u8,
    consecutive_errors: u32,
    total_errors: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub(crate) trait SenderState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, XmodemError>;
}

type BoxedState<'a> = Box<dyn SenderState<'a> + 'a>;

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<'a, S> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            transport: self.transport,
            config: self.config,
            data: self.data,
            offset: self.offset,
            block_number: self.block_number,
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

    fn write(&mut self, buf: &[u8]) -> Result<(), XmodemError> {
        self.transport.write_bytes(buf).map_err(|e| self.io_error(e))
    }

    fn send_eot(&mut self) -> Result<(), XmodemError> {
        log::debug!("> [EOT]");
        self.write(&[EOT])
    }

    /// Block until one byte arrives. Timeouts only renew the window; the
    /// sender never gives up on a silent line.
    fn wait_for_byte(&mut self) -> Result<u8, XmodemError> {
        loop {
            let ready = self.transport
                .wait_for_data(self.config.response_timeout, self.config.poll_interval)
                .map_err(|e| self.io_error(e))?;
            if !ready {
                log::debug!("< [TIMEOUT]");
                continue;
            }

            let mut buf = [0u8; 1];
            let count = self.transport.read_bytes(&mut buf).map_err(|e| self.io_error(e))?;
            if count != 1 {
                return Err(XmodemError::TransportClosed);
            }
            return Ok(buf[0]);
        }
    }

    fn reset_errors(&mut self) {
        self.total_errors += self.consecutive_errors;
        self.consecutive_errors = 0;
    }

    fn count_error(&mut self, fault: Fault) -> Result<(), XmodemError> {
        self.consecutive_errors += 1;
        log::warn!("Block #{} {} ({} consecutive)", self.block_number.wrapping_sub(1), fault, self.consecutive_errors);
        if self.consecutive_errors >= self.config.max_errors {
            return Err(self.finish(XmodemError::RetriesExhausted(self.consecutive_errors)));
        }
        Ok(())
    }

    fn finish(&self, outcome: XmodemError) -> XmodemError {
        log::info!("errors={} total_errors={}", self.consecutive_errors, self.total_errors + self.consecutive_errors);
        outcome
    }

    fn is_last_block(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Step back to the block that was just sent. `offset` already points
    /// past it, and after the final block it is clamped to the data length,
    /// so a short final block only rewinds by its own length.
    fn rewind(&mut self) {
        self.block_number = self.block_number.wrapping_sub(1);
        if self.offset > 0 {
            let tail = self.data.len() % BLOCK_SIZE;
            if self.offset == self.data.len() && tail != 0 {
                self.offset -= tail;
            } else {
                self.offset -= BLOCK_SIZE;
            }
        } else {
            self.block_number = 1;
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, AwaitStart> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;
        let byte = fsm.wait_for_byte()?;

        if byte != NAK {
            log::debug!("< [?? {:02X}]", byte);
            return Ok(Box::new(fsm) as BoxedState<'a>);
        }

        log::debug!("< [NAK] OK");
        fsm.reset_errors();

        if fsm.data.is_empty() {
            fsm.send_eot()?;
            let next = fsm.transition::<EotHandshake>();
            Ok(next as BoxedState<'a>)
        } else {
            let next = fsm.transition::<SendBlock>();
            Ok(next as BoxedState<'a>)
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendBlock> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;

        let packet = packet::encode(fsm.block_number, fsm.data, fsm.offset);
        log::debug!("> [#{}]: {}", fsm.block_number, hex_dump(&packet));
        fsm.write(&packet)?;

        fsm.offset = (fsm.offset + BLOCK_SIZE).min(fsm.data.len());
        fsm.block_number = fsm.block_number.wrapping_add(1);

        let next = fsm.transition::<AwaitResponse>();
        Ok(next as BoxedState<'a>)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, AwaitResponse> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;

        match fsm.wait_for_byte()? {
            ACK => {
                log::debug!("< [ACK]");
                fsm.reset_errors();
                if fsm.is_last_block() {
                    fsm.send_eot()?;
                    let next = fsm.transition::<EotHandshake>();
                    Ok(next as BoxedState<'a>)
                } else {
                    let next = fsm.transition::<SendBlock>();
                    Ok(next as BoxedState<'a>)
                }
            }
            NAK => {
                log::debug!("< [NAK]");
                fsm.count_error(Fault::Rejected)?;
                fsm.rewind();
                let next = fsm.transition::<SendBlock>();
                Ok(next as BoxedState<'a>)
            }
            CAN => {
                log::debug!("< [CAN]");
                Err(fsm.finish(XmodemError::Cancelled))
            }
            other => {
                log::debug!("< [?? {:02X}]", other);
                Ok(Box::new(fsm) as BoxedState<'a>)
            }
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, EotHandshake> {
    fn step(self: Box<Self>) -> Result<BoxedState<'a>, XmodemError> {
        let mut fsm = *self;

        match fsm.wait_for_byte()? {
            ACK => {
                log::debug!("< [ACK]");
                fsm.reset_errors();
                Err(fsm.finish(XmodemError::TransferComplete))
            }
            NAK => {
                log::debug!("< [NAK]");
                fsm.count_error(Fault::Rejected)?;
                if fsm.data.is_empty() {
                    fsm.send_eot()?;
                    return Ok(Box::new(fsm) as BoxedState<'a>);
                }
                // The last block may not have arrived; resend it and retry EOT
                fsm.rewind();
                let next = fsm.transition::<SendBlock>();
                Ok(next as BoxedState<'a>)
            }
            CAN => {
                log::debug!("< [CAN]");
                Err(fsm.finish(XmodemError::Cancelled))
            }
            other => {
                log::debug!("< [?? {:02X}]", other);
                Ok(Box::new(fsm) as BoxedState<'a>)
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, AwaitStart> {
    pub(crate) fn new(transport: &'a mut dyn Transport, config: Config, data: &'a [u8]) -> Box<Self> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitStart>,
            transport,
            config,
            data,
            offset: 0,
            block_number: 1,
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

/// Sends a buffer over a borrowed transport.
pub struct XmodemSender<'t> {
    transport: &'t mut dyn Transport,
    config: Config,
}

impl<'t> XmodemSender<'t> {
    pub fn new(transport: &'t mut dyn Transport) -> Self {
        XmodemSender { transport, config: Config::default() }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Wait for the receiver's NAK, send every block and finish with EOT.
    ///
    /// Returns `Ok(false)` when the receiver cancels or rejects the same
    /// block too many times, and `Err` when the transport fails or closes.
    pub fn send(&mut self, data: &[u8]) -> Result<bool, XmodemError> {
        log::info!("Sending {} bytes", data.len());
        let fsm = SenderFsm::new(&mut *self.transport, self.config, data);
        into_outcome(run(fsm))
    }

    pub fn send_file<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, XmodemError> {
        let data = std::fs::read(path.as_ref())?;
        log::info!("Read {} bytes from {}", data.len(), path.as_ref().display());
        self.send(&data)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, PipeTransport};

    fn block(block_number: u8, data: &[u8], offset: usize) -> Vec<u8> {
        packet::encode(block_number, data, offset).to_vec()
    }

    fn send_with(responses: Vec<Option<u8>>, expected_writes: Vec<u8>, data: &[u8]) -> bool {
        let mut mock = MockTransport::new(responses, expected_writes);
        let mut sender = XmodemSender::new(&mut mock).with_config(Config::immediate());
        sender.send(data).expect("send should not fail")
    }

    #[test]
    fn test_sender_single_block() {
        let data = b"Test data";

        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, data, 0);
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_waits_for_nak() {
        let data = b"Test data";

        // Silence and noise before the start NAK are ignored
        let responses = vec![
            None,
            Some(b'x'),
            None,
            None,
            Some(ACK),
            Some(NAK),
            Some(ACK),
            Some(ACK),
        ];

        let mut expected_writes = block(1, data, 0);
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_timeouts_never_exhaust_retries() {
        let data = b"patient";

        // Far more silent windows than the error limit, before the start
        // NAK and again before each response
        let mut responses = vec![None; 15];
        responses.push(Some(NAK));
        responses.extend(vec![None; 15]);
        responses.push(Some(ACK));
        responses.extend(vec![None; 15]);
        responses.push(Some(ACK));

        let mut expected_writes = block(1, data, 0);
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_multiple_blocks() {
        let data: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let mut responses = vec![Some(NAK)];
        for _ in 0..3 {
            responses.push(Some(ACK));
        }
        responses.push(Some(ACK));

        let mut expected_writes = Vec::new();
        for (n, offset) in [(1u8, 0usize), (2, 128), (3, 256)] {
            expected_writes.extend(block(n, &data, offset));
        }
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_sender_ignores_noise_and_silence() {
        let data = b"noise";

        let responses = vec![
            Some(NAK),
            Some(0x55),
            None,
            None,
            Some(ACK),
            Some(ACK),
        ];

        let mut expected_writes = block(1, data, 0);
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_nak_resends_middle_block() {
        let data: Vec<u8> = (0..300).map(|i| (i * 7 % 256) as u8).collect();

        let responses = vec![
            Some(NAK),
            Some(ACK),
            Some(ACK),
            Some(NAK),
            Some(ACK),
            Some(ACK),
        ];

        let mut expected_writes = block(1, &data, 0);
        expected_writes.extend(block(2, &data, 128));
        expected_writes.extend(block(3, &data, 256));
        expected_writes.extend(block(3, &data, 256));
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_sender_resend_partial_final_block() {
        let data: Vec<u8> = (0..200).map(|i| i as u8).collect();

        let responses = vec![Some(NAK), Some(ACK), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, &data, 0);
        expected_writes.extend(block(2, &data, 128));
        expected_writes.extend(block(2, &data, 128));
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_sender_resend_full_final_block() {
        let data = vec![0x42u8; 256];

        let responses = vec![Some(NAK), Some(ACK), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, &data, 0);
        expected_writes.extend(block(2, &data, 128));
        expected_writes.extend(block(2, &data, 128));
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_sender_nak_after_eot_resends_last_block() {
        let data = b"eot";

        let responses = vec![Some(NAK), Some(ACK), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, data, 0);
        expected_writes.push(EOT);
        expected_writes.extend(block(1, data, 0));
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_retry_exhaustion() {
        let data = b"never accepted";

        let mut responses = vec![Some(NAK)];
        let mut expected_writes = Vec::new();
        for _ in 0..10 {
            responses.push(Some(NAK));
            expected_writes.extend(block(1, data, 0));
        }

        assert!(!send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_ack_resets_error_count() {
        let data = vec![0x11u8; 128 * 3];

        let mut responses = vec![Some(NAK)];
        let mut expected_writes = Vec::new();

        // Nine rejections of each block stay below the limit
        for (n, offset) in [(1u8, 0usize), (2, 128), (3, 256)] {
            for _ in 0..9 {
                responses.push(Some(NAK));
                expected_writes.extend(block(n, &data, offset));
            }
            responses.push(Some(ACK));
            expected_writes.extend(block(n, &data, offset));
        }
        responses.push(Some(ACK));
        expected_writes.push(EOT);

        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_sender_cancel() {
        let data = b"cancel me";

        let responses = vec![Some(NAK), Some(CAN)];
        let expected_writes = block(1, data, 0);

        assert!(!send_with(responses, expected_writes, data));
    }

    #[test]
    fn test_sender_empty_buffer() {
        let responses = vec![Some(NAK), Some(ACK)];
        let expected_writes = vec![EOT];

        assert!(send_with(responses, expected_writes, &[]));
    }

    #[test]
    fn test_sender_block_number_wraps() {
        let data = vec![0x33u8; 128 * 256];

        let mut responses = vec![Some(NAK)];
        let mut expected_writes = Vec::new();
        for i in 0..256usize {
            responses.push(Some(ACK));
            expected_writes.extend(block((i + 1) as u8, &data, i * 128));
        }
        responses.push(Some(ACK));
        expected_writes.push(EOT);

        // Block 256 goes out as 0
        assert_eq!(expected_writes[255 * 132 + 1], 0);
        assert!(send_with(responses, expected_writes, &data));
    }

    #[test]
    fn test_rewind_arithmetic() {
        let data = vec![0u8; 1000];
        let mut mock = MockTransport::new(vec![], vec![]);
        let mut fsm = SenderFsm::new(&mut mock, Config::immediate(), &data);

        // Final partial block: 1000 = 7 * 128 + 104
        fsm.offset = 1000;
        fsm.block_number = 9;
        fsm.rewind();
        assert_eq!(fsm.offset, 896);
        assert_eq!(fsm.block_number, 8);

        fsm.offset = 256;
        fsm.block_number = 3;
        fsm.rewind();
        assert_eq!(fsm.offset, 128);
        assert_eq!(fsm.block_number, 2);

        fsm.offset = 0;
        fsm.block_number = 5;
        fsm.rewind();
        assert_eq!(fsm.offset, 0);
        assert_eq!(fsm.block_number, 1);
    }

    #[test]
    fn test_sender_transport_closed() {
        let (mut ours, theirs) = PipeTransport::pair();
        drop(theirs);

        let mut sender = XmodemSender::new(&mut ours).with_config(Config::immediate());
        match sender.send(b"data") {
            Err(XmodemError::TransportClosed) => {}
            other => panic!("Expected TransportClosed, got {:?}", other),
        }
    }

    #[test]
    fn test_send_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send.bin");
        std::fs::write(&path, b"file contents").unwrap();

        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];
        let mut expected_writes = block(1, b"file contents", 0);
        expected_writes.push(EOT);

        let mut mock = MockTransport::new(responses, expected_writes);
        let mut sender = XmodemSender::new(&mut mock).with_config(Config::immediate());
        assert!(sender.send_file(&path).unwrap());
    }

    #[test]
    fn test_send_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTransport::new(vec![], vec![]);
        let mut sender = XmodemSender::new(&mut mock);
        assert!(matches!(
            sender.send_file(dir.path().join("missing.bin")),
            Err(XmodemError::Io(_))
        ));
    }
}
