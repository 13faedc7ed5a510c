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

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

/// Duplex byte stream the protocol engines run over.
pub trait Transport: Send {
    /// True if a read would return without blocking. A closed stream also
    /// reports true so that the following read can return 0.
    fn data_available(&mut self) -> io::Result<bool>;

    /// Read up to `buf.len()` bytes. Returns 0 once the stream is closed.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    /// Poll for input, sleeping `poll_interval` between checks. Returns false
    /// if nothing arrived before `timeout` elapsed.
    fn wait_for_data(&mut self, timeout: Duration, poll_interval: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.data_available()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(poll_interval.min(deadline - now));
        }
    }

    /// Sleep for `quiet`, then read and return everything already buffered.
    fn drain(&mut self, quiet: Duration) -> io::Result<Vec<u8>> {
        thread::sleep(quiet);

        let mut ignored = Vec::new();
        let mut buf = [0u8; 256];
        while self.data_available()? {
            let count = self.read_bytes(&mut buf)?;
            if count == 0 {
                // Closed; the next read reports it
                break;
            }
            ignored.extend_from_slice(&buf[..count]);
        }
        Ok(ignored)
    }
}

// ============================================================================
// Serial Port Transport
// ============================================================================

/// Serial line transport that wraps the serialport crate
pub struct SerialTransport {
    port: Option<Box<dyn SerialPortTrait>>,
}

impl SerialTransport {
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

        Ok(SerialTransport { port: Some(port) })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPortTrait>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn data_available(&mut self) -> io::Result<bool> {
        let pending = self.port()?.bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(pending > 0)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.port = None;
        Ok(())
    }
}

// ============================================================================
// TCP Transport
// ============================================================================

/// TCP socket transport
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        log::info!("Connected to {}", stream.peer_addr()?);
        Ok(TcpTransport::new(stream))
    }

    /// Listen on `addr`, accept a single peer, then stop listening.
    pub fn accept<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        log::info!("Listening at {}", listener.local_addr()?);
        let (stream, peer) = listener.accept()?;
        log::info!("Accepted connection from {}", peer);
        Ok(TcpTransport::new(stream))
    }
}

impl Transport for TcpTransport {
    fn data_available(&mut self) -> io::Result<bool> {
        let mut probe = [0u8; 1];
        self.stream.set_nonblocking(true)?;
        let result = self.stream.peek(&mut probe);
        self.stream.set_nonblocking(false)?;

        match result {
            // Ok(0) is EOF, reported as available so the read sees it
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// In-Memory Pipe Transport
// ============================================================================

#[derive(Default)]
struct PipeBuffer {
    bytes: VecDeque<u8>,
    closed: bool,
}

fn lock(buffer: &Mutex<PipeBuffer>) -> MutexGuard<'_, PipeBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One end of an in-memory duplex byte pipe.
///
/// Each end owns its inbound queue and writes into the peer's queue through
/// a weak reference, so dropping one end never keeps the other alive.
pub struct PipeTransport {
    inbound: Arc<Mutex<PipeBuffer>>,
    outbound: Weak<Mutex<PipeBuffer>>,
}

impl PipeTransport {
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let a = Arc::new(Mutex::new(PipeBuffer::default()));
        let b = Arc::new(Mutex::new(PipeBuffer::default()));

        let a_end = PipeTransport { outbound: Arc::downgrade(&b), inbound: a.clone() };
        let b_end = PipeTransport { outbound: Arc::downgrade(&a), inbound: b };
        (a_end, b_end)
    }

    fn mark_closed(&mut self) {
        lock(&self.inbound).closed = true;
        if let Some(peer) = self.outbound.upgrade() {
            lock(&peer).closed = true;
        }
    }
}

impl Transport for PipeTransport {
    fn data_available(&mut self) -> io::Result<bool> {
        let inbound = lock(&self.inbound);
        Ok(inbound.closed || !inbound.bytes.is_empty())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = lock(&self.inbound);
        let count = buf.len().min(inbound.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.bytes.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        let peer = self.outbound.upgrade().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "Pipe peer dropped")
        })?;
        let mut outbound = lock(&peer);
        if outbound.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Pipe closed"));
        }
        outbound.bytes.extend(buf.iter().copied());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.mark_closed();
        Ok(())
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

#[cfg(test)]
pub struct MockTransport {
    // Scripted input. Some = byte ready to read, None = one empty poll
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockTransport {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn data_available(&mut self) -> io::Result<bool> {
        // Out of responses = script error, fail instead of polling forever
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "Mock script exhausted"
            ));
        }

        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Ok(false);
        }

        Ok(true)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at empty poll marker
            }
        }

        Ok(bytes_read)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockTransport {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockTransport dropped with {} unconsumed responses (read {} of {})",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockTransport write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
