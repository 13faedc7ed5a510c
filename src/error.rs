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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmodemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read returned no bytes where data was expected
    #[error("Transport closed")]
    TransportClosed,

    /// The peer sent CAN
    #[error("Transfer cancelled by peer")]
    Cancelled,

    #[error("Gave up after {0} consecutive errors")]
    RetriesExhausted(u32),

    #[error("Unexpected frame start 0x{0:02X}")]
    UnexpectedState(u8),

    /// Terminates the state machine loop after a successful transfer
    #[error("Transfer complete")]
    TransferComplete,
}

impl XmodemError {
    /// Protocol-level aborts end a transfer with `false` rather than an error.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            XmodemError::Cancelled | XmodemError::RetriesExhausted(_) | XmodemError::UnexpectedState(_)
        )
    }
}

/// Conditions retried locally, counted toward the consecutive error limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Bad checksum, bad complement or wrong start byte
    Framing,
    /// Block number neither expected nor previous
    Sequence,
    /// Nothing arrived within the response window
    Timeout,
    /// The receiver answered NAK
    Rejected,
    /// A stray byte where a frame should start
    Unexpected,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Framing => write!(f, "framing error"),
            Fault::Sequence => write!(f, "sequence error"),
            Fault::Timeout => write!(f, "timeout"),
            Fault::Rejected => write!(f, "block rejected"),
            Fault::Unexpected => write!(f, "unexpected byte"),
        }
    }
}

/// Outcome of a transfer as seen by callers: `Ok(true)` on success,
/// `Ok(false)` on a protocol abort, `Err` when the transport failed.
pub(crate) fn into_outcome(result: Result<(), XmodemError>) -> Result<bool, XmodemError> {
    match result {
        Ok(()) | Err(XmodemError::TransferComplete) => Ok(true),
        Err(e) if e.is_abort() => {
            log::warn!("Transfer aborted: {}", e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        assert!(into_outcome(Err(XmodemError::TransferComplete)).unwrap());
        assert!(!into_outcome(Err(XmodemError::Cancelled)).unwrap());
        assert!(!into_outcome(Err(XmodemError::RetriesExhausted(10))).unwrap());
        assert!(!into_outcome(Err(XmodemError::UnexpectedState(0x55))).unwrap());
        assert!(matches!(
            into_outcome(Err(XmodemError::TransportClosed)),
            Err(XmodemError::TransportClosed)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(XmodemError::UnexpectedState(0x0A).to_string(), "Unexpected frame start 0x0A");
        assert_eq!(XmodemError::RetriesExhausted(10).to_string(), "Gave up after 10 consecutive errors");
    }
}
