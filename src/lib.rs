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

//! XMODEM (checksum variant) file transfer over any byte transport.
//!
//! Data moves in 128-byte blocks framed as `SOH, n, 255-n, data, sum`.
//! The receiver drives the transfer with NAK/ACK, the sender answers each
//! NAK by resending and ends with EOT.

pub mod config;
pub mod error;
pub mod observer;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use config::Config;
pub use error::XmodemError;
pub use observer::{CountingObserver, EventObserver, LoggingObserver, NullObserver, ReceiveEvent};
pub use receiver::XmodemReceiver;
pub use sender::XmodemSender;
pub use transport::{PipeTransport, SerialTransport, TcpTransport, Transport};
