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

//! XMODEM protocol constants

/// Start of header - begins a 132-byte data packet
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver ready to start, or resend the last block
pub const NAK: u8 = 0x15;

/// Cancel - abort the transfer
pub const CAN: u8 = 0x18;

/// Substitute - pads the final block past the end of the data
pub const SUB: u8 = 0x1A;

/// Payload bytes carried by each block
pub const BLOCK_SIZE: usize = 128;

/// SOH + block number + complement + payload + checksum
pub const PACKET_SIZE: usize = 3 + BLOCK_SIZE + 1;

/// Short name of a protocol byte for wire traces.
pub fn byte_name(byte: u8) -> Option<&'static str> {
    match byte {
        SOH => Some("SOH"),
        EOT => Some("EOT"),
        ACK => Some("ACK"),
        NAK => Some("NAK"),
        CAN => Some("CAN"),
        _ => None,
    }
}

/// Space separated upper-case hex, the format used in wire traces.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
