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

//! Framing of the 132-byte XMODEM data packet.
//!
//! Layout: `SOH`, block number, `!block number`, 128 payload bytes, and a
//! one-byte arithmetic checksum of the payload.

use crate::protocol::*;

pub type Packet = [u8; PACKET_SIZE];

/// Sum of `data` truncated to 8 bits.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build the packet carrying `data[offset..offset + 128]`, padding with SUB
/// past the end of `data`.
pub fn encode(block_number: u8, data: &[u8], offset: usize) -> Packet {
    let mut packet = [SUB; PACKET_SIZE];
    packet[0] = SOH;
    packet[1] = block_number;
    packet[2] = !block_number;

    let start = offset.min(data.len());
    let end = (offset + BLOCK_SIZE).min(data.len());
    let chunk = &data[start..end];
    packet[3..3 + chunk.len()].copy_from_slice(chunk);

    packet[PACKET_SIZE - 1] = checksum(payload(&packet));
    packet
}

/// True if `frame` is a complete, uncorrupted data packet.
pub fn validate(frame: &[u8]) -> bool {
    frame.len() == PACKET_SIZE
        && frame[0] == SOH
        && frame[1] == !frame[2]
        && frame[PACKET_SIZE - 1] == checksum(payload(frame))
}

/// Block number of a framed packet.
pub fn block_number(frame: &[u8]) -> u8 {
    frame[1]
}

/// The 128 payload bytes of a framed packet.
pub fn payload(frame: &[u8]) -> &[u8] {
    &frame[3..3 + BLOCK_SIZE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let data = b"Test data";
        let packet = encode(1, data, 0);

        assert_eq!(packet[0], SOH);
        assert_eq!(packet[1], 0x01);
        assert_eq!(packet[2], 0xFE);
        assert_eq!(&packet[3..12], b"Test data");
        assert!(packet[12..131].iter().all(|&b| b == SUB));

        let mut block = data.to_vec();
        block.resize(128, SUB);
        let expected: u8 = block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(packet[131], expected);
        assert!(validate(&packet));
    }

    #[test]
    fn test_encode_window() {
        let data: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let second = encode(2, &data, 128);
        assert_eq!(payload(&second), &data[128..256]);

        let last = encode(3, &data, 256);
        assert_eq!(&payload(&last)[..44], &data[256..300]);
        assert!(payload(&last)[44..].iter().all(|&b| b == SUB));

        let past_end = encode(4, &data, 300);
        assert!(payload(&past_end).iter().all(|&b| b == SUB));
    }

    #[test]
    fn test_block_number_wraps() {
        let packet = encode(255u8.wrapping_add(1), &[0x55; 128], 0);
        assert_eq!(block_number(&packet), 0);
        assert_eq!(packet[2], 0xFF);
        assert!(validate(&packet));
    }

    #[test]
    fn test_validate_rejects_corruption() {
        let data = [0xA5u8; 128];
        let good = encode(7, &data, 0);
        assert!(validate(&good));

        let mut bad_checksum = good;
        bad_checksum[131] ^= 0xFF;
        assert!(!validate(&bad_checksum));

        let mut bad_payload = good;
        bad_payload[50] = bad_payload[50].wrapping_add(1);
        assert!(!validate(&bad_payload));

        let mut bad_complement = good;
        bad_complement[2] = 7;
        assert!(!validate(&bad_complement));

        let mut bad_start = good;
        bad_start[0] = EOT;
        assert!(!validate(&bad_start));

        assert!(!validate(&good[..131]));
        assert!(!validate(&[CAN]));

        let mut long = good.to_vec();
        long.push(0);
        assert!(!validate(&long));
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[SUB; 128]), (0x1Au32 * 128 % 256) as u8);
    }
}
