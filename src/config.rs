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

use std::time::Duration;

/// Timing and retry limits shared by the sender and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How long to wait for a byte before reporting a timeout
    pub response_timeout: Duration,
    /// Sleep between availability checks while idle
    pub poll_interval: Duration,
    /// Quiet period before discarding buffered input ahead of a NAK
    pub drain_window: Duration,
    /// Consecutive errors tolerated before giving up
    pub max_errors: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            response_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            drain_window: Duration::from_millis(500),
            max_errors: 10,
        }
    }
}

impl Config {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// No waiting at all: every idle poll is a timeout. Used with scripted
    /// transports where each `None` stands for one empty poll.
    #[cfg(test)]
    pub(crate) fn immediate() -> Self {
        Config::default()
            .with_response_timeout(Duration::ZERO)
            .with_poll_interval(Duration::ZERO)
            .with_drain_window(Duration::ZERO)
    }
}
