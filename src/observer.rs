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

//! Hooks into the receiver's reactions to protocol events.
//!
//! Before the receiver performs its default reaction to an event (sending
//! ACK or NAK, appending a block, finishing the transfer) it asks the
//! observer whether the event was handled externally. Returning `true` skips
//! the default reaction entirely. This is how tests inject faults and how
//! callers collect statistics.

use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReceiveEvent {
    EndOfTransmission,
    GoodBlock,
    RepeatedBlock,
    UnexpectedBlock,
    Cancel,
    InvalidPacket,
    Timeout,
    ProtocolFailed,
}

impl ReceiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ReceiveEvent::EndOfTransmission => "End of Transmission",
            ReceiveEvent::GoodBlock => "Good Block",
            ReceiveEvent::RepeatedBlock => "Repeated Block",
            ReceiveEvent::UnexpectedBlock => "Unexpected Block",
            ReceiveEvent::Cancel => "Cancel Event",
            ReceiveEvent::InvalidPacket => "Invalid Packet",
            ReceiveEvent::Timeout => "Timeout Event",
            ReceiveEvent::ProtocolFailed => "Protocol Failed",
        }
    }
}

impl std::fmt::Display for ReceiveEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-event hooks. Every method returns "handled externally".
///
/// All methods forward to [`EventObserver::on_event`] by default, so an
/// observer that treats every event alike only implements that one, while a
/// fault injector overrides just the events it cares about.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, _event: ReceiveEvent) -> bool {
        false
    }

    fn end_of_transmission(&self) -> bool {
        self.on_event(ReceiveEvent::EndOfTransmission)
    }

    fn good_block(&self) -> bool {
        self.on_event(ReceiveEvent::GoodBlock)
    }

    fn repeated_block(&self) -> bool {
        self.on_event(ReceiveEvent::RepeatedBlock)
    }

    fn unexpected_block(&self) -> bool {
        self.on_event(ReceiveEvent::UnexpectedBlock)
    }

    fn cancel(&self) -> bool {
        self.on_event(ReceiveEvent::Cancel)
    }

    fn invalid_packet(&self) -> bool {
        self.on_event(ReceiveEvent::InvalidPacket)
    }

    fn timeout(&self) -> bool {
        self.on_event(ReceiveEvent::Timeout)
    }

    fn protocol_failed(&self) -> bool {
        self.on_event(ReceiveEvent::ProtocolFailed)
    }
}

/// Leaves the default protocol untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl EventObserver for NullObserver {}

/// Logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl EventObserver for LoggingObserver {
    fn on_event(&self, event: ReceiveEvent) -> bool {
        log::info!("EVENT: {}", event);
        false
    }
}

/// Tallies events by name. Safe to share between receivers.
#[derive(Debug, Default)]
pub struct CountingObserver {
    tracking: Mutex<BTreeMap<&'static str, usize>>,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event names with their counts, sorted by name.
    pub fn report(&self) -> Vec<(&'static str, usize)> {
        let tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        tracking.iter().map(|(name, count)| (*name, *count)).collect()
    }

    pub fn count(&self, event: ReceiveEvent) -> usize {
        let tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        tracking.get(event.name()).copied().unwrap_or(0)
    }

    pub fn log_report(&self) {
        log::info!("EVENT REPORT:");
        for (name, count) in self.report() {
            log::info!("EVENT: {} COUNT: {}", name, count);
        }
        log::info!("END EVENTS");
    }
}

impl EventObserver for CountingObserver {
    fn on_event(&self, event: ReceiveEvent) -> bool {
        let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        *tracking.entry(event.name()).or_insert(0) += 1;
        false
    }
}
