//! Events
//!
//! Thin wrapper giving [`WaitHeader`] its two classic flavors: a
//! notification event wakes everyone and stays set, a synchronization
//! event wakes one waiter and auto-clears.

use super::wait::{SignalKind, WaitHeader};

pub use super::wait::SignalKind as EventKind;

pub struct Event {
    hdr: WaitHeader,
}

impl Event {
    pub const fn notification() -> Self {
        Self {
            hdr: WaitHeader::new(SignalKind::Notification),
        }
    }

    pub const fn synchronization() -> Self {
        Self {
            hdr: WaitHeader::new(SignalKind::Synchronization),
        }
    }

    pub fn set(&self) {
        self.hdr.signal();
    }

    pub fn clear(&self) {
        self.hdr.reset();
    }

    pub fn is_set(&self) -> bool {
        self.hdr.is_signaled()
    }

    pub fn header(&self) -> &WaitHeader {
        &self.hdr
    }

    pub fn abort_waiters(&self) {
        self.hdr.abort_waiters();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::notification()
    }
}
