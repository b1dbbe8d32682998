//  _____       ______   ____
// |_   _|     |  ____|/ ____|  Institute of Embedded Systems
//   | |  _ __ | |__  | (___    Zurich University of Applied Sciences
//   | | | '_ \|  __|  \___ \   8401 Winterthur, Switzerland
//  _| |_| | | | |____ ____) |
// |_____|_| |_|______|_____/
//
// Copyright 2025 Institute of Embedded Systems at Zurich University of Applied Sciences.
// All rights reserved.
// SPDX-License-Identifier: MIT

use core::fmt;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

/// Why the worker was woken
///
/// The discriminant is the tag stored in the wake slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WakeReason {
    DownlinkReceived = 0,
    TimerExpired = 1,
    MotionDetected = 2,
    None = 0xFF,
}

impl WakeReason {
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::DownlinkReceived => "downlink_received",
            WakeReason::TimerExpired => "timer_expired",
            WakeReason::MotionDetected => "motion_detected",
            WakeReason::None => "none",
        }
    }
}

impl TryFrom<u8> for WakeReason {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(WakeReason::DownlinkReceived),
            1 => Ok(WakeReason::TimerExpired),
            2 => Ok(WakeReason::MotionDetected),
            0xFF => Ok(WakeReason::None),
            other => Err(other),
        }
    }
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single binary wake condition plus the reason tag of the last source that raised it
///
/// Raising an already raised signal only overwrites the tag (last writer wins), there is no queue
/// of pending reasons. Raising never blocks and may happen from interrupt context. Only one
/// worker may wait.
pub struct WakeSignal {
    slot: Signal<CriticalSectionRawMutex, u8>,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            slot: Signal::new(),
        }
    }

    pub fn raise(&self, reason: WakeReason) {
        self.raise_tag(reason.tag());
    }

    /// Raise with a raw tag, which is not necessarily a valid [`WakeReason`]
    pub fn raise_tag(&self, tag: u8) {
        self.slot.signal(tag);
    }

    /// Wait without timeout until the signal is raised, clears it and returns the raw tag
    pub async fn wait(&self) -> u8 {
        self.slot.wait().await
    }

    /// Take the tag if the signal is raised, without waiting
    pub fn try_take(&self) -> Option<u8> {
        self.slot.try_take()
    }

    pub fn is_raised(&self) -> bool {
        self.slot.signaled()
    }

    pub fn clear(&self) {
        self.slot.reset();
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}
