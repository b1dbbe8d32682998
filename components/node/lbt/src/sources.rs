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

//! Interrupt and timer side of the wake sources
//!
//! These handlers only touch the wake slot and their own arm flags, never the node state.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{WakeReason, WakeSignal};

/// Periodic wake timer
pub struct TimerSource<'a> {
    wake: &'a WakeSignal,
}

impl<'a> TimerSource<'a> {
    pub const fn new(wake: &'a WakeSignal) -> Self {
        Self { wake }
    }

    /// Timer callback
    pub fn on_expired(&self) {
        self.wake.raise(WakeReason::TimerExpired);
    }
}

/// The two accelerometer interrupt lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionLine {
    /// Threshold on any axis
    Int1,
    /// Threshold on the z axis
    Int2,
}

impl MotionLine {
    fn index(&self) -> usize {
        match self {
            MotionLine::Int1 => 0,
            MotionLine::Int2 => 1,
        }
    }
}

/// Accelerometer threshold interrupts
///
/// Both lines start disarmed. A handled interrupt disarms both lines until the dispatcher rearms
/// them at the end of the wake cycle.
pub struct MotionSource<'a> {
    wake: &'a WakeSignal,
    armed: [AtomicBool; 2],
}

impl<'a> MotionSource<'a> {
    pub const fn new(wake: &'a WakeSignal) -> Self {
        Self {
            wake,
            armed: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    /// Interrupt handler of `line`
    ///
    /// Returns whether the interrupt raised a wake. Interrupts on a disarmed line are dropped.
    pub fn on_interrupt(&self, line: MotionLine) -> bool {
        if !self.armed[line.index()].swap(false, Ordering::AcqRel) {
            return false;
        }
        self.disarm();
        self.wake.raise(WakeReason::MotionDetected);
        true
    }

    pub fn rearm(&self) {
        for line in &self.armed {
            line.store(true, Ordering::Release);
        }
    }

    pub fn disarm(&self) {
        for line in &self.armed {
            line.store(false, Ordering::Release);
        }
    }

    pub fn is_armed(&self, line: MotionLine) -> bool {
        self.armed[line.index()].load(Ordering::Acquire)
    }
}
