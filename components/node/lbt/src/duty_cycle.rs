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

use crate::*;

/// Symbols the receiver listens per window, enough to detect a preamble
const LISTEN_SYMBOLS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyCycleError {
    ZeroListen,
    /// Listen window must be shorter than the sleep window
    ListenNotShorterThanSleep { listen_us: u32, sleep_us: u32 },
}

impl fmt::Display for DutyCycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyCycleError::ZeroListen => write!(f, "listen window is zero"),
            DutyCycleError::ListenNotShorterThanSleep {
                listen_us,
                sleep_us,
            } => write!(
                f,
                "listen window {}us not shorter than sleep window {}us",
                listen_us, sleep_us
            ),
        }
    }
}

/// Receive window and sleep window of the duty-cycled receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyCycleWindow {
    listen_us: u32,
    sleep_us: u32,
}

impl DutyCycleWindow {
    pub fn new(listen_us: u32, sleep_us: u32) -> Result<Self, DutyCycleError> {
        if listen_us == 0 {
            return Err(DutyCycleError::ZeroListen);
        }
        if listen_us >= sleep_us {
            return Err(DutyCycleError::ListenNotShorterThanSleep {
                listen_us,
                sleep_us,
            });
        }
        Ok(Self {
            listen_us,
            sleep_us,
        })
    }

    /// Largest window for which every preamble of `modulation` overlaps a full listen window
    pub fn for_modulation(modulation: &LoraModulation) -> Result<Self, DutyCycleError> {
        let listen_us = LISTEN_SYMBOLS.saturating_mul(modulation.symbol_time_us());
        let sleep_us = modulation
            .preamble_time_us()
            .saturating_sub(2 * listen_us);
        Self::new(listen_us, sleep_us)
    }

    pub fn listen_us(&self) -> u32 {
        self.listen_us
    }

    pub fn sleep_us(&self) -> u32 {
        self.sleep_us
    }

    /// Worst case latency until a pending downlink is caught
    pub fn cycle_us(&self) -> u32 {
        self.listen_us.saturating_add(self.sleep_us)
    }

    /// Share of time the receiver is on
    pub fn listen_permille(&self) -> u32 {
        (self.listen_us as u64 * 1000 / self.cycle_us() as u64) as u32
    }

    /// Whether a preamble of `preamble_us` always covers one complete listen window
    pub fn detects_preamble(&self, preamble_us: u32) -> bool {
        preamble_us >= self.cycle_us() + self.listen_us
    }
}

/// Power state of the radio, changed only by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioPower {
    Sleep,
    /// Assessing the channel or transmitting
    Active,
    DutyCycledReceive,
}

impl RadioPower {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioPower::Sleep => "sleep",
            RadioPower::Active => "active",
            RadioPower::DutyCycledReceive => "duty_cycled_receive",
        }
    }
}

/// Puts the radio back into its idle mode between transmissions
#[derive(Debug)]
pub struct DutyCycleScheduler {
    node_id: NodeId,
    window: DutyCycleWindow,
    mode: ReceiveMode,
}

impl DutyCycleScheduler {
    pub fn new(node_id: NodeId, window: DutyCycleWindow, mode: ReceiveMode) -> Self {
        Self {
            node_id,
            window,
            mode,
        }
    }

    pub fn window(&self) -> &DutyCycleWindow {
        &self.window
    }

    /// Power state the radio is in while idle
    pub fn idle_power(&self) -> RadioPower {
        match self.mode {
            ReceiveMode::DutyCycled => RadioPower::DutyCycledReceive,
            ReceiveMode::TxOnly => RadioPower::Sleep,
        }
    }

    /// Enter the idle receive mode
    ///
    /// `power` is only updated when the radio accepted the command.
    pub fn resume<R: Radio>(
        &self,
        radio: &mut R,
        power: &mut RadioPower,
        now: TimeMs,
    ) -> Result<(), RadioError> {
        match self.mode {
            ReceiveMode::DutyCycled => {
                radio.enter_duty_cycled_receive(self.window.listen_us, self.window.sleep_us)?
            }
            ReceiveMode::TxOnly => radio.sleep()?,
        }
        *power = self.idle_power();
        event_log_duty_cycle!(now, self.node_id, power.as_str());
        Ok(())
    }

    /// Stop receiving before the radio is used for something else
    pub fn quiesce<R: Radio>(&self, radio: &mut R, power: &mut RadioPower) -> Result<(), RadioError> {
        radio.sleep()?;
        *power = RadioPower::Sleep;
        Ok(())
    }
}
