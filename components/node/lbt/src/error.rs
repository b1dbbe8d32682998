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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroWakeInterval,
    ZeroSendInterval,
    RestartNotAfterSend,
    /// Duty-cycled receive needs a predecessor to accept packets from
    NoPredecessor,
    InvalidModulation,
    DutyCycle(DutyCycleError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroWakeInterval => write!(f, "wake interval is zero"),
            ConfigError::ZeroSendInterval => write!(f, "send interval is zero"),
            ConfigError::RestartNotAfterSend => {
                write!(f, "restart interval must be longer than send interval")
            }
            ConfigError::NoPredecessor => write!(f, "node id 0 has no predecessor to receive from"),
            ConfigError::InvalidModulation => write!(f, "unsupported modulation"),
            ConfigError::DutyCycle(e) => write!(f, "duty cycle: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RestartCause {
    UptimeExceeded { uptime_ms: TimeMs },
    /// Wake slot held a tag that is not a handled reason
    UnknownWakeReason(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HaltCause {
    RadioInit(RadioError),
    SensorInit(i16),
    /// Sensor reported a fatal status while sampling
    Sensor(i16),
}

/// Conditions a wake cycle cannot recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fatal {
    /// Unconditional full system restart
    Restart(RestartCause),
    /// Stop with the failure indicator
    Halt(HaltCause),
}

impl fmt::Display for RestartCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartCause::UptimeExceeded { uptime_ms } => {
                write!(f, "uptime {}ms exceeded restart interval", uptime_ms)
            }
            RestartCause::UnknownWakeReason(tag) => write!(f, "unknown wake reason {}", tag),
        }
    }
}

impl fmt::Display for HaltCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltCause::RadioInit(e) => write!(f, "radio init failed: {}", e),
            HaltCause::SensorInit(code) => write!(f, "sensor init failed with code {}", code),
            HaltCause::Sensor(code) => write!(f, "sensor failed with code {}", code),
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::Restart(cause) => write!(f, "restart: {}", cause),
            Fatal::Halt(cause) => write!(f, "halt: {}", cause),
        }
    }
}

impl RestartCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartCause::UptimeExceeded { .. } => "uptime_exceeded",
            RestartCause::UnknownWakeReason(_) => "unknown_wake_reason",
        }
    }
}
