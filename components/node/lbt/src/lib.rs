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

//! Wake/dispatch core of a battery powered LoRa sensor node
//!
//! The node sleeps until one of its wake sources (periodic timer, accelerometer threshold lines,
//! radio receive) raises the [`WakeSignal`]. The [`Dispatcher`] then handles exactly one
//! [`WakeReason`], sends through the listen-before-talk [`ChannelAccessController`] when needed
//! and leaves the radio in duty-cycled receive before waiting again.

#![cfg_attr(not(test), no_std)]

use node_api::*;

mod channel_access;
mod config;
mod dispatcher;
mod duty_cycle;
mod error;
mod event_log;
#[cfg(test)]
mod mock;
mod payload;
mod radio_events;
mod signal;
mod sources;
mod tilt;

pub use crate::{
    channel_access::{
        cad_duration_us, cad_params_for, ChannelAccessController, ChannelAccessState, RetryCounter,
        SendOutcome,
    },
    config::{NodeConfig, ReceiveMode, SamplingPolicy, TimeoutPolicy},
    dispatcher::{Cycle, Dispatcher, NodeState},
    duty_cycle::{DutyCycleError, DutyCycleScheduler, DutyCycleWindow, RadioPower},
    error::{ConfigError, Fatal, HaltCause, RestartCause},
    payload::{split_hundredths, OutgoingPayload, PAYLOAD_SIZE},
    radio_events::{Completion, Downlink, RadioEventRouter},
    signal::{WakeReason, WakeSignal},
    sources::{MotionLine, MotionSource, TimerSource},
    tilt::{calculate_tilt, Tilt},
};

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::{debug, error, info, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::{debug, error, info, warn};

const MS_PER_S: TimeMs = 1000;
const MS_PER_MIN: TimeMs = 60 * MS_PER_S;
const MS_PER_H: TimeMs = 60 * MS_PER_MIN;

/// Node identifier, first byte of every payload record
pub type NodeId = u8;

/// Largest packet the radio can carry
pub const MAX_PACKET_SIZE: usize = 255;
