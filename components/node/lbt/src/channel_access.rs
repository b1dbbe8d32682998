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

//! Listen-before-talk: every transmission is preceded by a channel activity detection

use core::fmt;

use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelAccessState {
    Idle,
    AssessingChannel,
    ChannelBusyBackoff,
    Transmitting,
}

impl fmt::Display for ChannelAccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelAccessState::Idle => "Idle",
            ChannelAccessState::AssessingChannel => "AssessingChannel",
            ChannelAccessState::ChannelBusyBackoff => "ChannelBusyBackoff",
            ChannelAccessState::Transmitting => "Transmitting",
        };
        write!(f, "{}", name)
    }
}

/// Consecutive busy channel assessments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryCounter(u32);

impl RetryCounter {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendOutcome {
    Sent,
    /// Transmission hit the hardware timeout
    TimedOut,
    /// Another node occupied the channel, nothing was sent
    ChannelBusy { retries: u32 },
    /// Channel activity detection did not complete, nothing was sent
    AssessmentFailed,
    EncodingFailed,
    RadioFault(RadioError),
}

impl SendOutcome {
    /// Whether a transmission completed, successfully or not
    pub fn transmitted(&self) -> bool {
        matches!(self, SendOutcome::Sent | SendOutcome::TimedOut)
    }
}

pub fn cad_params_for(modulation: &LoraModulation) -> CadParams {
    CadParams {
        symbols: CadSymbols::_8,
        detection_peak: modulation.spreading_factor + 13,
        detection_min: 10,
        exit_mode: CadExitMode::CadOnly,
    }
}

/// Duration of a channel activity detection with `params`
pub fn cad_duration_us(modulation: &LoraModulation, params: &CadParams) -> u32 {
    params.symbols.count() * modulation.symbol_time_us()
}

#[derive(Debug)]
pub struct ChannelAccessController {
    node_id: NodeId,
    state: ChannelAccessState,
    retries: RetryCounter,
    cad: CadParams,
    timeout_policy: TimeoutPolicy,
}

impl ChannelAccessController {
    pub fn new(node_id: NodeId, modulation: &LoraModulation, timeout_policy: TimeoutPolicy) -> Self {
        Self {
            node_id,
            state: ChannelAccessState::Idle,
            retries: RetryCounter::default(),
            cad: cad_params_for(modulation),
            timeout_policy,
        }
    }

    pub fn state(&self) -> ChannelAccessState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries.get()
    }

    fn transition(&mut self, state: ChannelAccessState, now: TimeMs) {
        self.state = state;
        event_log_channel!(now, self.node_id, state);
    }

    /// Assess the channel and send the current payload if it is free
    ///
    /// There is no retry within an attempt. Whatever the outcome, the radio is handed back to the
    /// duty-cycle scheduler before returning.
    pub async fn attempt_send<R: Radio>(
        &mut self,
        radio: &mut R,
        events: &RadioEventRouter<'_>,
        scheduler: &DutyCycleScheduler,
        node: &mut NodeState,
        now: TimeMs,
    ) -> SendOutcome {
        let outcome = self.assess_and_send(radio, events, scheduler, node, now).await;
        if let Err(e) = scheduler.resume(radio, &mut node.radio_power, now) {
            warn!("could not resume receive: {}", e);
        }
        self.transition(ChannelAccessState::Idle, now);
        outcome
    }

    async fn assess_and_send<R: Radio>(
        &mut self,
        radio: &mut R,
        events: &RadioEventRouter<'_>,
        scheduler: &DutyCycleScheduler,
        node: &mut NodeState,
        now: TimeMs,
    ) -> SendOutcome {
        if let Err(e) = scheduler.quiesce(radio, &mut node.radio_power) {
            return SendOutcome::RadioFault(e);
        }
        events.clear_completion();
        self.transition(ChannelAccessState::AssessingChannel, now);
        if let Err(e) = radio.start_channel_assessment(&self.cad) {
            return SendOutcome::RadioFault(e);
        }
        node.radio_power = RadioPower::Active;

        let completion = events.next_completion().await;
        match completion {
            Completion::ChannelBusy => {
                self.retries.increment();
                event_log_cad!(now, self.node_id, completion.as_str(), self.retries.get());
                self.transition(ChannelAccessState::ChannelBusyBackoff, now);
                SendOutcome::ChannelBusy {
                    retries: self.retries.get(),
                }
            }
            Completion::CadFailed => {
                self.retries.reset();
                warn!("channel activity detection failed");
                event_log_cad!(now, self.node_id, completion.as_str(), 0);
                SendOutcome::AssessmentFailed
            }
            Completion::ChannelFree => {
                self.retries.reset();
                event_log_cad!(now, self.node_id, completion.as_str(), 0);
                self.transmit(radio, events, node, now).await
            }
            Completion::TxDone | Completion::TxTimeout => {
                error!("unexpected completion {} during assessment", completion.as_str());
                SendOutcome::AssessmentFailed
            }
        }
    }

    async fn transmit<R: Radio>(
        &mut self,
        radio: &mut R,
        events: &RadioEventRouter<'_>,
        node: &mut NodeState,
        now: TimeMs,
    ) -> SendOutcome {
        self.transition(ChannelAccessState::Transmitting, now);
        let packet = match node.payload.encode() {
            Ok(packet) => packet,
            Err(_) => {
                error!("could not encode payload");
                return SendOutcome::EncodingFailed;
            }
        };
        if let Err(e) = radio.transmit(&packet) {
            return SendOutcome::RadioFault(e);
        }

        let completion = events.next_completion().await;
        match completion {
            Completion::TxDone => {
                node.payload.sent_packets = node.payload.sent_packets.wrapping_add(1);
                event_log_tx!(now, self.node_id, completion.as_str(), node.payload.sent_packets);
                SendOutcome::Sent
            }
            Completion::TxTimeout => {
                if self.timeout_policy.count_timeouts_as_sent {
                    node.payload.sent_packets = node.payload.sent_packets.wrapping_add(1);
                }
                warn!("transmit timeout");
                event_log_tx!(now, self.node_id, completion.as_str(), node.payload.sent_packets);
                SendOutcome::TimedOut
            }
            _ => {
                error!("unexpected completion {} during transmit", completion.as_str());
                SendOutcome::RadioFault(RadioError::Hardware)
            }
        }
    }
}
