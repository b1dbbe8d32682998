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

use crate::*;

/// What the radio does between transmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveMode {
    /// Listen for the predecessor in duty-cycled receive
    DutyCycled,
    /// Never receive, sleep the radio
    TxOnly,
}

impl ReceiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiveMode::DutyCycled => "duty_cycled",
            ReceiveMode::TxOnly => "tx_only",
        }
    }
}

/// How a transmission that hit the hardware timeout is accounted for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeoutPolicy {
    /// Increment the sent packet counter on a transmit timeout too
    pub count_timeouts_as_sent: bool,
}

/// When the environmental sensor is sampled on timer wakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingPolicy {
    /// Only when a send is due
    OnSend,
    /// On every timer wake, sending is still gated by the send interval
    EveryWake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Period of the wake timer
    pub wake_interval_ms: TimeMs,
    /// Minimum time between two timer driven transmissions
    pub send_interval_ms: TimeMs,
    /// Uptime after which the node restarts
    pub restart_interval_ms: TimeMs,
    pub modulation: LoraModulation,
    /// Derived from the modulation when `None`
    pub duty_cycle: Option<DutyCycleWindow>,
    pub receive_mode: ReceiveMode,
    pub timeout_policy: TimeoutPolicy,
    pub sampling: SamplingPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 102,
            wake_interval_ms: 3 * MS_PER_S,
            send_interval_ms: 15 * MS_PER_MIN,
            restart_interval_ms: 24 * MS_PER_H,
            modulation: LoraModulation {
                frequency_hz: 868_300_000,
                spreading_factor: 7,
                bandwidth_hz: 125_000,
                coding_rate: CodingRate::_4_5,
                preamble_len: 8,
                tx_power_dbm: 22,
                tx_timeout_ms: 3000,
            },
            duty_cycle: None,
            receive_mode: ReceiveMode::DutyCycled,
            timeout_policy: TimeoutPolicy::default(),
            sampling: SamplingPolicy::OnSend,
        }
    }
}

impl NodeConfig {
    /// Node whose packets are accepted
    pub fn predecessor(&self) -> Option<NodeId> {
        match self.receive_mode {
            ReceiveMode::DutyCycled => self.node_id.checked_sub(1),
            ReceiveMode::TxOnly => None,
        }
    }

    pub fn duty_cycle_window(&self) -> Result<DutyCycleWindow, ConfigError> {
        match self.duty_cycle {
            Some(window) => Ok(window),
            None => DutyCycleWindow::for_modulation(&self.modulation).map_err(ConfigError::DutyCycle),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wake_interval_ms == 0 {
            return Err(ConfigError::ZeroWakeInterval);
        }
        if self.send_interval_ms == 0 {
            return Err(ConfigError::ZeroSendInterval);
        }
        if self.restart_interval_ms <= self.send_interval_ms {
            return Err(ConfigError::RestartNotAfterSend);
        }
        if self.receive_mode == ReceiveMode::DutyCycled && self.predecessor().is_none() {
            return Err(ConfigError::NoPredecessor);
        }
        if !(7..=12).contains(&self.modulation.spreading_factor)
            || self.modulation.bandwidth_hz == 0
        {
            return Err(ConfigError::InvalidModulation);
        }
        // a packet must fit into the hardware transmit timeout
        let time_on_air_us = self.modulation.time_on_air_us(PAYLOAD_SIZE) as u64;
        if time_on_air_us >= self.modulation.tx_timeout_ms as u64 * 1000 {
            return Err(ConfigError::InvalidModulation);
        }
        self.duty_cycle_window().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.predecessor(), Some(101));
        assert_eq!(config.restart_interval_ms, 86_400_000);
        assert_eq!(config.send_interval_ms, 900_000);
    }

    #[test]
    fn restart_must_follow_send_interval() {
        let config = NodeConfig {
            restart_interval_ms: 900_000,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::RestartNotAfterSend));
    }

    #[test]
    fn first_node_cannot_receive() {
        let config = NodeConfig {
            node_id: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoPredecessor));
        let config = NodeConfig {
            receive_mode: ReceiveMode::TxOnly,
            ..config
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.predecessor(), None);
    }

    #[test]
    fn zero_intervals_rejected() {
        let config = NodeConfig {
            send_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSendInterval));
        let config = NodeConfig {
            wake_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWakeInterval));
    }

    #[test]
    fn explicit_window_overrides_derived() {
        let window = DutyCycleWindow::new(265, 21_640).unwrap();
        let config = NodeConfig {
            duty_cycle: Some(window),
            ..Default::default()
        };
        assert_eq!(config.duty_cycle_window(), Ok(window));
    }

    #[test]
    fn preamble_longer_than_tx_timeout_rejected() {
        let mut config = NodeConfig::default();
        config.modulation.spreading_factor = 12;
        config.modulation.preamble_len = 40_000;
        assert_eq!(config.validate(), Err(ConfigError::InvalidModulation));
    }

    #[test]
    fn slowest_spreading_factor_is_valid() {
        let mut config = NodeConfig::default();
        config.modulation.spreading_factor = 12;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn invalid_derived_window_rejected() {
        let mut config = NodeConfig::default();
        config.modulation.preamble_len = 1;
        assert!(matches!(config.validate(), Err(ConfigError::DutyCycle(_))));
    }
}
