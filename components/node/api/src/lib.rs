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

//! Interfaces between the node core and the hardware it runs on.
//!
//! Everything the core does not own (radio, sensors, time, resets) is reached through the traits
//! in this crate. Firmware and simulator provide the implementations.

#![cfg_attr(not(test), no_std)]

use core::fmt;

/// Time as milliseconds since boot
pub type TimeMs = u64;

/// LoRa coding rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodingRate {
    _4_5,
    _4_6,
    _4_7,
    _4_8,
}

impl CodingRate {
    /// Number of redundancy bits per 4 data bits
    pub fn redundancy(&self) -> u32 {
        match self {
            CodingRate::_4_5 => 1,
            CodingRate::_4_6 => 2,
            CodingRate::_4_7 => 3,
            CodingRate::_4_8 => 4,
        }
    }
}

/// LoRa modulation and packet parameters shared by TX and RX
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoraModulation {
    pub frequency_hz: u32,
    /// 7..=12
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate: CodingRate,
    /// Preamble length in symbols, same for TX and RX
    pub preamble_len: u16,
    /// Output power in dBm
    pub tx_power_dbm: i8,
    /// Hardware timeout for a single transmission
    pub tx_timeout_ms: u32,
}

impl LoraModulation {
    /// Duration of one symbol (2^SF / BW)
    pub fn symbol_time_us(&self) -> u32 {
        saturate((1u64 << self.spreading_factor) * 1_000_000 / self.bandwidth_hz as u64)
    }

    /// Duration of the preamble including the 4.25 sync symbols, saturated at `u32::MAX`
    pub fn preamble_time_us(&self) -> u32 {
        saturate((self.preamble_len as u64 * 4 + 17) * self.symbol_time_us() as u64 / 4)
    }

    /// Time on air of an explicit header packet with CRC (Semtech AN1200.13)
    pub fn time_on_air_us(&self, payload_len: usize) -> u32 {
        let sf = self.spreading_factor as i64;
        // low data rate optimization is mandated above 16ms symbol time
        let low_data_rate = if self.symbol_time_us() > 16_000 { 1 } else { 0 };
        let numerator = 8 * payload_len as i64 - 4 * sf + 28 + 16;
        let denominator = 4 * (sf - 2 * low_data_rate);
        let payload_symbols = 8
            + (numerator.max(0) + denominator - 1) / denominator
                * (self.coding_rate.redundancy() as i64 + 4);
        let symbols_x4 = (self.preamble_len as i64 * 4 + 17) + payload_symbols * 4;
        saturate((symbols_x4 * self.symbol_time_us() as i64 / 4) as u64)
    }
}

fn saturate(us: u64) -> u32 {
    u32::try_from(us).unwrap_or(u32::MAX)
}

/// Number of symbols a channel activity detection listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CadSymbols {
    _1,
    _2,
    _4,
    _8,
    _16,
}

impl CadSymbols {
    pub fn count(&self) -> u32 {
        match self {
            CadSymbols::_1 => 1,
            CadSymbols::_2 => 2,
            CadSymbols::_4 => 4,
            CadSymbols::_8 => 8,
            CadSymbols::_16 => 16,
        }
    }
}

/// What the radio does once channel activity detection finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CadExitMode {
    /// Return to standby and report the result
    CadOnly,
    /// Stay in receive when activity was detected
    CadRx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CadParams {
    pub symbols: CadSymbols,
    pub detection_peak: u8,
    pub detection_min: u8,
    pub exit_mode: CadExitMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Radio was not initialized or did not respond
    NotReady,
    /// Another operation is still queued on the radio
    Busy,
    /// Driver reported an error
    Hardware,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::NotReady => write!(f, "radio not ready"),
            RadioError::Busy => write!(f, "radio busy"),
            RadioError::Hardware => write!(f, "radio hardware error"),
        }
    }
}

/// Events the radio driver delivers from its own callback context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent<'a> {
    TxDone,
    TxTimeout,
    RxDone {
        payload: &'a [u8],
        rssi: i16,
        snr: i8,
    },
    RxTimeout,
    RxError,
    CadDone {
        /// `true` when another transmitter occupies the channel
        channel_activity: bool,
    },
    /// Channel activity detection could not complete
    CadFailed,
}

/// Half-duplex LoRa transceiver
///
/// All operations only start the radio; completions are reported asynchronously as
/// [`RadioEvent`]s through the driver's callback.
pub trait Radio {
    /// Apply modulation and packet configuration
    fn init(&mut self, modulation: &LoraModulation) -> Result<(), RadioError>;

    /// Stop any receive activity and enter the lowest power state
    fn sleep(&mut self) -> Result<(), RadioError>;

    /// Start a channel activity detection, completes with `CadDone` or `CadFailed`
    fn start_channel_assessment(&mut self, params: &CadParams) -> Result<(), RadioError>;

    /// Start transmitting a packet, completes with `TxDone` or `TxTimeout`
    fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError>;

    /// Alternate between listening for `listen_us` and sleeping for `sleep_us` until a packet
    /// arrives
    fn enter_duty_cycled_receive(&mut self, listen_us: u32, sleep_us: u32)
        -> Result<(), RadioError>;
}

/// Compensated output of the environmental fusion sensor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvironmentReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub pressure_pa: f32,
    pub iaq: f32,
    /// 0 (unreliable) ..= 3 (calibrated)
    pub iaq_accuracy: u8,
    pub co2_equivalent_ppm: f32,
    pub breath_voc_equivalent_ppm: f32,
    pub gas_percentage: f32,
}

/// Status codes reported by the sensor stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Sensor still works, values may be degraded
    Warning(i16),
    /// Sensor is unusable
    Fatal(i16),
}

impl SensorError {
    /// Classify a raw status code: negative codes are errors, positive ones warnings
    pub fn from_status(code: i16) -> Option<Self> {
        match code {
            0 => None,
            c if c < 0 => Some(SensorError::Fatal(c)),
            c => Some(SensorError::Warning(c)),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SensorError::Fatal(_))
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Warning(code) => write!(f, "sensor warning code {}", code),
            SensorError::Fatal(code) => write!(f, "sensor error code {}", code),
        }
    }
}

pub trait SensorSampler {
    fn init(&mut self) -> Result<(), SensorError>;

    /// Blocking sample, may wait for the sensor to settle
    ///
    /// Returns `Ok(None)` when the sensor has no new data yet.
    fn sample(&mut self) -> Result<Option<EnvironmentReading>, SensorError>;
}

/// Acceleration in g
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Axes {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccelerometerError;

pub trait Accelerometer {
    /// Configure sampling and the threshold/duration interrupts
    fn init(&mut self) -> Result<(), AccelerometerError>;

    fn read_axes(&mut self) -> Axes;

    /// Read the interrupt source register, which releases the latched interrupt
    ///
    /// Returns the source bits that were latched.
    fn clear_interrupt_latch(&mut self) -> u8;
}

pub trait BatteryReader {
    /// Remaining charge, 0..=100
    fn battery_percent(&mut self) -> u8;
}

pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> TimeMs;
}

pub trait System {
    /// Full system reset
    fn restart(&mut self) -> !;

    /// Stop and blink the failure indicator forever
    fn halt(&mut self) -> !;

    /// Show whether the node is processing a wake cycle
    fn indicate_awake(&mut self, _awake: bool) {}
}

/// All collaborators of a node
pub trait Board {
    type Radio: Radio;
    type Sensor: SensorSampler;
    type Accelerometer: Accelerometer;
    type Battery: BatteryReader;
    type Clock: Clock;
    type System: System;

    fn radio(&mut self) -> &mut Self::Radio;
    fn sensor(&mut self) -> &mut Self::Sensor;
    fn accelerometer(&mut self) -> &mut Self::Accelerometer;
    fn battery(&mut self) -> &mut Self::Battery;
    fn clock(&self) -> &Self::Clock;
    fn system(&mut self) -> &mut Self::System;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf7() -> LoraModulation {
        LoraModulation {
            frequency_hz: 868_300_000,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate: CodingRate::_4_5,
            preamble_len: 8,
            tx_power_dbm: 22,
            tx_timeout_ms: 3000,
        }
    }

    #[test]
    fn symbol_and_preamble_time() {
        let m = sf7();
        assert_eq!(m.symbol_time_us(), 1024);
        // (8 + 4.25) symbols
        assert_eq!(m.preamble_time_us(), 12_544);
    }

    #[test]
    fn time_on_air_22_bytes_sf7() {
        // 8 + ceil(192 / 28) * 5 = 43 payload symbols, 55.25 symbols in total
        assert_eq!(sf7().time_on_air_us(22), 56_576);
    }

    #[test]
    fn long_preamble_saturates() {
        let m = LoraModulation {
            spreading_factor: 12,
            preamble_len: 40_000,
            ..sf7()
        };
        assert_eq!(m.preamble_time_us(), u32::MAX);
        assert_eq!(m.time_on_air_us(22), u32::MAX);
    }

    #[test]
    fn sensor_status_classes() {
        assert_eq!(SensorError::from_status(0), None);
        assert!(SensorError::from_status(-2).unwrap().is_fatal());
        assert_eq!(SensorError::from_status(10), Some(SensorError::Warning(10)));
    }
}
