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

use serde::{Deserialize, Serialize};

use crate::*;

/// Size of one encoded payload record
pub const PAYLOAD_SIZE: usize = 22;

/// Uplink record, encoded as packed little endian fields in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutgoingPayload {
    pub id: NodeId,
    pub battery_percent: u8,
    pub temperature_int: u8,
    pub temperature_dec: u8,
    pub humidity_int: u8,
    pub humidity_dec: u8,
    /// hPa
    #[serde(with = "postcard::fixint::le")]
    pub pressure_hpa: u16,
    pub tilt_x: u8,
    pub tilt_y: u8,
    pub tilt_z: u8,
    #[serde(with = "postcard::fixint::le")]
    pub iaq: u16,
    pub iaq_accuracy: u8,
    #[serde(with = "postcard::fixint::le")]
    pub co2_equivalent: u16,
    #[serde(with = "postcard::fixint::le")]
    pub breath_voc_equivalent: u16,
    pub gas_percentage: u8,
    #[serde(with = "postcard::fixint::le")]
    pub sent_packets: u16,
    /// 1 when the record was sent because of a motion wake
    pub motion_alarm: u8,
}

/// Split a non-negative value into its integer part and hundredths, both saturated into a byte
pub fn split_hundredths(value: f32) -> (u8, u8) {
    // float to int casts saturate and map NaN to 0
    let hundredths = libm::roundf(value * 100.0) as u32;
    ((hundredths / 100).min(u8::MAX as u32) as u8, (hundredths % 100) as u8)
}

impl OutgoingPayload {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn apply_environment(&mut self, reading: &EnvironmentReading) {
        (self.temperature_int, self.temperature_dec) = split_hundredths(reading.temperature_c);
        (self.humidity_int, self.humidity_dec) = split_hundredths(reading.humidity_pct);
        self.pressure_hpa = (reading.pressure_pa / 100.0) as u16;
        self.iaq = reading.iaq as u16;
        self.iaq_accuracy = reading.iaq_accuracy;
        self.co2_equivalent = reading.co2_equivalent_ppm as u16;
        self.breath_voc_equivalent = reading.breath_voc_equivalent_ppm as u16;
        self.gas_percentage = reading.gas_percentage as u8;
    }

    pub fn set_tilt(&mut self, tilt: Tilt) {
        self.tilt_x = tilt.x;
        self.tilt_y = tilt.y;
        self.tilt_z = tilt.z;
    }

    pub fn encode(&self) -> Result<[u8; PAYLOAD_SIZE], postcard::Error> {
        let mut buf = [0; PAYLOAD_SIZE];
        let used = postcard::to_slice(self, &mut buf)?.len();
        if used != PAYLOAD_SIZE {
            return Err(postcard::Error::SerializeBufferFull);
        }
        Ok(buf)
    }

    pub fn decode(record: &[u8; PAYLOAD_SIZE]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(record)
    }

    /// Id of the node that sent `packet`, which is the id of its last complete record
    pub fn last_record_sender(packet: &[u8]) -> Option<NodeId> {
        let records = packet.len() / PAYLOAD_SIZE;
        if records == 0 {
            return None;
        }
        Some(packet[(records - 1) * PAYLOAD_SIZE])
    }
}
