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

use embassy_stm32::adc::{Adc, AdcPin, Instance};

use node_api::*;

/// 3.0 V reference over 12 bits, times the 1.73 ratio of the battery divider
const VBAT_MV_PER_LSB: f32 = 1.73 * 0.732_421_9;

/// Charge estimate of a LiPo cell, not capped at 100 %
pub fn battery_percent_from_mv(mv: f32) -> u8 {
    let percent = if mv < 3300.0 {
        0.0
    } else if mv < 3600.0 {
        (mv - 3300.0) / 30.0
    } else {
        10.0 + (mv - 3600.0) * 0.15
    };
    // float to int casts saturate
    percent as u8
}

pub struct BatteryAdc<'d, T: Instance, P: AdcPin<T>> {
    adc: Adc<'d, T>,
    pin: P,
}

impl<'d, T: Instance, P: AdcPin<T>> BatteryAdc<'d, T, P> {
    pub fn new(adc: Adc<'d, T>, pin: P) -> Self {
        Self { adc, pin }
    }
}

impl<T: Instance, P: AdcPin<T>> BatteryReader for BatteryAdc<'_, T, P> {
    fn battery_percent(&mut self) -> u8 {
        let raw = self.adc.read(&mut self.pin);
        battery_percent_from_mv(raw as f32 * VBAT_MV_PER_LSB)
    }
}
