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

//! BME680 environment sensor in forced mode
//!
//! A sample returns the measurement triggered by the previous one, so the worker never waits for
//! a conversion. Gas measurements and the air quality estimates derived from them are not
//! supported, those fields stay zero with accuracy 0.

#[allow(unused_imports)]
use defmt::{debug, error, info, warn};
use embassy_time::{block_for, Duration};
use embedded_hal::i2c::I2c;

use node_api::*;

pub const BME680_ADDRESS: u8 = 0x76;

const CHIP_ID: u8 = 0xD0;
const CHIP_ID_VALUE: u8 = 0x61;
const RESET: u8 = 0xE0;
const RESET_COMMAND: u8 = 0xB6;
const CTRL_GAS_1: u8 = 0x71;
const CTRL_HUM: u8 = 0x72;
const CTRL_MEAS: u8 = 0x74;
const CONFIG: u8 = 0x75;
const MEAS_STATUS_0: u8 = 0x1D;
const COEFF_1: u8 = 0x8A;
const COEFF_2: u8 = 0xE1;

const NEW_DATA: u8 = 0x80;
const MEASURING: u8 = 0x20;
/// Humidity oversampling x1
const OSRS_H: u8 = 0b001;
/// Temperature x2, pressure x16, forced mode
const CTRL_MEAS_FORCED: u8 = (0b010 << 5) | (0b101 << 2) | 0b01;

/// Status codes reported like the vendor library does, negative ones are fatal
const STATUS_COMMUNICATION_FAILED: i16 = -2;
const STATUS_DEVICE_NOT_FOUND: i16 = -3;
const STATUS_SAMPLE_NOT_READ: i16 = 1;

#[derive(Debug, Default, Clone, Copy)]
struct Calibration {
    t1: f32,
    t2: f32,
    t3: f32,
    p1: f32,
    p2: f32,
    p3: f32,
    p4: f32,
    p5: f32,
    p6: f32,
    p7: f32,
    p8: f32,
    p9: f32,
    p10: f32,
    h1: f32,
    h2: f32,
    h3: f32,
    h4: f32,
    h5: f32,
    h6: f32,
    h7: f32,
}

impl Calibration {
    /// `c` holds the 23 bytes from 0x8A followed by the 14 bytes from 0xE1
    fn from_registers(c: &[u8; 37]) -> Self {
        let u16_at = |lsb: usize| u16::from_le_bytes([c[lsb], c[lsb + 1]]) as f32;
        let i16_at = |lsb: usize| i16::from_le_bytes([c[lsb], c[lsb + 1]]) as f32;
        let i8_at = |i: usize| c[i] as i8 as f32;
        Self {
            t1: u16_at(31),
            t2: i16_at(0),
            t3: i8_at(2),
            p1: u16_at(4),
            p2: i16_at(6),
            p3: i8_at(8),
            p4: i16_at(10),
            p5: i16_at(12),
            p6: i8_at(15),
            p7: i8_at(14),
            p8: i16_at(18),
            p9: i16_at(20),
            p10: c[22] as f32,
            h1: (((c[25] as u16) << 4) | (c[24] as u16 & 0x0F)) as f32,
            h2: (((c[23] as u16) << 4) | (c[24] as u16 >> 4)) as f32,
            h3: i8_at(26),
            h4: i8_at(27),
            h5: i8_at(28),
            h6: c[29] as f32,
            h7: i8_at(30),
        }
    }

    /// Temperature in °C and the fine value the other compensations need
    fn temperature(&self, adc: u32) -> (f32, f32) {
        let adc = adc as f32;
        let var1 = (adc / 16384.0 - self.t1 / 1024.0) * self.t2;
        let d = adc / 131072.0 - self.t1 / 8192.0;
        let var2 = d * d * self.t3 * 16.0;
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa
    fn pressure(&self, adc: u32, t_fine: f32) -> f32 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (self.p6 / 131072.0);
        var2 += var1 * self.p5 * 2.0;
        var2 = var2 / 4.0 + self.p4 * 65536.0;
        var1 = (self.p3 * var1 * var1 / 16384.0 + self.p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc as f32;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 * p * p / 2147483648.0;
        let var2 = p * (self.p8 / 32768.0);
        let p256 = p / 256.0;
        let var3 = p256 * p256 * p256 * (self.p10 / 131072.0);
        p + (var1 + var2 + var3 + self.p7 * 128.0) / 16.0
    }

    /// Relative humidity in %
    fn humidity(&self, adc: u16, t_fine: f32) -> f32 {
        let t = t_fine / 5120.0;
        let var1 = adc as f32 - (self.h1 * 16.0 + self.h3 / 2.0 * t);
        let var2 = var1
            * (self.h2 / 262144.0 * (1.0 + self.h4 / 16384.0 * t + self.h5 / 1048576.0 * t * t));
        let var3 = self.h6 / 16384.0;
        let var4 = self.h7 / 2097152.0;
        (var2 + (var3 + var4 * t) * var2 * var2).clamp(0.0, 100.0)
    }
}

pub struct Bme680<I2C> {
    i2c: I2C,
    calibration: Calibration,
}

impl<I2C: I2c> Bme680<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            calibration: Calibration::default(),
        }
    }

    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(BME680_ADDRESS, &[register], buf)
            .map_err(|_| SensorError::Fatal(STATUS_COMMUNICATION_FAILED))
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(BME680_ADDRESS, &[register, value])
            .map_err(|_| SensorError::Fatal(STATUS_COMMUNICATION_FAILED))
    }

    fn trigger(&mut self) -> Result<(), SensorError> {
        self.write(CTRL_MEAS, CTRL_MEAS_FORCED)
    }

    fn read_sample(&mut self) -> Result<Option<EnvironmentReading>, SensorError> {
        let mut field = [0; 10];
        self.read(MEAS_STATUS_0, &mut field)?;
        if field[0] & NEW_DATA == 0 {
            if field[0] & MEASURING == 0 {
                self.trigger()?;
            }
            return Ok(None);
        }
        let adc_p = ((field[2] as u32) << 12) | ((field[3] as u32) << 4) | (field[4] as u32 >> 4);
        let adc_t = ((field[5] as u32) << 12) | ((field[6] as u32) << 4) | (field[7] as u32 >> 4);
        let adc_h = u16::from_be_bytes([field[8], field[9]]);
        self.trigger()?;

        let (temperature_c, t_fine) = self.calibration.temperature(adc_t);
        Ok(Some(EnvironmentReading {
            temperature_c,
            humidity_pct: self.calibration.humidity(adc_h, t_fine),
            pressure_pa: self.calibration.pressure(adc_p, t_fine),
            ..Default::default()
        }))
    }
}

impl<I2C: I2c> SensorSampler for Bme680<I2C> {
    fn init(&mut self) -> Result<(), SensorError> {
        let mut id = [0];
        self.read(CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID_VALUE {
            return Err(SensorError::Fatal(STATUS_DEVICE_NOT_FOUND));
        }
        self.write(RESET, RESET_COMMAND)?;
        block_for(Duration::from_millis(10));

        let mut coefficients = [0; 37];
        let (first, second) = coefficients.split_at_mut(23);
        self.read(COEFF_1, first)?;
        self.read(COEFF_2, second)?;
        self.calibration = Calibration::from_registers(&coefficients);

        self.write(CTRL_HUM, OSRS_H)?;
        self.write(CONFIG, 0)?;
        self.write(CTRL_GAS_1, 0)?;
        self.trigger()
    }

    fn sample(&mut self) -> Result<Option<EnvironmentReading>, SensorError> {
        // a failed read keeps the previous values
        self.read_sample().map_err(|e| match e {
            SensorError::Fatal(_) => SensorError::Warning(STATUS_SAMPLE_NOT_READ),
            warning => warning,
        })
    }
}
