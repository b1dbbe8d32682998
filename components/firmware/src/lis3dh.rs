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

//! LIS3DH accelerometer with both interrupt lines set up for threshold crossings

#[allow(unused_imports)]
use defmt::{debug, error, info, warn};
use embedded_hal::i2c::I2c;

use node_api::*;

pub const LIS3DH_ADDRESS: u8 = 0x18;

const WHO_AM_I: u8 = 0x0F;
const WHO_AM_I_VALUE: u8 = 0x33;
const INT1_SRC: u8 = 0x31;
/// OUT_X_L with the auto increment bit
const OUT_X_L_INCREMENT: u8 = 0xA8;
/// One g at +-2 g full scale, high resolution output is left aligned
const LSB_PER_G: f32 = 16384.0;

/// Register values written during init, in order
const CONFIGURATION: [(u8, u8); 12] = [
    // CTRL_REG0: pull-up on SDO/SA0 disconnected
    (0x1E, 0x90),
    // CTRL_REG1: 25 Hz, all axes enabled, low power
    (0x20, 0x3F),
    // CTRL_REG2: high-pass filter on interrupt 1
    (0x21, 0x01),
    // CTRL_REG3: IA1 on INT1
    (0x22, 0x40),
    (0x24, 0x00),
    // CTRL_REG6: IA2 on INT2
    (0x25, 0x20),
    // INT1_CFG: high events on all axes
    (0x30, 0x2A),
    (0x32, 0x20),
    (0x33, 0x08),
    // INT2_CFG: low event on z
    (0x34, 0x10),
    (0x36, 0x10),
    (0x37, 0x08),
];

pub struct Lis3dh<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Lis3dh<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    fn read_register(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut value = [0];
        self.i2c
            .write_read(LIS3DH_ADDRESS, &[register], &mut value)?;
        Ok(value[0])
    }

    fn try_init(&mut self) -> Result<bool, I2C::Error> {
        if self.read_register(WHO_AM_I)? != WHO_AM_I_VALUE {
            return Ok(false);
        }
        for (register, value) in CONFIGURATION {
            self.i2c.write(LIS3DH_ADDRESS, &[register, value])?;
        }
        Ok(true)
    }
}

impl<I2C: I2c> Accelerometer for Lis3dh<I2C> {
    fn init(&mut self) -> Result<(), AccelerometerError> {
        match self.try_init() {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("unexpected accelerometer id");
                Err(AccelerometerError)
            }
            Err(_) => Err(AccelerometerError),
        }
    }

    fn read_axes(&mut self) -> Axes {
        let mut raw = [0; 6];
        if self
            .i2c
            .write_read(LIS3DH_ADDRESS, &[OUT_X_L_INCREMENT], &mut raw)
            .is_err()
        {
            warn!("could not read accelerometer axes");
            return Axes::default();
        }
        let axis = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]) as f32 / LSB_PER_G;
        Axes {
            x: axis(0),
            y: axis(2),
            z: axis(4),
        }
    }

    fn clear_interrupt_latch(&mut self) -> u8 {
        match self.read_register(INT1_SRC) {
            Ok(source) => source,
            Err(_) => {
                warn!("could not read interrupt source");
                0
            }
        }
    }
}
