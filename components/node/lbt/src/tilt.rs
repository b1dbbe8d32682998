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

use core::f32::consts::PI;

use libm::{atan2f, sqrtf};

use crate::*;

/// Inclination of each axis in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tilt {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

fn degrees(rad: f32) -> u8 {
    // negative angles saturate to 0
    (rad * 180.0 / PI) as u8
}

pub fn calculate_tilt(axes: Axes) -> Tilt {
    let Axes { x, y, z } = axes;
    Tilt {
        x: degrees(atan2f(x, sqrtf(y * y + z * z))),
        y: degrees(atan2f(y, sqrtf(x * x + z * z))),
        z: degrees(atan2f(sqrtf(x * x + y * y), z)),
    }
}
