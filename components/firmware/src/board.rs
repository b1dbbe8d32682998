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

#[allow(unused_imports)]
use defmt::{debug, error, info, warn};
use embassy_stm32::gpio::{Output, Pin};
use embassy_time::{block_for, Duration, Instant};

use node_api::*;

const HALT_BLINK_ON: Duration = Duration::from_millis(50);
const HALT_BLINK_OFF: Duration = Duration::from_millis(300);

pub struct UptimeClock;

impl Clock for UptimeClock {
    fn now_ms(&self) -> TimeMs {
        Instant::now().as_millis()
    }
}

pub struct NodeSystem<'d, P: Pin> {
    led: Output<'d, P>,
}

impl<'d, P: Pin> NodeSystem<'d, P> {
    pub fn new(led: Output<'d, P>) -> Self {
        Self { led }
    }
}

impl<P: Pin> System for NodeSystem<'_, P> {
    fn restart(&mut self) -> ! {
        info!("restarting");
        cortex_m::peripheral::SCB::sys_reset()
    }

    fn halt(&mut self) -> ! {
        error!("halted");
        loop {
            self.led.set_high();
            block_for(HALT_BLINK_ON);
            self.led.set_low();
            block_for(HALT_BLINK_OFF);
        }
    }

    fn indicate_awake(&mut self, awake: bool) {
        if awake {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
    }
}

pub struct NodeBoard<R, S, A, B, Y> {
    pub radio: R,
    pub sensor: S,
    pub accelerometer: A,
    pub battery: B,
    pub clock: UptimeClock,
    pub system: Y,
}

impl<R, S, A, B, Y> Board for NodeBoard<R, S, A, B, Y>
where
    R: Radio,
    S: SensorSampler,
    A: Accelerometer,
    B: BatteryReader,
    Y: System,
{
    type Radio = R;
    type Sensor = S;
    type Accelerometer = A;
    type Battery = B;
    type Clock = UptimeClock;
    type System = Y;

    fn radio(&mut self) -> &mut Self::Radio {
        &mut self.radio
    }

    fn sensor(&mut self) -> &mut Self::Sensor {
        &mut self.sensor
    }

    fn accelerometer(&mut self) -> &mut Self::Accelerometer {
        &mut self.accelerometer
    }

    fn battery(&mut self) -> &mut Self::Battery {
        &mut self.battery
    }

    fn clock(&self) -> &Self::Clock {
        &self.clock
    }

    fn system(&mut self) -> &mut Self::System {
        &mut self.system
    }
}
