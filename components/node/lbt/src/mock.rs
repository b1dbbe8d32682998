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

//! Scripted collaborators for unit tests

use std::{cell::Cell, collections::VecDeque};

use crate::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RadioOp {
    Init,
    Sleep,
    Cad,
    Transmit(Vec<u8>),
    DutyCycledReceive(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CadScript {
    Busy,
    Free,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxScript {
    Done,
    Timeout,
}

/// Radio that completes every operation immediately from the scripted results
///
/// Panics when an operation starts while the completion of the previous one was not consumed, or
/// when a transmission is not preceded by a free channel assessment.
#[derive(Default)]
pub(crate) struct MockRadio<'a> {
    pub(crate) events: Option<&'a RadioEventRouter<'a>>,
    pub(crate) ops: Vec<RadioOp>,
    /// Free when empty
    pub(crate) cad_results: VecDeque<CadScript>,
    /// Done when empty
    pub(crate) tx_results: VecDeque<TxScript>,
    /// Error returned by the next operation instead of running it
    pub(crate) fail_next: Option<RadioError>,
    /// Called while an assessment is in flight
    pub(crate) on_cad: Option<Box<dyn FnMut() + 'a>>,
    cleared_to_send: bool,
}

impl<'a> MockRadio<'a> {
    pub(crate) fn connected(events: &'a RadioEventRouter<'a>) -> Self {
        Self {
            events: Some(events),
            ..Default::default()
        }
    }

    pub(crate) fn transmissions(&self) -> Vec<&Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RadioOp::Transmit(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_transmitted_payload(&self) -> Option<OutgoingPayload> {
        let packet = self.transmissions().pop()?;
        let record: [u8; PAYLOAD_SIZE] = packet.as_slice().try_into().ok()?;
        OutgoingPayload::decode(&record).ok()
    }

    pub(crate) fn cad_count(&self) -> usize {
        self.ops.iter().filter(|op| **op == RadioOp::Cad).count()
    }

    fn run(&mut self, op: RadioOp) -> Result<(), RadioError> {
        if let Some(e) = self.fail_next.take() {
            return Err(e);
        }
        self.ops.push(op);
        Ok(())
    }

    fn complete(&self, event: RadioEvent) {
        if let Some(events) = self.events {
            assert!(
                !events.has_pending_completion(),
                "operation started while another one is in flight"
            );
            events.dispatch(event);
        }
    }
}

impl Radio for MockRadio<'_> {
    fn init(&mut self, _modulation: &LoraModulation) -> Result<(), RadioError> {
        self.run(RadioOp::Init)
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.run(RadioOp::Sleep)
    }

    fn start_channel_assessment(&mut self, _params: &CadParams) -> Result<(), RadioError> {
        self.run(RadioOp::Cad)?;
        if let Some(hook) = self.on_cad.as_mut() {
            hook();
        }
        let result = self.cad_results.pop_front().unwrap_or(CadScript::Free);
        self.cleared_to_send = result == CadScript::Free;
        self.complete(match result {
            CadScript::Busy => RadioEvent::CadDone {
                channel_activity: true,
            },
            CadScript::Free => RadioEvent::CadDone {
                channel_activity: false,
            },
            CadScript::Failed => RadioEvent::CadFailed,
        });
        Ok(())
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        assert!(self.cleared_to_send, "transmit without free channel assessment");
        self.cleared_to_send = false;
        self.run(RadioOp::Transmit(packet.to_vec()))?;
        let result = self.tx_results.pop_front().unwrap_or(TxScript::Done);
        self.complete(match result {
            TxScript::Done => RadioEvent::TxDone,
            TxScript::Timeout => RadioEvent::TxTimeout,
        });
        Ok(())
    }

    fn enter_duty_cycled_receive(&mut self, listen_us: u32, sleep_us: u32) -> Result<(), RadioError> {
        self.cleared_to_send = false;
        self.run(RadioOp::DutyCycledReceive(listen_us, sleep_us))
    }
}

pub(crate) fn reading(temperature_c: f32) -> EnvironmentReading {
    EnvironmentReading {
        temperature_c,
        humidity_pct: 40.5,
        pressure_pa: 96_200.0,
        iaq: 50.0,
        iaq_accuracy: 1,
        co2_equivalent_ppm: 600.0,
        breath_voc_equivalent_ppm: 0.5,
        gas_percentage: 0.0,
    }
}

pub(crate) struct MockSensor {
    pub(crate) init_result: Result<(), SensorError>,
    /// `reading(20.0)` when empty
    pub(crate) samples: VecDeque<Result<Option<EnvironmentReading>, SensorError>>,
    pub(crate) sample_count: usize,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self {
            init_result: Ok(()),
            samples: VecDeque::new(),
            sample_count: 0,
        }
    }
}

impl SensorSampler for MockSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        self.init_result
    }

    fn sample(&mut self) -> Result<Option<EnvironmentReading>, SensorError> {
        self.sample_count += 1;
        self.samples
            .pop_front()
            .unwrap_or(Ok(Some(reading(20.0))))
    }
}

/// Accelerometer with a latched interrupt source register
#[derive(Default)]
pub(crate) struct MockAccelerometer {
    pub(crate) axes: Axes,
    pub(crate) latched: u8,
    pub(crate) latch_clears: usize,
}

impl Accelerometer for MockAccelerometer {
    fn init(&mut self) -> Result<(), AccelerometerError> {
        Ok(())
    }

    fn read_axes(&mut self) -> Axes {
        self.axes
    }

    fn clear_interrupt_latch(&mut self) -> u8 {
        self.latch_clears += 1;
        core::mem::take(&mut self.latched)
    }
}

pub(crate) struct MockBattery(pub(crate) u8);

impl BatteryReader for MockBattery {
    fn battery_percent(&mut self) -> u8 {
        self.0
    }
}

#[derive(Default)]
pub(crate) struct MockClock(Cell<TimeMs>);

impl MockClock {
    pub(crate) fn set(&self, now: TimeMs) {
        self.0.set(now);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> TimeMs {
        self.0.get()
    }
}

#[derive(Default)]
pub(crate) struct MockSystem {
    pub(crate) awake: bool,
    pub(crate) wake_cycles: usize,
}

impl System for MockSystem {
    fn restart(&mut self) -> ! {
        panic!("restart");
    }

    fn halt(&mut self) -> ! {
        panic!("halt");
    }

    fn indicate_awake(&mut self, awake: bool) {
        if awake {
            self.wake_cycles += 1;
        }
        self.awake = awake;
    }
}

pub(crate) struct MockBoard<'a> {
    pub(crate) radio: MockRadio<'a>,
    pub(crate) sensor: MockSensor,
    pub(crate) accelerometer: MockAccelerometer,
    pub(crate) battery: MockBattery,
    pub(crate) clock: MockClock,
    pub(crate) system: MockSystem,
}

impl<'a> MockBoard<'a> {
    pub(crate) fn new(events: &'a RadioEventRouter<'a>) -> Self {
        Self {
            radio: MockRadio::connected(events),
            sensor: MockSensor::default(),
            accelerometer: MockAccelerometer {
                axes: Axes {
                    x: 0.0,
                    y: 0.0,
                    z: 1.0,
                },
                ..Default::default()
            },
            battery: MockBattery(87),
            clock: MockClock::default(),
            system: MockSystem::default(),
        }
    }
}

impl<'a> Board for MockBoard<'a> {
    type Radio = MockRadio<'a>;
    type Sensor = MockSensor;
    type Accelerometer = MockAccelerometer;
    type Battery = MockBattery;
    type Clock = MockClock;
    type System = MockSystem;

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
