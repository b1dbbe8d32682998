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

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use embassy_futures::block_on;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;

use lbt::{
    cad_duration_us, cad_params_for, Cycle, Dispatcher, Fatal, MotionLine, MotionSource, NodeConfig,
    NodeId, RadioEventRouter, RadioPower, SendOutcome, TimerSource, WakeReason, WakeSignal,
};
use node_api::*;

/// Interrupt source bits latched by a threshold crossing (IA | ZH)
const MOTION_SOURCE_BITS: u8 = 0x60;
const RECEIVED_RSSI: i16 = -90;
const RECEIVED_SNR: i8 = 7;

/// State shared by all simulated nodes
#[derive(Clone)]
pub struct World {
    pub time: Rc<Cell<TimeMs>>,
    pub air: Rc<RefCell<Air>>,
    pub rng: Rc<RefCell<ChaCha8Rng>>,
    /// Probability of a transmit timeout in parts per thousand
    pub timeout_ppt: u32,
}

impl World {
    pub fn new(rng: ChaCha8Rng, timeout_ppt: u32) -> Self {
        Self {
            time: Rc::new(Cell::new(0)),
            air: Rc::new(RefCell::new(Air::default())),
            rng: Rc::new(RefCell::new(rng)),
            timeout_ppt,
        }
    }

    pub fn now(&self) -> TimeMs {
        self.time.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub id: u64,
    /// Index of the sending node
    pub sender: usize,
    pub start: TimeMs,
    pub end: TimeMs,
    pub packet: Vec<u8>,
}

impl Transmission {
    fn overlaps(&self, start: TimeMs, end: TimeMs) -> bool {
        self.start < end && start < self.end
    }
}

/// Transmissions on the single shared channel
#[derive(Debug, Default)]
pub struct Air {
    transmissions: Vec<Transmission>,
    next_id: u64,
    /// Transmissions whose deliveries are not scheduled yet
    unscheduled: Vec<u64>,
}

impl Air {
    /// Whether a node other than `listener` transmits between `start` and `end`
    pub fn busy(&self, listener: usize, start: TimeMs, end: TimeMs) -> bool {
        self.transmissions
            .iter()
            .any(|t| t.sender != listener && t.overlaps(start, end))
    }

    pub fn push(&mut self, sender: usize, start: TimeMs, end: TimeMs, packet: Vec<u8>) {
        let id = self.next_id;
        self.next_id += 1;
        self.transmissions.push(Transmission {
            id,
            sender,
            start,
            end,
            packet,
        });
        self.unscheduled.push(id);
    }

    pub fn get(&self, id: u64) -> Option<&Transmission> {
        self.transmissions.iter().find(|t| t.id == id)
    }

    pub fn take_unscheduled(&mut self) -> Vec<Transmission> {
        let ids = std::mem::take(&mut self.unscheduled);
        ids.iter().filter_map(|id| self.get(*id).cloned()).collect()
    }

    /// Whether `transmission` overlaps with another one at the receiver
    pub fn collides(&self, transmission: &Transmission, receiver: usize) -> bool {
        self.transmissions.iter().any(|t| {
            t.id != transmission.id
                && t.sender != receiver
                && t.overlaps(transmission.start, transmission.end)
        })
    }

    /// Whether `node` was transmitting itself while `transmission` was on air
    pub fn was_transmitting(&self, node: usize, transmission: &Transmission) -> bool {
        self.transmissions
            .iter()
            .any(|t| t.sender == node && t.overlaps(transmission.start, transmission.end))
    }

    pub fn prune(&mut self, before: TimeMs) {
        self.transmissions.retain(|t| t.end >= before);
    }
}

pub struct SimRadio {
    index: usize,
    world: World,
    events: &'static RadioEventRouter<'static>,
    modulation: Option<LoraModulation>,
}

impl SimRadio {
    fn modulation(&self) -> Result<&LoraModulation, RadioError> {
        self.modulation.as_ref().ok_or(RadioError::NotReady)
    }
}

impl Radio for SimRadio {
    fn init(&mut self, modulation: &LoraModulation) -> Result<(), RadioError> {
        self.modulation = Some(modulation.clone());
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        trace!("node {} radio sleep", self.index);
        Ok(())
    }

    fn start_channel_assessment(&mut self, params: &CadParams) -> Result<(), RadioError> {
        let duration = cad_duration_us(self.modulation()?, params).div_ceil(1000) as TimeMs;
        let start = self.world.now();
        let busy = self
            .world
            .air
            .borrow()
            .busy(self.index, start, start + duration);
        self.events.dispatch(RadioEvent::CadDone {
            channel_activity: busy,
        });
        Ok(())
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        let modulation = self.modulation()?;
        let cad = cad_duration_us(modulation, &cad_params_for(modulation)).div_ceil(1000);
        let time_on_air = modulation.time_on_air_us(packet.len()).div_ceil(1000);
        let start = self.world.now() + cad as TimeMs;
        let timed_out = self.world.rng.borrow_mut().next_u32() % 1000 < self.world.timeout_ppt;
        if timed_out {
            self.events.dispatch(RadioEvent::TxTimeout);
        } else {
            self.world.air.borrow_mut().push(
                self.index,
                start,
                start + time_on_air as TimeMs,
                packet.to_vec(),
            );
            self.events.dispatch(RadioEvent::TxDone);
        }
        Ok(())
    }

    fn enter_duty_cycled_receive(&mut self, listen_us: u32, sleep_us: u32) -> Result<(), RadioError> {
        trace!(
            "node {} radio duty cycle {}us/{}us",
            self.index,
            listen_us,
            sleep_us
        );
        Ok(())
    }
}

pub struct SimSensor {
    rng: Rc<RefCell<ChaCha8Rng>>,
}

impl SensorSampler for SimSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn sample(&mut self) -> Result<Option<EnvironmentReading>, SensorError> {
        let mut rng = self.rng.borrow_mut();
        Ok(Some(EnvironmentReading {
            temperature_c: rng.gen_range(18.0..26.0),
            humidity_pct: rng.gen_range(35.0..60.0),
            pressure_pa: rng.gen_range(95_000.0..97_000.0),
            iaq: rng.gen_range(25.0..150.0),
            iaq_accuracy: rng.gen_range(0..=3),
            co2_equivalent_ppm: rng.gen_range(400.0..1200.0),
            breath_voc_equivalent_ppm: rng.gen_range(0.4..2.0),
            gas_percentage: rng.gen_range(0.0..100.0),
        }))
    }
}

/// Accelerometer whose interrupt source register stays latched until read
pub struct SimAccelerometer {
    latched: Rc<Cell<u8>>,
}

impl Accelerometer for SimAccelerometer {
    fn init(&mut self) -> Result<(), AccelerometerError> {
        Ok(())
    }

    fn read_axes(&mut self) -> Axes {
        Axes {
            x: 0.0,
            y: 0.0,
            z: 1.0,
        }
    }

    fn clear_interrupt_latch(&mut self) -> u8 {
        self.latched.replace(0)
    }
}

pub struct SimBattery {
    clock: SimClock,
}

impl BatteryReader for SimBattery {
    fn battery_percent(&mut self) -> u8 {
        // one percent per six hours of uptime
        100u64.saturating_sub(self.clock.now_ms() / (6 * 60 * 60 * 1000)) as u8
    }
}

#[derive(Clone)]
pub struct SimClock {
    time: Rc<Cell<TimeMs>>,
    boot_time: TimeMs,
}

impl Clock for SimClock {
    fn now_ms(&self) -> TimeMs {
        self.time.get().saturating_sub(self.boot_time)
    }
}

pub struct SimSystem {
    index: usize,
}

impl System for SimSystem {
    fn restart(&mut self) -> ! {
        unreachable!("simulator handles restarts of node {}", self.index)
    }

    fn halt(&mut self) -> ! {
        unreachable!("simulator handles halts of node {}", self.index)
    }

    fn indicate_awake(&mut self, awake: bool) {
        trace!("node {} awake: {}", self.index, awake);
    }
}

pub struct SimBoard {
    radio: SimRadio,
    sensor: SimSensor,
    accelerometer: SimAccelerometer,
    battery: SimBattery,
    clock: SimClock,
    system: SimSystem,
}

impl Board for SimBoard {
    type Radio = SimRadio;
    type Sensor = SimSensor;
    type Accelerometer = SimAccelerometer;
    type Battery = SimBattery;
    type Clock = SimClock;
    type System = SimSystem;

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

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub sent: u32,
    pub timed_out: u32,
    pub busy: u32,
    pub assessment_failed: u32,
    pub faults: u32,
    pub motion_wakes: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub collisions: u32,
    pub restarts: u32,
    pub halted: bool,
}

impl NodeStats {
    fn record_send(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Sent => self.sent += 1,
            SendOutcome::TimedOut => self.timed_out += 1,
            SendOutcome::ChannelBusy { .. } => self.busy += 1,
            SendOutcome::AssessmentFailed => self.assessment_failed += 1,
            SendOutcome::EncodingFailed | SendOutcome::RadioFault(_) => self.faults += 1,
        }
    }
}

/// What happened to a node while it handled its pending wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    Restarting,
    Halted,
    Down,
}

/// One simulated node
///
/// Wake signal, radio event router and motion source are created anew on each boot, like the
/// statics of the firmware after a reset.
pub struct SimNode {
    index: usize,
    config: NodeConfig,
    world: World,
    latched: Rc<Cell<u8>>,
    wake: &'static WakeSignal,
    radio_events: &'static RadioEventRouter<'static>,
    motion: &'static MotionSource<'static>,
    dispatcher: Option<Dispatcher<'static, SimBoard>>,
    generation: u32,
    /// Rejected packet count of the router already accounted for in `stats`
    rejected_seen: u32,
    pub stats: NodeStats,
}

impl SimNode {
    pub fn new(index: usize, config: NodeConfig, world: World) -> Self {
        let (wake, radio_events, motion) = Self::leak_sources();
        Self {
            index,
            config,
            world,
            latched: Rc::new(Cell::new(0)),
            wake,
            radio_events,
            motion,
            dispatcher: None,
            generation: 0,
            rejected_seen: 0,
            stats: NodeStats::default(),
        }
    }

    /// Statics of the firmware, allocated once per node
    fn leak_sources() -> (
        &'static WakeSignal,
        &'static RadioEventRouter<'static>,
        &'static MotionSource<'static>,
    ) {
        let wake: &'static WakeSignal = Box::leak(Box::new(WakeSignal::new()));
        let radio_events = Box::leak(Box::new(RadioEventRouter::new(wake)));
        let motion = Box::leak(Box::new(MotionSource::new(wake)));
        (wake, radio_events, motion)
    }

    pub fn id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_receiving(&self) -> bool {
        self.dispatcher
            .as_ref()
            .is_some_and(|d| d.state().radio_power == RadioPower::DutyCycledReceive)
    }

    /// Power up, timer events of older generations are stale
    ///
    /// The wake sources live as long as the node, `Dispatcher::start` resets them.
    pub fn boot(&mut self) -> NodeStatus {
        let (wake, radio_events, motion) = (self.wake, self.radio_events, self.motion);
        self.generation += 1;
        self.rejected_seen = 0;

        let clock = SimClock {
            time: self.world.time.clone(),
            boot_time: self.world.now(),
        };
        let board = SimBoard {
            radio: SimRadio {
                index: self.index,
                world: self.world.clone(),
                events: radio_events,
                modulation: None,
            },
            sensor: SimSensor {
                rng: self.world.rng.clone(),
            },
            accelerometer: SimAccelerometer {
                latched: self.latched.clone(),
            },
            battery: SimBattery {
                clock: clock.clone(),
            },
            clock,
            system: SimSystem { index: self.index },
        };
        let mut dispatcher =
            match Dispatcher::new(board, self.config.clone(), wake, radio_events, motion) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    error!("node {} has an invalid configuration: {}", self.id(), e);
                    self.stats.halted = true;
                    return NodeStatus::Halted;
                }
            };
        if let Err(fatal) = dispatcher.start() {
            error!("node {} failed to start: {}", self.id(), fatal);
            self.stats.halted = true;
            return NodeStatus::Halted;
        }
        self.dispatcher = Some(dispatcher);
        NodeStatus::Running
    }

    pub fn on_timer(&mut self) -> NodeStatus {
        TimerSource::new(self.wake).on_expired();
        self.drive()
    }

    /// Threshold crossing, only produces an interrupt edge when the latch is clear
    pub fn on_motion(&mut self) -> NodeStatus {
        if self.latched.get() == 0 {
            self.latched.set(MOTION_SOURCE_BITS);
            self.motion.on_interrupt(MotionLine::Int1);
        }
        self.drive()
    }

    pub fn on_packet(&mut self, transmission: &Transmission, collided: bool) -> NodeStatus {
        if !self.is_receiving() {
            return self.status();
        }
        if collided {
            self.stats.collisions += 1;
            self.radio_events.dispatch(RadioEvent::RxError);
        } else {
            self.radio_events.dispatch(RadioEvent::RxDone {
                payload: &transmission.packet,
                rssi: RECEIVED_RSSI,
                snr: RECEIVED_SNR,
            });
        }
        self.drive()
    }

    fn status(&self) -> NodeStatus {
        match (&self.dispatcher, self.stats.halted) {
            (Some(_), _) => NodeStatus::Running,
            (None, true) => NodeStatus::Halted,
            (None, false) => NodeStatus::Down,
        }
    }

    /// Run wake cycles while the wake signal is raised
    fn drive(&mut self) -> NodeStatus {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return self.status();
        };
        while self.wake.is_raised() {
            match block_on(dispatcher.step()) {
                Ok(cycle) => {
                    let rejected = self.radio_events.rejected();
                    Self::record(&mut self.stats, &cycle, rejected > self.rejected_seen);
                    self.rejected_seen = rejected;
                }
                Err(Fatal::Restart(cause)) => {
                    info!("node {} restarts: {}", self.config.node_id, cause);
                    self.stats.restarts += 1;
                    self.dispatcher = None;
                    return NodeStatus::Restarting;
                }
                Err(Fatal::Halt(cause)) => {
                    error!("node {} halted: {}", self.config.node_id, cause);
                    self.stats.halted = true;
                    self.dispatcher = None;
                    return NodeStatus::Halted;
                }
            }
        }
        NodeStatus::Running
    }

    fn record(stats: &mut NodeStats, cycle: &Cycle, rejected: bool) {
        match cycle.reason {
            WakeReason::DownlinkReceived if rejected => stats.rejected += 1,
            WakeReason::DownlinkReceived => stats.accepted += 1,
            WakeReason::MotionDetected => stats.motion_wakes += 1,
            WakeReason::TimerExpired | WakeReason::None => {}
        }
        if let Some(outcome) = cycle.send {
            stats.record_send(outcome);
        }
    }
}
