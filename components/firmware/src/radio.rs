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

//! Radio task owning the transceiver
//!
//! The worker issues operations through [`RadioHandle`] without waiting, the task reports every
//! completion to the [`RadioEventRouter`] like the radio interrupt callbacks would.

#[allow(unused_imports)]
use defmt::{debug, error, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use lora_phy::{
    mod_params::{
        Bandwidth, CodingRate as PhyCodingRate, DutyCycleParams, ModulationParams, PacketParams,
        RadioError as PhyError, SpreadingFactor,
    },
    mod_traits::RadioKind,
    DelayNs, LoRa, RxMode,
};

use lbt::{RadioEventRouter, MAX_PACKET_SIZE};
use node_api::*;

const LORA_IMPLICIT_HEADER: bool = false;
const LORA_CRC_ON: bool = true;
const LORA_IQ_INVERTED: bool = false;
/// CAD normally completes within a few symbols
const CAD_TIMEOUT: Duration = Duration::from_millis(500);
/// Duty-cycle timing unit of the SX126x
const DUTY_CYCLE_TICK_NS: u32 = 15_625;

pub enum RadioCommand {
    Sleep,
    AssessChannel,
    Transmit(Vec<u8, MAX_PACKET_SIZE>),
    DutyCycledReceive { listen_us: u32, sleep_us: u32 },
}

pub type RadioCommands = Channel<CriticalSectionRawMutex, RadioCommand, 2>;

#[derive(defmt::Format)]
enum LinkError {
    Radio(PhyError),
    Timeout,
}

impl From<PhyError> for LinkError {
    fn from(e: PhyError) -> Self {
        Self::Radio(e)
    }
}

fn spreading_factor(sf: u8) -> Option<SpreadingFactor> {
    Some(match sf {
        7 => SpreadingFactor::_7,
        8 => SpreadingFactor::_8,
        9 => SpreadingFactor::_9,
        10 => SpreadingFactor::_10,
        11 => SpreadingFactor::_11,
        12 => SpreadingFactor::_12,
        _ => return None,
    })
}

fn bandwidth(hz: u32) -> Option<Bandwidth> {
    Some(match hz {
        125_000 => Bandwidth::_125KHz,
        250_000 => Bandwidth::_250KHz,
        500_000 => Bandwidth::_500KHz,
        _ => return None,
    })
}

fn coding_rate(cr: CodingRate) -> PhyCodingRate {
    match cr {
        CodingRate::_4_5 => PhyCodingRate::_4_5,
        CodingRate::_4_6 => PhyCodingRate::_4_6,
        CodingRate::_4_7 => PhyCodingRate::_4_7,
        CodingRate::_4_8 => PhyCodingRate::_4_8,
    }
}

fn duty_cycle_ticks(us: u32) -> u32 {
    (us as u64 * 1000 / DUTY_CYCLE_TICK_NS as u64) as u32
}

pub struct LoraRadio<RK, DLY> {
    lora: LoRa<RK, DLY>,
    modulation: ModulationParams,
    tx_params: PacketParams,
    rx_params: PacketParams,
    tx_power: i32,
    tx_timeout: Duration,
    buffer: [u8; MAX_PACKET_SIZE],
}

impl<RK, DLY> LoraRadio<RK, DLY>
where
    RK: RadioKind,
    DLY: DelayNs,
{
    pub fn new(mut lora: LoRa<RK, DLY>, m: &LoraModulation) -> Result<Self, PhyError> {
        let sf = spreading_factor(m.spreading_factor).ok_or(PhyError::UnavailableSpreadingFactor)?;
        let bw = bandwidth(m.bandwidth_hz).ok_or(PhyError::UnavailableBandwidth)?;
        let modulation =
            lora.create_modulation_params(sf, bw, coding_rate(m.coding_rate), m.frequency_hz)?;
        let tx_params = lora.create_tx_packet_params(
            m.preamble_len,
            LORA_IMPLICIT_HEADER,
            LORA_CRC_ON,
            LORA_IQ_INVERTED,
            &modulation,
        )?;
        let rx_params = lora.create_rx_packet_params(
            m.preamble_len,
            LORA_IMPLICIT_HEADER,
            MAX_PACKET_SIZE as u8,
            LORA_CRC_ON,
            LORA_IQ_INVERTED,
            &modulation,
        )?;
        Ok(Self {
            lora,
            modulation,
            tx_params,
            rx_params,
            tx_power: m.tx_power_dbm as i32,
            tx_timeout: Duration::from_millis(m.tx_timeout_ms as u64),
            buffer: [0; MAX_PACKET_SIZE],
        })
    }

    pub async fn run(&mut self, commands: &RadioCommands, events: &RadioEventRouter<'_>) -> ! {
        let mut next = None;
        loop {
            let command = match next.take() {
                Some(command) => command,
                None => commands.receive().await,
            };
            match command {
                RadioCommand::Sleep => {
                    if let Err(e) = self.lora.sleep(false).await {
                        warn!("radio could not sleep: {}", e);
                    }
                }
                RadioCommand::AssessChannel => {
                    let event = match self.channel_activity().await {
                        Ok(channel_activity) => RadioEvent::CadDone { channel_activity },
                        Err(e) => {
                            warn!("channel activity detection failed: {}", e);
                            RadioEvent::CadFailed
                        }
                    };
                    events.dispatch(event);
                }
                RadioCommand::Transmit(packet) => {
                    let event = match self.send(&packet).await {
                        Ok(()) => RadioEvent::TxDone,
                        Err(e) => {
                            warn!("transmission failed: {}", e);
                            RadioEvent::TxTimeout
                        }
                    };
                    events.dispatch(event);
                }
                RadioCommand::DutyCycledReceive {
                    listen_us,
                    sleep_us,
                } => {
                    next = Some(self.receive(listen_us, sleep_us, commands, events).await);
                }
            }
        }
    }

    async fn channel_activity(&mut self) -> Result<bool, LinkError> {
        self.lora.prepare_for_cad(&self.modulation).await?;
        match with_timeout(CAD_TIMEOUT, self.lora.cad(&self.modulation)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn send(&mut self, packet: &[u8]) -> Result<(), LinkError> {
        self.lora
            .prepare_for_tx(&self.modulation, &mut self.tx_params, self.tx_power, packet)
            .await?;
        match with_timeout(self.tx_timeout, self.lora.tx()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    /// Listen until a packet arrives or the worker issues the next command
    async fn receive(
        &mut self,
        listen_us: u32,
        sleep_us: u32,
        commands: &RadioCommands,
        events: &RadioEventRouter<'_>,
    ) -> RadioCommand {
        let mode = RxMode::DutyCycle(DutyCycleParams {
            rx_time: duty_cycle_ticks(listen_us),
            sleep_time: duty_cycle_ticks(sleep_us),
        });
        if let Err(e) = self
            .lora
            .prepare_for_rx(mode, &self.modulation, &self.rx_params)
            .await
        {
            error!("radio could not enter receive: {}", e);
            events.dispatch(RadioEvent::RxError);
            return commands.receive().await;
        }

        let result = select(
            self.lora.rx(&self.rx_params, &mut self.buffer),
            commands.receive(),
        )
        .await;
        match result {
            Either::First(Ok((len, status))) => {
                debug!("received {} bytes", len);
                events.dispatch(RadioEvent::RxDone {
                    payload: &self.buffer[..len as usize],
                    rssi: status.rssi,
                    snr: status.snr.clamp(i8::MIN as i16, i8::MAX as i16) as i8,
                });
            }
            Either::First(Err(e)) => {
                debug!("receive failed: {}", e);
                events.dispatch(RadioEvent::RxError);
            }
            Either::Second(command) => return command,
        }
        // the worker applies the receive mode again after handling the wake
        commands.receive().await
    }
}

/// Worker side of the radio task
pub struct RadioHandle {
    commands: &'static RadioCommands,
    ready: bool,
}

impl RadioHandle {
    /// `ready` is false when the transceiver could not be brought up
    pub fn new(commands: &'static RadioCommands, ready: bool) -> Self {
        Self { commands, ready }
    }

    fn issue(&self, command: RadioCommand) -> Result<(), RadioError> {
        if !self.ready {
            return Err(RadioError::NotReady);
        }
        self.commands.try_send(command).map_err(|_| RadioError::Busy)
    }
}

impl Radio for RadioHandle {
    fn init(&mut self, modulation: &LoraModulation) -> Result<(), RadioError> {
        if !self.ready {
            return Err(RadioError::Hardware);
        }
        info!(
            "radio at {} Hz, SF{}, {} Hz",
            modulation.frequency_hz, modulation.spreading_factor, modulation.bandwidth_hz
        );
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.issue(RadioCommand::Sleep)
    }

    fn start_channel_assessment(&mut self, params: &CadParams) -> Result<(), RadioError> {
        // the driver derives the detection thresholds from the spreading factor
        debug!("cad over {} symbols", params.symbols.count());
        self.issue(RadioCommand::AssessChannel)
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        let packet = Vec::from_slice(packet).map_err(|_| RadioError::Hardware)?;
        self.issue(RadioCommand::Transmit(packet))
    }

    fn enter_duty_cycled_receive(&mut self, listen_us: u32, sleep_us: u32) -> Result<(), RadioError> {
        self.issue(RadioCommand::DutyCycledReceive {
            listen_us,
            sleep_us,
        })
    }
}
