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

//! Routing of radio driver callbacks to the worker

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use heapless::Vec;

use crate::*;

/// Marks "no node" in the atomic node id slots
const NO_NODE: u16 = u16::MAX;

/// Outcome of the operation the channel access controller started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    ChannelBusy,
    ChannelFree,
    CadFailed,
    TxDone,
    TxTimeout,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::ChannelBusy => "busy",
            Completion::ChannelFree => "free",
            Completion::CadFailed => "failed",
            Completion::TxDone => "sent",
            Completion::TxTimeout => "timeout",
        }
    }
}

/// Packet received from the predecessor
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Downlink {
    pub sender: NodeId,
    pub rssi: i16,
    pub snr: i8,
    pub packet: Vec<u8, MAX_PACKET_SIZE>,
}

/// Receives [`RadioEvent`]s in the radio driver's callback context
///
/// Completions of channel assessments and transmissions go to a single slot awaited by the
/// channel access controller. Demodulated packets raise [`WakeReason::DownlinkReceived`], the
/// ones sent by the predecessor are kept in a single slot downlink mailbox. The router never
/// changes the radio power state itself; receive errors only request the worker to reapply the
/// receive mode.
pub struct RadioEventRouter<'a> {
    wake: &'a WakeSignal,
    completion: Signal<CriticalSectionRawMutex, Completion>,
    downlink: Signal<CriticalSectionRawMutex, Downlink>,
    predecessor: AtomicU16,
    last_sender: AtomicU16,
    rx_timeouts: AtomicU32,
    rx_errors: AtomicU32,
    rejected: AtomicU32,
    rearm_requested: AtomicBool,
}

fn to_slot(id: Option<NodeId>) -> u16 {
    id.map_or(NO_NODE, u16::from)
}

fn from_slot(slot: u16) -> Option<NodeId> {
    NodeId::try_from(slot).ok()
}

impl<'a> RadioEventRouter<'a> {
    pub const fn new(wake: &'a WakeSignal) -> Self {
        Self {
            wake,
            completion: Signal::new(),
            downlink: Signal::new(),
            predecessor: AtomicU16::new(NO_NODE),
            last_sender: AtomicU16::new(NO_NODE),
            rx_timeouts: AtomicU32::new(0),
            rx_errors: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            rearm_requested: AtomicBool::new(false),
        }
    }

    /// Only keep packets whose last record was sent by `predecessor`, `None` rejects all
    pub fn accept_from(&self, predecessor: Option<NodeId>) {
        self.predecessor
            .store(to_slot(predecessor), Ordering::Release);
    }

    /// Back to the state after construction, for a restart without power cycle
    pub fn reset(&self) {
        self.completion.reset();
        self.downlink.reset();
        self.predecessor.store(NO_NODE, Ordering::Release);
        self.last_sender.store(NO_NODE, Ordering::Release);
        self.rx_timeouts.store(0, Ordering::Relaxed);
        self.rx_errors.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.rearm_requested.store(false, Ordering::Release);
    }

    /// Radio driver callback
    pub fn dispatch(&self, event: RadioEvent) {
        match event {
            RadioEvent::CadDone { channel_activity } => self.complete(if channel_activity {
                Completion::ChannelBusy
            } else {
                Completion::ChannelFree
            }),
            RadioEvent::CadFailed => self.complete(Completion::CadFailed),
            RadioEvent::TxDone => self.complete(Completion::TxDone),
            RadioEvent::TxTimeout => self.complete(Completion::TxTimeout),
            RadioEvent::RxDone { payload, rssi, snr } => self.on_rx_done(payload, rssi, snr),
            RadioEvent::RxTimeout => {
                self.rx_timeouts.fetch_add(1, Ordering::Relaxed);
                self.rearm_requested.store(true, Ordering::Release);
                debug!("rx timeout");
            }
            RadioEvent::RxError => {
                self.rx_errors.fetch_add(1, Ordering::Relaxed);
                self.rearm_requested.store(true, Ordering::Release);
                debug!("rx error");
            }
        }
    }

    fn complete(&self, completion: Completion) {
        self.completion.signal(completion);
    }

    fn on_rx_done(&self, payload: &[u8], rssi: i16, snr: i8) {
        let sender = OutgoingPayload::last_record_sender(payload);
        self.last_sender.store(to_slot(sender), Ordering::Release);
        let predecessor = from_slot(self.predecessor.load(Ordering::Acquire));
        let packet = match sender {
            Some(s) if Some(s) == predecessor => Vec::from_slice(payload).ok(),
            _ => None,
        };
        match (sender, packet) {
            (Some(sender), Some(packet)) => {
                debug!("packet of {} bytes from {}", payload.len(), sender);
                self.downlink.signal(Downlink {
                    sender,
                    rssi,
                    snr,
                    packet,
                });
            }
            _ => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("packet of {} bytes not from predecessor", payload.len());
            }
        }
        // the radio leaves duty-cycled receive after a packet
        self.rearm_requested.store(true, Ordering::Release);
        self.wake.raise(WakeReason::DownlinkReceived);
    }

    /// Drop a completion left over from an earlier operation
    pub fn clear_completion(&self) {
        self.completion.reset();
    }

    pub fn has_pending_completion(&self) -> bool {
        self.completion.signaled()
    }

    pub async fn next_completion(&self) -> Completion {
        self.completion.wait().await
    }

    pub fn take_downlink(&self) -> Option<Downlink> {
        self.downlink.try_take()
    }

    /// Sender of the last demodulated packet, accepted or not
    pub fn last_sender(&self) -> Option<NodeId> {
        from_slot(self.last_sender.load(Ordering::Acquire))
    }

    /// Whether the receive mode must be reapplied, clears the request
    pub fn take_rearm_request(&self) -> bool {
        self.rearm_requested.swap(false, Ordering::AcqRel)
    }

    pub fn rx_timeouts(&self) -> u32 {
        self.rx_timeouts.load(Ordering::Relaxed)
    }

    pub fn rx_errors(&self) -> u32 {
        self.rx_errors.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }
}
