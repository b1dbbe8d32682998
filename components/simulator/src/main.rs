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

use std::{cmp::Reverse, collections::BinaryHeap, env, time::Duration};

use anyhow::{bail, Context};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use lbt::{NodeConfig, NodeId, ReceiveMode};
use node_api::TimeMs;

mod logger;
mod sim;

use crate::sim::*;

/// Id of the first node, every following node relays towards its predecessor
const FIRST_NODE_ID: NodeId = 101;
const STARTUP_DELAY_RANGE_MS: TimeMs = 10 * 1000;
/// Time between a restart and the next boot
const REBOOT_DELAY_MS: TimeMs = 5 * 1000;
/// Transmissions that ended this long ago are removed from the air
const AIR_RETENTION_MS: TimeMs = 10 * 1000;

const EVENT_FILE_PATH: &str = "/tmp/node_events.csv";

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut rng_seed: u64 = 0;
    let mut num_nodes: usize = 3;
    let mut simulation_minutes: usize = 90;
    let mut base = NodeConfig::default();
    let mut params = SimParams::default();

    for chunk in args[1..].chunks_exact(2) {
        let (arg, val) = (&chunk[0], &chunk[1]);
        match arg.as_str() {
            "--seed" => {
                rng_seed = val.parse().context("invalid rng seed")?;
            }
            "--nodes" => {
                num_nodes = val.parse().context("invalid number of nodes")?;
            }
            "--time_min" => {
                simulation_minutes = val.parse().context("invalid number of simulation minutes")?;
            }
            "--send_interval_s" => {
                let seconds: TimeMs = val.parse().context("invalid send interval")?;
                base.send_interval_ms = seconds * 1000;
            }
            "--restart_interval_min" => {
                let minutes: TimeMs = val.parse().context("invalid restart interval")?;
                base.restart_interval_ms = minutes * 60 * 1000;
            }
            "--motion_ppt" => {
                params.motion_ppt = val.parse().context("invalid motion probability")?;
            }
            "--timeout_ppt" => {
                params.timeout_ppt = val.parse().context("invalid timeout probability")?;
            }
            "--tx_only" => {
                let tx_only: bool = val.parse().context("invalid receive mode")?;
                if tx_only {
                    base.receive_mode = ReceiveMode::TxOnly;
                }
            }
            _ => bail!("unknown argument: {}", arg),
        }
    }

    if num_nodes == 0 || num_nodes > (NodeId::MAX - FIRST_NODE_ID) as usize + 1 {
        bail!("invalid number of nodes: {}", num_nodes);
    }

    logger::init(log::Level::Debug, Some(EVENT_FILE_PATH))?;

    let stats = run(
        create_configs(num_nodes, &base),
        simulation_minutes,
        get_rng(rng_seed),
        params,
    );

    println!(
        "{:>5} {:>6} {:>8} {:>5} {:>7} {:>8} {:>8} {:>9} {:>8}",
        "node", "sent", "timeout", "busy", "motion", "accepted", "rejected", "collided", "restarts"
    );
    for (i, s) in stats.iter().enumerate() {
        println!(
            "{:>5} {:>6} {:>8} {:>5} {:>7} {:>8} {:>8} {:>9} {:>8}{}",
            FIRST_NODE_ID as usize + i,
            s.sent,
            s.timed_out,
            s.busy,
            s.motion_wakes,
            s.accepted,
            s.rejected,
            s.collisions,
            s.restarts,
            if s.halted { " (halted)" } else { "" }
        );
    }
    log::logger().flush();
    Ok(())
}

fn get_rng(rng_seed: u64) -> ChaCha8Rng {
    println!("RNG seed: {rng_seed:#x}");
    ChaCha8Rng::seed_from_u64(rng_seed)
}

fn create_configs(num_nodes: usize, base: &NodeConfig) -> Vec<NodeConfig> {
    (0..num_nodes)
        .map(|i| NodeConfig {
            node_id: FIRST_NODE_ID + i as NodeId,
            ..base.clone()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimParams {
    /// Probability of a motion event per wake interval in parts per thousand
    pub motion_ppt: u32,
    /// Probability of a transmit timeout in parts per thousand
    pub timeout_ppt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    Boot,
    Tick,
    Motion,
    /// End of a transmission at a receiver
    Delivery(u64),
}

/// Ordered by time, then by insertion
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Event {
    time: TimeMs,
    seq: u64,
    node: usize,
    generation: u32,
    kind: EventKind,
}

#[derive(Default)]
struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    seq: u64,
}

impl EventQueue {
    fn push(&mut self, time: TimeMs, node: usize, generation: u32, kind: EventKind) {
        self.seq += 1;
        self.heap.push(Reverse(Event {
            time,
            seq: self.seq,
            node,
            generation,
            kind,
        }));
    }

    fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(event)| event)
    }
}

fn run(
    configs: Vec<NodeConfig>,
    minutes: usize,
    mut rng: ChaCha8Rng,
    params: SimParams,
) -> Vec<NodeStats> {
    let world = World::new(ChaCha8Rng::seed_from_u64(rng.next_u64()), params.timeout_ppt);
    let mut nodes: Vec<SimNode> = configs
        .into_iter()
        .enumerate()
        .map(|(i, config)| SimNode::new(i, config, world.clone()))
        .collect();

    let mut queue = EventQueue::default();
    let end = minutes as TimeMs * 60 * 1000;

    // random delay to mimic asynchronous startup
    for i in 0..nodes.len() {
        let startup_delay = rng.next_u32() as TimeMs % STARTUP_DELAY_RANGE_MS;
        queue.push(startup_delay, i, 0, EventKind::Boot);
    }

    while let Some(event) = queue.pop() {
        if event.time >= end {
            break;
        }
        world.time.set(event.time);
        let node = &mut nodes[event.node];
        let time = event.time;

        let status = match event.kind {
            EventKind::Boot => {
                info!(
                    "{:=^30}{:=^30}",
                    format!(" node {} boots ", node.id()),
                    format!(" {:?} ", Duration::from_millis(time))
                );
                let status = node.boot();
                if status == NodeStatus::Running {
                    let wake_interval = node.config().wake_interval_ms;
                    queue.push(time + wake_interval, event.node, node.generation(), EventKind::Tick);
                }
                status
            }
            EventKind::Tick | EventKind::Motion if event.generation != node.generation() => {
                continue;
            }
            EventKind::Tick => {
                let wake_interval = node.config().wake_interval_ms;
                let status = node.on_timer();
                if status == NodeStatus::Running {
                    queue.push(time + wake_interval, event.node, event.generation, EventKind::Tick);
                    if rng.next_u32() % 1000 < params.motion_ppt {
                        let at = time + rng.next_u64() % wake_interval;
                        queue.push(at, event.node, event.generation, EventKind::Motion);
                    }
                }
                status
            }
            EventKind::Motion => node.on_motion(),
            EventKind::Delivery(id) => {
                let air = world.air.borrow();
                let Some(transmission) = air.get(id).cloned() else {
                    continue;
                };
                let receiving = !air.was_transmitting(event.node, &transmission);
                let collided = air.collides(&transmission, event.node);
                drop(air);
                if receiving {
                    node.on_packet(&transmission, collided)
                } else {
                    NodeStatus::Running
                }
            }
        };

        if status == NodeStatus::Restarting {
            queue.push(time + REBOOT_DELAY_MS, event.node, 0, EventKind::Boot);
        }

        let transmissions = world.air.borrow_mut().take_unscheduled();
        for transmission in transmissions {
            debug!(
                "node {} transmits {} bytes until {}ms",
                nodes[transmission.sender].id(),
                transmission.packet.len(),
                transmission.end
            );
            for receiver in (0..nodes.len()).filter(|r| *r != transmission.sender) {
                queue.push(transmission.end, receiver, 0, EventKind::Delivery(transmission.id));
            }
        }
        world.air.borrow_mut().prune(time.saturating_sub(AIR_RETENTION_MS));
    }

    nodes.into_iter().map(|node| node.stats).collect()
}
