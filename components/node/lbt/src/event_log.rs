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

//! Macros for generating parseable event log messages
//!
//! Every line has the form `$<uptime>;<node_id>;<kind>;<content>`.

#[macro_export]
macro_rules! event_log {
    ($uptime:expr,$node_id:expr,$kind:expr,$content:expr) => {
        info!("${};{};{};{}", $uptime, $node_id, $kind, $content);
    };
}

#[macro_export]
macro_rules! event_log_reset {
    ($uptime:expr,$node_id:expr,$mode:expr) => {
        info!("${};{};reset;{{\"mode\":\"{}\"}}", $uptime, $node_id, $mode);
    };
}

#[macro_export]
macro_rules! event_log_wake {
    ($uptime:expr,$node_id:expr,$reason:expr) => {
        info!("${};{};wake;\"{}\"", $uptime, $node_id, $reason);
    };
}

#[macro_export]
macro_rules! event_log_channel {
    ($uptime:expr,$node_id:expr,$state:expr) => {
        info!("${};{};channel;\"{}\"", $uptime, $node_id, $state);
    };
}

#[macro_export]
macro_rules! event_log_cad {
    ($uptime:expr,$node_id:expr,$result:expr,$retries:expr) => {
        info!(
            "${};{};cad;{{\"result\":\"{}\",\"retries\":{}}}",
            $uptime, $node_id, $result, $retries
        );
    };
}

#[macro_export]
macro_rules! event_log_tx {
    ($uptime:expr,$node_id:expr,$result:expr,$sent_packets:expr) => {
        info!(
            "${};{};tx;{{\"result\":\"{}\",\"sent_packets\":{}}}",
            $uptime, $node_id, $result, $sent_packets
        );
    };
}

#[macro_export]
macro_rules! event_log_duty_cycle {
    ($uptime:expr,$node_id:expr,$power:expr) => {
        info!("${};{};duty_cycle;\"{}\"", $uptime, $node_id, $power);
    };
}

#[macro_export]
macro_rules! event_log_downlink {
    ($uptime:expr,$node_id:expr,$sender:expr,$accepted:expr) => {
        info!(
            "${};{};downlink;{{\"sender\":{},\"accepted\":{}}}",
            $uptime, $node_id, $sender, $accepted
        );
    };
}

#[macro_export]
macro_rules! event_log_restart {
    ($uptime:expr,$node_id:expr,$cause:expr) => {
        info!("${};{};restart;\"{}\"", $uptime, $node_id, $cause);
    };
}
