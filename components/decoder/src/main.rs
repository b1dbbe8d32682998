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

//! Decodes hex encoded uplink packets, one argument or stdin line per packet

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::{
    env,
    io::{self, BufRead},
};

use lbt::{OutgoingPayload, PAYLOAD_SIZE};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line.context("could not read stdin")?;
            if !line.trim().is_empty() {
                print_packet(&line)?;
            }
        }
    } else {
        for arg in &args {
            print_packet(arg)?;
        }
    }
    Ok(())
}

fn print_packet(hex: &str) -> Result<()> {
    let packet = parse_hex(hex).with_context(|| format!("invalid packet `{}`", hex.trim()))?;
    let records = split_records(&packet)?;
    println!(
        "{} ({} bytes, {} records)",
        "packet".bold(),
        packet.len(),
        records.len()
    );
    for (i, record) in records.iter().enumerate() {
        println!("{}", format!("record {} of node {}", i, record.id).cyan());
        for (name, value) in fields(record) {
            println!("  {:<24}{}", name, value);
        }
    }
    Ok(())
}

/// Parse hex digits, whitespace and an optional `0x` prefix are ignored
fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    let digits: Vec<u8> = hex
        .strip_prefix("0x")
        .unwrap_or(hex)
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if let Some(b) = digits.iter().find(|b| !b.is_ascii_hexdigit()) {
        bail!("not a hex digit: {}", *b as char);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            Ok::<_, anyhow::Error>(u8::from_str_radix(pair, 16)?)
        })
        .collect()
}

fn split_records(packet: &[u8]) -> Result<Vec<OutgoingPayload>> {
    if packet.is_empty() || packet.len() % PAYLOAD_SIZE != 0 {
        bail!(
            "packet length {} is not a multiple of {}",
            packet.len(),
            PAYLOAD_SIZE
        );
    }
    packet
        .chunks_exact(PAYLOAD_SIZE)
        .map(|chunk| {
            let record: &[u8; PAYLOAD_SIZE] = chunk.try_into()?;
            OutgoingPayload::decode(record).map_err(|e| anyhow::anyhow!("{}", e))
        })
        .collect()
}

fn fields(p: &OutgoingPayload) -> Vec<(&'static str, String)> {
    vec![
        ("id", p.id.to_string()),
        ("battery", format!("{} %", p.battery_percent)),
        (
            "temperature",
            format!("{}.{:02} °C", p.temperature_int, p.temperature_dec),
        ),
        (
            "humidity",
            format!("{}.{:02} %", p.humidity_int, p.humidity_dec),
        ),
        ("pressure", format!("{} hPa", p.pressure_hpa)),
        (
            "tilt",
            format!("x {}° y {}° z {}°", p.tilt_x, p.tilt_y, p.tilt_z),
        ),
        ("iaq", format!("{} (accuracy {})", p.iaq, p.iaq_accuracy)),
        ("co2 equivalent", format!("{} ppm", p.co2_equivalent)),
        (
            "breath voc equivalent",
            format!("{} ppm", p.breath_voc_equivalent),
        ),
        ("gas", format!("{} %", p.gas_percentage)),
        ("sent packets", p.sent_packets.to_string()),
        (
            "motion alarm",
            if p.motion_alarm != 0 {
                "yes".red().to_string()
            } else {
                "no".to_string()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURED: &str = "666c160e2e0fc2030000b23200005802000000130000";

    #[test]
    fn hex_with_spaces_and_prefix() {
        assert_eq!(parse_hex("0x66 6C\n16").unwrap(), vec![0x66, 0x6c, 0x16]);
        assert!(parse_hex("666").is_err());
        assert!(parse_hex("6g").is_err());
    }

    #[test]
    fn decode_captured_packet() {
        let records = split_records(&parse_hex(CAPTURED).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, 102);
        assert_eq!((record.temperature_int, record.temperature_dec), (22, 14));
        assert_eq!(record.pressure_hpa, 962);
        assert_eq!(record.co2_equivalent, 600);
        assert_eq!(record.sent_packets, 19);
    }

    #[test]
    fn multi_record_packet() {
        let mut packet = parse_hex(CAPTURED).unwrap();
        let mut second = packet.clone();
        second[0] = 103;
        packet.extend(second);
        let records = split_records(&packet).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, 103);
        assert_eq!(OutgoingPayload::last_record_sender(&packet), Some(103));
    }

    #[test]
    fn truncated_packet_rejected() {
        let packet = parse_hex(CAPTURED).unwrap();
        assert!(split_records(&packet[..21]).is_err());
        assert!(split_records(&[]).is_err());
    }

    #[test]
    fn field_formatting() {
        let records = split_records(&parse_hex(CAPTURED).unwrap()).unwrap();
        let fields = fields(&records[0]);
        assert_eq!(fields[2], ("temperature", "22.14 °C".to_string()));
        assert_eq!(fields[3], ("humidity", "46.15 %".to_string()));
        assert_eq!(fields[11], ("motion alarm", "no".to_string()));
    }
}
