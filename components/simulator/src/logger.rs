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

//! Prints log messages and copies node events into the event file

use std::sync::Mutex;

use anyhow::Context;
use log::{Level, Metadata, Record};

use node_event_writer::{EventFileWriter, EVENT_INDICATOR_CHAR};

const LOG_COLOR_CODE_DEFAULT: &str = "\x1B[0m";
const LOG_COLOR_CODE_RED: &str = "\x1B[1;31m";
const LOG_COLOR_CODE_GREEN: &str = "\x1B[1;32m";
const LOG_COLOR_CODE_YELLOW: &str = "\x1B[1;33m";
const LOG_COLOR_CODE_BLUE: &str = "\x1B[1;34m";

pub struct SimLogger {
    max_level: Level,
    event_writer: Option<Mutex<EventFileWriter>>,
}

impl SimLogger {
    fn write_event(&self, event: &str) {
        let Some(writer) = self.event_writer.as_ref() else {
            return;
        };
        let Ok(mut writer) = writer.lock() else {
            return;
        };
        if let Err(e) = writer.write_event(event) {
            eprintln!("failed to write event: {}", e);
        }
    }
}

impl log::Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        let msg = record.args().to_string();

        // events are recorded regardless of the printed level
        if msg.starts_with(EVENT_INDICATOR_CHAR) {
            self.write_event(&msg);
        }

        if !self.enabled(record.metadata()) {
            return;
        }

        let color = match record.level() {
            Level::Error => LOG_COLOR_CODE_RED,
            Level::Warn => LOG_COLOR_CODE_YELLOW,
            Level::Info => LOG_COLOR_CODE_GREEN,
            Level::Debug => LOG_COLOR_CODE_BLUE,
            Level::Trace => "",
        };

        println!(
            "[{}] {}{}{}",
            record.target(),
            color,
            msg,
            LOG_COLOR_CODE_DEFAULT
        );
    }

    fn flush(&self) {
        if let Some(Ok(mut writer)) = self.event_writer.as_ref().map(Mutex::lock) {
            if let Err(e) = writer.flush() {
                eprintln!("failed to flush event file: {}", e);
            }
        }
    }
}

pub fn init(max_level: Level, event_file_path: Option<&str>) -> anyhow::Result<()> {
    let event_writer = event_file_path
        .map(|path| {
            EventFileWriter::create(path)
                .with_context(|| format!("failed to create event file {}", path))
        })
        .transpose()?;
    let logger = Box::new(SimLogger {
        max_level,
        event_writer: event_writer.map(Mutex::new),
    });
    log::set_logger(Box::leak(logger)).map_err(|e| anyhow::anyhow!("{}", e))?;
    // info is the level of the event lines
    log::set_max_level(max_level.max(Level::Info).to_level_filter());
    Ok(())
}
