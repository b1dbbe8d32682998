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

//! Writes node event log lines into a CSV file

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// First character of every event log line
pub const EVENT_INDICATOR_CHAR: char = '$';

pub const FILE_HEADER: &str = "uptime;node_id;kind;content";

pub struct EventFileWriter {
    file: BufWriter<File>,
    events_written: usize,
}

impl EventFileWriter {
    pub fn create(output_file_path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = BufWriter::new(File::create(output_file_path)?);
        writeln!(file, "{}", FILE_HEADER)?;
        Ok(Self {
            file,
            events_written: 0,
        })
    }

    /// Write an event line, lines without the indicator char are ignored
    pub fn write_event(&mut self, event: &str) -> io::Result<()> {
        let Some(event) = event.strip_prefix(EVENT_INDICATOR_CHAR) else {
            return Ok(());
        };
        writeln!(self.file, "{}", event)?;
        self.events_written += 1;
        Ok(())
    }

    pub fn events_written(&self) -> usize {
        self.events_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// One parsed event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord<'a> {
    pub uptime: u64,
    pub node_id: u8,
    pub kind: &'a str,
    pub content: &'a str,
}

impl<'a> EventRecord<'a> {
    /// Parse an event line with or without the indicator char
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.strip_prefix(EVENT_INDICATOR_CHAR).unwrap_or(line);
        let mut fields = line.splitn(4, ';');
        Some(Self {
            uptime: fields.next()?.parse().ok()?,
            node_id: fields.next()?.parse().ok()?,
            kind: fields.next()?,
            content: fields.next()?,
        })
    }
}
