// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Per-client server-side state and the contract exposed to the command
// layer. A session is built inside the ring's consume handler — the record
// is copied out of the slot before the tail advances, so the slot is free
// the moment admission returns.

use crate::error::Result;
use crate::fifo::{RequestReader, ResponseWriter};
use crate::ring::AdmissionRecord;

// ---------------------------------------------------------------------------
// Command handler contract
// ---------------------------------------------------------------------------

/// Outcome of one command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The command ran; `sink` holds whatever it produced.
    Ok,
    /// The first token is not in the catalogue; `sink` holds a diagnostic.
    InvalidCommand,
    /// The command was recognised but failed; `sink` holds the report.
    Failed,
}

/// Identity of the calling client, taken from its admission record.
/// Commands like `info` default to the caller's pid through this.
pub struct RequestContext<'a> {
    record: &'a AdmissionRecord,
}

impl<'a> RequestContext<'a> {
    pub fn new(record: &'a AdmissionRecord) -> Self {
        Self { record }
    }

    pub fn pid(&self) -> i32 {
        self.record.pid()
    }

    pub fn uid(&self) -> u32 {
        self.record.uid()
    }
}

/// The pluggable command layer. Implementations write the response bytes —
/// combined stdout/stderr of a child process or the output of an in-process
/// routine — into the growable `sink`; the substrate assumes nothing about
/// its contents.
pub trait CommandHandler: Send + Sync {
    fn handle(
        &self,
        ctx: &RequestContext<'_>,
        command_line: &str,
        sink: &mut Vec<u8>,
    ) -> HandlerOutcome;
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One connected client, exclusively owned by its worker. Holds the copied
/// admission record, the request-pipe descriptor kept open for the whole
/// session, the response-pipe endpoint, and a response scratch buffer.
pub struct Session {
    record: AdmissionRecord,
    reader: RequestReader,
    writer: ResponseWriter,
    sink: Vec<u8>,
}

impl Session {
    /// Open both pipe endpoints for `record`.
    pub fn open(record: AdmissionRecord) -> Result<Self> {
        let reader = RequestReader::open(record.request_pipe())?;
        let writer = ResponseWriter::new(record.response_pipe());
        Ok(Self {
            record,
            reader,
            writer,
            sink: Vec::new(),
        })
    }

    pub fn record(&self) -> &AdmissionRecord {
        &self.record
    }

    pub fn pid(&self) -> i32 {
        self.record.pid()
    }

    pub fn reader(&self) -> &RequestReader {
        &self.reader
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Split borrows for the dispatch loop: caller context plus the cleared
    /// response scratch buffer.
    pub fn context_and_sink(&mut self) -> (RequestContext<'_>, &mut Vec<u8>) {
        self.sink.clear();
        (RequestContext::new(&self.record), &mut self.sink)
    }

    /// Bytes produced by the most recent dispatch.
    pub fn last_response(&self) -> &[u8] {
        &self.sink
    }
}
