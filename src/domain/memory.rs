//! Memory access over the report stream.
//!
//! A read sends one request and then parks the caller until the
//! dispatcher has collected enough 0x21 replies, the device reports an
//! error, the link drops, or the timeout expires. Only one read may be
//! outstanding per device.

use crate::domain::lock;
use crate::error::{ProtocolViolation, Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::CommandChannel;
use crate::infrastructure::bluetooth::protocol::{
    report, MemorySpace, OutputReport, MAX_ADDRESS, MAX_WRITE_LEN,
};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

pub const SUPPORTED_REPORTS: &[u8] = &[report::READ_MEMORY_DATA];

/// Offset of the size/error byte in a 0x21 report
const SIZE_ERROR_INDEX: usize = 3;
/// Offset of the first data byte in a 0x21 report
const DATA_INDEX: usize = 6;

#[derive(Debug)]
struct PendingRead {
    remaining: usize,
    buffer: Vec<u8>,
}

#[derive(Debug, Default)]
struct TransferState {
    /// Owned by the calling `read`: set before the request goes out and
    /// cleared only once that caller has taken its outcome
    busy: bool,
    pending: Option<PendingRead>,
    outcome: Option<Result<Vec<u8>>>,
}

impl TransferState {
    fn release(&mut self) {
        self.busy = false;
        self.pending = None;
        self.outcome = None;
    }
}

pub struct MemoryChannel {
    commands: Arc<CommandChannel>,
    state: Mutex<TransferState>,
    completed: Condvar,
    timeout: Option<Duration>,
    dispatcher: Mutex<Option<ThreadId>>,
}

impl MemoryChannel {
    /// `timeout` bounds how long `read` waits; `None` waits until the
    /// transfer completes or the link drops.
    pub fn new(commands: Arc<CommandChannel>, timeout: Option<Duration>) -> Self {
        Self {
            commands,
            state: Mutex::new(TransferState::default()),
            completed: Condvar::new(),
            timeout,
            dispatcher: Mutex::new(None),
        }
    }

    /// Record the thread that feeds `handle_report`. A read issued from
    /// that thread could never complete, so it is refused.
    pub(crate) fn bind_dispatcher(&self, thread: ThreadId) {
        *lock(&self.dispatcher) = Some(thread);
    }

    pub fn supports(report_type: u8) -> bool {
        SUPPORTED_REPORTS.contains(&report_type)
    }

    pub fn in_flight(&self) -> bool {
        lock(&self.state).busy
    }

    /// Read `length` bytes starting at `address`, blocking until done.
    pub fn read(&self, address: u32, length: u16, is_eeprom: bool) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(WiimoteError::invalid("read length must be at least 1"));
        }
        if address > MAX_ADDRESS {
            return Err(WiimoteError::invalid(format!(
                "address {:#x} does not fit in 24 bits",
                address
            )));
        }

        if *lock(&self.dispatcher) == Some(thread::current().id()) {
            return Err(WiimoteError::NotSupported(
                "blocking memory read from a device callback".to_string(),
            ));
        }

        {
            let mut state = lock(&self.state);
            if state.busy {
                return Err(WiimoteError::AlreadyInProgress);
            }
            state.busy = true;
            state.outcome = None;
            state.pending = Some(PendingRead {
                remaining: length as usize,
                buffer: Vec::with_capacity(length as usize),
            });
        }

        let request = OutputReport::ReadMemory {
            space: MemorySpace::from_eeprom_flag(is_eeprom),
            address,
            length,
        };
        if let Err(e) = self.commands.send(&request) {
            lock(&self.state).release();
            return Err(e);
        }
        debug!("Waiting for {} bytes from {:#08x}", length, address);

        let state = lock(&self.state);
        let mut state = match self.timeout {
            Some(timeout) => {
                self.completed
                    .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => self
                .completed
                .wait_while(state, |s| s.outcome.is_none())
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
        let outcome = state.outcome.take();
        state.release();
        outcome.unwrap_or_else(|| {
            warn!("Memory read at {:#08x} timed out", address);
            Err(WiimoteError::Timeout(self.timeout.unwrap_or_default()))
        })
    }

    /// Write at most 16 bytes in one frame. No reply is awaited.
    pub fn write(&self, address: u32, data: &[u8], is_eeprom: bool) -> Result<()> {
        self.commands
            .write_memory(MemorySpace::from_eeprom_flag(is_eeprom), address, data)
    }

    /// Write any amount of data as consecutive 16-byte frames.
    pub fn write_all(&self, address: u32, data: &[u8], is_eeprom: bool) -> Result<()> {
        let end = address as u64 + data.len() as u64;
        if end > MAX_ADDRESS as u64 + 1 {
            return Err(WiimoteError::invalid(format!(
                "write of {} bytes at {:#x} runs past the 24-bit address space",
                data.len(),
                address
            )));
        }
        for (i, chunk) in data.chunks(MAX_WRITE_LEN).enumerate() {
            let offset = (i * MAX_WRITE_LEN) as u32;
            self.write(address + offset, chunk, is_eeprom)?;
        }
        Ok(())
    }

    /// Consume one 0x21 reply.
    ///
    /// Errors abort the outstanding read, which sees the same error.
    pub fn handle_report(&self, report: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(pending) = state.pending.as_mut() else {
            warn!("Unsolicited memory reply {:02X?}", report);
            return Ok(());
        };

        let result = Self::accumulate(pending, report);
        match result {
            Ok(false) => Ok(()),
            Ok(true) => {
                let buffer = state
                    .pending
                    .take()
                    .map(|p| p.buffer)
                    .unwrap_or_default();
                state.outcome = Some(Ok(buffer));
                self.completed.notify_all();
                Ok(())
            }
            Err(violation) => {
                state.pending = None;
                state.outcome = Some(Err(violation.clone().into()));
                self.completed.notify_all();
                Err(violation.into())
            }
        }
    }

    /// Returns true once the transfer is complete.
    fn accumulate(
        pending: &mut PendingRead,
        report: &[u8],
    ) -> std::result::Result<bool, ProtocolViolation> {
        let report_type = report.first().copied().unwrap_or_default();
        let Some(&size_error) = report.get(SIZE_ERROR_INDEX) else {
            return Err(ProtocolViolation::ShortReport {
                report_type,
                expected: SIZE_ERROR_INDEX + 1,
                actual: report.len(),
            });
        };

        let code = size_error & 0x0f;
        if code != 0 {
            return Err(ProtocolViolation::MemoryError { code });
        }

        let size = ((size_error >> 4) + 1) as usize;
        if size > pending.remaining {
            return Err(ProtocolViolation::MemoryOverrun {
                received: size,
                remaining: pending.remaining,
            });
        }
        let data = report
            .get(DATA_INDEX..DATA_INDEX + size)
            .ok_or(ProtocolViolation::ShortReport {
                report_type,
                expected: DATA_INDEX + size,
                actual: report.len(),
            })?;

        pending.buffer.extend_from_slice(data);
        pending.remaining -= size;
        Ok(pending.remaining == 0)
    }

    /// Fail any outstanding read, e.g. because the link went away.
    pub fn abort(&self, error: WiimoteError) {
        let mut state = lock(&self.state);
        if state.pending.take().is_some() {
            debug!("Aborting memory read: {}", error);
            state.outcome = Some(Err(error));
            self.completed.notify_all();
        }
    }
}
