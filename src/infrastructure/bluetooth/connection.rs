//! Outbound command path
//!
//! Frames structured commands with the model's prefix and the persistent
//! rumble bit, then writes them to whichever channel the model listens on.

use crate::domain::ir_camera::IrConfig;
use crate::domain::lock;
use crate::domain::models::Model;
use crate::domain::settings::Settings;
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::protocol::{
    MemorySpace, OutputReport, ReportMode, MAX_WRITE_LEN,
};
use crate::infrastructure::bluetooth::transport::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long one data-channel receive may block before the dispatcher
    /// re-checks its running flag
    pub receive_timeout: Duration,
    /// `None` waits for memory replies without limit
    pub memory_read_timeout: Option<Duration>,
    pub initial_report_mode: ReportMode,
    pub halt_on_protocol_error: bool,
    /// Camera configuration applied while connecting
    pub ir: Option<IrConfig>,
    pub ir_step_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            receive_timeout: Duration::from_millis(settings.receive_timeout_ms),
            memory_read_timeout: match settings.memory_read_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            initial_report_mode: settings.initial_report_mode,
            halt_on_protocol_error: settings.halt_on_protocol_error,
            ir: settings.ir_enabled.then(|| settings.ir_config()),
            ir_step_delay: Duration::from_millis(settings.ir_init_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReportingState {
    mode: ReportMode,
    continuous: bool,
}

/// Shared handle every peripheral uses to talk to the device
pub struct CommandChannel {
    channel: Arc<dyn Channel>,
    prefix: u8,
    rumble: AtomicBool,
    running: Arc<AtomicBool>,
    reporting: Mutex<ReportingState>,
}

impl CommandChannel {
    pub fn new(channel: Arc<dyn Channel>, model: Model, running: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            prefix: model.command_prefix(),
            rumble: AtomicBool::new(false),
            running,
            reporting: Mutex::new(ReportingState {
                mode: ReportMode::Buttons,
                continuous: false,
            }),
        }
    }

    /// Encode and send one command as a single frame
    pub fn send(&self, report: &OutputReport) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WiimoteError::Disconnected);
        }
        let frame = report.encode(self.prefix, self.rumble())?;
        debug!("Sending {:02X?}", frame);
        self.channel.send(&frame)?;
        Ok(())
    }

    pub fn rumble(&self) -> bool {
        self.rumble.load(Ordering::SeqCst)
    }

    /// Flip the rumble bit. It rides along on the status request sent here
    /// and on every later frame.
    pub fn set_rumble(&self, on: bool) -> Result<()> {
        self.rumble.store(on, Ordering::SeqCst);
        self.send(&OutputReport::RequestStatus)
    }

    pub fn set_report_mode(&self, mode: ReportMode, continuous: bool) -> Result<()> {
        *lock(&self.reporting) = ReportingState { mode, continuous };
        self.send(&OutputReport::SetReportMode { mode, continuous })
    }

    pub fn report_mode(&self) -> ReportMode {
        lock(&self.reporting).mode
    }

    /// The device stops streaming after a status report until the
    /// reporting mode is set again.
    pub fn restore_report_mode(&self) -> Result<()> {
        let state = *lock(&self.reporting);
        self.send(&OutputReport::SetReportMode {
            mode: state.mode,
            continuous: state.continuous,
        })
    }

    /// Fire-and-forget single-frame memory write (at most 16 bytes)
    pub fn write_memory(&self, space: MemorySpace, address: u32, data: &[u8]) -> Result<()> {
        if data.len() > MAX_WRITE_LEN {
            return Err(WiimoteError::invalid(format!(
                "write of {} bytes exceeds the {} byte frame; use write_all to chunk",
                data.len(),
                MAX_WRITE_LEN
            )));
        }
        self.send(&OutputReport::WriteMemory {
            space,
            address,
            data: data.to_vec(),
        })
    }
}
