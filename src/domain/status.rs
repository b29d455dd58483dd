//! Status report (0x20) decoding.
//!
//! ```text
//! [0]     report type 0x20
//! [1-2]   buttons
//! [3]     flags: bit 0 battery low, bit 1 extension, bit 2 speaker,
//!         bit 3 IR camera, bits 4-7 LEDs
//! [4-5]   reserved
//! [6]     battery level
//! ```

use crate::domain::callbacks::{CallbackId, CallbackRegistry};
use crate::domain::lock;
use crate::error::{ProtocolViolation, Result};
use crate::infrastructure::bluetooth::protocol::report;
use std::sync::Mutex;

pub const SUPPORTED_REPORTS: &[u8] = &[report::STATUS];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub battery_low: bool,
    pub extension_connected: bool,
    pub speaker_enabled: bool,
    pub ir_enabled: bool,
    pub leds: [bool; 4],
    pub battery_level: u8,
}

impl DeviceStatus {
    pub fn decode(report: &[u8]) -> Result<Self> {
        if report.len() < 7 {
            return Err(ProtocolViolation::ShortReport {
                report_type: report.first().copied().unwrap_or_default(),
                expected: 7,
                actual: report.len(),
            }
            .into());
        }
        let flags = report[3];
        Ok(Self {
            battery_low: flags & 0x01 != 0,
            extension_connected: flags & 0x02 != 0,
            speaker_enabled: flags & 0x04 != 0,
            ir_enabled: flags & 0x08 != 0,
            leds: [
                flags & 0x10 != 0,
                flags & 0x20 != 0,
                flags & 0x40 != 0,
                flags & 0x80 != 0,
            ],
            battery_level: report[6],
        })
    }
}

pub struct StatusReporter {
    state: Mutex<Option<DeviceStatus>>,
    callbacks: CallbackRegistry<DeviceStatus>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn supports(report_type: u8) -> bool {
        SUPPORTED_REPORTS.contains(&report_type)
    }

    pub fn handle_report(&self, report: &[u8]) -> Result<DeviceStatus> {
        let status = DeviceStatus::decode(report)?;
        *lock(&self.state) = Some(status);
        self.callbacks.notify(&status);
        Ok(status)
    }

    /// Last status received, if any
    pub fn latest(&self) -> Option<DeviceStatus> {
        *lock(&self.state)
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}
