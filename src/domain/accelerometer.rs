//! Accelerometer decoding.
//!
//! Raw 10-bit sensor units, no calibration applied. The most significant
//! eight bits of each axis arrive in their own byte; the low bits are
//! borrowed from otherwise unused bits of the button word.

use crate::domain::callbacks::{CallbackId, CallbackRegistry};
use crate::domain::lock;
use crate::error::{ProtocolViolation, Result};
use crate::infrastructure::bluetooth::protocol::report;
use std::sync::Mutex;

/// Report types whose bytes 3..6 carry accelerometer data
pub const SUPPORTED_REPORTS: &[u8] = &[
    report::CORE_BUTTONS_ACCEL,
    report::CORE_BUTTONS_ACCEL_IR12,
    report::CORE_BUTTONS_ACCEL_EXT16,
    report::CORE_BUTTONS_ACCEL_IR10_EXT6,
    report::INTERLEAVED_A,
    report::INTERLEAVED_B,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acceleration {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl Acceleration {
    pub fn as_tuple(&self) -> (u16, u16, u16) {
        (self.x, self.y, self.z)
    }

    /// Decode the accelerometer bytes of a report (report type at index 0).
    pub fn decode(report: &[u8]) -> Result<Self> {
        let report_type = report.first().copied().unwrap_or_default();
        if report::is_interleaved(report_type) {
            return Err(ProtocolViolation::UnsupportedReportType(report_type).into());
        }
        if report.len() < 6 {
            return Err(ProtocolViolation::ShortReport {
                report_type,
                expected: 6,
                actual: report.len(),
            }
            .into());
        }

        let x = ((report[3] as u16) << 2) | ((report[1] as u16 & 0x60) >> 5);
        let y = ((report[4] as u16) << 2) | ((report[2] as u16 & 0x20) >> 4);
        let z = ((report[5] as u16) << 2) | ((report[2] as u16 & 0x40) >> 5);
        Ok(Self { x, y, z })
    }
}

pub struct Accelerometer {
    state: Mutex<Acceleration>,
    callbacks: CallbackRegistry<Acceleration>,
}

impl Accelerometer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Acceleration::default()),
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn supports(report_type: u8) -> bool {
        SUPPORTED_REPORTS.contains(&report_type)
    }

    /// Decode, store and notify. State is untouched when decoding fails.
    pub fn handle_report(&self, report: &[u8]) -> Result<Acceleration> {
        let value = Acceleration::decode(report)?;
        *lock(&self.state) = value;
        self.callbacks.notify(&value);
        Ok(value)
    }

    pub fn value(&self) -> Acceleration {
        *lock(&self.state)
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Acceleration) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }
}

impl Default for Accelerometer {
    fn default() -> Self {
        Self::new()
    }
}
