//! IR camera configuration and object decoding.
//!
//! The camera tracks up to four blobs. Extended-format reports (0x33)
//! carry three bytes per slot including a blob size; basic-format reports
//! (0x36, 0x37) pack two slots into five bytes without size.

use crate::domain::callbacks::{CallbackId, CallbackRegistry};
use crate::domain::lock;
use crate::error::{ProtocolViolation, Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::CommandChannel;
use crate::infrastructure::bluetooth::protocol::{
    ir_register, report, MemorySpace, OutputReport, ReportMode, IR_SENSITIVITY,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

pub const SUPPORTED_REPORTS: &[u8] = &[
    report::CORE_BUTTONS_ACCEL_IR12,
    report::CORE_BUTTONS_IR10_EXT9,
    report::CORE_BUTTONS_ACCEL_IR10_EXT6,
    report::INTERLEAVED_A,
    report::INTERLEAVED_B,
];

pub const SLOT_COUNT: usize = 4;

/// Coordinates reported by basic mode for an empty slot
const BASIC_EMPTY: u16 = 0x3ff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrMode {
    Basic,
    Extended,
    Full,
}

impl IrMode {
    /// Value programmed into the camera's mode register
    pub fn register_value(&self) -> u8 {
        match self {
            Self::Basic => 0x01,
            Self::Extended => 0x03,
            Self::Full => 0x05,
        }
    }

    fn report_mode(&self) -> Result<ReportMode> {
        match self {
            Self::Basic => Ok(ReportMode::ButtonsAccelIr10Ext6),
            Self::Extended => Ok(ReportMode::ButtonsAccelIr12),
            Self::Full => Err(WiimoteError::NotSupported(
                "full IR mode (interleaved reports)".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrConfig {
    pub mode: IrMode,
    /// Index into the sensitivity table, 0 least sensitive
    pub sensitivity: usize,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            mode: IrMode::Extended,
            sensitivity: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrObject {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    /// Blob size; basic mode does not report one
    pub size: Option<u8>,
}

/// Decode the IR objects of a report (report type at index 0).
pub fn decode_objects(report: &[u8]) -> Result<Vec<IrObject>> {
    let report_type = report.first().copied().unwrap_or_default();
    let (offset, len, extended) = match report_type {
        report::CORE_BUTTONS_ACCEL_IR12 => (6, 12, true),
        report::CORE_BUTTONS_IR10_EXT9 => (3, 10, false),
        report::CORE_BUTTONS_ACCEL_IR10_EXT6 => (6, 10, false),
        other => return Err(ProtocolViolation::UnsupportedReportType(other).into()),
    };
    let data = report
        .get(offset..offset + len)
        .ok_or(ProtocolViolation::ShortReport {
            report_type,
            expected: offset + len,
            actual: report.len(),
        })?;

    if extended {
        Ok(decode_extended(data))
    } else {
        Ok(decode_basic(data))
    }
}

fn decode_extended(data: &[u8]) -> Vec<IrObject> {
    data.chunks_exact(3)
        .enumerate()
        .filter_map(|(id, slot)| {
            let size = slot[2] & 0x0f;
            (size != 0).then(|| IrObject {
                id: id as u8,
                x: slot[0] as u16 | ((slot[2] as u16 & 0x30) << 4),
                y: slot[1] as u16 | ((slot[2] as u16 & 0xc0) << 2),
                size: Some(size),
            })
        })
        .collect()
}

fn decode_basic(data: &[u8]) -> Vec<IrObject> {
    data.chunks_exact(5)
        .enumerate()
        .flat_map(|(pair, b)| {
            let hi = b[2] as u16;
            [
                (b[0] as u16 | ((hi & 0x30) << 4), b[1] as u16 | ((hi & 0xc0) << 2)),
                (b[3] as u16 | ((hi & 0x03) << 8), b[4] as u16 | ((hi & 0x0c) << 6)),
            ]
            .into_iter()
            .enumerate()
            .map(move |(i, (x, y))| (pair * 2 + i, x, y))
        })
        .filter(|(_, x, y)| !(*x == BASIC_EMPTY && *y == BASIC_EMPTY))
        .map(|(id, x, y)| IrObject {
            id: id as u8,
            x,
            y,
            size: None,
        })
        .collect()
}

pub struct IrCamera {
    commands: Arc<CommandChannel>,
    config: Mutex<Option<IrConfig>>,
    objects: Mutex<Vec<IrObject>>,
    callbacks: CallbackRegistry<[IrObject]>,
    step_delay: Duration,
    /// Reporting mode in effect before the camera took over
    resume_mode: Mutex<Option<ReportMode>>,
}

impl IrCamera {
    pub fn new(commands: Arc<CommandChannel>, step_delay: Duration) -> Self {
        Self {
            commands,
            config: Mutex::new(None),
            objects: Mutex::new(Vec::new()),
            callbacks: CallbackRegistry::new(),
            step_delay,
            resume_mode: Mutex::new(None),
        }
    }

    pub fn supports(report_type: u8) -> bool {
        SUPPORTED_REPORTS.contains(&report_type)
    }

    /// Active configuration, `None` until the camera was programmed
    pub fn config(&self) -> Option<IrConfig> {
        *lock(&self.config)
    }

    /// Program mode and sensitivity into the camera registers.
    ///
    /// The register writes must happen one at a time, in this order.
    pub fn configure(&self, config: IrConfig) -> Result<()> {
        let (block1, block2) = IR_SENSITIVITY.get(config.sensitivity).ok_or_else(|| {
            WiimoteError::invalid(format!(
                "IR sensitivity {} out of range 0..{}",
                config.sensitivity,
                IR_SENSITIVITY.len()
            ))
        })?;
        let report_mode = config.mode.report_mode()?;
        info!(
            "Configuring IR camera: {:?} mode, sensitivity {}",
            config.mode, config.sensitivity
        );

        {
            let mut resume_mode = lock(&self.resume_mode);
            if resume_mode.is_none() {
                *resume_mode = Some(self.commands.report_mode());
            }
        }

        // Stop streaming while the registers change
        self.commands.set_report_mode(ReportMode::Buttons, false)?;
        self.step(&OutputReport::IrPixelClock(true))?;
        self.step(&OutputReport::IrLogic(true))?;
        self.write_register(ir_register::CONTROL, &[ir_register::CONTROL_ENABLE])?;
        self.write_register(ir_register::SENSITIVITY_BLOCK1, block1)?;
        self.write_register(ir_register::SENSITIVITY_BLOCK2, block2)?;
        self.write_register(ir_register::MODE, &[config.mode.register_value()])?;
        self.write_register(ir_register::CONTROL, &[ir_register::CONTROL_ENABLE])?;
        self.commands.set_report_mode(report_mode, false)?;

        *lock(&self.config) = Some(config);
        Ok(())
    }

    pub fn set_mode(&self, mode: IrMode) -> Result<()> {
        let sensitivity = self.config().unwrap_or_default().sensitivity;
        self.configure(IrConfig { mode, sensitivity })
    }

    pub fn set_sensitivity(&self, sensitivity: usize) -> Result<()> {
        let mode = self.config().unwrap_or_default().mode;
        self.configure(IrConfig { mode, sensitivity })
    }

    /// Switch the camera off and return to the reporting mode that was
    /// active before it was configured
    pub fn disable(&self) -> Result<()> {
        self.step(&OutputReport::IrPixelClock(false))?;
        self.step(&OutputReport::IrLogic(false))?;
        let mode = lock(&self.resume_mode)
            .take()
            .unwrap_or_else(|| self.commands.report_mode());
        self.commands.set_report_mode(mode, false)?;
        *lock(&self.config) = None;
        lock(&self.objects).clear();
        Ok(())
    }

    fn write_register(&self, address: u32, data: &[u8]) -> Result<()> {
        debug!("IR register {:#08x} <- {:02X?}", address, data);
        self.commands
            .write_memory(MemorySpace::ControlRegister, address, data)?;
        self.pause();
        Ok(())
    }

    fn step(&self, command: &OutputReport) -> Result<()> {
        self.commands.send(command)?;
        self.pause();
        Ok(())
    }

    fn pause(&self) {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
    }

    pub fn handle_report(&self, report: &[u8]) -> Result<Vec<IrObject>> {
        let objects = decode_objects(report)?;
        *lock(&self.objects) = objects.clone();
        self.callbacks.notify(&objects);
        Ok(objects)
    }

    /// Objects seen in the most recent report
    pub fn objects(&self) -> Vec<IrObject> {
        lock(&self.objects).clone()
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&[IrObject]) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Model;
    use crate::infrastructure::bluetooth::loopback::{DeviceSimulator, LoopbackTransport};
    use crate::infrastructure::bluetooth::transport::Transport;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;

    fn camera() -> (IrCamera, DeviceSimulator) {
        let (transport, sim) = LoopbackTransport::new();
        let channel = transport.connect("addr", Model::Rvl01.send_channel()).unwrap();
        let commands = Arc::new(CommandChannel::new(
            channel,
            Model::Rvl01,
            Arc::new(AtomicBool::new(true)),
        ));
        (IrCamera::new(commands, Duration::ZERO), sim)
    }

    fn encode_extended_slot(x: u16, y: u16, size: u8) -> [u8; 3] {
        [
            (x & 0xff) as u8,
            (y & 0xff) as u8,
            (((y >> 8) as u8) << 6) | (((x >> 8) as u8) << 4) | size,
        ]
    }

    fn extended_report(slots: [[u8; 3]; 4]) -> Vec<u8> {
        let mut report = vec![0x33, 0x00, 0x00, 0x80, 0x80, 0x80];
        slots.iter().for_each(|s| report.extend_from_slice(s));
        report
    }

    #[test]
    fn test_extended_slots() {
        let empty = [0xff, 0xff, 0xf0];
        let report = extended_report([
            encode_extended_slot(1023, 767, 3),
            empty,
            encode_extended_slot(12, 700, 15),
            empty,
        ]);
        let objects = decode_objects(&report).unwrap();
        assert_eq!(
            objects,
            vec![
                IrObject { id: 0, x: 1023, y: 767, size: Some(3) },
                IrObject { id: 2, x: 12, y: 700, size: Some(15) },
            ]
        );
    }

    #[test]
    fn test_basic_slots() {
        // Pair 0: (100, 200) and empty; pair 1: empty and (1000, 600)
        let mut report = vec![0x36, 0x00, 0x00];
        report.extend_from_slice(&[100, 200, 0x0f, 0xff, 0xff]);
        report.extend_from_slice(&[0xff, 0xff, 0xf0 | 0x03 | (0x02 << 2), 0xe8, 0x58]);
        report.resize(report.len() + 9, 0);

        let objects = decode_objects(&report).unwrap();
        assert_eq!(
            objects,
            vec![
                IrObject { id: 0, x: 100, y: 200, size: None },
                IrObject { id: 3, x: 1000, y: 600, size: None },
            ]
        );
    }

    #[test]
    fn test_interleaved_rejected() {
        for report_type in [0x3e, 0x3f] {
            let mut report = vec![report_type];
            report.resize(22, 0);
            assert!(matches!(
                decode_objects(&report),
                Err(WiimoteError::DeviceProtocol(ProtocolViolation::UnsupportedReportType(_)))
            ));
        }
    }

    #[test]
    fn test_short_ir_report() {
        assert!(matches!(
            decode_objects(&[0x33, 0x00, 0x00, 0x80, 0x80, 0x80, 0x01]),
            Err(WiimoteError::DeviceProtocol(ProtocolViolation::ShortReport { .. }))
        ));
    }

    #[test]
    fn test_configure_sequence_order() {
        let (camera, sim) = camera();
        camera
            .configure(IrConfig {
                mode: IrMode::Extended,
                sensitivity: 2,
            })
            .unwrap();

        let frames = sim.sent_frames();
        let summary: Vec<(u8, Option<u32>)> = frames
            .iter()
            .map(|f| {
                let address = (f[1] == 0x16)
                    .then(|| u32::from_be_bytes([0, f[3], f[4], f[5]]));
                (f[1], address)
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (0x12, None),
                (0x13, None),
                (0x1a, None),
                (0x16, Some(0xb0_0030)),
                (0x16, Some(0xb0_0000)),
                (0x16, Some(0xb0_001a)),
                (0x16, Some(0xb0_0033)),
                (0x16, Some(0xb0_0030)),
                (0x12, None),
            ]
        );
        assert_eq!(frames[0], vec![0x52, 0x12, 0x00, 0x30]);
        assert_eq!(&frames[4][6..16], &[9, 0x02, 0x00, 0x00, 0x71, 0x01, 0x00, 0xaa, 0x00, 0x64]);
        assert_eq!(&frames[5][6..9], &[2, 0x63, 0x03]);
        assert_eq!(&frames[6][6..8], &[1, 0x03]);
        assert_eq!(frames[8], vec![0x52, 0x12, 0x00, 0x33]);
        assert_eq!(camera.config().unwrap().mode, IrMode::Extended);
    }

    #[test]
    fn test_configure_rejects_bad_arguments() {
        let (camera, sim) = camera();
        assert!(matches!(
            camera.configure(IrConfig { mode: IrMode::Basic, sensitivity: 6 }),
            Err(WiimoteError::InvalidArgument(_))
        ));
        assert!(matches!(
            camera.configure(IrConfig { mode: IrMode::Full, sensitivity: 0 }),
            Err(WiimoteError::NotSupported(_))
        ));
        assert!(sim.sent().is_empty());
        assert!(camera.config().is_none());
    }

    #[test]
    fn test_set_sensitivity_keeps_mode() {
        let (camera, sim) = camera();
        camera.set_mode(IrMode::Basic).unwrap();
        sim.clear_sent();
        camera.set_sensitivity(5).unwrap();
        assert_eq!(camera.config(), Some(IrConfig { mode: IrMode::Basic, sensitivity: 5 }));
        let frames = sim.sent_frames();
        assert_eq!(&frames[6][6..8], &[1, 0x01]);
        assert_eq!(frames[8], vec![0x52, 0x12, 0x00, 0x37]);
    }

    #[test]
    fn test_disable_restores_previous_mode() {
        let (camera, sim) = camera();
        camera.commands.set_report_mode(ReportMode::Buttons, false).unwrap();
        camera.set_mode(IrMode::Extended).unwrap();
        camera.set_sensitivity(4).unwrap();
        sim.clear_sent();

        camera.disable().unwrap();
        assert_eq!(
            sim.sent_frames(),
            vec![
                vec![0x52, 0x13, 0x00],
                vec![0x52, 0x1a, 0x00],
                vec![0x52, 0x12, 0x00, 0x30],
            ]
        );
        assert_eq!(camera.commands.report_mode(), ReportMode::Buttons);
        assert!(camera.config().is_none());
    }

    proptest! {
        #[test]
        fn prop_extended_slot(x in 0u16..1024, y in 0u16..1024, size in 0u8..16, slot in 0usize..4) {
            let mut slots = [[0xff, 0xff, 0xf0]; 4];
            slots[slot] = encode_extended_slot(x, y, size);
            let objects = decode_objects(&extended_report(slots)).unwrap();
            if size == 0 {
                prop_assert!(objects.is_empty());
            } else {
                prop_assert_eq!(objects, vec![IrObject { id: slot as u8, x, y, size: Some(size) }]);
            }
        }
    }
}
