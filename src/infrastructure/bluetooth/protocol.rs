//! Wiimote Report Protocol
//!
//! Report identifiers, register addresses and outbound command encoding
//! for the vendor HID protocol spoken over the two L2CAP channels.

use crate::error::{Result, WiimoteError};
use serde::{Deserialize, Serialize};

/// Transaction header on every inbound data-channel frame
pub const INPUT_HEADER: u8 = 0xa1;

/// Largest payload a single memory write command carries
pub const MAX_WRITE_LEN: usize = 16;

/// Largest address representable in the 24-bit address field
pub const MAX_ADDRESS: u32 = 0x00ff_ffff;

/// Output report identifiers (opcodes)
pub mod opcode {
    pub const PLAYER_LEDS: u8 = 0x11;
    pub const DATA_REPORTING_MODE: u8 = 0x12;
    pub const IR_PIXEL_CLOCK: u8 = 0x13;
    pub const STATUS_REQUEST: u8 = 0x15;
    pub const WRITE_MEMORY: u8 = 0x16;
    pub const READ_MEMORY: u8 = 0x17;
    pub const IR_LOGIC: u8 = 0x1a;
}

/// Input report identifiers
pub mod report {
    pub const STATUS: u8 = 0x20;
    pub const READ_MEMORY_DATA: u8 = 0x21;
    pub const ACKNOWLEDGE: u8 = 0x22;
    pub const CORE_BUTTONS: u8 = 0x30;
    pub const CORE_BUTTONS_ACCEL: u8 = 0x31;
    pub const CORE_BUTTONS_ACCEL_IR12: u8 = 0x33;
    pub const CORE_BUTTONS_ACCEL_EXT16: u8 = 0x35;
    pub const CORE_BUTTONS_IR10_EXT9: u8 = 0x36;
    pub const CORE_BUTTONS_ACCEL_IR10_EXT6: u8 = 0x37;
    pub const INTERLEAVED_A: u8 = 0x3e;
    pub const INTERLEAVED_B: u8 = 0x3f;

    pub fn is_interleaved(report_type: u8) -> bool {
        report_type == INTERLEAVED_A || report_type == INTERLEAVED_B
    }
}

/// IR camera control registers
pub mod ir_register {
    pub const CONTROL: u32 = 0xb0_0030;
    pub const SENSITIVITY_BLOCK1: u32 = 0xb0_0000;
    pub const SENSITIVITY_BLOCK2: u32 = 0xb0_001a;
    pub const MODE: u32 = 0xb0_0033;

    /// Value written to CONTROL before and after programming the camera
    pub const CONTROL_ENABLE: u8 = 0x08;
    /// Operand that switches the pixel clock and logic on
    pub const ENABLE: u8 = 0x04;
}

/// IR sensitivity calibration blocks, least to most sensitive.
///
/// Levels 1-5 are the console's own settings; the last entry is the
/// maximum-sensitivity block used by homebrew drivers.
pub const IR_SENSITIVITY: [([u8; 9], [u8; 2]); 6] = [
    ([0x02, 0x00, 0x00, 0x71, 0x01, 0x00, 0x64, 0x00, 0xfe], [0xfd, 0x05]),
    ([0x02, 0x00, 0x00, 0x71, 0x01, 0x00, 0x96, 0x00, 0xb4], [0xb3, 0x04]),
    ([0x02, 0x00, 0x00, 0x71, 0x01, 0x00, 0xaa, 0x00, 0x64], [0x63, 0x03]),
    ([0x02, 0x00, 0x00, 0x71, 0x01, 0x00, 0xc8, 0x00, 0x36], [0x35, 0x03]),
    ([0x07, 0x00, 0x00, 0x71, 0x01, 0x00, 0x72, 0x00, 0x20], [0x1f, 0x03]),
    ([0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x90, 0x00, 0xc0], [0x40, 0x00]),
];

/// Data reporting modes this driver can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportMode {
    Buttons,
    ButtonsAccel,
    ButtonsAccelIr12,
    ButtonsIr10Ext9,
    ButtonsAccelIr10Ext6,
}

impl ReportMode {
    pub fn report_type(&self) -> u8 {
        match self {
            Self::Buttons => report::CORE_BUTTONS,
            Self::ButtonsAccel => report::CORE_BUTTONS_ACCEL,
            Self::ButtonsAccelIr12 => report::CORE_BUTTONS_ACCEL_IR12,
            Self::ButtonsIr10Ext9 => report::CORE_BUTTONS_IR10_EXT9,
            Self::ButtonsAccelIr10Ext6 => report::CORE_BUTTONS_ACCEL_IR10_EXT6,
        }
    }

    pub fn from_report_type(report_type: u8) -> Result<Self> {
        match report_type {
            report::CORE_BUTTONS => Ok(Self::Buttons),
            report::CORE_BUTTONS_ACCEL => Ok(Self::ButtonsAccel),
            report::CORE_BUTTONS_ACCEL_IR12 => Ok(Self::ButtonsAccelIr12),
            report::CORE_BUTTONS_IR10_EXT9 => Ok(Self::ButtonsIr10Ext9),
            report::CORE_BUTTONS_ACCEL_IR10_EXT6 => Ok(Self::ButtonsAccelIr10Ext6),
            other => Err(WiimoteError::NotSupported(format!(
                "report mode {:#04x}",
                other
            ))),
        }
    }
}

/// The two addressable memory spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Eeprom,
    ControlRegister,
}

impl MemorySpace {
    pub fn from_eeprom_flag(is_eeprom: bool) -> Self {
        if is_eeprom {
            Self::Eeprom
        } else {
            Self::ControlRegister
        }
    }

    fn read_control(&self) -> u8 {
        match self {
            Self::Eeprom => 0x00,
            Self::ControlRegister => 0x02,
        }
    }

    fn write_control(&self) -> u8 {
        match self {
            Self::Eeprom => 0x00,
            Self::ControlRegister => 0x04,
        }
    }
}

/// Command operand: a byte, a run of bytes, or a nested group of operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Byte(u8),
    Bytes(Vec<u8>),
    Group(Vec<Operand>),
}

impl Operand {
    /// Append this operand's bytes, depth first, preserving order
    pub fn flatten_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Byte(b) => out.push(*b),
            Self::Bytes(bytes) => out.extend_from_slice(bytes),
            Self::Group(items) => items.iter().for_each(|item| item.flatten_into(out)),
        }
    }
}

/// Flatten a sequence of operands into a single byte vector
pub fn flatten(operands: &[Operand]) -> Vec<u8> {
    let mut out = Vec::new();
    operands.iter().for_each(|op| op.flatten_into(&mut out));
    out
}

/// Structured outbound commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputReport {
    /// Packed LED byte (LED 1..4 at bits 4..7)
    SetLeds(u8),
    SetReportMode { mode: ReportMode, continuous: bool },
    /// Status request; the operand carries only the rumble bit
    RequestStatus,
    IrPixelClock(bool),
    IrLogic(bool),
    ReadMemory {
        space: MemorySpace,
        address: u32,
        length: u16,
    },
    WriteMemory {
        space: MemorySpace,
        address: u32,
        data: Vec<u8>,
    },
}

impl OutputReport {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SetLeds(_) => opcode::PLAYER_LEDS,
            Self::SetReportMode { .. } => opcode::DATA_REPORTING_MODE,
            Self::RequestStatus => opcode::STATUS_REQUEST,
            Self::IrPixelClock(_) => opcode::IR_PIXEL_CLOCK,
            Self::IrLogic(_) => opcode::IR_LOGIC,
            Self::ReadMemory { .. } => opcode::READ_MEMORY,
            Self::WriteMemory { .. } => opcode::WRITE_MEMORY,
        }
    }

    pub fn operands(&self) -> Result<Vec<Operand>> {
        let ops = match self {
            Self::SetLeds(leds) => vec![Operand::Byte(*leds)],
            Self::SetReportMode { mode, continuous } => vec![
                Operand::Byte(if *continuous { 0x04 } else { 0x00 }),
                Operand::Byte(mode.report_type()),
            ],
            Self::RequestStatus => vec![Operand::Byte(0x00)],
            Self::IrPixelClock(on) | Self::IrLogic(on) => {
                vec![Operand::Byte(if *on { ir_register::ENABLE } else { 0x00 })]
            }
            Self::ReadMemory {
                space,
                address,
                length,
            } => vec![
                Operand::Byte(space.read_control()),
                Operand::Bytes(address_bytes(*address)?.to_vec()),
                Operand::Bytes(length.to_be_bytes().to_vec()),
            ],
            Self::WriteMemory {
                space,
                address,
                data,
            } => {
                if data.len() > MAX_WRITE_LEN {
                    return Err(WiimoteError::invalid(format!(
                        "write of {} bytes exceeds the {} byte frame",
                        data.len(),
                        MAX_WRITE_LEN
                    )));
                }
                let mut padded = data.clone();
                padded.resize(MAX_WRITE_LEN, 0x00);
                vec![
                    Operand::Byte(space.write_control()),
                    Operand::Bytes(address_bytes(*address)?.to_vec()),
                    Operand::Byte(data.len() as u8),
                    Operand::Bytes(padded),
                ]
            }
        };
        Ok(ops)
    }

    /// Build the full frame: `[prefix][opcode][operands...]`.
    ///
    /// With rumble on, bit 0 of the first operand byte is forced high.
    pub fn encode(&self, prefix: u8, rumble: bool) -> Result<Vec<u8>> {
        let mut frame = vec![prefix, self.opcode()];
        frame.extend(flatten(&self.operands()?));
        if rumble {
            if let Some(first) = frame.get_mut(2) {
                *first |= 0x01;
            }
        }
        Ok(frame)
    }
}

fn address_bytes(address: u32) -> Result<[u8; 3]> {
    if address > MAX_ADDRESS {
        return Err(WiimoteError::invalid(format!(
            "address {:#x} does not fit in 24 bits",
            address
        )));
    }
    let [_, a, b, c] = address.to_be_bytes();
    Ok([a, b, c])
}

/// Pack four LED flags into the LED command byte
pub fn led_byte(leds: &[bool; 4]) -> u8 {
    [0x10u8, 0x20, 0x40, 0x80]
        .iter()
        .zip(leds)
        .filter(|(_, on)| **on)
        .fold(0, |acc, (bit, _)| acc | bit)
}
