use crate::domain::accelerometer::Acceleration;
use crate::domain::buttons::ButtonChange;
use crate::domain::ir_camera::IrObject;
use crate::domain::status::DeviceStatus;
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::transport::ChannelKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported controller hardware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    /// Original controller, commands go over the control channel
    Rvl01,
    /// "Plus" revision with built-in motion sensor, commands go over the data channel
    Rvl01Tr,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Rvl01, Model::Rvl01Tr];

    /// Bluetooth device name advertised by this model
    pub fn device_name(&self) -> &'static str {
        match self {
            Self::Rvl01 => "Nintendo RVL-CNT-01",
            Self::Rvl01Tr => "Nintendo RVL-CNT-01-TR",
        }
    }

    /// Transaction header prefixed to every outbound frame
    pub fn command_prefix(&self) -> u8 {
        match self {
            Self::Rvl01 => 0x52,
            Self::Rvl01Tr => 0xa2,
        }
    }

    /// Channel that carries outbound commands
    pub fn send_channel(&self) -> ChannelKind {
        match self {
            Self::Rvl01 => ChannelKind::Control,
            Self::Rvl01Tr => ChannelKind::Data,
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.device_name() == name)
            .ok_or_else(|| WiimoteError::UnknownDevice(name.to_string()))
    }

    pub fn is_known(name: &str) -> bool {
        Self::ALL.iter().any(|m| m.device_name() == name)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_name())
    }
}

/// Who we are talking to. Fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub model: Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Everything the dispatcher publishes to event subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Buttons(Vec<ButtonChange>),
    Acceleration(Acceleration),
    IrObjects(Vec<IrObject>),
    Status(DeviceStatus),
    ConnectionStatus(ConnectionStatus),
    ProtocolError(String),
}
