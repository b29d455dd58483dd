//! Host-side driver for the Nintendo Wii Remote.
//!
//! Connect with [`Wiimote::connect`] (or [`scanner::connect`] to look the
//! model up by address), then read peripherals through callbacks or the
//! [`Wiimote::subscribe`] event stream.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::accelerometer::Acceleration;
pub use domain::buttons::{Button, ButtonChange};
pub use domain::ir_camera::{IrConfig, IrMode, IrObject};
pub use domain::models::{ConnectionStatus, DeviceEvent, DeviceIdentity, Model};
pub use domain::status::DeviceStatus;
pub use error::{ProtocolViolation, Result, WiimoteError};
pub use infrastructure::bluetooth::connection::ConnectionConfig;
pub use infrastructure::bluetooth::protocol::ReportMode;
pub use infrastructure::bluetooth::scanner;
pub use infrastructure::bluetooth::Wiimote;
