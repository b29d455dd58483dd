//! Bluetooth Module
//!
//! Host-side driver for the Wii Remote over two L2CAP channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Wiimote                           │
//! │  (Connection owner - public API for the application)     │
//! └──────────┬──────────────────────────────┬───────────────┘
//!            │                              │
//!            ▼                              ▼
//! ┌────────────────────┐        ┌──────────────────────────┐
//! │  CommandChannel    │        │  ReportDispatcher        │
//! │                    │        │  (dedicated thread)      │
//! │ - prefix + rumble  │        │ - buttons first          │
//! │ - report mode      │        │ - accel / IR / memory    │
//! │ - memory writes    │        │ - status + mode restore  │
//! └─────────┬──────────┘        └────────────┬─────────────┘
//!           │ control (17) or data (19)      │ data (19)
//!           ▼                                ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Transport / Channel (L2CAP or loopback)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Opcodes, report types and output report encoding
//! - [`transport`] - Channel and discovery seams
//! - [`connection`] - Outbound command framing and connection config
//! - [`dispatcher`] - Inbound report routing and the event bus
//! - [`scanner`] - Model lookup and connecting by address
//! - [`service`] - The connected [`Wiimote`]
//! - [`loopback`] - In-memory transport for tests and capture replay

pub mod connection;
pub mod dispatcher;
pub mod loopback;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

pub use service::Wiimote;
