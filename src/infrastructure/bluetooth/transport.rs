//! Transport seam
//!
//! The raw L2CAP socket layer lives outside this crate. Anything that can
//! open the two HID channels to a device address can drive a [`Wiimote`].
//!
//! [`Wiimote`]: crate::infrastructure::bluetooth::service::Wiimote

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// The two HID channels a Wiimote exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// HID control channel
    Control,
    /// HID interrupt (data) channel
    Data,
}

impl ChannelKind {
    /// L2CAP protocol/service multiplexer of this channel
    pub fn psm(&self) -> u16 {
        match self {
            Self::Control => 17,
            Self::Data => 19,
        }
    }
}

/// One connected byte-stream channel.
///
/// `send` writes one complete frame per call, so concurrent senders never
/// interleave partial frames.
pub trait Channel: Send + Sync {
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Block up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means the timeout expired. A frame shorter than two bytes
    /// (including an empty one) signals that the peer went away.
    fn receive(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    fn close(&self);
}

/// Opens channels to a device.
pub trait Transport: Send + Sync {
    fn connect(&self, address: &str, kind: ChannelKind) -> io::Result<Arc<dyn Channel>>;
}

/// Platform service lookup.
pub trait Discovery {
    /// All visible devices as `(address, device name)` pairs
    fn find_services(&self) -> io::Result<Vec<(String, String)>>;
}
