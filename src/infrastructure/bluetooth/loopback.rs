//! In-memory transport
//!
//! Stands in for the L2CAP socket layer: frames injected through the
//! [`DeviceSimulator`] come out of the data channel, and everything the
//! driver sends is recorded (and optionally answered by a responder).

use crate::domain::lock;
use crate::infrastructure::bluetooth::protocol::INPUT_HEADER;
use crate::infrastructure::bluetooth::transport::{Channel, ChannelKind, Transport};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct Inbound {
    frames: VecDeque<Vec<u8>>,
    disconnected: bool,
}

#[derive(Default)]
struct Shared {
    inbound: Mutex<Inbound>,
    inbound_ready: Condvar,
    sent: Mutex<Vec<(ChannelKind, Vec<u8>)>>,
    sent_ready: Condvar,
    responder: Mutex<Option<Responder>>,
    connected: Mutex<Vec<ChannelKind>>,
    closed: Mutex<Vec<ChannelKind>>,
}

impl Shared {
    fn push_inbound(&self, frame: Vec<u8>) {
        lock(&self.inbound).frames.push_back(frame);
        self.inbound_ready.notify_all();
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, DeviceSimulator) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
            },
            DeviceSimulator { shared },
        )
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self, _address: &str, kind: ChannelKind) -> io::Result<Arc<dyn Channel>> {
        lock(&self.shared.connected).push(kind);
        Ok(Arc::new(LoopbackChannel {
            kind,
            shared: self.shared.clone(),
        }))
    }
}

struct LoopbackChannel {
    kind: ChannelKind,
    shared: Arc<Shared>,
}

impl Channel for LoopbackChannel {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        if lock(&self.shared.closed).contains(&self.kind) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        lock(&self.shared.sent).push((self.kind, bytes.to_vec()));
        self.shared.sent_ready.notify_all();

        let replies = lock(&self.shared.responder)
            .as_ref()
            .map(|respond| respond(bytes))
            .unwrap_or_default();
        for reply in replies {
            self.shared.push_inbound(reply);
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        if self.kind != ChannelKind::Data {
            return Ok(None);
        }
        let guard = lock(&self.shared.inbound);
        let (mut inbound, _) = self
            .shared
            .inbound_ready
            .wait_timeout_while(guard, timeout, |inbound| {
                inbound.frames.is_empty() && !inbound.disconnected
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(frame) = inbound.frames.pop_front() {
            trace!("Loopback delivering {:02X?}", frame);
            return Ok(Some(frame));
        }
        if inbound.disconnected {
            return Ok(Some(Vec::new()));
        }
        Ok(None)
    }

    fn close(&self) {
        let mut closed = lock(&self.shared.closed);
        if !closed.contains(&self.kind) {
            closed.push(self.kind);
        }
    }
}

/// Test-side handle playing the part of the physical device
pub struct DeviceSimulator {
    shared: Arc<Shared>,
}

impl DeviceSimulator {
    /// Queue a raw frame on the data channel, header included
    pub fn inject(&self, frame: Vec<u8>) {
        self.shared.push_inbound(frame);
    }

    /// Queue an input report, prefixing the transaction header
    pub fn inject_report(&self, report: &[u8]) {
        let mut frame = Vec::with_capacity(report.len() + 1);
        frame.push(INPUT_HEADER);
        frame.extend_from_slice(report);
        self.inject(frame);
    }

    /// Answer outbound frames with zero or more input reports.
    ///
    /// Replies are input reports without the header.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        *lock(&self.shared.responder) = Some(Box::new(move |frame: &[u8]| {
            responder(frame)
                .into_iter()
                .map(|report| {
                    let mut framed = vec![INPUT_HEADER];
                    framed.extend(report);
                    framed
                })
                .collect()
        }));
    }

    /// Make the data channel report a dropped link
    pub fn disconnect(&self) {
        lock(&self.shared.inbound).disconnected = true;
        self.shared.inbound_ready.notify_all();
    }

    pub fn sent(&self) -> Vec<(ChannelKind, Vec<u8>)> {
        lock(&self.shared.sent).clone()
    }

    /// Frames sent so far, without the channel tag
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent().into_iter().map(|(_, frame)| frame).collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.shared.sent).clear();
    }

    /// Block until at least `count` frames were sent or `timeout` expires
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let guard = lock(&self.shared.sent);
        let (sent, _) = self
            .shared
            .sent_ready
            .wait_timeout_while(guard, timeout, |sent| sent.len() < count)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sent.len() >= count
    }

    pub fn connected_channels(&self) -> Vec<ChannelKind> {
        lock(&self.shared.connected).clone()
    }

    pub fn is_closed(&self, kind: ChannelKind) -> bool {
        lock(&self.shared.closed).contains(&kind)
    }

    /// Poll until both channels are closed or `timeout` expires
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed(ChannelKind::Control) && self.is_closed(ChannelKind::Data) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_receive() {
        let (transport, sim) = LoopbackTransport::new();
        let data = transport.connect("addr", ChannelKind::Data).unwrap();
        sim.inject_report(&[0x30, 0x00, 0x00]);

        let frame = data.receive(Duration::from_millis(100)).unwrap();
        assert_eq!(frame, Some(vec![0xa1, 0x30, 0x00, 0x00]));
        assert_eq!(data.receive(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_disconnect_yields_empty_frame() {
        let (transport, sim) = LoopbackTransport::new();
        let data = transport.connect("addr", ChannelKind::Data).unwrap();
        sim.disconnect();
        assert_eq!(
            data.receive(Duration::from_millis(100)).unwrap(),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_responder_replies_on_data_channel() {
        let (transport, sim) = LoopbackTransport::new();
        let control = transport.connect("addr", ChannelKind::Control).unwrap();
        let data = transport.connect("addr", ChannelKind::Data).unwrap();
        sim.set_responder(|frame| vec![vec![0x22, 0x00, 0x00, frame[1], 0x00]]);

        control.send(&[0x52, 0x11, 0x10]).unwrap();
        assert_eq!(sim.sent(), vec![(ChannelKind::Control, vec![0x52, 0x11, 0x10])]);
        assert_eq!(
            data.receive(Duration::from_millis(100)).unwrap(),
            Some(vec![0xa1, 0x22, 0x00, 0x00, 0x11, 0x00])
        );
    }

    #[test]
    fn test_send_after_close_fails() {
        let (transport, sim) = LoopbackTransport::new();
        let control = transport.connect("addr", ChannelKind::Control).unwrap();
        control.close();
        assert!(sim.is_closed(ChannelKind::Control));
        assert!(control.send(&[0x52]).is_err());
    }
}
