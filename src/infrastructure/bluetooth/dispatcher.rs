//! Report Dispatcher
//!
//! The only reader of the data channel. Each frame goes to the button
//! decoder first (every input report embeds the button word), then to
//! each peripheral decoder that handles its report type.

use crate::domain::accelerometer::Accelerometer;
use crate::domain::buttons::Buttons;
use crate::domain::ir_camera::IrCamera;
use crate::domain::lock;
use crate::domain::memory::MemoryChannel;
use crate::domain::models::{ConnectionStatus, DeviceEvent};
use crate::domain::status::StatusReporter;
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::CommandChannel;
use crate::infrastructure::bluetooth::protocol::INPUT_HEADER;
use crate::infrastructure::bluetooth::transport::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Fan-out of device events to any number of subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Dropped receivers are pruned on the next publish
    pub fn publish(&self, event: DeviceEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Decoders and shared state the dispatcher feeds
pub struct ReportDispatcher {
    pub(crate) buttons: Arc<Buttons>,
    pub(crate) accelerometer: Arc<Accelerometer>,
    pub(crate) ir_camera: Arc<IrCamera>,
    pub(crate) memory: Arc<MemoryChannel>,
    pub(crate) status: Arc<StatusReporter>,
    pub(crate) commands: Arc<CommandChannel>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) connection: Arc<Mutex<ConnectionStatus>>,
    pub(crate) halt_on_protocol_error: bool,
}

impl ReportDispatcher {
    /// Route one data-channel frame (header byte included).
    pub fn dispatch(&self, frame: &[u8]) -> Result<()> {
        if frame.first() != Some(&INPUT_HEADER) {
            debug!("Unexpected frame header {:02X?}", frame.first());
        }
        let report = frame.get(1..).unwrap_or_default();
        let report_type = report.first().copied().unwrap_or_default();

        let changes = self.buttons.handle_report(report)?;
        if !changes.is_empty() {
            self.events.publish(DeviceEvent::Buttons(changes));
        }

        if Accelerometer::supports(report_type) {
            let value = self.accelerometer.handle_report(report)?;
            self.events.publish(DeviceEvent::Acceleration(value));
        }
        if MemoryChannel::supports(report_type) {
            self.memory.handle_report(report)?;
        }
        if IrCamera::supports(report_type) {
            let objects = self.ir_camera.handle_report(report)?;
            self.events.publish(DeviceEvent::IrObjects(objects));
        }
        if StatusReporter::supports(report_type) {
            let status = self.status.handle_report(report)?;
            self.events.publish(DeviceEvent::Status(status));
            // Streaming stops after a status report until the mode is re-sent
            self.commands.restore_report_mode()?;
        }
        Ok(())
    }

    /// Pull frames until `running` clears or the link drops, then release
    /// both channels.
    pub fn run(
        &self,
        data: Arc<dyn Channel>,
        control: Arc<dyn Channel>,
        running: &AtomicBool,
        receive_timeout: Duration,
    ) {
        info!("Report dispatcher started");
        self.memory.bind_dispatcher(thread::current().id());
        while running.load(Ordering::SeqCst) {
            let frame = match data.receive(receive_timeout) {
                Ok(None) => continue,
                Ok(Some(frame)) => frame,
                Err(e) => {
                    error!("Data channel receive failed: {}", e);
                    break;
                }
            };
            if frame.len() < 2 {
                info!("Data channel closed by device");
                break;
            }
            trace!("Received {:02X?}", frame);

            if let Err(e) = self.dispatch(&frame) {
                if self.halt_on_protocol_error {
                    error!("Stopping dispatcher on protocol error: {}", e);
                    break;
                }
                warn!("Dropping report {:02X?}: {}", frame, e);
                self.events.publish(DeviceEvent::ProtocolError(e.to_string()));
            }
        }
        self.shutdown(data.as_ref(), control.as_ref(), running);
    }

    fn shutdown(&self, data: &dyn Channel, control: &dyn Channel, running: &AtomicBool) {
        data.close();
        control.close();
        running.store(false, Ordering::SeqCst);
        self.memory.abort(WiimoteError::Disconnected);

        *lock(&self.connection) = ConnectionStatus::Disconnected;
        self.events
            .publish(DeviceEvent::ConnectionStatus(ConnectionStatus::Disconnected));
        info!("Report dispatcher stopped");
    }
}
