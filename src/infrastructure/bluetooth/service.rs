//! Wiimote Service Module
//!
//! Owns one live connection: both L2CAP channels, the dispatcher thread,
//! and every peripheral. This is the public face of the crate.

use crate::domain::accelerometer::Accelerometer;
use crate::domain::buttons::Buttons;
use crate::domain::callbacks::CallbackId;
use crate::domain::ir_camera::{IrCamera, IrConfig};
use crate::domain::leds::Leds;
use crate::domain::lock;
use crate::domain::memory::MemoryChannel;
use crate::domain::models::{ConnectionStatus, DeviceEvent, DeviceIdentity};
use crate::domain::status::{DeviceStatus, StatusReporter};
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::{CommandChannel, ConnectionConfig};
use crate::infrastructure::bluetooth::dispatcher::{EventBus, ReportDispatcher};
use crate::infrastructure::bluetooth::protocol::{OutputReport, ReportMode};
use crate::infrastructure::bluetooth::transport::{ChannelKind, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A connected controller
pub struct Wiimote {
    identity: DeviceIdentity,
    connection: Arc<Mutex<ConnectionStatus>>,
    running: Arc<AtomicBool>,
    commands: Arc<CommandChannel>,
    buttons: Arc<Buttons>,
    accelerometer: Arc<Accelerometer>,
    ir_camera: Arc<IrCamera>,
    memory: Arc<MemoryChannel>,
    status: Arc<StatusReporter>,
    leds: Leds,
    events: Arc<EventBus>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Wiimote {
    /// Open both channels, start the dispatcher and put the device into
    /// `config.initial_report_mode`.
    pub fn connect(
        transport: &dyn Transport,
        identity: DeviceIdentity,
        config: ConnectionConfig,
    ) -> Result<Self> {
        info!("Connecting to {} at {}", identity.model, identity.address);

        let control = transport.connect(&identity.address, ChannelKind::Control)?;
        let data = match transport.connect(&identity.address, ChannelKind::Data) {
            Ok(data) => data,
            Err(e) => {
                control.close();
                return Err(e.into());
            }
        };
        let send_channel = match identity.model.send_channel() {
            ChannelKind::Control => control.clone(),
            ChannelKind::Data => data.clone(),
        };

        let running = Arc::new(AtomicBool::new(true));
        let commands = Arc::new(CommandChannel::new(
            send_channel,
            identity.model,
            running.clone(),
        ));
        let buttons = Arc::new(Buttons::new());
        let accelerometer = Arc::new(Accelerometer::new());
        let ir_camera = Arc::new(IrCamera::new(commands.clone(), config.ir_step_delay));
        let memory = Arc::new(MemoryChannel::new(
            commands.clone(),
            config.memory_read_timeout,
        ));
        let status = Arc::new(StatusReporter::new());
        let events = Arc::new(EventBus::default());
        let connection = Arc::new(Mutex::new(ConnectionStatus::Connecting));

        let dispatcher = ReportDispatcher {
            buttons: buttons.clone(),
            accelerometer: accelerometer.clone(),
            ir_camera: ir_camera.clone(),
            memory: memory.clone(),
            status: status.clone(),
            commands: commands.clone(),
            events: events.clone(),
            connection: connection.clone(),
            halt_on_protocol_error: config.halt_on_protocol_error,
        };

        let handle = {
            let (data, control) = (data.clone(), control.clone());
            let running = running.clone();
            let receive_timeout = config.receive_timeout;
            thread::Builder::new()
                .name("wiimote-dispatcher".to_string())
                .spawn(move || dispatcher.run(data, control, &running, receive_timeout))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                data.close();
                control.close();
                return Err(e.into());
            }
        };

        let wiimote = Self {
            identity,
            connection,
            running,
            leds: Leds::new(commands.clone()),
            commands,
            buttons,
            accelerometer,
            ir_camera,
            memory,
            status,
            events,
            dispatcher: Mutex::new(Some(handle)),
        };

        let setup = wiimote
            .commands
            .set_report_mode(config.initial_report_mode, false)
            .and_then(|_| match config.ir {
                Some(ir) => wiimote.ir_camera.configure(ir),
                None => Ok(()),
            });
        if let Err(e) = setup {
            error!("Device setup failed: {}", e);
            wiimote.disconnect();
            return Err(e);
        }

        {
            let mut status = lock(&wiimote.connection);
            // The dispatcher may already have seen the link drop
            if *status == ConnectionStatus::Connecting {
                *status = ConnectionStatus::Connected;
            }
        }
        info!("Connected to {}", wiimote.identity.address);
        Ok(wiimote)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn status(&self) -> ConnectionStatus {
        *lock(&self.connection)
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn buttons(&self) -> &Buttons {
        &self.buttons
    }

    pub fn accelerometer(&self) -> &Accelerometer {
        &self.accelerometer
    }

    pub fn ir_camera(&self) -> &IrCamera {
        &self.ir_camera
    }

    pub fn memory(&self) -> &MemoryChannel {
        &self.memory
    }

    pub fn leds(&self) -> &Leds {
        &self.leds
    }

    /// Latest status report, if the device has sent one
    pub fn device_status(&self) -> Option<DeviceStatus> {
        self.status.latest()
    }

    pub fn register_status_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.status.register_callback(callback)
    }

    /// Stream of everything the dispatcher decodes
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn set_leds(&self, leds: [bool; 4]) -> Result<()> {
        self.leds.set_all(leds)
    }

    pub fn set_rumble(&self, on: bool) -> Result<()> {
        self.commands.set_rumble(on)
    }

    pub fn rumble(&self) -> bool {
        self.commands.rumble()
    }

    /// Ask for a status report. Delivery is asynchronous.
    pub fn request_status(&self) -> Result<()> {
        self.commands.send(&OutputReport::RequestStatus)
    }

    pub fn set_report_mode(&self, mode: ReportMode) -> Result<()> {
        self.commands.set_report_mode(mode, false)
    }

    pub fn report_mode(&self) -> ReportMode {
        self.commands.report_mode()
    }

    pub fn read_memory(&self, address: u32, length: u16, is_eeprom: bool) -> Result<Vec<u8>> {
        self.memory.read(address, length, is_eeprom)
    }

    /// Single-frame write; see [`MemoryChannel::write_all`] for longer data
    pub fn write_memory(&self, address: u32, data: &[u8], is_eeprom: bool) -> Result<()> {
        self.memory.write(address, data, is_eeprom)
    }

    pub fn configure_ir(&self, config: IrConfig) -> Result<()> {
        self.ir_camera.configure(config)
    }

    /// Stop the dispatcher and close both channels. Safe to call twice.
    pub fn disconnect(&self) {
        {
            let mut status = lock(&self.connection);
            if matches!(
                *status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                *status = ConnectionStatus::Disconnecting;
                info!("Disconnecting from {}", self.identity.address);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.memory.abort(WiimoteError::Disconnected);

        let Some(handle) = lock(&self.dispatcher).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Called from a callback; the loop exits once it returns
            return;
        }
        if handle.join().is_err() {
            warn!("Dispatcher thread panicked");
            *lock(&self.connection) = ConnectionStatus::Disconnected;
        }
    }
}

impl Drop for Wiimote {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::buttons::Button;
    use crate::domain::ir_camera::IrMode;
    use crate::domain::models::Model;
    use crate::infrastructure::bluetooth::loopback::{DeviceSimulator, LoopbackTransport};
    use crate::infrastructure::bluetooth::protocol::opcode;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            receive_timeout: Duration::from_millis(10),
            memory_read_timeout: Some(TIMEOUT),
            ir_step_delay: Duration::ZERO,
            ..ConnectionConfig::default()
        }
    }

    fn connect(model: Model) -> (Wiimote, DeviceSimulator) {
        let (transport, sim) = LoopbackTransport::new();
        let identity = DeviceIdentity {
            address: "00:1f:32:aa:bb:cc".to_string(),
            model,
        };
        let wiimote = Wiimote::connect(&transport, identity, test_config()).unwrap();
        (wiimote, sim)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_connect_sets_initial_report_mode() {
        let (wiimote, sim) = connect(Model::Rvl01);
        assert_eq!(
            sim.connected_channels(),
            vec![ChannelKind::Control, ChannelKind::Data]
        );
        assert_eq!(
            sim.sent(),
            vec![(ChannelKind::Control, vec![0x52, 0x12, 0x00, 0x31])]
        );
        assert!(wiimote.is_connected());
        assert_eq!(wiimote.report_mode(), ReportMode::ButtonsAccel);
    }

    #[test]
    fn test_plus_model_sends_on_data_channel() {
        let (wiimote, sim) = connect(Model::Rvl01Tr);
        wiimote.set_leds([true, false, false, true]).unwrap();
        assert_eq!(
            sim.sent()[1],
            (ChannelKind::Data, vec![0xa2, 0x11, 0x90])
        );
    }

    #[test]
    fn test_reports_reach_callbacks() {
        let (wiimote, sim) = connect(Model::Rvl01);
        let (tx, rx) = std_mpsc::channel();
        let button_tx = Mutex::new(tx.clone());
        wiimote.buttons().register_callback(move |changes| {
            let _ = lock(&button_tx).send(format!("{:?}", changes));
        });
        let accel_tx = Mutex::new(tx);
        wiimote.accelerometer().register_callback(move |value| {
            let _ = lock(&accel_tx).send(format!("{:?}", value.as_tuple()));
        });

        sim.inject_report(&[0x31, 0x00, 0x08, 0x80, 0x40, 0x20]);

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "[(A, true)]");
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "(512, 256, 128)");
        assert!(wiimote.buttons().is_pressed(Button::A));
        assert_eq!(wiimote.accelerometer().value().as_tuple(), (512, 256, 128));
    }

    #[test]
    fn test_read_memory_over_two_replies() {
        let (wiimote, sim) = connect(Model::Rvl01);
        sim.set_responder(|frame| {
            if frame.get(1) != Some(&opcode::READ_MEMORY) {
                return Vec::new();
            }
            let mut first = vec![0x21, 0x00, 0x00, 0xf0, 0x00, 0x00];
            first.extend(0u8..16);
            let mut second = vec![0x21, 0x00, 0x00, 0x30, 0x00, 0x10];
            second.extend(16u8..20);
            vec![first, second]
        });

        let data = wiimote.read_memory(0x0000, 20, true).unwrap();
        assert_eq!(data, (0u8..20).collect::<Vec<_>>());
        assert!(!wiimote.memory().in_flight());
    }

    #[test]
    fn test_status_report_restores_mode() {
        let (wiimote, sim) = connect(Model::Rvl01);
        sim.set_responder(|frame| {
            if frame.get(1) == Some(&opcode::STATUS_REQUEST) {
                vec![vec![0x20, 0x00, 0x00, 0x12, 0x00, 0x00, 0x80]]
            } else {
                Vec::new()
            }
        });
        let mut events = wiimote.subscribe();

        wiimote.request_status().unwrap();
        assert!(sim.wait_for_sent(3, TIMEOUT));
        assert_eq!(
            sim.sent_frames(),
            vec![
                vec![0x52, 0x12, 0x00, 0x31],
                vec![0x52, 0x15, 0x00],
                vec![0x52, 0x12, 0x00, 0x31],
            ]
        );
        let status = wiimote.device_status().unwrap();
        assert!(status.extension_connected);
        assert_eq!(status.leds, [true, false, false, false]);
        assert!(matches!(events.try_recv(), Ok(DeviceEvent::Status(_))));
    }

    #[test]
    fn test_rumble_rides_on_later_commands() {
        let (wiimote, sim) = connect(Model::Rvl01);
        wiimote.set_rumble(true).unwrap();
        wiimote.set_leds([false, true, false, false]).unwrap();
        assert!(wiimote.rumble());
        assert_eq!(
            &sim.sent_frames()[1..],
            &[vec![0x52, 0x15, 0x01], vec![0x52, 0x11, 0x21]]
        );
    }

    #[test]
    fn test_ir_configured_on_connect() {
        let (transport, sim) = LoopbackTransport::new();
        let identity = DeviceIdentity {
            address: "addr".to_string(),
            model: Model::Rvl01,
        };
        let config = ConnectionConfig {
            ir: Some(IrConfig {
                mode: IrMode::Basic,
                sensitivity: 2,
            }),
            ..test_config()
        };
        let wiimote = Wiimote::connect(&transport, identity, config).unwrap();
        assert_eq!(wiimote.report_mode(), ReportMode::ButtonsAccelIr10Ext6);
        assert_eq!(
            sim.sent_frames().last(),
            Some(&vec![0x52, 0x12, 0x00, 0x37])
        );

        wiimote.ir_camera().disable().unwrap();
        assert_eq!(wiimote.report_mode(), ReportMode::ButtonsAccel);
        assert_eq!(
            sim.sent_frames().last(),
            Some(&vec![0x52, 0x12, 0x00, 0x31])
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (wiimote, sim) = connect(Model::Rvl01);
        let mut events = wiimote.subscribe();

        wiimote.disconnect();
        wiimote.disconnect();

        assert_eq!(wiimote.status(), ConnectionStatus::Disconnected);
        assert!(sim.is_closed(ChannelKind::Control));
        assert!(sim.is_closed(ChannelKind::Data));
        assert!(matches!(
            wiimote.set_leds([true; 4]),
            Err(WiimoteError::Disconnected)
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            DeviceEvent::ConnectionStatus(ConnectionStatus::Disconnected)
        );
    }

    #[test]
    fn test_read_from_callback_is_refused() {
        let (wiimote, sim) = connect(Model::Rvl01);
        let wiimote = Arc::new(wiimote);
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let handle = Arc::downgrade(&wiimote);
        wiimote.buttons().register_callback(move |_| {
            if let Some(wiimote) = handle.upgrade() {
                let _ = lock(&tx).send(wiimote.read_memory(0x0000, 4, true));
            }
        });

        sim.inject_report(&[0x30, 0x00, 0x08]);
        assert!(matches!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            Err(WiimoteError::NotSupported(_))
        ));
        assert!(!wiimote.memory().in_flight());

        // The dispatcher keeps running
        sim.inject_report(&[0x30, 0x00, 0x00]);
        assert!(wait_until(|| !wiimote.buttons().is_pressed(Button::A)));
        assert_eq!(sim.sent_frames().len(), 1);
    }

    #[test]
    fn test_link_loss_fails_pending_read() {
        let (wiimote, sim) = connect(Model::Rvl01);
        let wiimote = Arc::new(wiimote);
        let reader = {
            let wiimote = wiimote.clone();
            thread::spawn(move || wiimote.read_memory(0x16, 4, true))
        };
        assert!(wait_until(|| wiimote.memory().in_flight()));

        sim.disconnect();
        assert!(matches!(
            reader.join().unwrap(),
            Err(WiimoteError::Disconnected)
        ));
        assert!(wait_until(|| wiimote.status() == ConnectionStatus::Disconnected));
        assert!(sim.wait_closed(TIMEOUT));
    }
}
