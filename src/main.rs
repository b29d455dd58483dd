//! Replays a captured data-channel session through the driver.
//!
//! Each non-empty line of the capture is one frame as hex bytes, header
//! included (`a1 31 00 08 80 40 20`). Lines starting with `#` are skipped.

use anyhow::{bail, Context};
use std::{env, fs};
use tracing::{info, warn};
use wiimote::domain::settings::{Settings, SettingsService};
use wiimote::infrastructure::bluetooth::loopback::LoopbackTransport;
use wiimote::infrastructure::logging::init_logger;
use wiimote::{ConnectionConfig, ConnectionStatus, DeviceEvent, DeviceIdentity, Model, Wiimote};

fn parse_capture(contents: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame = line
            .split_whitespace()
            .map(|token| u8::from_str_radix(token.trim_start_matches("0x"), 16))
            .collect::<Result<Vec<u8>, _>>()
            .with_context(|| format!("line {}: bad hex byte", number + 1))?;
        if frame.len() < 2 {
            bail!("line {}: a frame needs a header and a report type", number + 1);
        }
        frames.push(frame);
    }
    Ok(frames)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()
        .map(|service| service.get().clone())
        .unwrap_or_else(|e| {
            eprintln!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        });
    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .context("usage: wiimote-replay <capture-file> [device-name]")?;
    let model = match args.next() {
        Some(name) => Model::from_name(&name)?,
        None => Model::Rvl01,
    };

    let contents = fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let frames = parse_capture(&contents)?;
    info!("Replaying {} frame(s) from {} as {}", frames.len(), path, model);

    let (transport, device) = LoopbackTransport::new();
    let identity = DeviceIdentity {
        address: "loopback".to_string(),
        model,
    };
    let config = ConnectionConfig::from(&settings);
    let wiimote =
        tokio::task::spawn_blocking(move || Wiimote::connect(&transport, identity, config))
            .await??;

    let mut events = wiimote.subscribe();
    for frame in frames {
        device.inject(frame);
    }
    device.disconnect();

    while let Some(event) = events.recv().await {
        match event {
            DeviceEvent::ConnectionStatus(ConnectionStatus::Disconnected) => break,
            DeviceEvent::ProtocolError(message) => warn!("Protocol error: {}", message),
            other => info!("{:?}", other),
        }
    }

    let pressed: Vec<&str> = wiimote
        .buttons()
        .state()
        .iter()
        .filter(|(_, down)| *down)
        .map(|(button, _)| button.name())
        .collect();
    info!(
        "Final state: buttons {:?}, acceleration {:?}, {} IR object(s)",
        pressed,
        wiimote.accelerometer().value().as_tuple(),
        wiimote.ir_camera().objects().len()
    );
    Ok(())
}
