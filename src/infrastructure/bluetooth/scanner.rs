//! Device Scanner Module
//!
//! Maps visible Bluetooth devices to known controller models and connects
//! by address.

use crate::domain::models::{DeviceIdentity, Model};
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::service::Wiimote;
use crate::infrastructure::bluetooth::transport::{Discovery, Transport};
use tracing::{debug, info};

/// A visible device whose name matches a supported model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
    pub model: Model,
}

/// All visible controllers; other devices are skipped.
pub fn find(discovery: &dyn Discovery) -> Result<Vec<DiscoveredDevice>> {
    let devices: Vec<DiscoveredDevice> = discovery
        .find_services()?
        .into_iter()
        .filter_map(|(address, name)| match Model::from_name(&name) {
            Ok(model) => Some(DiscoveredDevice {
                address,
                name,
                model,
            }),
            Err(_) => {
                debug!("Skipping {} ({})", address, name);
                None
            }
        })
        .collect();
    info!("Found {} controller(s)", devices.len());
    Ok(devices)
}

/// Model of the device at `address`, if it is visible and supported
pub fn model_for(discovery: &dyn Discovery, address: &str) -> Result<Option<Model>> {
    Ok(find(discovery)?
        .into_iter()
        .find(|device| device.address.eq_ignore_ascii_case(address))
        .map(|device| device.model))
}

/// Connect to `address`. Without an explicit model name the device must
/// be visible to `discovery` so its model can be looked up.
pub fn connect(
    transport: &dyn Transport,
    discovery: &dyn Discovery,
    address: &str,
    model_name: Option<&str>,
    config: ConnectionConfig,
) -> Result<Wiimote> {
    let model = match model_name {
        Some(name) => Model::from_name(name)?,
        None => model_for(discovery, address)?
            .ok_or_else(|| WiimoteError::UnknownDevice(format!("no controller at {}", address)))?,
    };
    let identity = DeviceIdentity {
        address: address.to_string(),
        model,
    };
    Wiimote::connect(transport, identity, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::loopback::LoopbackTransport;
    use crate::infrastructure::bluetooth::transport::ChannelKind;
    use std::io;
    use std::time::Duration;

    struct FakeDiscovery(Vec<(&'static str, &'static str)>);

    impl Discovery for FakeDiscovery {
        fn find_services(&self) -> io::Result<Vec<(String, String)>> {
            Ok(self
                .0
                .iter()
                .map(|(a, n)| (a.to_string(), n.to_string()))
                .collect())
        }
    }

    fn discovery() -> FakeDiscovery {
        FakeDiscovery(vec![
            ("00:1F:32:00:00:01", "Nintendo RVL-CNT-01"),
            ("00:1F:32:00:00:02", "Some Headset"),
            ("00:1F:32:00:00:03", "Nintendo RVL-CNT-01-TR"),
        ])
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            receive_timeout: Duration::from_millis(10),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_find_filters_unknown_devices() {
        let found = find(&discovery()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].model, Model::Rvl01);
        assert_eq!(found[1].model, Model::Rvl01Tr);
    }

    #[test]
    fn test_model_for_address() {
        let d = discovery();
        assert_eq!(
            model_for(&d, "00:1f:32:00:00:03").unwrap(),
            Some(Model::Rvl01Tr)
        );
        assert_eq!(model_for(&d, "00:1F:32:00:00:02").unwrap(), None);
    }

    #[test]
    fn test_connect_looks_up_model() {
        let (transport, sim) = LoopbackTransport::new();
        let wiimote = connect(&transport, &discovery(), "00:1F:32:00:00:03", None, config()).unwrap();
        assert_eq!(wiimote.identity().model, Model::Rvl01Tr);
        assert_eq!(sim.sent()[0].0, ChannelKind::Data);
    }

    #[test]
    fn test_connect_rejects_unknown_model() {
        let (transport, sim) = LoopbackTransport::new();
        let result = connect(
            &transport,
            &discovery(),
            "00:1F:32:00:00:01",
            Some("Nintendo RVL-WBC-01"),
            config(),
        );
        assert!(matches!(result, Err(WiimoteError::UnknownDevice(_))));
        assert!(sim.connected_channels().is_empty());

        let result = connect(&transport, &discovery(), "00:1F:32:00:00:02", None, config());
        assert!(matches!(result, Err(WiimoteError::UnknownDevice(_))));
    }
}
