//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use thiserror::Error;

/// Errors that can occur while enumerating devices
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to enumerate devices: {0}")]
    Enumerate(#[from] cpal::DevicesError),
}

/// Description of one input or output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Stable identity: host name plus device name
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Lists the devices available to the engine
pub trait DeviceEnumerator {
    fn list_output_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;
    fn list_input_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    fn default_output_device(&self) -> Result<Option<DeviceDescriptor>, DeviceError> {
        Ok(self
            .list_output_devices()?
            .into_iter()
            .find(|d| d.is_default))
    }

    fn default_input_device(&self) -> Result<Option<DeviceDescriptor>, DeviceError> {
        Ok(self.list_input_devices()?.into_iter().find(|d| d.is_default))
    }
}

/// Enumerator over the default cpal host
pub struct CpalDevices {
    host: cpal::Host,
}

impl Default for CpalDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDevices {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn describe(
        &self,
        devices: impl Iterator<Item = cpal::Device>,
        default: Option<String>,
    ) -> Vec<DeviceDescriptor> {
        let host = self.host.id().name();
        devices
            .filter_map(|device| match device.name() {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!("skipping device without a name: {e}");
                    None
                }
            })
            .map(|name| DeviceDescriptor {
                id: format!("{host}:{name}"),
                is_default: default.as_deref() == Some(name.as_str()),
                name,
            })
            .collect()
    }
}

impl DeviceEnumerator for CpalDevices {
    fn list_output_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let default = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok());
        Ok(self.describe(self.host.output_devices()?, default))
    }

    fn list_input_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let default = self.host.default_input_device().and_then(|d| d.name().ok());
        Ok(self.describe(self.host.input_devices()?, default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<DeviceDescriptor>);

    impl DeviceEnumerator for Fixed {
        fn list_output_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
            Ok(self.0.clone())
        }

        fn list_input_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
            Ok(Vec::new())
        }
    }

    fn device(name: &str, is_default: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id: format!("test:{name}"),
            name: name.to_string(),
            is_default,
        }
    }

    #[test]
    fn test_default_lookup() {
        let devices = Fixed(vec![device("speakers", false), device("headphones", true)]);
        assert_eq!(
            devices.default_output_device().unwrap(),
            Some(device("headphones", true))
        );
        assert_eq!(devices.default_input_device().unwrap(), None);
    }
}
