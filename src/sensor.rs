use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::decode_bcd_temperature;
use crate::config::{FancoilConfig, SensorConfig};
use crate::registry::HostRegistry;
use crate::transport::ModbusHost;

/// Read-only BCD temperature point on a fan-coil unit, such as the coil
/// temperature. Unlike [`Fancoil`](crate::Fancoil) it keeps no stale
/// value: a failed read clears it.
pub struct TemperatureSensor {
    host: Arc<ModbusHost>,
    unit_id: u8,
    register: u16,
    name: String,
    value: Option<u16>,
    available: bool,
}

impl TemperatureSensor {
    /// `host` must already count this sensor as a subscriber.
    pub fn new(host: Arc<ModbusHost>, unit_id: u8, register: u16, name: impl Into<String>) -> Self {
        Self {
            host,
            unit_id,
            register,
            name: name.into(),
            value: None,
            available: true,
        }
    }

    pub fn attach(registry: &HostRegistry, config: &FancoilConfig, sensor: &SensorConfig) -> Self {
        let host = registry.acquire(&config.endpoint());
        Self::new(host, config.unit_id, sensor.register, sensor.name.clone())
    }

    pub fn detach(self, registry: &HostRegistry) {
        registry.release(&self.host);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    pub fn unique_id(&self) -> String {
        format!("fischer_fancoil_{}_{}", self.unit_id, self.register)
    }

    /// Temperature in °C.
    pub fn value(&self) -> Option<u16> {
        self.value
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub async fn refresh(&mut self) {
        let result = self
            .host
            .read_input_registers(self.unit_id, self.register, 1)
            .await;

        let raw = match result {
            Ok(Some(registers)) => registers.first().copied(),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    unit_id = self.unit_id,
                    register = self.register,
                    "error reading {}: {e}",
                    self.name
                );
                None
            }
        };

        match raw {
            Some(raw) => {
                let value = decode_bcd_temperature(raw);
                debug!(
                    unit_id = self.unit_id,
                    register = self.register,
                    value,
                    "read {}",
                    self.name
                );
                self.value = Some(value);
                self.available = true;
            }
            None => {
                warn!(
                    unit_id = self.unit_id,
                    register = self.register,
                    "failed to read {}",
                    self.name
                );
                self.value = None;
                self.available = false;
            }
        }
    }
}
