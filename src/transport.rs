use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ModbusTransportError;
use crate::core::{ModbusUnit, RegisterType};
use crate::modbus_tcp::{Connector, Link, TcpConnector};

pub const DEFAULT_PORT: u16 = 502;

/// Address of one physical bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Shared handle to one Modbus TCP endpoint.
///
/// The connection lives inside the gate, so holding the gate is the only
/// way to touch the wire: every operation connects if needed, performs one
/// exchange and releases the gate, whatever the outcome.
///
/// Read operations return `Ok(None)` and writes `Ok(false)` when the slave
/// answers with an exception or a malformed response. `Err` is reserved for
/// connection and link failures; the broken link is dropped and the next
/// operation reconnects.
pub struct ModbusHost {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    gate: Mutex<Option<Box<dyn Link>>>,
    subscribers: AtomicUsize,
}

impl fmt::Debug for ModbusHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusHost")
            .field("endpoint", &self.endpoint)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ModbusHost {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
            gate: Mutex::new(None),
            subscribers: AtomicUsize::new(0),
        }
    }

    pub fn tcp(endpoint: Endpoint, timeout: Duration) -> Self {
        Self::new(endpoint, Arc::new(TcpConnector::new(timeout)))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn is_connected(&self) -> bool {
        self.gate.lock().await.is_some()
    }

    /// Opens the connection unless it is already open.
    pub async fn connect(&self) -> Result<(), ModbusTransportError> {
        let mut gate = self.gate.lock().await;
        if gate.is_none() {
            *gate = Some(self.connector.connect(&self.endpoint).await?);
        }
        Ok(())
    }

    /// Closes the connection if it is open. Waits for any in-flight exchange.
    pub async fn disconnect(&self) {
        let link = self.gate.lock().await.take();
        if let Some(mut link) = link {
            match link.close().await {
                Ok(()) => debug!(endpoint = %self.endpoint, "modbus host disconnected"),
                Err(e) => debug!(endpoint = %self.endpoint, "modbus host close failed: {e}"),
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Returns the new subscriber count.
    pub fn add_subscriber(&self) -> usize {
        self.subscribers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the new subscriber count. Dropping to zero schedules a
    /// disconnect on the current runtime without waiting for it.
    pub fn remove_subscriber(self: &Arc<Self>) -> usize {
        let previous = self
            .subscribers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                self.schedule_disconnect();
                0
            }
            Ok(n) => n - 1,
            Err(_) => {
                warn!(endpoint = %self.endpoint, "remove_subscriber called with no subscribers");
                0
            }
        }
    }

    fn schedule_disconnect(self: &Arc<Self>) {
        match Handle::try_current() {
            Ok(handle) => {
                let host = Arc::clone(self);
                handle.spawn(async move {
                    host.disconnect().await;
                });
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, "no runtime to schedule disconnect on");
            }
        }
    }

    pub async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>, ModbusTransportError> {
        let unit = block(RegisterType::HoldingRegister, address, count)?;
        self.read(unit_id, &unit, "read_holding_registers").await
    }

    pub async fn read_input_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>, ModbusTransportError> {
        let unit = block(RegisterType::InputRegister, address, count)?;
        self.read(unit_id, &unit, "read_input_registers").await
    }

    pub async fn read_coil(
        &self,
        unit_id: u8,
        address: u16,
    ) -> Result<Option<bool>, ModbusTransportError> {
        let bits = self.read_coils(unit_id, address, 1).await?;
        Ok(bits.and_then(|bits| bits.first().copied()))
    }

    pub async fn read_coils(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<bool>>, ModbusTransportError> {
        let unit = block(RegisterType::CoilRegister, address, count)?;
        let bits = self.read(unit_id, &unit, "read_coils").await?;
        Ok(bits.map(|bits| bits.into_iter().map(|bit| bit != 0).collect()))
    }

    pub async fn write_register(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<bool, ModbusTransportError> {
        let unit = block(RegisterType::HoldingRegister, address, 1)?;
        self.write(unit_id, &unit, value, "write_register").await
    }

    pub async fn write_coil(
        &self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> Result<bool, ModbusTransportError> {
        let unit = block(RegisterType::CoilRegister, address, 1)?;
        self.write(unit_id, &unit, u16::from(value), "write_coil").await
    }

    async fn read(
        &self,
        unit_id: u8,
        unit: &ModbusUnit,
        operation: &'static str,
    ) -> Result<Option<Vec<u16>>, ModbusTransportError> {
        let request = unit.create_read_request();
        let response = self.exchange(unit_id, &request, operation).await?;

        match unit.parse_read_response(&response) {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    unit_id,
                    address = unit.address(),
                    operation,
                    "modbus read rejected: {e}"
                );
                Ok(None)
            }
        }
    }

    async fn write(
        &self,
        unit_id: u8,
        unit: &ModbusUnit,
        value: u16,
        operation: &'static str,
    ) -> Result<bool, ModbusTransportError> {
        let request = unit.create_write_request(value)?;
        let response = self.exchange(unit_id, &request, operation).await?;

        match unit.parse_write_response(&request, &response) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    unit_id,
                    address = unit.address(),
                    operation,
                    value,
                    "modbus write rejected: {e}"
                );
                Ok(false)
            }
        }
    }

    async fn exchange(
        &self,
        unit_id: u8,
        request: &[u8],
        operation: &'static str,
    ) -> Result<Vec<u8>, ModbusTransportError> {
        let mut gate = self.gate.lock().await;

        let mut link = match gate.take() {
            Some(link) => link,
            None => {
                debug!(endpoint = %self.endpoint, "modbus host connecting");
                self.connector.connect(&self.endpoint).await?
            }
        };

        match link.call(unit_id, request).await {
            Ok(response) => {
                *gate = Some(link);
                Ok(response)
            }
            Err(e) => {
                debug!(
                    endpoint = %self.endpoint,
                    unit_id,
                    operation,
                    "dropping modbus connection after link failure: {e}"
                );
                Err(e)
            }
        }
    }
}

fn block(
    register_type: RegisterType,
    address: u16,
    count: u16,
) -> Result<ModbusUnit, ModbusTransportError> {
    Ok(ModbusUnit::builder()
        .address(address)
        .length(count)
        .register_type(register_type)
        .build()?)
}
