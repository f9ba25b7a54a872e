use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::ModbusTransportError;
use crate::transport::Endpoint;

const MBAP_HEADER_LEN: usize = 7;
/// MBAP length field covers the unit id plus a PDU of at most 253 bytes.
const MAX_MBAP_LENGTH: usize = 254;

/// One open request/response channel to a slave.
///
/// Implementations perform exactly one exchange per `call` and never
/// pipeline; callers are expected to serialize access.
#[async_trait]
pub trait Link: Send {
    /// Sends `pdu` to `unit_id` and returns the response PDU.
    async fn call(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, ModbusTransportError>;

    async fn close(&mut self) -> Result<(), ModbusTransportError>;
}

/// Opens [`Link`]s to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, ModbusTransportError>;
}

/// MBAP encapsulation with its own transaction counter.
#[derive(Debug, Default)]
pub struct ModbusTcpFrame {
    transaction_id: u16,
}

impl ModbusTcpFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction id of the last wrapped request.
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    pub fn wrap(&mut self, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        self.transaction_id = self.transaction_id.wrapping_add(1);

        let length = (pdu.len() + 1) as u16;
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());

        frame.extend_from_slice(&self.transaction_id.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);

        frame
    }

    /// Validates a response to the last wrapped request and returns its PDU.
    pub fn unwrap(&self, unit_id: u8, frame: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        if frame.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusTransportError::FrameTooShort);
        }

        let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
        if protocol_id != 0 {
            return Err(ModbusTransportError::InvalidProtocolId(protocol_id));
        }

        let received_unit = frame[6];
        if received_unit != unit_id {
            return Err(ModbusTransportError::UnitIdMismatch {
                expected: unit_id,
                received: received_unit,
            });
        }

        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        if transaction_id != self.transaction_id {
            return Err(ModbusTransportError::TransactionIdMismatch {
                expected: self.transaction_id,
                received: transaction_id,
            });
        }

        let expected_len = 6 + Self::declared_length(&frame[..MBAP_HEADER_LEN])?;
        if frame.len() < expected_len {
            return Err(ModbusTransportError::FrameTooShort);
        }

        Ok(frame[MBAP_HEADER_LEN..expected_len].to_vec())
    }

    /// Length field of an MBAP header: unit id plus PDU bytes.
    fn declared_length(header: &[u8]) -> Result<usize, ModbusTransportError> {
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 {
            return Err(ModbusTransportError::FrameTooShort);
        }
        if length > MAX_MBAP_LENGTH {
            return Err(ModbusTransportError::FrameTooLong(length));
        }
        Ok(length)
    }
}

/// Modbus TCP link over a tokio [`TcpStream`].
pub struct TcpLink {
    stream: TcpStream,
    frame: ModbusTcpFrame,
    timeout: Duration,
}

impl TcpLink {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream,
            frame: ModbusTcpFrame::new(),
            timeout,
        }
    }

    async fn exchange(
        &mut self,
        unit_id: u8,
        request: &[u8],
    ) -> Result<Vec<u8>, ModbusTransportError> {
        self.stream.write_all(request).await?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let length = ModbusTcpFrame::declared_length(&header)?;

        let mut response = header.to_vec();
        response.resize(6 + length, 0);
        self.stream.read_exact(&mut response[MBAP_HEADER_LEN..]).await?;

        self.frame.unwrap(unit_id, &response)
    }
}

#[async_trait]
impl Link for TcpLink {
    async fn call(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        let request = self.frame.wrap(unit_id, pdu);
        debug!(
            unit_id,
            transaction_id = self.frame.transaction_id(),
            "modbus tcp request {:02X?}",
            request
        );

        let after = self.timeout;
        timeout(after, self.exchange(unit_id, &request))
            .await
            .map_err(|_| ModbusTransportError::Timeout {
                operation: "exchange",
                after,
            })?
    }

    async fn close(&mut self) -> Result<(), ModbusTransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Opens plain TCP connections, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, ModbusTransportError> {
        let after = self.timeout;
        let stream = timeout(after, TcpStream::connect((endpoint.host(), endpoint.port())))
            .await
            .map_err(|_| ModbusTransportError::Timeout {
                operation: "connect",
                after,
            })??;
        stream.set_nodelay(true)?;

        debug!(%endpoint, "modbus tcp connected");
        Ok(Box::new(TcpLink::new(stream, self.timeout)))
    }
}
