//! In-memory Modbus slave used as a [`Link`] test double.
//!
//! Answers PDUs the way a fan-coil controller does, records every call,
//! and counts overlapping exchanges so tests can check serialization.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fancoil_modbus::{Connector, Endpoint, Link, ModbusTransportError};

#[derive(Debug, Default)]
pub struct Registers {
    pub holding: HashMap<u16, u16>,
    pub input: HashMap<u16, u16>,
    pub coils: HashMap<u16, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub unit_id: u8,
    pub function: u8,
    pub address: u16,
    /// Quantity for reads, written value for writes.
    pub value: u16,
}

#[derive(Default)]
struct SlaveState {
    units: HashMap<u8, Registers>,
    calls: Vec<Call>,
    rejected: HashSet<u16>,
    short: HashSet<u16>,
    refuse_connect: bool,
    broken_link: bool,
}

#[derive(Clone, Default)]
pub struct SimulatedSlave {
    state: Arc<Mutex<SlaveState>>,
    in_flight: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    latency: Duration,
}

impl SimulatedSlave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn set_holding(&self, unit_id: u8, address: u16, value: u16) {
        self.with_unit(unit_id, |regs| {
            regs.holding.insert(address, value);
        });
    }

    pub fn set_input(&self, unit_id: u8, address: u16, value: u16) {
        self.with_unit(unit_id, |regs| {
            regs.input.insert(address, value);
        });
    }

    pub fn set_coil(&self, unit_id: u8, address: u16, value: bool) {
        self.with_unit(unit_id, |regs| {
            regs.coils.insert(address, value);
        });
    }

    pub fn holding(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.with_unit(unit_id, |regs| regs.holding.get(&address).copied())
    }

    pub fn coil(&self, unit_id: u8, address: u16) -> Option<bool> {
        self.with_unit(unit_id, |regs| regs.coils.get(&address).copied())
    }

    /// Answer any request touching `address` with an exception.
    pub fn reject(&self, address: u16) {
        self.state.lock().unwrap().rejected.insert(address);
    }

    pub fn accept(&self, address: u16) {
        self.state.lock().unwrap().rejected.remove(&address);
    }

    /// Answer reads of `address` with an empty payload.
    pub fn truncate(&self, address: u16) {
        self.state.lock().unwrap().short.insert(address);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    pub fn break_link(&self, broken: bool) {
        self.state.lock().unwrap().broken_link = broken;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.function == 0x05 || c.function == 0x06)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn with_unit<T>(&self, unit_id: u8, f: impl FnOnce(&mut Registers) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.units.entry(unit_id).or_default())
    }

    fn respond(&self, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        let mut state = self.state.lock().unwrap();
        if state.broken_link {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }

        let function = pdu[0];
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let value = u16::from_be_bytes([pdu[3], pdu[4]]);
        state.calls.push(Call {
            unit_id,
            function,
            address,
            value,
        });

        if state.rejected.contains(&address) {
            return Ok(vec![function | 0x80, 0x02]);
        }
        if state.short.contains(&address) {
            return Ok(vec![function, 0x00]);
        }

        let regs = state.units.entry(unit_id).or_default();
        let response = match function {
            0x01 => {
                let bits: Vec<bool> = (address..address + value)
                    .map(|a| regs.coils.get(&a).copied().unwrap_or(false))
                    .collect();
                let mut bytes = vec![0u8; bits.len().div_ceil(8)];
                for (i, bit) in bits.iter().enumerate() {
                    if *bit {
                        bytes[i / 8] |= 1 << (i % 8);
                    }
                }
                let mut response = vec![function, bytes.len() as u8];
                response.extend(bytes);
                response
            }
            0x03 | 0x04 => {
                let table = if function == 0x03 { &regs.holding } else { &regs.input };
                let mut response = vec![function, (value * 2) as u8];
                for a in address..address + value {
                    response.extend_from_slice(&table.get(&a).copied().unwrap_or(0).to_be_bytes());
                }
                response
            }
            0x05 => {
                regs.coils.insert(address, value == 0xFF00);
                pdu.to_vec()
            }
            0x06 => {
                regs.holding.insert(address, value);
                pdu.to_vec()
            }
            _ => vec![function | 0x80, 0x01],
        };
        Ok(response)
    }
}

#[async_trait]
impl Connector for SimulatedSlave {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Link>, ModbusTransportError> {
        if self.state.lock().unwrap().refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedLink {
            slave: self.clone(),
        }))
    }
}

pub struct SimulatedLink {
    slave: SimulatedSlave,
}

#[async_trait]
impl Link for SimulatedLink {
    async fn call(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        if self.slave.in_flight.swap(true, Ordering::SeqCst) {
            self.slave.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if self.slave.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.slave.latency).await;
        }
        let response = self.slave.respond(unit_id, pdu);
        self.slave.in_flight.store(false, Ordering::SeqCst);
        response
    }

    async fn close(&mut self) -> Result<(), ModbusTransportError> {
        self.slave.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
