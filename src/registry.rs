use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::modbus_tcp::{Connector, TcpConnector};
use crate::transport::{Endpoint, ModbusHost};

/// Hands out one shared [`ModbusHost`] per endpoint.
///
/// Every [`acquire`](Self::acquire) must be paired with a
/// [`release`](Self::release). When the last subscriber of a host is
/// released the entry is dropped and its connection closed in the
/// background; a later `acquire` builds a fresh host.
pub struct HostRegistry {
    connector: Arc<dyn Connector>,
    hosts: Mutex<HashMap<Endpoint, Arc<ModbusHost>>>,
}

impl HostRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn tcp(timeout: Duration) -> Self {
        Self::new(Arc::new(TcpConnector::new(timeout)))
    }

    pub fn acquire(&self, endpoint: &Endpoint) -> Arc<ModbusHost> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let host = hosts
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(ModbusHost::new(endpoint.clone(), Arc::clone(&self.connector)))
            });

        let subscribers = host.add_subscriber();
        debug!(%endpoint, subscribers, "modbus host acquired");
        Arc::clone(host)
    }

    pub fn release(&self, host: &Arc<ModbusHost>) {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = host.remove_subscriber();
        debug!(endpoint = %host.endpoint(), subscribers, "modbus host released");

        if subscribers == 0 {
            // only forget the entry if it is still this host
            if hosts
                .get(host.endpoint())
                .is_some_and(|registered| Arc::ptr_eq(registered, host))
            {
                hosts.remove(host.endpoint());
            }
        }
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<ModbusHost>> {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts.get(endpoint).cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
