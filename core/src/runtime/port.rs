/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::queue::QueueSet;
use crate::eal::dev::{
    DevInfo, DeviceError, EthDev, Offloads, PortConf, PortId, RxMqMode, RSS_IP, RSS_SCTP,
    RSS_TCP, RSS_UDP,
};
use crate::eal::{CoreId, SocketId};
use crate::net::MacAddr;
use crate::{debug, ensure, info};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The bring-up state of a port. A port moves through the states in
/// order.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PortState {
    /// The device is known, nothing is set up.
    Discovered,
    /// Queue counts and offloads are applied.
    Configured,
    /// The pools and queues of every socket serving the port are set up.
    MemoryReady,
    /// The device is started.
    Started,
    /// The device receives all traffic.
    PromiscuousEnabled,
}

/// Port related errors.
#[derive(Debug, Error)]
pub enum PortError {
    /// The operation is not allowed in the current state.
    #[error("{port:?} is {actual:?}, expected {expected:?}.")]
    InvalidState {
        /// The port.
        port: PortId,
        /// The state the operation requires.
        expected: PortState,
        /// The state the port is in.
        actual: PortState,
    },

    /// The port has no assigned core.
    #[error("{0:?} has no core assigned.")]
    NoCores(PortId),

    /// The device has fewer receive queues than requested.
    #[error("insufficient number of receive queues. max is {0}.")]
    InsufficientRxQueues(u16),

    /// The device has fewer transmit queues than requested.
    #[error("insufficient number of transmit queues. max is {0}.")]
    InsufficientTxQueues(u16),

    /// The device does not support some of the requested offloads.
    #[error("{0} offloads {1:?} not supported.")]
    UnsupportedOffloads(&'static str, Offloads),

    /// The device failed the operation.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A network interface being brought up.
pub struct Port {
    id: PortId,
    name: String,
    info: DevInfo,
    cores: Vec<CoreId>,
    mac: MacAddr,
    conf: PortConf,
    nb_rxq: u16,
    nb_txq: u16,
    queues: BTreeMap<SocketId, QueueSet>,
    state: PortState,
}

impl Port {
    /// Discovers a port, reading its capabilities.
    ///
    /// # Errors
    ///
    /// Returns `PortError::NoCores` if `cores` is empty, or
    /// `PortError::Device` if the device is not found.
    pub fn discover<S: Into<String>>(
        dev: &dyn EthDev,
        id: PortId,
        name: S,
        cores: Vec<CoreId>,
    ) -> Result<Self, PortError> {
        ensure!(!cores.is_empty(), PortError::NoCores(id));

        let name: String = name.into();
        let info = dev.info(id)?;
        debug!(port = ?id, ?name, driver = ?info.driver_name, device = ?info.device);

        Ok(Port {
            id,
            name,
            info,
            cores,
            mac: MacAddr::UNSPECIFIED,
            conf: PortConf::default(),
            nb_rxq: 0,
            nb_txq: 0,
            queues: BTreeMap::new(),
            state: PortState::Discovered,
        })
    }

    /// Returns the port id.
    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Returns the application assigned name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device capabilities.
    #[inline]
    pub fn info(&self) -> &DevInfo {
        &self.info
    }

    /// Returns the cores serving the port.
    #[inline]
    pub fn cores(&self) -> &[CoreId] {
        &self.cores
    }

    /// Returns the MAC address, unspecified until the port is configured.
    #[inline]
    pub fn mac_addr(&self) -> MacAddr {
        self.mac
    }

    /// Returns the device configuration applied.
    #[inline]
    pub fn conf(&self) -> &PortConf {
        &self.conf
    }

    /// Returns the number of receive queues.
    #[inline]
    pub fn nb_rxq(&self) -> u16 {
        self.nb_rxq
    }

    /// Returns the number of transmit queues.
    #[inline]
    pub fn nb_txq(&self) -> u16 {
        self.nb_txq
    }

    /// Returns the queues, grouped by socket.
    #[inline]
    pub fn queues(&self) -> &BTreeMap<SocketId, QueueSet> {
        &self.queues
    }

    /// Returns the bring-up state.
    #[inline]
    pub fn state(&self) -> PortState {
        self.state
    }

    fn expect_state(&self, expected: PortState) -> Result<(), PortError> {
        ensure!(
            self.state == expected,
            PortError::InvalidState {
                port: self.id,
                expected,
                actual: self.state,
            }
        );
        Ok(())
    }

    /// Configures the queue counts and offloads, then reads the MAC
    /// address.
    ///
    /// Enables receive side scaling with more than one receive queue, and
    /// mbuf fast free when the device supports it.
    ///
    /// # Errors
    ///
    /// Returns `PortError` if the device cannot provide the queues or the
    /// offloads, or rejects the configuration.
    pub fn configure(
        &mut self,
        dev: &dyn EthDev,
        nb_rxq: u16,
        nb_txq: u16,
        rx_offloads: Offloads,
        tx_offloads: Offloads,
    ) -> Result<(), PortError> {
        self.expect_state(PortState::Discovered)?;
        ensure!(
            self.info.max_rx_queues >= nb_rxq,
            PortError::InsufficientRxQueues(self.info.max_rx_queues)
        );
        ensure!(
            self.info.max_tx_queues >= nb_txq,
            PortError::InsufficientTxQueues(self.info.max_tx_queues)
        );
        ensure!(
            self.info.rx_offload_capa.contains(rx_offloads),
            PortError::UnsupportedOffloads("rx", rx_offloads.difference(self.info.rx_offload_capa))
        );
        ensure!(
            self.info.tx_offload_capa.contains(tx_offloads),
            PortError::UnsupportedOffloads("tx", tx_offloads.difference(self.info.tx_offload_capa))
        );

        let mut conf = PortConf {
            rx_offloads,
            tx_offloads,
            ..PortConf::default()
        };

        if nb_rxq > 1 {
            conf.rx_mq_mode = RxMqMode::Rss;
            conf.rss_hf = self.info.flow_type_rss_offloads & (RSS_IP | RSS_TCP | RSS_UDP | RSS_SCTP);
            debug!(port = ?self.name, rss_hf = conf.rss_hf, "receive side scaling enabled.");
        }

        if self.info.tx_offload_capa.contains(Offloads::TX_MBUF_FAST_FREE) {
            conf.tx_offloads |= Offloads::TX_MBUF_FAST_FREE;
            debug!(port = ?self.name, "mbuf fast free enabled.");
        }

        dev.configure(self.id, nb_rxq, nb_txq, &conf)?;
        self.mac = dev.mac_addr(self.id)?;
        info!(port = ?self.name, mac = %self.mac, nb_rxq, nb_txq, "port configured.");

        self.conf = conf;
        self.nb_rxq = nb_rxq;
        self.nb_txq = nb_txq;
        self.state = PortState::Configured;
        Ok(())
    }

    /// Records the queues set up for the port.
    ///
    /// # Errors
    ///
    /// Returns `PortError::InvalidState` if the port is not configured.
    pub fn memory_ready(&mut self, queues: BTreeMap<SocketId, QueueSet>) -> Result<(), PortError> {
        self.expect_state(PortState::Configured)?;
        self.queues = queues;
        self.state = PortState::MemoryReady;
        Ok(())
    }

    /// Starts the device.
    ///
    /// # Errors
    ///
    /// Returns `PortError` if the queues are not set up or the device
    /// fails to start.
    pub fn start(&mut self, dev: &dyn EthDev) -> Result<(), PortError> {
        self.expect_state(PortState::MemoryReady)?;
        dev.start(self.id)?;
        info!(port = ?self.name, "port started.");
        self.state = PortState::Started;
        Ok(())
    }

    /// Enables promiscuous mode.
    ///
    /// # Errors
    ///
    /// Returns `PortError` if the port is not started or the device does
    /// not support the mode.
    pub fn enable_promiscuous(&mut self, dev: &dyn EthDev) -> Result<(), PortError> {
        self.expect_state(PortState::Started)?;
        dev.promiscuous_enable(self.id)?;
        debug!(port = ?self.name, "promiscuous mode enabled.");
        self.state = PortState::PromiscuousEnabled;
        Ok(())
    }

    /// Stops the device. The queues stay set up.
    ///
    /// # Errors
    ///
    /// Returns `PortError::Device` if the device fails to stop.
    pub fn stop(&mut self, dev: &dyn EthDev) -> Result<(), PortError> {
        if self.state >= PortState::Started {
            dev.stop(self.id)?;
            info!(port = ?self.name, "port stopped.");
            self.state = PortState::MemoryReady;
        }
        Ok(())
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("device", &self.info.device)
            .field("mac", &format_args!("{}", self.mac))
            .field("cores", &self.cores)
            .field("rxqs", &self.nb_rxq)
            .field("txqs", &self.nb_txq)
            .field("state", &self.state)
            .finish()
    }
}

/// The ports of the process, by id.
#[derive(Debug, Default)]
pub struct PortMap(BTreeMap<PortId, Port>);

impl PortMap {
    /// Adds a port.
    pub fn insert(&mut self, port: Port) {
        self.0.insert(port.id(), port);
    }

    /// Returns the port with the id.
    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.0.get(&id)
    }

    /// Returns the port with the application assigned name.
    pub fn by_name(&self, name: &str) -> Option<&Port> {
        self.0.values().find(|port| port.name() == name)
    }

    /// Returns the number of ports.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether there is no port.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the ports in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.0.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.0.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eal::dev::{Fault, VdevKind, VirtualDev, VirtualPort};
    use crate::eal::memory::Memory;
    use std::sync::Arc;

    fn dev(ports: Vec<VirtualPort>) -> VirtualDev {
        let dev = VirtualDev::new(Arc::new(Memory::unlimited()));
        for port in ports {
            dev.attach(port);
        }
        dev
    }

    fn discover(dev: &VirtualDev) -> Port {
        Port::discover(dev, PortId::new(0), "eth0", vec![CoreId::new(0)]).unwrap()
    }

    #[test]
    fn discover_requires_cores_and_device() {
        let dev = dev(vec![VirtualPort::new(VdevKind::Null, "net_null0")]);

        assert!(matches!(
            Port::discover(&dev, PortId::new(0), "eth0", vec![]),
            Err(PortError::NoCores(_))
        ));
        assert!(matches!(
            Port::discover(&dev, PortId::new(1), "eth1", vec![CoreId::new(0)]),
            Err(PortError::Device(DeviceError::NotFound(_)))
        ));
    }

    #[test]
    fn configure_reads_mac() {
        let mac = MacAddr::new(0x02, 0, 0, 0, 0, 0x10);
        let dev = dev(vec![VirtualPort::new(VdevKind::Ring, "net_ring0").mac(mac)]);
        let mut port = discover(&dev);

        assert!(port.mac_addr().is_unspecified());
        port.configure(&dev, 1, 1, Offloads::NONE, Offloads::NONE)
            .unwrap();

        assert_eq!(mac, port.mac_addr());
        assert_eq!(PortState::Configured, port.state());
        assert_eq!(RxMqMode::None, port.conf().rx_mq_mode);
    }

    #[test]
    fn configure_enables_rss_and_fast_free() {
        let dev = dev(vec![VirtualPort::new(VdevKind::Null, "net_null0")]);
        let mut port = discover(&dev);

        port.configure(&dev, 4, 1, Offloads::NONE, Offloads::NONE)
            .unwrap();

        assert_eq!(RxMqMode::Rss, port.conf().rx_mq_mode);
        assert_eq!(RSS_IP | RSS_TCP | RSS_UDP, port.conf().rss_hf);
        assert!(port.conf().tx_offloads.contains(Offloads::TX_MBUF_FAST_FREE));
        assert_eq!(Some(port.conf().clone()), dev.port_conf(PortId::new(0)));
    }

    #[test]
    fn configure_checks_capabilities() {
        let dev = dev(vec![
            VirtualPort::new(VdevKind::Ring, "net_ring0").max_queues(2, 1)
        ]);

        let mut port = discover(&dev);
        assert!(matches!(
            port.configure(&dev, 3, 1, Offloads::NONE, Offloads::NONE),
            Err(PortError::InsufficientRxQueues(2))
        ));
        assert!(matches!(
            port.configure(&dev, 1, 2, Offloads::NONE, Offloads::NONE),
            Err(PortError::InsufficientTxQueues(1))
        ));
        assert!(matches!(
            port.configure(&dev, 1, 1, Offloads::RX_SCATTER, Offloads::NONE),
            Err(PortError::UnsupportedOffloads("rx", _))
        ));
        assert_eq!(PortState::Discovered, port.state());
    }

    #[test]
    fn states_follow_in_order() {
        let dev = dev(vec![VirtualPort::new(VdevKind::Null, "net_null0")]);
        let mut port = discover(&dev);

        assert!(matches!(
            port.start(&dev),
            Err(PortError::InvalidState {
                expected: PortState::MemoryReady,
                actual: PortState::Discovered,
                ..
            })
        ));
        assert!(port.memory_ready(BTreeMap::new()).is_err());

        port.configure(&dev, 0, 0, Offloads::NONE, Offloads::NONE)
            .unwrap();
        assert!(port.enable_promiscuous(&dev).is_err());
        port.memory_ready(BTreeMap::new()).unwrap();
        port.start(&dev).unwrap();
        port.enable_promiscuous(&dev).unwrap();

        assert_eq!(PortState::PromiscuousEnabled, port.state());
        assert!(dev.promiscuous_get(port.id()).unwrap());

        port.stop(&dev).unwrap();
        assert_eq!(PortState::MemoryReady, port.state());
        assert!(!dev.is_started(port.id()));
    }

    #[test]
    fn device_faults_surface() {
        let dev = dev(vec![
            VirtualPort::new(VdevKind::Null, "net_null0").fail_on(Fault::Configure)
        ]);
        let mut port = discover(&dev);

        assert!(matches!(
            port.configure(&dev, 1, 1, Offloads::NONE, Offloads::NONE),
            Err(PortError::Device(DeviceError::Failed(_)))
        ));
        assert_eq!(PortState::Discovered, port.state());
    }

    #[test]
    fn port_map_lookup() {
        let dev = dev(vec![
            VirtualPort::new(VdevKind::Null, "net_null0"),
            VirtualPort::new(VdevKind::Null, "net_null1"),
        ]);
        let mut map = PortMap::default();
        map.insert(discover(&dev));
        map.insert(Port::discover(&dev, PortId::new(1), "eth1", vec![CoreId::new(0)]).unwrap());

        assert_eq!(2, map.len());
        assert_eq!(PortId::new(1), map.by_name("eth1").unwrap().id());
        assert!(map.get(PortId::new(2)).is_none());
    }
}
