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

//! Ethernet device driver interface.
//!
//! `EthDev` is the narrow set of driver operations the bring-up sequence
//! depends on. `VirtualDev` implements it in process, emulating the DPDK
//! virtual devices (`net_null`, `net_ring`, `net_tap`) closely enough to
//! exercise queue limits, offload capabilities and ring memory.

use super::memory::{Memory, MemoryError, Memzone};
use super::mempool::{BufferId, BufferPool, MempoolError};
use super::SocketId;
use crate::net::MacAddr;
use crate::{debug, ensure, warn};
use std::fmt;
use std::mem;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Hash over IPv4 and IPv6 addresses.
pub const RSS_IP: u64 = 0x0000_0000_0000_a38c;
/// Hash over TCP ports.
pub const RSS_TCP: u64 = 0x0000_0000_0000_1010;
/// Hash over UDP ports.
pub const RSS_UDP: u64 = 0x0000_0000_0000_2020;
/// Hash over SCTP ports.
pub const RSS_SCTP: u64 = 0x0000_0000_0000_4040;

/// Bytes of ring memory per descriptor.
const DESC_SIZE: usize = 16;

/// An opaque identifier for an Ethernet device port.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PortId(u16);

impl PortId {
    /// Creates a port ID.
    pub const fn new(id: u16) -> Self {
        PortId(id)
    }

    /// Returns the numeric ID.
    #[inline]
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor limits of a receive or transmit ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DescLimits {
    /// The maximum number of descriptors.
    pub nb_max: u16,
    /// The minimum number of descriptors.
    pub nb_min: u16,
    /// The number of descriptors must be a multiple of this.
    pub nb_align: u16,
}

impl DescLimits {
    /// Limits that accept any descriptor count.
    pub const ANY: Self = DescLimits {
        nb_max: u16::MAX,
        nb_min: 0,
        nb_align: 1,
    };

    /// Returns whether `nb_desc` is within the limits.
    pub fn contains(&self, nb_desc: u16) -> bool {
        nb_desc >= self.nb_min && nb_desc <= self.nb_max && nb_desc % self.nb_align.max(1) == 0
    }
}

/// A set of device offload flags, used both for capabilities and for
/// requests.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub struct Offloads(u64);

impl Offloads {
    /// No offloads.
    pub const NONE: Self = Offloads(0);

    /// RX VLAN tag stripping.
    pub const RX_VLAN_STRIP: Self = Offloads(0x0001);
    /// RX IPv4 header checksum validation.
    pub const RX_IPV4_CKSUM: Self = Offloads(0x0002);
    /// RX UDP checksum validation.
    pub const RX_UDP_CKSUM: Self = Offloads(0x0004);
    /// RX TCP checksum validation.
    pub const RX_TCP_CKSUM: Self = Offloads(0x0008);
    /// RX frames larger than the standard MTU.
    pub const RX_JUMBO_FRAME: Self = Offloads(0x0800);
    /// RX scatter into chained buffers.
    pub const RX_SCATTER: Self = Offloads(0x2000);
    /// RX keeps the Ethernet CRC.
    pub const RX_KEEP_CRC: Self = Offloads(0x0001_0000);

    /// TX VLAN tag insertion.
    pub const TX_VLAN_INSERT: Self = Offloads(0x0001);
    /// TX IPv4 header checksum.
    pub const TX_IPV4_CKSUM: Self = Offloads(0x0002);
    /// TX UDP checksum.
    pub const TX_UDP_CKSUM: Self = Offloads(0x0004);
    /// TX TCP checksum.
    pub const TX_TCP_CKSUM: Self = Offloads(0x0008);
    /// TX of chained buffers.
    pub const TX_MULTI_SEGS: Self = Offloads(0x8000);
    /// Buffers are released to their pool without reference counting.
    pub const TX_MBUF_FAST_FREE: Self = Offloads(0x0001_0000);

    const RX_NAMES: &'static [(&'static str, Offloads)] = &[
        ("vlan_strip", Self::RX_VLAN_STRIP),
        ("ipv4_cksum", Self::RX_IPV4_CKSUM),
        ("udp_cksum", Self::RX_UDP_CKSUM),
        ("tcp_cksum", Self::RX_TCP_CKSUM),
        ("jumbo_frame", Self::RX_JUMBO_FRAME),
        ("scatter", Self::RX_SCATTER),
        ("keep_crc", Self::RX_KEEP_CRC),
    ];

    const TX_NAMES: &'static [(&'static str, Offloads)] = &[
        ("vlan_insert", Self::TX_VLAN_INSERT),
        ("ipv4_cksum", Self::TX_IPV4_CKSUM),
        ("udp_cksum", Self::TX_UDP_CKSUM),
        ("tcp_cksum", Self::TX_TCP_CKSUM),
        ("multi_segs", Self::TX_MULTI_SEGS),
        ("mbuf_fast_free", Self::TX_MBUF_FAST_FREE),
    ];

    /// Returns the raw flags.
    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Returns whether no flag is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether all the flags of `other` are set.
    #[inline]
    pub fn contains(self, other: Offloads) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the flags of `self` not set in `other`.
    #[inline]
    pub fn difference(self, other: Offloads) -> Offloads {
        Offloads(self.0 & !other.0)
    }

    /// Parses receive offload names, e.g. `["ipv4_cksum", "vlan_strip"]`.
    ///
    /// # Errors
    ///
    /// Returns the first unknown name.
    pub fn parse_rx<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        Self::parse(Self::RX_NAMES, names)
    }

    /// Parses transmit offload names, e.g. `["tcp_cksum", "multi_segs"]`.
    ///
    /// # Errors
    ///
    /// Returns the first unknown name.
    pub fn parse_tx<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        Self::parse(Self::TX_NAMES, names)
    }

    fn parse<S: AsRef<str>>(table: &[(&str, Offloads)], names: &[S]) -> Result<Self, String> {
        names.iter().try_fold(Offloads::NONE, |acc, name| {
            table
                .iter()
                .find(|(known, _)| *known == name.as_ref())
                .map(|&(_, flag)| acc | flag)
                .ok_or_else(|| name.as_ref().to_owned())
        })
    }
}

impl BitOr for Offloads {
    type Output = Offloads;

    fn bitor(self, rhs: Offloads) -> Offloads {
        Offloads(self.0 | rhs.0)
    }
}

impl BitOrAssign for Offloads {
    fn bitor_assign(&mut self, rhs: Offloads) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Offloads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Contextual information of a device.
#[derive(Clone, Debug)]
pub struct DevInfo {
    /// The driver name, e.g. `net_ring`.
    pub driver_name: String,
    /// The device name, e.g. `net_ring0`.
    pub device: String,
    /// The socket the device is attached to, `SocketId::ANY` if none.
    pub socket: SocketId,
    /// The maximum number of receive queues.
    pub max_rx_queues: u16,
    /// The maximum number of transmit queues.
    pub max_tx_queues: u16,
    /// The receive ring limits.
    pub rx_desc_lim: DescLimits,
    /// The transmit ring limits.
    pub tx_desc_lim: DescLimits,
    /// The supported receive offloads.
    pub rx_offload_capa: Offloads,
    /// The supported transmit offloads.
    pub tx_offload_capa: Offloads,
    /// The supported receive side scaling hash functions.
    pub flow_type_rss_offloads: u64,
}

/// Multi-queue receive mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxMqMode {
    /// All packets go to queue 0.
    None,
    /// Receive side scaling spreads flows across queues.
    Rss,
}

/// Device level configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortConf {
    /// Multi-queue receive mode.
    pub rx_mq_mode: RxMqMode,
    /// The RSS hash functions when `rx_mq_mode` is `Rss`.
    pub rss_hf: u64,
    /// Receive offloads to enable.
    pub rx_offloads: Offloads,
    /// Transmit offloads to enable.
    pub tx_offloads: Offloads,
}

impl Default for PortConf {
    fn default() -> Self {
        PortConf {
            rx_mq_mode: RxMqMode::None,
            rss_hf: 0,
            rx_offloads: Offloads::NONE,
            tx_offloads: Offloads::NONE,
        }
    }
}

/// An error reported by the device driver.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The port does not exist.
    #[error("{0:?} not found.")]
    NotFound(PortId),

    /// An argument is out of the device's limits.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The port must be stopped for the operation.
    #[error("{0:?} is started.")]
    Busy(PortId),

    /// The port must be configured for the operation.
    #[error("{0:?} is not configured.")]
    NotConfigured(PortId),

    /// Ring memory cannot be reserved.
    #[error(transparent)]
    NoMemory(#[from] MemoryError),

    /// Not enough buffers to fill a receive ring.
    #[error(transparent)]
    NoBuffers(#[from] MempoolError),

    /// The device failed the operation.
    #[error("device failure: {0}")]
    Failed(String),
}

/// Ethernet device driver operations.
pub trait EthDev: Send + Sync {
    /// Returns the number of available ports. Port ids run from 0 to
    /// `count() - 1`.
    fn count(&self) -> u16;

    /// Returns the contextual information of a port.
    fn info(&self, port: PortId) -> Result<DevInfo, DeviceError>;

    /// Configures the number of queues and the device level settings. Must
    /// be called before any queue is set up.
    fn configure(
        &self,
        port: PortId,
        nb_rxq: u16,
        nb_txq: u16,
        conf: &PortConf,
    ) -> Result<(), DeviceError>;

    /// Sets up a receive queue, filling its ring with buffers from `pool`.
    fn rx_queue_setup(
        &self,
        port: PortId,
        queue: u16,
        nb_desc: u16,
        socket: SocketId,
        pool: &Arc<BufferPool>,
    ) -> Result<(), DeviceError>;

    /// Sets up a transmit queue.
    fn tx_queue_setup(
        &self,
        port: PortId,
        queue: u16,
        nb_desc: u16,
        socket: SocketId,
    ) -> Result<(), DeviceError>;

    /// Starts the port.
    fn start(&self, port: PortId) -> Result<(), DeviceError>;

    /// Stops the port.
    fn stop(&self, port: PortId) -> Result<(), DeviceError>;

    /// Returns the MAC address of the port.
    fn mac_addr(&self, port: PortId) -> Result<MacAddr, DeviceError>;

    /// Enables promiscuous mode.
    fn promiscuous_enable(&self, port: PortId) -> Result<(), DeviceError>;

    /// Returns whether promiscuous mode is enabled.
    fn promiscuous_get(&self, port: PortId) -> Result<bool, DeviceError>;
}

/// The kind of a virtual device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VdevKind {
    /// Receives nothing, drops everything sent.
    Null,
    /// Loops transmit rings back into receive rings.
    Ring,
    /// Bridges to a kernel TAP interface.
    Tap,
}

impl VdevKind {
    fn driver_name(self) -> &'static str {
        match self {
            VdevKind::Null => "net_null",
            VdevKind::Ring => "net_ring",
            VdevKind::Tap => "net_tap",
        }
    }

    /// Returns the kind named by a device such as `net_ring0`.
    pub fn from_device(device: &str) -> Option<Self> {
        [VdevKind::Null, VdevKind::Ring, VdevKind::Tap]
            .iter()
            .copied()
            .find(|kind| {
                device
                    .strip_prefix(kind.driver_name())
                    .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
    }
}

/// A driver step a virtual port can be told to fail.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Fault {
    /// `configure` fails.
    Configure,
    /// `rx_queue_setup` fails.
    RxQueueSetup,
    /// `tx_queue_setup` fails.
    TxQueueSetup,
    /// `start` fails.
    Start,
    /// `promiscuous_enable` fails.
    Promiscuous,
}

/// The description of a virtual device port.
#[derive(Clone, Debug)]
pub struct VirtualPort {
    info: DevInfo,
    mac: Option<MacAddr>,
    faults: Vec<Fault>,
}

impl VirtualPort {
    /// Creates a virtual port with the defaults of its kind.
    pub fn new<S: Into<String>>(kind: VdevKind, device: S) -> Self {
        let (max_queues, desc_lim, rx_capa, tx_capa, rss) = match kind {
            VdevKind::Null => (
                1024,
                DescLimits::ANY,
                Offloads::NONE,
                Offloads::TX_MBUF_FAST_FREE,
                RSS_IP | RSS_TCP | RSS_UDP,
            ),
            VdevKind::Ring => (16, DescLimits::ANY, Offloads::NONE, Offloads::NONE, 0),
            VdevKind::Tap => (
                16,
                DescLimits {
                    nb_max: 4096,
                    nb_min: 64,
                    nb_align: 1,
                },
                Offloads::RX_IPV4_CKSUM
                    | Offloads::RX_UDP_CKSUM
                    | Offloads::RX_TCP_CKSUM
                    | Offloads::RX_SCATTER,
                Offloads::TX_IPV4_CKSUM
                    | Offloads::TX_UDP_CKSUM
                    | Offloads::TX_TCP_CKSUM
                    | Offloads::TX_MULTI_SEGS,
                RSS_IP | RSS_TCP | RSS_UDP,
            ),
        };

        VirtualPort {
            info: DevInfo {
                driver_name: kind.driver_name().to_owned(),
                device: device.into(),
                socket: SocketId::ANY,
                max_rx_queues: max_queues,
                max_tx_queues: max_queues,
                rx_desc_lim: desc_lim,
                tx_desc_lim: desc_lim,
                rx_offload_capa: rx_capa,
                tx_offload_capa: tx_capa,
                flow_type_rss_offloads: rss,
            },
            mac: None,
            faults: vec![],
        }
    }

    /// Parses a virtual device name and its comma separated `key=value`
    /// arguments.
    ///
    /// Supported keys are `socket`, `mac`, `max_rxq`, `max_txq`, `rxd_max`
    /// and `txd_max`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed part.
    pub fn parse(device: &str, args: Option<&str>) -> Result<Self, String> {
        let kind = VdevKind::from_device(device)
            .ok_or_else(|| "unknown virtual device driver.".to_owned())?;
        let mut port = VirtualPort::new(kind, device);

        for arg in args.unwrap_or_default().split(',').filter(|s| !s.is_empty()) {
            let mut kv = arg.splitn(2, '=');
            let key = kv.next().unwrap_or_default().trim();
            let value = kv
                .next()
                .map(str::trim)
                .ok_or_else(|| format!("argument '{}' has no value.", arg))?;
            let bad = || format!("bad value '{}' for '{}'.", value, key);

            match key {
                "socket" => port.info.socket = SocketId::new(value.parse().map_err(|_| bad())?),
                "mac" => port.mac = Some(value.parse().map_err(|_| bad())?),
                "max_rxq" => port.info.max_rx_queues = value.parse().map_err(|_| bad())?,
                "max_txq" => port.info.max_tx_queues = value.parse().map_err(|_| bad())?,
                "rxd_max" => port.info.rx_desc_lim.nb_max = value.parse().map_err(|_| bad())?,
                "txd_max" => port.info.tx_desc_lim.nb_max = value.parse().map_err(|_| bad())?,
                _ => return Err(format!("unknown argument '{}'.", key)),
            }
        }

        Ok(port)
    }

    /// Sets the socket the device is attached to.
    pub fn socket(mut self, socket: SocketId) -> Self {
        self.info.socket = socket;
        self
    }

    /// Sets the MAC address.
    pub fn mac(mut self, mac: MacAddr) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Sets the maximum number of receive and transmit queues.
    pub fn max_queues(mut self, rx: u16, tx: u16) -> Self {
        self.info.max_rx_queues = rx;
        self.info.max_tx_queues = tx;
        self
    }

    /// Sets the receive and transmit ring limits.
    pub fn desc_limits(mut self, rx: DescLimits, tx: DescLimits) -> Self {
        self.info.rx_desc_lim = rx;
        self.info.tx_desc_lim = tx;
        self
    }

    /// Sets the supported offloads.
    pub fn offload_capa(mut self, rx: Offloads, tx: Offloads) -> Self {
        self.info.rx_offload_capa = rx;
        self.info.tx_offload_capa = tx;
        self
    }

    /// Makes the given driver step fail.
    pub fn fail_on(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }
}

/// A receive ring holding one buffer per descriptor. The buffers go back
/// to the pool when the ring is released.
struct RxRing {
    pool: Arc<BufferPool>,
    buffers: Vec<BufferId>,
    _zone: Memzone,
}

impl Drop for RxRing {
    fn drop(&mut self) {
        if let Err(err) = self.pool.free_bulk(mem::take(&mut self.buffers)) {
            warn!(pool = ?self.pool.name(), ?err, "failed to return ring buffers.");
        }
    }
}

struct TxRing {
    _zone: Memzone,
}

struct PortData {
    id: PortId,
    vport: VirtualPort,
    conf: Option<PortConf>,
    rxqs: Vec<Option<RxRing>>,
    txqs: Vec<Option<TxRing>>,
    started: bool,
    promiscuous: bool,
}

impl PortData {
    fn check_fault(&self, fault: Fault) -> Result<(), DeviceError> {
        ensure!(
            !self.vport.faults.contains(&fault),
            DeviceError::Failed(format!("{:?} failed on {:?}.", fault, self.id))
        );
        Ok(())
    }

    fn check_stopped_and_configured(&self) -> Result<(), DeviceError> {
        ensure!(!self.started, DeviceError::Busy(self.id));
        ensure!(self.conf.is_some(), DeviceError::NotConfigured(self.id));
        Ok(())
    }
}

/// An in-process driver for virtual devices.
pub struct VirtualDev {
    memory: Arc<Memory>,
    ports: Mutex<Vec<PortData>>,
}

impl VirtualDev {
    /// Creates a driver without any port. Ring memory is reserved from
    /// `memory`.
    pub fn new(memory: Arc<Memory>) -> Self {
        VirtualDev {
            memory,
            ports: Mutex::new(vec![]),
        }
    }

    /// Attaches a port and returns its id.
    pub fn attach(&self, port: VirtualPort) -> PortId {
        let mut ports = self.ports();
        let id = PortId(ports.len() as u16);
        ports.push(PortData {
            id,
            vport: port,
            conf: None,
            rxqs: vec![],
            txqs: vec![],
            started: false,
            promiscuous: false,
        });
        id
    }

    fn ports(&self) -> MutexGuard<'_, Vec<PortData>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_port<T, F>(&self, port: PortId, f: F) -> Result<T, DeviceError>
    where
        F: FnOnce(&mut PortData) -> Result<T, DeviceError>,
    {
        let mut ports = self.ports();
        let data = ports
            .get_mut(port.0 as usize)
            .ok_or(DeviceError::NotFound(port))?;
        f(data)
    }

    /// Returns the number of receive queues set up across all ports.
    pub fn rx_queues_setup(&self) -> usize {
        self.ports()
            .iter()
            .map(|p| p.rxqs.iter().filter(|q| q.is_some()).count())
            .sum()
    }

    /// Returns the number of transmit queues set up across all ports.
    pub fn tx_queues_setup(&self) -> usize {
        self.ports()
            .iter()
            .map(|p| p.txqs.iter().filter(|q| q.is_some()).count())
            .sum()
    }

    /// Returns whether the port is started.
    pub fn is_started(&self, port: PortId) -> bool {
        self.with_port(port, |data| Ok(data.started))
            .unwrap_or(false)
    }

    /// Returns the configuration the port was last configured with.
    pub fn port_conf(&self, port: PortId) -> Option<PortConf> {
        self.with_port(port, |data| Ok(data.conf.clone()))
            .ok()
            .flatten()
    }
}

impl EthDev for VirtualDev {
    fn count(&self) -> u16 {
        self.ports().len() as u16
    }

    fn info(&self, port: PortId) -> Result<DevInfo, DeviceError> {
        self.with_port(port, |data| Ok(data.vport.info.clone()))
    }

    fn configure(
        &self,
        port: PortId,
        nb_rxq: u16,
        nb_txq: u16,
        conf: &PortConf,
    ) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            let info = &data.vport.info;
            ensure!(!data.started, DeviceError::Busy(port));
            ensure!(
                nb_rxq <= info.max_rx_queues,
                DeviceError::InvalidArgument(format!(
                    "{} rx queues, max is {}.",
                    nb_rxq, info.max_rx_queues
                ))
            );
            ensure!(
                nb_txq <= info.max_tx_queues,
                DeviceError::InvalidArgument(format!(
                    "{} tx queues, max is {}.",
                    nb_txq, info.max_tx_queues
                ))
            );
            ensure!(
                info.rx_offload_capa.contains(conf.rx_offloads),
                DeviceError::InvalidArgument(format!(
                    "rx offloads {:?} not supported.",
                    conf.rx_offloads.difference(info.rx_offload_capa)
                ))
            );
            ensure!(
                info.tx_offload_capa.contains(conf.tx_offloads),
                DeviceError::InvalidArgument(format!(
                    "tx offloads {:?} not supported.",
                    conf.tx_offloads.difference(info.tx_offload_capa)
                ))
            );
            ensure!(
                conf.rx_mq_mode == RxMqMode::None
                    || conf.rss_hf & !info.flow_type_rss_offloads == 0,
                DeviceError::InvalidArgument(format!(
                    "rss hash functions {:#x} not supported.",
                    conf.rss_hf
                ))
            );
            data.check_fault(Fault::Configure)?;

            data.conf = Some(conf.clone());
            data.rxqs = (0..nb_rxq).map(|_| None).collect();
            data.txqs = (0..nb_txq).map(|_| None).collect();
            debug!(?port, nb_rxq, nb_txq, "device configured.");
            Ok(())
        })
    }

    fn rx_queue_setup(
        &self,
        port: PortId,
        queue: u16,
        nb_desc: u16,
        socket: SocketId,
        pool: &Arc<BufferPool>,
    ) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            data.check_stopped_and_configured()?;
            ensure!(
                (queue as usize) < data.rxqs.len(),
                DeviceError::InvalidArgument(format!(
                    "rx queue {} not configured, {} available.",
                    queue,
                    data.rxqs.len()
                ))
            );
            ensure!(
                data.vport.info.rx_desc_lim.contains(nb_desc),
                DeviceError::InvalidArgument(format!("{} rx descriptors.", nb_desc))
            );
            data.check_fault(Fault::RxQueueSetup)?;

            // releases the previous ring first, its zone name is reused.
            data.rxqs[queue as usize] = None;

            let name = format!("{}_rx_ring_{}", data.vport.info.device, queue);
            let zone = self
                .memory
                .reserve(&name, "rx_ring", nb_desc as usize * DESC_SIZE, socket)?;
            let buffers = pool.alloc_bulk(nb_desc as usize)?;

            data.rxqs[queue as usize] = Some(RxRing {
                pool: Arc::clone(pool),
                buffers,
                _zone: zone,
            });
            debug!(?port, queue, nb_desc, ?socket, "rx queue set up.");
            Ok(())
        })
    }

    fn tx_queue_setup(
        &self,
        port: PortId,
        queue: u16,
        nb_desc: u16,
        socket: SocketId,
    ) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            data.check_stopped_and_configured()?;
            ensure!(
                (queue as usize) < data.txqs.len(),
                DeviceError::InvalidArgument(format!(
                    "tx queue {} not configured, {} available.",
                    queue,
                    data.txqs.len()
                ))
            );
            ensure!(
                data.vport.info.tx_desc_lim.contains(nb_desc),
                DeviceError::InvalidArgument(format!("{} tx descriptors.", nb_desc))
            );
            data.check_fault(Fault::TxQueueSetup)?;

            data.txqs[queue as usize] = None;

            let name = format!("{}_tx_ring_{}", data.vport.info.device, queue);
            let zone = self
                .memory
                .reserve(&name, "tx_ring", nb_desc as usize * DESC_SIZE, socket)?;

            data.txqs[queue as usize] = Some(TxRing { _zone: zone });
            debug!(?port, queue, nb_desc, ?socket, "tx queue set up.");
            Ok(())
        })
    }

    fn start(&self, port: PortId) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            ensure!(data.conf.is_some(), DeviceError::NotConfigured(port));
            if let Some(idx) = data.rxqs.iter().position(Option::is_none) {
                return Err(DeviceError::InvalidArgument(format!(
                    "rx queue {} not set up.",
                    idx
                )));
            }
            if let Some(idx) = data.txqs.iter().position(Option::is_none) {
                return Err(DeviceError::InvalidArgument(format!(
                    "tx queue {} not set up.",
                    idx
                )));
            }
            data.check_fault(Fault::Start)?;

            data.started = true;
            Ok(())
        })
    }

    fn stop(&self, port: PortId) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            data.started = false;
            Ok(())
        })
    }

    fn mac_addr(&self, port: PortId) -> Result<MacAddr, DeviceError> {
        self.with_port(port, |data| {
            Ok(data.vport.mac.unwrap_or_else(|| MacAddr::local(port.0)))
        })
    }

    fn promiscuous_enable(&self, port: PortId) -> Result<(), DeviceError> {
        self.with_port(port, |data| {
            data.check_fault(Fault::Promiscuous)?;
            data.promiscuous = true;
            Ok(())
        })
    }

    fn promiscuous_get(&self, port: PortId) -> Result<bool, DeviceError> {
        self.with_port(port, |data| Ok(data.promiscuous))
    }
}

impl fmt::Debug for VirtualDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDev")
            .field("ports", &self.ports().len())
            .finish()
    }
}
