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

//! The environment the probe runs in: network devices, socket-local
//! memory and the core to socket topology.
//!
//! These are the collaborators the bring-up sequence consumes. They are
//! modeled as traits and shared handles so the sequence can run against
//! emulated devices in tests.

pub mod dev;
pub mod memory;
pub mod mempool;
pub mod topology;

use self::dev::{DeviceError, EthDev, VirtualDev, VirtualPort};
use self::memory::Memory;
use self::topology::{StaticTopology, SysfsTopology, Topology};
use crate::config::ProbeConfig;
use crate::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// PCIe address in domain:bus:device.function form, e.g. `0000:02:00.0`.
static PCIE_ADDR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[[:xdigit:]]{4}:[[:xdigit:]]{2}:[[:xdigit:]]{2}\.[0-7]$").unwrap()
});

/// An opaque identifier for a physical CPU socket.
///
/// A socket is also known as a NUMA node. On a multi-socket system, for best
/// performance, ensure that the cores and memory used for packet processing
/// are in the same socket as the network interface card.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SocketId(i32);

impl SocketId {
    /// A socket ID representing any NUMA socket.
    pub const ANY: Self = SocketId(-1);

    /// Creates a socket ID from the numeric ID assigned by the system.
    pub const fn new(id: i32) -> Self {
        SocketId(id)
    }

    /// Returns the numeric ID.
    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket{}", self.0)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque identifier for a logical CPU core.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CoreId(usize);

impl CoreId {
    /// Creates a core ID from the numeric ID assigned by the system.
    pub const fn new(id: usize) -> Self {
        CoreId(id)
    }

    /// Returns the numeric ID.
    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Environment initialization errors.
#[derive(Debug, Error)]
pub enum EalError {
    /// The device is a physical PCIe function, which requires a kernel
    /// bypass driver that is not part of this build.
    #[error("device '{0}' is a PCIe function; only virtual devices are supported.")]
    UnsupportedDevice(String),

    /// The virtual device name or arguments are malformed.
    #[error("invalid device '{0}': {1}")]
    InvalidDevice(String, String),

    /// The device was rejected by the driver.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The system topology could not be read.
    #[error("failed to read the system topology.")]
    Topology(#[source] io::Error),
}

/// The environment abstraction layer.
///
/// Bundles the device driver, the socket-local memory and the topology.
/// All three are shared handles, so a test can keep a clone and inspect
/// them after the bring-up finishes or fails.
#[derive(Clone)]
pub struct Eal {
    devices: Arc<dyn EthDev>,
    memory: Arc<Memory>,
    topology: Arc<dyn Topology>,
}

impl Eal {
    /// Creates the environment from its parts.
    pub fn new(
        devices: Arc<dyn EthDev>,
        memory: Arc<Memory>,
        topology: Arc<dyn Topology>,
    ) -> Self {
        Eal {
            devices,
            memory,
            topology,
        }
    }

    /// Initializes the environment from the probe configuration.
    ///
    /// Memory is limited per socket when `socket_mem` is set. The topology
    /// comes from the configuration if present, otherwise from sysfs. Each
    /// configured port is attached as a virtual device, in order, so the
    /// n-th entry becomes port n.
    ///
    /// # Errors
    ///
    /// Returns `EalError` if a device is not supported or malformed, or if
    /// the topology cannot be read.
    pub fn init(config: &ProbeConfig) -> Result<Self, EalError> {
        let memory = Arc::new(match &config.socket_mem {
            Some(megs) => Memory::with_limits(
                megs.iter()
                    .enumerate()
                    .map(|(idx, mb)| (SocketId::new(idx as i32), mb << 20)),
            ),
            None => Memory::unlimited(),
        });

        let topology: Arc<dyn Topology> = match &config.topology {
            Some(conf) => Arc::new(StaticTopology::from_sockets(&conf.sockets)),
            None => Arc::new(SysfsTopology::load().map_err(EalError::Topology)?),
        };
        debug!(sockets = ?topology.sockets(), "topology loaded.");

        let devices = VirtualDev::new(Arc::clone(&memory));
        for port in config.ports.iter() {
            if PCIE_ADDR.is_match(&port.device) {
                return Err(EalError::UnsupportedDevice(port.device.clone()));
            }

            let vdev = VirtualPort::parse(&port.device, port.args.as_deref())
                .map_err(|reason| EalError::InvalidDevice(port.device.clone(), reason))?;
            let id = devices.attach(vdev);
            info!(port = ?id, name = ?port.name, device = ?port.device, "device attached.");
        }

        Ok(Eal::new(Arc::new(devices), memory, topology))
    }

    /// Returns the device driver.
    pub fn devices(&self) -> &dyn EthDev {
        self.devices.as_ref()
    }

    /// Returns the socket-local memory.
    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    /// Returns the core to socket topology.
    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }
}

impl fmt::Debug for Eal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eal")
            .field("ports", &self.devices.count())
            .field("sockets", &self.topology.sockets())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortConfig, TopologyConfig};

    fn config(devices: &[&str]) -> ProbeConfig {
        let mut config: ProbeConfig = toml::from_str(
            r#"
            app_name = "eal"
            worker_cores = [0]
            ports = []
            [topology]
                sockets = [[0, 1], [2, 3]]
        "#,
        )
        .unwrap();
        config.ports = devices
            .iter()
            .enumerate()
            .map(|(idx, device)| PortConfig {
                name: format!("eth{}", idx),
                device: (*device).to_owned(),
                args: None,
                cores: vec![],
            })
            .collect();
        config
    }

    #[test]
    fn init_attaches_virtual_devices() {
        let eal = Eal::init(&config(&["net_null0", "net_ring0"])).unwrap();

        assert_eq!(2, eal.devices().count());
        assert_eq!(
            vec![SocketId::new(0), SocketId::new(1)],
            eal.topology().sockets()
        );
    }

    #[test]
    fn init_rejects_pcie_devices() {
        let res = Eal::init(&config(&["0000:02:00.0"]));
        assert!(matches!(res, Err(EalError::UnsupportedDevice(_))));
    }

    #[test]
    fn init_rejects_unknown_devices() {
        let res = Eal::init(&config(&["net_bogus0"]));
        assert!(matches!(res, Err(EalError::InvalidDevice(_, _))));
    }

    #[test]
    fn init_limits_socket_memory() {
        let mut config = config(&[]);
        config.socket_mem = Some(vec![1, 0]);
        config.topology = Some(TopologyConfig {
            sockets: vec![vec![0]],
        });
        let eal = Eal::init(&config).unwrap();

        assert_eq!(Some(1 << 20), eal.memory().limit(SocketId::new(0)));
        assert_eq!(Some(0), eal.memory().limit(SocketId::new(1)));
    }
}
