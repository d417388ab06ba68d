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

//! The bring-up sequence.
//!
//! `Runtime::build` takes every discovered port through
//! configure → memory → start → promiscuous, in port order, then creates
//! the flow tables and prints the memory layout. The first failure stops
//! the sequence and is returned as a `BringUpError` naming the step and
//! the port or socket involved.

mod flow_tables;
mod mempool;
mod port;
mod queue;

pub use self::flow_tables::FlowTableMap;
pub use self::mempool::{MempoolMap, MempoolParams};
pub use self::port::{Port, PortError, PortMap, PortState};
pub use self::queue::{Direction, QueueError, QueueProvisioner, QueueSet, RxQueue, TxQueue};

use crate::config::{ConfigError, Placement, ProbeConfig};
use crate::eal::dev::{Offloads, PortId};
use crate::eal::mempool::MempoolError;
use crate::eal::{CoreId, Eal, SocketId};
use crate::flow::{FlowTable, FlowTableError, FlowTableParams};
use crate::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;

/// Bring-up errors. Each names the failing step.
#[derive(Debug, Error)]
pub enum BringUpError {
    /// The configuration is inconsistent.
    #[error("invalid configuration.")]
    Config(#[from] ConfigError),

    /// A core is not in the topology.
    #[error("{0:?} is not in the topology.")]
    UnknownCore(CoreId),

    /// The port cannot be discovered or configured.
    #[error("failed to configure {port:?}.")]
    PortConfiguration {
        /// The port.
        port: PortId,
        /// The cause.
        #[source]
        source: PortError,
    },

    /// The buffer pool of a socket cannot be created.
    #[error("failed to create the buffer pool on {socket:?}.")]
    PoolAllocation {
        /// The socket.
        socket: SocketId,
        /// The cause.
        #[source]
        source: MempoolError,
    },

    /// A queue of the port cannot be set up.
    #[error("failed to set up the queues of {port:?}.")]
    QueueSetup {
        /// The port.
        port: PortId,
        /// The cause.
        #[source]
        source: QueueError,
    },

    /// The port cannot be started.
    #[error("failed to start {port:?}.")]
    DeviceStart {
        /// The port.
        port: PortId,
        /// The cause.
        #[source]
        source: PortError,
    },

    /// Promiscuous mode cannot be enabled on the port.
    #[error("failed to enable promiscuous mode on {port:?}.")]
    PromiscuousEnable {
        /// The port.
        port: PortId,
        /// The cause.
        #[source]
        source: PortError,
    },

    /// The flow table of a socket cannot be created.
    #[error("failed to create the flow table on {socket:?}.")]
    HashTableCreation {
        /// The socket.
        socket: SocketId,
        /// The cause.
        #[source]
        source: FlowTableError,
    },
}

/// The resources of a brought up probe: ports with their queues, one
/// buffer pool per socket serving a port, and the flow tables.
pub struct Runtime {
    config: ProbeConfig,
    eal: Eal,
    mempools: MempoolMap,
    ports: PortMap,
    flow_tables: FlowTableMap,
}

impl Runtime {
    /// Brings up every port of the environment, then the flow tables.
    ///
    /// Port `n` takes its name and cores from the n-th `[[ports]]` entry,
    /// or all the worker cores if there is no such entry.
    ///
    /// # Errors
    ///
    /// Returns the first `BringUpError`. Ports started before the failure
    /// are stopped and the runtime's pools and tables are dropped. Queues
    /// already set up stay with the device, holding their pool, until it
    /// is reconfigured or dropped.
    pub fn build(config: ProbeConfig, eal: Eal) -> Result<Self, BringUpError> {
        config.validate()?;
        let rx_offloads = config.rxtx.rx_offloads()?;
        let tx_offloads = config.rxtx.tx_offloads()?;

        let mut runtime = Runtime {
            mempools: MempoolMap::new(config.app_name.clone(), Arc::clone(eal.memory())),
            ports: PortMap::default(),
            flow_tables: FlowTableMap::new(
                config.app_name.clone(),
                Arc::clone(eal.memory()),
                config.flow_table.placement,
            ),
            config,
            eal,
        };

        let count = runtime.eal.devices().count();
        info!(count, "ports discovered.");
        warn!(cond: count == 0, "no port to bring up.");

        for idx in 0..count {
            let id = PortId::new(idx);
            let (name, cores) = match runtime.config.ports.get(idx as usize) {
                Some(conf) => (conf.name.clone(), runtime.config.port_cores(conf)),
                None => (format!("port{}", idx), runtime.config.worker_cores.clone()),
            };
            runtime.bring_up_port(id, name, cores, rx_offloads, tx_offloads)?;
        }

        runtime.create_flow_tables()?;
        info!(
            ports = runtime.ports.len(),
            mempools = runtime.mempools.len(),
            flow_tables = runtime.flow_tables.len(),
            "bring-up complete."
        );

        if runtime.config.dump_memory {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if let Err(err) = runtime.dump(&mut out) {
                warn!(?err, "failed to dump the memory layout.");
            }
        }

        Ok(runtime)
    }

    fn socket_of(&self, core: CoreId) -> Result<SocketId, BringUpError> {
        if !self.config.numa {
            return Ok(SocketId::new(0));
        }

        self.eal
            .topology()
            .socket_of(core)
            .ok_or(BringUpError::UnknownCore(core))
    }

    fn bring_up_port(
        &mut self,
        id: PortId,
        name: String,
        cores: Vec<CoreId>,
        rx_offloads: Offloads,
        tx_offloads: Offloads,
    ) -> Result<(), BringUpError> {
        let configuration = |source| BringUpError::PortConfiguration { port: id, source };
        let eal = self.eal.clone();
        let dev = eal.devices();

        let mut port = Port::discover(dev, id, name, cores).map_err(configuration)?;
        port.configure(
            dev,
            self.config.rxtx.rxqs,
            self.config.rxtx.txqs,
            rx_offloads,
            tx_offloads,
        )
        .map_err(configuration)?;

        let queues = self.provision(&port)?;
        port.memory_ready(queues).map_err(configuration)?;

        port.start(dev)
            .map_err(|source| BringUpError::DeviceStart { port: id, source })?;
        if let Err(source) = port.enable_promiscuous(dev) {
            if let Err(err) = port.stop(dev) {
                warn!(port = ?port.name(), ?err, "failed to stop port.");
            }
            return Err(BringUpError::PromiscuousEnable { port: id, source });
        }

        info!(port = ?port.name(), mac = %port.mac_addr(), "port ready.");
        self.ports.insert(port);
        Ok(())
    }

    /// Creates the pool of every socket serving the port, then sets up the
    /// queues. Queue `n` is served by core `n` modulo the number of cores.
    fn provision(&self, port: &Port) -> Result<BTreeMap<SocketId, QueueSet>, BringUpError> {
        let params = MempoolParams::from(&self.config.mempool);

        let mut placements = Vec::with_capacity(port.cores().len());
        for &core in port.cores() {
            let socket = self.socket_of(core)?;
            let pool = self
                .mempools
                .get_or_create(socket, &params)
                .map_err(|source| BringUpError::PoolAllocation { socket, source })?;
            placements.push((core, socket, pool));
        }

        let id = port.id();
        let queue_setup = |source| BringUpError::QueueSetup { port: id, source };
        let provisioner = QueueProvisioner::new(self.eal.devices(), id, port.info());
        let mut queues = BTreeMap::new();

        for queue in 0..port.nb_rxq() {
            let (core, socket, pool) = &placements[queue as usize % placements.len()];
            let rxq = provisioner
                .provision_rx(queue, *core, self.config.rxtx.rxd, *socket, pool)
                .map_err(queue_setup)?;
            queues
                .entry(*socket)
                .or_insert_with(|| QueueSet::new(*socket))
                .push_rx(rxq);
        }

        for queue in 0..port.nb_txq() {
            let (core, socket, _) = &placements[queue as usize % placements.len()];
            let txq = provisioner
                .provision_tx(queue, *core, self.config.rxtx.txd, *socket)
                .map_err(queue_setup)?;
            queues
                .entry(*socket)
                .or_insert_with(|| QueueSet::new(*socket))
                .push_tx(txq);
        }

        debug!(port = ?port.name(), sockets = ?queues.keys().collect::<Vec<_>>(), "queues ready.");
        Ok(queues)
    }

    /// Creates one table per socket running workers, or a single table on
    /// the lowest of them with shared placement.
    fn create_flow_tables(&mut self) -> Result<(), BringUpError> {
        let mut sockets = BTreeSet::new();
        for &core in self.config.worker_cores.iter() {
            sockets.insert(self.socket_of(core)?);
        }
        if self.config.flow_table.placement == Placement::Shared {
            sockets = sockets.into_iter().take(1).collect();
        }

        let params = FlowTableParams::from(&self.config.flow_table);
        for socket in sockets {
            self.flow_tables
                .get_or_create(socket, params)
                .map_err(|source| BringUpError::HashTableCreation { socket, source })?;
        }

        Ok(())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Returns the environment.
    pub fn eal(&self) -> &Eal {
        &self.eal
    }

    /// Returns the buffer pools.
    pub fn mempools(&self) -> &MempoolMap {
        &self.mempools
    }

    /// Returns the ports.
    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// Returns the flow tables.
    pub fn flow_tables(&self) -> &FlowTableMap {
        &self.flow_tables
    }

    /// Returns the flow table the worker on `core` uses.
    pub fn flow_table_for(&mut self, core: CoreId) -> Option<&mut FlowTable> {
        let socket = self.socket_of(core).ok()?;
        self.flow_tables.table_for(socket)
    }

    /// Writes the memory segments, zones and object lists.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.eal.memory().dump(w)
    }

    /// Stops all the ports. Failures are logged.
    pub fn shutdown(&mut self) {
        let dev = self.eal.devices();
        for port in self.ports.iter_mut() {
            if let Err(err) = port.stop(dev) {
                warn!(port = ?port.name(), ?err, "failed to stop port.");
            }
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("runtime")
            .field("app_name", &self.config.app_name)
            .field("ports", &self.ports)
            .field("mempools", &self.mempools)
            .field("flow_tables", &self.flow_tables)
            .finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        debug!("shutting down runtime.");
        self.shutdown();
    }
}
