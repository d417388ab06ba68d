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

use crate::eal::dev::{DescLimits, DevInfo, DeviceError, EthDev, PortId};
use crate::eal::mempool::BufferPool;
use crate::eal::{CoreId, SocketId};
use crate::{debug, ensure};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Direction of a queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Receive.
    Rx,
    /// Transmit.
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => f.write_str("rx"),
            Direction::Tx => f.write_str("tx"),
        }
    }
}

/// Queue setup errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The descriptor count is outside the device limits.
    #[error("{port:?} {direction} queue {queue}: {nb_desc} descriptors outside {limits:?}.")]
    InvalidDescriptors {
        /// The port.
        port: PortId,
        /// The queue direction.
        direction: Direction,
        /// The queue index.
        queue: u16,
        /// The requested descriptor count.
        nb_desc: u16,
        /// The device limits.
        limits: DescLimits,
    },

    /// The device rejected the queue.
    #[error("{port:?} {direction} queue {queue} setup failed.")]
    Setup {
        /// The port.
        port: PortId,
        /// The queue direction.
        direction: Direction,
        /// The queue index.
        queue: u16,
        /// The device failure.
        #[source]
        source: DeviceError,
    },
}

/// A receive queue and the pool filling its ring.
pub struct RxQueue {
    index: u16,
    core: CoreId,
    nb_desc: u16,
    pool: Arc<BufferPool>,
}

impl RxQueue {
    /// Returns the queue index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Returns the core serving the queue.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Returns the ring size.
    pub fn nb_desc(&self) -> u16 {
        self.nb_desc
    }

    /// Returns the pool filling the ring.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("rxq")
            .field("index", &self.index)
            .field("core", &self.core)
            .field("nb_desc", &self.nb_desc)
            .field("pool", &self.pool.name())
            .finish()
    }
}

/// A transmit queue.
#[derive(Debug)]
pub struct TxQueue {
    index: u16,
    core: CoreId,
    nb_desc: u16,
}

impl TxQueue {
    /// Returns the queue index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Returns the core serving the queue.
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Returns the ring size.
    pub fn nb_desc(&self) -> u16 {
        self.nb_desc
    }
}

/// The queues of one port placed on one socket.
#[derive(Debug)]
pub struct QueueSet {
    socket: SocketId,
    rx: Vec<RxQueue>,
    tx: Vec<TxQueue>,
}

impl QueueSet {
    /// Creates an empty set for `socket`.
    pub fn new(socket: SocketId) -> Self {
        QueueSet {
            socket,
            rx: vec![],
            tx: vec![],
        }
    }

    /// Returns the socket of the set.
    pub fn socket(&self) -> SocketId {
        self.socket
    }

    /// Returns the receive queues.
    pub fn rx(&self) -> &[RxQueue] {
        &self.rx
    }

    /// Returns the transmit queues.
    pub fn tx(&self) -> &[TxQueue] {
        &self.tx
    }

    /// Adds a receive queue.
    pub fn push_rx(&mut self, queue: RxQueue) {
        self.rx.push(queue);
    }

    /// Adds a transmit queue.
    pub fn push_tx(&mut self, queue: TxQueue) {
        self.tx.push(queue);
    }
}

/// Sets up the receive and transmit queues of a configured port.
///
/// A receive queue can only be set up with a pool in hand, so the pool of
/// its socket always exists first.
pub struct QueueProvisioner<'a> {
    dev: &'a dyn EthDev,
    port: PortId,
    info: &'a DevInfo,
}

impl<'a> QueueProvisioner<'a> {
    /// Creates a provisioner for `port`.
    pub fn new(dev: &'a dyn EthDev, port: PortId, info: &'a DevInfo) -> Self {
        QueueProvisioner { dev, port, info }
    }

    /// Sets up receive queue `queue`, served by `core`, with a ring of
    /// `nb_desc` buffers from `pool` on `socket`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidDescriptors` if `nb_desc` is outside the
    /// device limits, or `QueueError::Setup` if the device rejects the
    /// queue.
    pub fn provision_rx(
        &self,
        queue: u16,
        core: CoreId,
        nb_desc: u16,
        socket: SocketId,
        pool: &Arc<BufferPool>,
    ) -> Result<RxQueue, QueueError> {
        self.check(Direction::Rx, queue, nb_desc, self.info.rx_desc_lim)?;

        self.dev
            .rx_queue_setup(self.port, queue, nb_desc, socket, pool)
            .map_err(|source| QueueError::Setup {
                port: self.port,
                direction: Direction::Rx,
                queue,
                source,
            })?;

        debug!(port = ?self.port, queue, ?core, ?socket, nb_desc, pool = pool.name(), "rx queue ready.");

        Ok(RxQueue {
            index: queue,
            core,
            nb_desc,
            pool: Arc::clone(pool),
        })
    }

    /// Sets up transmit queue `queue`, served by `core`, with a ring of
    /// `nb_desc` descriptors on `socket`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidDescriptors` if `nb_desc` is outside the
    /// device limits, or `QueueError::Setup` if the device rejects the
    /// queue.
    pub fn provision_tx(
        &self,
        queue: u16,
        core: CoreId,
        nb_desc: u16,
        socket: SocketId,
    ) -> Result<TxQueue, QueueError> {
        self.check(Direction::Tx, queue, nb_desc, self.info.tx_desc_lim)?;

        self.dev
            .tx_queue_setup(self.port, queue, nb_desc, socket)
            .map_err(|source| QueueError::Setup {
                port: self.port,
                direction: Direction::Tx,
                queue,
                source,
            })?;

        debug!(port = ?self.port, queue, ?core, ?socket, nb_desc, "tx queue ready.");

        Ok(TxQueue {
            index: queue,
            core,
            nb_desc,
        })
    }

    fn check(
        &self,
        direction: Direction,
        queue: u16,
        nb_desc: u16,
        limits: DescLimits,
    ) -> Result<(), QueueError> {
        ensure!(
            limits.contains(nb_desc),
            QueueError::InvalidDescriptors {
                port: self.port,
                direction,
                queue,
                nb_desc,
                limits,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eal::dev::{PortConf, VdevKind, VirtualDev, VirtualPort};
    use crate::eal::memory::Memory;

    fn setup(port: VirtualPort) -> (VirtualDev, PortId, DevInfo, Arc<BufferPool>) {
        let memory = Arc::new(Memory::unlimited());
        let pool = BufferPool::new("pool", 1023, 64, 0, SocketId::new(0), &memory).unwrap();
        let dev = VirtualDev::new(memory);
        let id = dev.attach(port);
        dev.configure(id, 2, 2, &PortConf::default()).unwrap();
        let info = dev.info(id).unwrap();
        (dev, id, info, Arc::new(pool))
    }

    #[test]
    fn provision_queues() {
        let (dev, port, info, pool) = setup(VirtualPort::new(VdevKind::Ring, "net_ring0"));
        let provisioner = QueueProvisioner::new(&dev, port, &info);

        let rxq = provisioner
            .provision_rx(0, CoreId::new(1), 512, SocketId::new(0), &pool)
            .unwrap();
        let txq = provisioner
            .provision_tx(0, CoreId::new(1), 128, SocketId::new(0))
            .unwrap();

        assert_eq!(512, rxq.nb_desc());
        assert_eq!(CoreId::new(1), rxq.core());
        assert!(Arc::ptr_eq(&pool, rxq.pool()));
        assert_eq!(512, pool.in_use());
        assert_eq!(0, txq.index());
        assert_eq!(1, dev.rx_queues_setup());
        assert_eq!(1, dev.tx_queues_setup());
    }

    #[test]
    fn reject_out_of_range_descriptors() {
        let (dev, port, info, pool) = setup(VirtualPort::new(VdevKind::Tap, "net_tap0"));
        let provisioner = QueueProvisioner::new(&dev, port, &info);

        let res = provisioner.provision_rx(0, CoreId::new(0), 32, SocketId::new(0), &pool);
        assert!(matches!(
            res,
            Err(QueueError::InvalidDescriptors {
                direction: Direction::Rx,
                nb_desc: 32,
                ..
            })
        ));

        let res = provisioner.provision_tx(1, CoreId::new(0), 8192, SocketId::new(0));
        assert!(matches!(
            res,
            Err(QueueError::InvalidDescriptors {
                direction: Direction::Tx,
                ..
            })
        ));
        assert_eq!(0, dev.rx_queues_setup() + dev.tx_queues_setup());
    }

    #[test]
    fn device_rejection_names_queue() {
        let (dev, port, info, pool) = setup(VirtualPort::new(VdevKind::Null, "net_null0"));
        let provisioner = QueueProvisioner::new(&dev, port, &info);

        let res = provisioner.provision_rx(5, CoreId::new(0), 64, SocketId::new(0), &pool);

        match res {
            Err(QueueError::Setup { queue, source, .. }) => {
                assert_eq!(5, queue);
                assert!(matches!(source, DeviceError::InvalidArgument(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
