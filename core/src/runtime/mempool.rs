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

use crate::config::MempoolConfig;
use crate::eal::memory::Memory;
use crate::eal::mempool::{BufferPool, MempoolError};
use crate::eal::SocketId;
use crate::debug;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Buffer pool creation parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MempoolParams {
    /// The number of buffers.
    pub capacity: usize,
    /// The size of each buffer in bytes.
    pub buf_size: usize,
    /// The per core cache size.
    pub cache_size: usize,
}

impl From<&MempoolConfig> for MempoolParams {
    fn from(config: &MempoolConfig) -> Self {
        MempoolParams {
            capacity: config.capacity,
            buf_size: config.buffer_size,
            cache_size: config.cache_size,
        }
    }
}

type PoolCell = Arc<OnceCell<Arc<BufferPool>>>;

/// The buffer pools of the process, at most one per socket.
///
/// Pools are created on first use. The first caller for a socket creates
/// the pool, concurrent and later callers get the same pool. A failed
/// creation leaves the socket without a pool.
pub struct MempoolMap {
    prefix: String,
    memory: Arc<Memory>,
    pools: Mutex<HashMap<SocketId, PoolCell>>,
}

impl MempoolMap {
    /// Creates an empty map. Pools are named `<prefix>_pool_<socket>`.
    pub fn new<S: Into<String>>(prefix: S, memory: Arc<Memory>) -> Self {
        MempoolMap {
            prefix: prefix.into(),
            memory,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<SocketId, PoolCell>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the pool of `socket`, creating it if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `MempoolError` if the pool cannot be created. The map is
    /// left unchanged.
    pub fn get_or_create(
        &self,
        socket: SocketId,
        params: &MempoolParams,
    ) -> Result<Arc<BufferPool>, MempoolError> {
        // the pool is created outside the map lock.
        let cell = Arc::clone(
            self.pools()
                .entry(socket)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        cell.get_or_try_init(|| {
            let name = format!("{}_pool_{}", self.prefix, socket.raw());
            BufferPool::new(
                name,
                params.capacity,
                params.buf_size,
                params.cache_size,
                socket,
                &self.memory,
            )
            .map(Arc::new)
        })
        .map(Arc::clone)
    }

    /// Returns the pool of `socket` if it was created.
    pub fn get(&self, socket: SocketId) -> Option<Arc<BufferPool>> {
        self.pools()
            .get(&socket)
            .and_then(|cell| cell.get())
            .map(Arc::clone)
    }

    /// Returns the sockets that have a pool, in order.
    pub fn sockets(&self) -> Vec<SocketId> {
        let mut sockets = self
            .pools()
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(&socket, _)| socket)
            .collect::<Vec<_>>();
        sockets.sort();
        sockets
    }

    /// Returns the number of pools created.
    pub fn len(&self) -> usize {
        self.pools()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// Returns whether no pool was created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MempoolMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MempoolMap")
            .field("prefix", &self.prefix)
            .field("sockets", &self.sockets())
            .finish()
    }
}

impl Drop for MempoolMap {
    fn drop(&mut self) {
        debug!(prefix = ?self.prefix, "releasing mempools.");
    }
}
