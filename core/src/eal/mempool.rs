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

use super::memory::{Memory, MemoryError, Memzone};
use super::SocketId;
use crate::{debug, ensure, info};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The largest per core cache a pool accepts.
pub const MEMPOOL_CACHE_MAX_SIZE: usize = 512;

/// The default buffer size: 2048 bytes of packet data plus 128 bytes of
/// headroom.
pub const DEFAULT_BUF_SIZE: usize = 2048 + 128;

/// Buffer pool errors.
#[derive(Debug, Error)]
pub enum MempoolError {
    /// The pool parameters are out of range.
    #[error("invalid pool parameters: {0}")]
    InvalidParams(String),

    /// The backing memory cannot be reserved or allocated.
    #[error("cannot allocate {len} bytes for '{name}' on {socket:?}.")]
    Allocation {
        /// The pool name.
        name: String,
        /// The socket the pool targeted.
        socket: SocketId,
        /// The requested length in bytes.
        len: usize,
        /// The underlying reservation failure, if any.
        #[source]
        source: Option<MemoryError>,
    },

    /// Not enough free buffers for the request.
    #[error("cannot allocate {0} buffers, pool exhausted.")]
    Exhausted(usize),

    /// The buffer is not handed out by this pool.
    #[error("{0:?} is not in use in this pool.")]
    NotInUse(BufferId),
}

/// Index of a buffer within its pool.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct BufferId(u32);

impl BufferId {
    /// Returns the index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A memory pool of fixed-size packet buffers. For best performance,
/// each socket should have a dedicated `BufferPool` shared by every core
/// and port queue on that socket.
pub struct BufferPool {
    name: String,
    capacity: usize,
    buf_size: usize,
    cache_size: usize,
    data: Box<[u8]>,
    free: Mutex<FreeList>,
    zone: Memzone,
}

/// Free buffers, and which buffers are handed out.
struct FreeList {
    ids: Vec<BufferId>,
    in_use: Vec<bool>,
}

impl FreeList {
    fn take(&mut self, id: BufferId) -> BufferId {
        self.in_use[id.index()] = true;
        id
    }

    /// Marks `id` as free. Returns `false` if it is not in use.
    fn release(&mut self, id: BufferId) -> bool {
        match self.in_use.get_mut(id.index()) {
            Some(flag) if *flag => {
                *flag = false;
                true
            }
            _ => false,
        }
    }
}

impl BufferPool {
    /// Creates a new `BufferPool`.
    ///
    /// `capacity` is the number of buffers in the pool and `buf_size` the
    /// size of each. The whole `capacity * buf_size` region is allocated
    /// up front.
    ///
    /// `cache_size` is the per core cache size. It is a tuning parameter
    /// and must not exceed `MEMPOOL_CACHE_MAX_SIZE` or two thirds of the
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns `MempoolError::InvalidParams` if the sizes are out of range,
    /// or `MempoolError::Allocation` if the memory cannot be reserved on
    /// `socket` or allocated.
    pub fn new<S: Into<String>>(
        name: S,
        capacity: usize,
        buf_size: usize,
        cache_size: usize,
        socket: SocketId,
        memory: &Arc<Memory>,
    ) -> Result<Self, MempoolError> {
        let name: String = name.into();

        ensure!(
            capacity > 0 && capacity <= u32::MAX as usize,
            MempoolError::InvalidParams(format!("capacity {} out of range.", capacity))
        );
        ensure!(
            buf_size > 0,
            MempoolError::InvalidParams("buffer size must not be 0.".to_owned())
        );
        ensure!(
            cache_size <= MEMPOOL_CACHE_MAX_SIZE && cache_size * 3 <= capacity * 2,
            MempoolError::InvalidParams(format!(
                "cache size {} too large for capacity {}.",
                cache_size, capacity
            ))
        );

        let len = capacity
            .checked_mul(buf_size)
            .ok_or_else(|| MempoolError::Allocation {
                name: name.clone(),
                socket,
                len: usize::MAX,
                source: None,
            })?;

        let zone = memory
            .reserve(&name, "mempool", len, socket)
            .map_err(|err| MempoolError::Allocation {
                name: name.clone(),
                socket,
                len,
                source: Some(err),
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| MempoolError::Allocation {
                name: name.clone(),
                socket: zone.socket(),
                len,
                source: None,
            })?;
        data.resize(len, 0);

        let free = FreeList {
            ids: (0..capacity as u32).rev().map(BufferId).collect(),
            in_use: vec![false; capacity],
        };

        info!(pool = ?name, socket = ?zone.socket(), capacity, buf_size, "pool created.");

        Ok(BufferPool {
            name,
            capacity,
            buf_size,
            cache_size,
            data: data.into_boxed_slice(),
            free: Mutex::new(free),
            zone,
        })
    }

    fn free_list(&self) -> MutexGuard<'_, FreeList> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the pool name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of buffers in the pool.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the size of each buffer.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buf_size
    }

    /// Returns the per core cache size.
    #[inline]
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Returns the socket the pool is allocated from.
    #[inline]
    pub fn socket(&self) -> SocketId {
        self.zone.socket()
    }

    /// Returns the number of free buffers.
    pub fn available(&self) -> usize {
        self.free_list().ids.len()
    }

    /// Returns the number of buffers handed out.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Takes one buffer from the pool.
    pub fn alloc(&self) -> Option<BufferId> {
        let mut free = self.free_list();
        free.ids.pop().map(|id| free.take(id))
    }

    /// Takes `n` buffers from the pool. Either all `n` are returned or
    /// none are.
    ///
    /// # Errors
    ///
    /// Returns `MempoolError::Exhausted` if fewer than `n` are free.
    pub fn alloc_bulk(&self, n: usize) -> Result<Vec<BufferId>, MempoolError> {
        let mut free = self.free_list();
        ensure!(free.ids.len() >= n, MempoolError::Exhausted(n));
        let at = free.ids.len() - n;
        let ids = free.ids.split_off(at);
        for &id in ids.iter() {
            free.take(id);
        }
        Ok(ids)
    }

    /// Returns one buffer to the pool.
    ///
    /// # Errors
    ///
    /// Returns `MempoolError::NotInUse` if the buffer is already free or
    /// does not belong to the pool.
    pub fn free(&self, id: BufferId) -> Result<(), MempoolError> {
        let mut free = self.free_list();
        ensure!(free.release(id), MempoolError::NotInUse(id));
        free.ids.push(id);
        Ok(())
    }

    /// Returns buffers to the pool. Either all are returned or none are.
    ///
    /// # Errors
    ///
    /// Returns `MempoolError::NotInUse` for the first buffer that is
    /// already free, listed twice, or not from the pool.
    pub fn free_bulk(&self, ids: Vec<BufferId>) -> Result<(), MempoolError> {
        let mut free = self.free_list();
        for (n, &id) in ids.iter().enumerate() {
            if !free.release(id) {
                for &prev in ids[..n].iter() {
                    free.take(prev);
                }
                return Err(MempoolError::NotInUse(id));
            }
        }
        free.ids.extend(ids);
        Ok(())
    }

    /// Returns the bytes of a buffer, `None` if it is not from the pool.
    pub fn buffer(&self, id: BufferId) -> Option<&[u8]> {
        let start = id.index().checked_mul(self.buf_size)?;
        self.data.get(start..start + self.buf_size)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.name())
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("cache_size", &self.cache_size())
            .field("socket", &self.socket())
            .finish()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        debug!(pool = ?self.name, "freeing pool.");
    }
}
