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

//! Socket-local memory accounting.
//!
//! Every long-lived allocation the bring-up makes (buffer pools, descriptor
//! rings, flow tables) reserves a named memory zone on a socket. A socket
//! may carry a budget, like the EAL `--socket-mem` option, so allocations
//! fail early and with a precise error instead of deep in the allocator.
//! The registry also backs the one-shot diagnostic dump.

use super::SocketId;
use crate::{debug, ensure};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Memory reservation errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A zone with the same name is already reserved.
    #[error("memory zone '{0}' already exists.")]
    ZoneExists(String),

    /// The socket does not have enough memory left.
    #[error("not enough memory on {socket:?}: requested {requested} bytes, {available} available.")]
    Exhausted {
        /// The socket the reservation targeted.
        socket: SocketId,
        /// The requested length in bytes.
        requested: usize,
        /// The bytes still available on the socket.
        available: usize,
    },
}

struct Segment {
    limit: Option<usize>,
    used: usize,
}

impl Segment {
    fn available(&self) -> usize {
        self.limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.used))
    }
}

struct ZoneInfo {
    class: &'static str,
    socket: SocketId,
    len: usize,
}

struct Registry {
    limited: bool,
    segments: BTreeMap<SocketId, Segment>,
    zones: BTreeMap<String, ZoneInfo>,
}

impl Registry {
    /// Picks the socket for a reservation. `SocketId::ANY` resolves to the
    /// first socket with enough room.
    fn resolve(&self, socket: SocketId, len: usize) -> SocketId {
        if socket != SocketId::ANY {
            return socket;
        }

        self.segments
            .iter()
            .find(|(_, seg)| seg.available() >= len)
            .map(|(&id, _)| id)
            .unwrap_or_else(|| SocketId::new(0))
    }
}

/// Socket-local memory with a registry of reserved zones.
pub struct Memory {
    registry: Mutex<Registry>,
}

impl Memory {
    /// Creates memory without a budget on any socket.
    pub fn unlimited() -> Self {
        Memory {
            registry: Mutex::new(Registry {
                limited: false,
                segments: BTreeMap::new(),
                zones: BTreeMap::new(),
            }),
        }
    }

    /// Creates memory with a byte budget per socket. Sockets not listed
    /// have no memory at all.
    pub fn with_limits<I: IntoIterator<Item = (SocketId, usize)>>(limits: I) -> Self {
        let segments = limits
            .into_iter()
            .map(|(socket, limit)| {
                (
                    socket,
                    Segment {
                        limit: Some(limit),
                        used: 0,
                    },
                )
            })
            .collect();

        Memory {
            registry: Mutex::new(Registry {
                limited: true,
                segments,
                zones: BTreeMap::new(),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the byte budget of the socket, or `None` if unlimited.
    pub fn limit(&self, socket: SocketId) -> Option<usize> {
        let registry = self.registry();
        match registry.segments.get(&socket) {
            Some(seg) => seg.limit,
            None if registry.limited => Some(0),
            None => None,
        }
    }

    /// Returns the bytes reserved on the socket.
    pub fn used(&self, socket: SocketId) -> usize {
        self.registry()
            .segments
            .get(&socket)
            .map_or(0, |seg| seg.used)
    }

    /// Reserves a named zone of `len` bytes on a socket.
    ///
    /// `class` groups zones of the same kind of object, for example all
    /// buffer pools. The zone is released when the returned `Memzone` is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::ZoneExists` if the name is taken, or
    /// `MemoryError::Exhausted` if the socket's budget cannot cover `len`.
    pub fn reserve(
        self: &Arc<Self>,
        name: &str,
        class: &'static str,
        len: usize,
        socket: SocketId,
    ) -> Result<Memzone, MemoryError> {
        let mut registry = self.registry();
        ensure!(
            !registry.zones.contains_key(name),
            MemoryError::ZoneExists(name.to_owned())
        );

        let socket = registry.resolve(socket, len);
        let limited = registry.limited;
        let available = match registry.segments.get(&socket) {
            Some(seg) => seg.available(),
            None if limited => 0,
            None => usize::MAX,
        };
        ensure!(
            available >= len,
            MemoryError::Exhausted {
                socket,
                requested: len,
                available,
            }
        );

        registry
            .segments
            .entry(socket)
            .or_insert(Segment {
                limit: None,
                used: 0,
            })
            .used += len;
        registry.zones.insert(
            name.to_owned(),
            ZoneInfo {
                class,
                socket,
                len,
            },
        );
        debug!(zone = ?name, ?socket, len, "memory zone reserved.");

        Ok(Memzone {
            memory: Arc::clone(self),
            name: name.to_owned(),
            socket,
            len,
        })
    }

    fn release(&self, name: &str) {
        let mut registry = self.registry();
        if let Some(zone) = registry.zones.remove(name) {
            if let Some(seg) = registry.segments.get_mut(&zone.socket) {
                seg.used -= zone.len;
            }
            debug!(zone = ?name, socket = ?zone.socket, "memory zone released.");
        }
    }

    /// Returns the names of the reserved zones of a class.
    pub fn zones(&self, class: &str) -> Vec<String> {
        self.registry()
            .zones
            .iter()
            .filter(|(_, zone)| zone.class == class)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the total number of reserved zones.
    pub fn zone_count(&self) -> usize {
        self.registry().zones.len()
    }

    /// Writes a human-readable dump of the memory segments, the memory
    /// zones and the per-class object lists.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let registry = self.registry();

        writeln!(w, "----------- MEMORY_SEGMENTS -----------")?;
        for (idx, (socket, seg)) in registry.segments.iter().enumerate() {
            match seg.limit {
                Some(limit) => writeln!(
                    w,
                    "Segment {}: socket_id:{}, len:{}, used:{}",
                    idx, socket, limit, seg.used
                )?,
                None => writeln!(
                    w,
                    "Segment {}: socket_id:{}, len:unlimited, used:{}",
                    idx, socket, seg.used
                )?,
            }
        }
        writeln!(w, "--------- END_MEMORY_SEGMENTS ---------")?;

        writeln!(w, "------------ MEMORY_ZONES -------------")?;
        for (idx, (name, zone)) in registry.zones.iter().enumerate() {
            writeln!(
                w,
                "Zone {}: name:<{}>, len:0x{:x}, socket_id:{}",
                idx, name, zone.len, zone.socket
            )?;
        }
        writeln!(w, "---------- END_MEMORY_ZONES -----------")?;

        writeln!(w, "---------- TAIL_QUEUES ----------------")?;
        let mut tailqs = BTreeMap::<&str, Vec<&str>>::new();
        for (name, zone) in registry.zones.iter() {
            tailqs.entry(zone.class).or_default().push(name);
        }
        for (idx, (class, objects)) in tailqs.iter().enumerate() {
            writeln!(w, "Tailq {}: qname:<{}>, objects:{}", idx, class, objects.len())?;
            for object in objects {
                writeln!(w, "  {}", object)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        f.debug_struct("Memory")
            .field("limited", &registry.limited)
            .field("segments", &registry.segments.len())
            .field("zones", &registry.zones.len())
            .finish()
    }
}

/// A reserved memory zone. Releases its bytes back to the socket on drop.
pub struct Memzone {
    memory: Arc<Memory>,
    name: String,
    socket: SocketId,
    len: usize,
}

impl Memzone {
    /// Returns the zone name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the socket the zone is reserved on.
    pub fn socket(&self) -> SocketId {
        self.socket
    }

    /// Returns the zone length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl fmt::Debug for Memzone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memzone")
            .field("name", &self.name)
            .field("socket", &self.socket)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for Memzone {
    fn drop(&mut self) {
        self.memory.release(&self.name);
    }
}
