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

use super::{CoreId, SocketId};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Maps logical cores to the socket they belong to.
pub trait Topology: Send + Sync {
    /// Returns the socket of a core, or `None` if the core is unknown.
    fn socket_of(&self, core: CoreId) -> Option<SocketId>;

    /// Returns all the sockets with at least one core, in ascending order.
    fn sockets(&self) -> Vec<SocketId>;
}

/// An explicit core to socket map.
#[derive(Clone, Debug, Default)]
pub struct StaticTopology {
    cores: BTreeMap<CoreId, SocketId>,
}

impl StaticTopology {
    /// Creates a topology from per-socket core lists. The n-th list holds
    /// the cores of socket n.
    pub fn from_sockets(sockets: &[Vec<usize>]) -> Self {
        let cores = sockets
            .iter()
            .enumerate()
            .flat_map(|(socket, cores)| {
                cores
                    .iter()
                    .map(move |&core| (CoreId::new(core), SocketId::new(socket as i32)))
            })
            .collect();
        StaticTopology { cores }
    }

    /// Creates a topology with all the given cores on socket 0.
    pub fn single_socket(cores: &[usize]) -> Self {
        Self::from_sockets(&[cores.to_vec()])
    }
}

impl Topology for StaticTopology {
    fn socket_of(&self, core: CoreId) -> Option<SocketId> {
        self.cores.get(&core).copied()
    }

    fn sockets(&self) -> Vec<SocketId> {
        let mut sockets = self.cores.values().copied().collect::<Vec<_>>();
        sockets.sort();
        sockets.dedup();
        sockets
    }
}

/// The topology of the running system, read from
/// `/sys/devices/system/node`.
#[derive(Clone, Debug)]
pub struct SysfsTopology(StaticTopology);

impl SysfsTopology {
    const NODE_DIR: &'static str = "/sys/devices/system/node";

    /// Reads the system topology.
    ///
    /// On a system without NUMA information every online core is placed
    /// on socket 0.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a node's cpu list cannot be read.
    pub fn load() -> io::Result<Self> {
        Self::load_from(Path::new(Self::NODE_DIR))
    }

    fn load_from(dir: &Path) -> io::Result<Self> {
        if !dir.is_dir() {
            let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
            let cores = (0..count.max(1) as usize).collect::<Vec<_>>();
            return Ok(SysfsTopology(StaticTopology::single_socket(&cores)));
        }

        let mut cores = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let node = match file_name
                .to_str()
                .and_then(|name| name.strip_prefix("node"))
                .and_then(|id| id.parse::<i32>().ok())
            {
                Some(node) => node,
                None => continue,
            };

            let list = fs::read_to_string(entry.path().join("cpulist"))?;
            for core in parse_cpulist(&list)? {
                cores.insert(CoreId::new(core), SocketId::new(node));
            }
        }

        Ok(SysfsTopology(StaticTopology { cores }))
    }
}

impl Topology for SysfsTopology {
    fn socket_of(&self, core: CoreId) -> Option<SocketId> {
        self.0.socket_of(core)
    }

    fn sockets(&self) -> Vec<SocketId> {
        self.0.sockets()
    }
}

/// Parses a kernel cpu list such as `0-3,8,10-11`.
fn parse_cpulist(list: &str) -> io::Result<Vec<usize>> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, format!("bad cpulist '{}'", list));
    let mut cores = vec![];

    for range in list.trim().split(',').filter(|s| !s.is_empty()) {
        let mut bounds = range.splitn(2, '-');
        let lo = bounds
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(invalid)?;
        let hi = match bounds.next() {
            Some(s) => s.parse::<usize>().map_err(|_| invalid())?,
            None => lo,
        };
        if hi < lo {
            return Err(invalid());
        }
        cores.extend(lo..=hi);
    }

    Ok(cores)
}
