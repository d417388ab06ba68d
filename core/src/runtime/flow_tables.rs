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

use crate::config::{FlowTableConfig, Placement};
use crate::eal::memory::Memory;
use crate::eal::SocketId;
use crate::flow::{hash_crc, FlowTable, FlowTableError, FlowTableParams};
use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;
use std::sync::Arc;

impl From<&FlowTableConfig> for FlowTableParams {
    fn from(config: &FlowTableConfig) -> Self {
        FlowTableParams {
            entries: config.entries,
            bucket_entries: config.bucket_entries,
            hash_fn: hash_crc,
            hash_init_val: config.hash_seed,
        }
    }
}

/// The flow tables of the process, at most one per socket.
pub struct FlowTableMap {
    prefix: String,
    memory: Arc<Memory>,
    placement: Placement,
    tables: BTreeMap<SocketId, FlowTable>,
}

impl FlowTableMap {
    /// Creates an empty map. Tables are named `<prefix>_flow_table_<socket>`.
    pub fn new<S: Into<String>>(prefix: S, memory: Arc<Memory>, placement: Placement) -> Self {
        FlowTableMap {
            prefix: prefix.into(),
            memory,
            placement,
            tables: BTreeMap::new(),
        }
    }

    /// Returns the placement policy.
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Returns the table of `socket`, creating it if it does not exist yet.
    ///
    /// With shared placement the map holds at most one table. Once it
    /// exists it is returned for every socket.
    ///
    /// # Errors
    ///
    /// Returns `FlowTableError` if the table cannot be created. The map is
    /// left unchanged.
    pub fn get_or_create(
        &mut self,
        socket: SocketId,
        params: FlowTableParams,
    ) -> Result<&mut FlowTable, FlowTableError> {
        let socket = match self.placement {
            Placement::Shared => self.tables.keys().next().copied().unwrap_or(socket),
            Placement::PerSocket => socket,
        };

        match self.tables.entry(socket) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let name = format!("{}_flow_table_{}", self.prefix, socket.raw());
                let table = FlowTable::new(name, socket, params, &self.memory)?;
                Ok(entry.insert(table))
            }
        }
    }

    /// Returns the table of `socket` if it was created.
    pub fn get(&self, socket: SocketId) -> Option<&FlowTable> {
        self.tables.get(&socket)
    }

    /// Returns the table workers on `socket` use. With shared placement
    /// that is the single table, whatever the socket.
    pub fn table_for(&mut self, socket: SocketId) -> Option<&mut FlowTable> {
        match self.placement {
            Placement::PerSocket => self.tables.get_mut(&socket),
            Placement::Shared => self.tables.values_mut().next(),
        }
    }

    /// Returns the sockets that have a table, in order.
    pub fn sockets(&self) -> Vec<SocketId> {
        self.tables.keys().copied().collect()
    }

    /// Returns the number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns whether no table was created.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns an iterator over the tables in socket order.
    pub fn iter(&self) -> impl Iterator<Item = &FlowTable> {
        self.tables.values()
    }
}

impl fmt::Debug for FlowTableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTableMap")
            .field("prefix", &self.prefix)
            .field("placement", &self.placement)
            .field("sockets", &self.sockets())
            .finish()
    }
}
