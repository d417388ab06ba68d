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

//! Utilities for testing the probe: random value generation and an
//! environment of virtual devices.

pub mod proptest;
mod rvg;

pub use self::rvg::*;

use crate::eal::dev::{EthDev, VirtualDev, VirtualPort};
use crate::eal::memory::Memory;
use crate::eal::topology::StaticTopology;
use crate::eal::Eal;
use std::sync::Arc;

/// Builds an environment with the given memory, topology and ports.
///
/// Returns the driver too, so the test can inspect the port state after
/// the bring-up.
pub fn virtual_eal(
    memory: Memory,
    sockets: &[Vec<usize>],
    ports: Vec<VirtualPort>,
) -> (Eal, Arc<VirtualDev>) {
    let memory = Arc::new(memory);
    let devices = Arc::new(VirtualDev::new(Arc::clone(&memory)));
    for port in ports {
        devices.attach(port);
    }

    let driver: Arc<dyn EthDev> = devices.clone();
    let eal = Eal::new(
        driver,
        memory,
        Arc::new(StaticTopology::from_sockets(sockets)),
    );
    (eal, devices)
}
