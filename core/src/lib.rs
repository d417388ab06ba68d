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

//! Bring-up and flow identification core of a netflow probe.
//!
//! The crate provisions, per NUMA socket, the packet buffer pools, the
//! port receive and transmit queues, and the flow tables the reception
//! path needs before the first packet is read. `Runtime::build` runs the
//! whole sequence and fails fast on the first error.

pub mod config;
pub mod eal;
pub mod flow;
mod macros;
pub mod net;
pub mod runtime;
#[cfg(any(test, feature = "testils"))]
pub mod testils;

pub use self::config::{load_config, ProbeConfig};
pub use self::eal::{CoreId, Eal, SocketId};
pub use self::flow::{FlowKey, FlowSlot, FlowTable, SlotRef};
pub use self::runtime::{BringUpError, Runtime};
