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

//! Flow identification.
//!
//! A packet belongs to the flow named by its 5-tuple `FlowKey`. Each socket
//! indexes its flows in a fixed-capacity `FlowTable` built on `hash_crc`.

mod key;
mod table;

pub use self::key::{hash_crc, FlowKey, FlowKeyError, HashFn, FLOW_KEY_LEN};
pub use self::table::{FlowSlot, FlowTable, FlowTableError, FlowTableParams, SlotRef};
