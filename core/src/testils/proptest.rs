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

//! `proptest` strategies for flow keys.

use crate::flow::FlowKey;
use crate::net::{ProtocolNumber, ProtocolNumbers};
use proptest::arbitrary::any;
use proptest::prop_oneof;
use proptest::strategy::{Just, Strategy};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

/// Returns a strategy for the transport protocols a probe commonly sees,
/// with an occasional arbitrary protocol number.
pub fn protocol() -> impl Strategy<Value = ProtocolNumber> {
    prop_oneof![
        4 => Just(ProtocolNumbers::Tcp),
        4 => Just(ProtocolNumbers::Udp),
        1 => Just(ProtocolNumbers::Icmpv4),
        1 => Just(ProtocolNumbers::Sctp),
        1 => any::<u8>().prop_map(ProtocolNumber::new),
    ]
}

/// Returns a strategy for IPv4 flow keys.
pub fn v4_flow_key() -> impl Strategy<Value = FlowKey> {
    (
        protocol(),
        any::<u32>(),
        any::<u16>(),
        any::<u32>(),
        any::<u16>(),
    )
        .prop_map(|(protocol, src, src_port, dst, dst_port)| {
            FlowKey::v4(
                protocol,
                SocketAddrV4::new(Ipv4Addr::from(src), src_port),
                SocketAddrV4::new(Ipv4Addr::from(dst), dst_port),
            )
        })
}

/// Returns a strategy for IPv6 flow keys.
pub fn v6_flow_key() -> impl Strategy<Value = FlowKey> {
    (
        protocol(),
        any::<u128>(),
        any::<u16>(),
        any::<u128>(),
        any::<u16>(),
    )
        .prop_map(|(protocol, src, src_port, dst, dst_port)| {
            FlowKey::v6(
                protocol,
                SocketAddrV6::new(Ipv6Addr::from(src), src_port, 0, 0),
                SocketAddrV6::new(Ipv6Addr::from(dst), dst_port, 0, 0),
            )
        })
}

/// Returns a strategy for IPv4 and IPv6 flow keys.
pub fn flow_key() -> impl Strategy<Value = FlowKey> {
    prop_oneof![v4_flow_key(), v6_flow_key()]
}
