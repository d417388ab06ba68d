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

use crate::net::ProtocolNumber;
use crc32fast::Hasher;
use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use thiserror::Error;

/// The length of a flow key in bytes.
pub const FLOW_KEY_LEN: usize = 40;

/// A hash function over flow keys, seeded with an initial value.
pub type HashFn = fn(&FlowKey, u32) -> u32;

/// Flow key errors.
#[derive(Debug, Error)]
pub enum FlowKeyError {
    /// The source and destination are of different address families.
    #[error("source {0} and destination {1} are of different address families.")]
    IpAddrMismatch(IpAddr, IpAddr),
}

/// The 5-tuple identifying a flow.
///
/// The layout is fixed and has no implicit padding, so keys with equal
/// fields are byte-identical. IPv4 addresses are stored IPv4-mapped, and
/// the address family byte keeps them apart from IPv6 flows on the same
/// mapped addresses. Ports are in host byte order.
///
/// ```text
/// offset  0: protocol
/// offset  1: address family, 4 or 6
/// offset  2: 2 zero bytes
/// offset  4: source address
/// offset 20: destination address
/// offset 36: source port
/// offset 38: destination port
/// ```
#[repr(C)]
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct FlowKey {
    protocol: ProtocolNumber,
    family: u8,
    pad: [u8; 2],
    src: [u8; 16],
    dst: [u8; 16],
    src_port: u16,
    dst_port: u16,
}

const _: [(); FLOW_KEY_LEN] = [(); mem::size_of::<FlowKey>()];

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

impl FlowKey {
    /// Creates a key for an IPv4 flow.
    pub fn v4(protocol: ProtocolNumber, src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        FlowKey {
            protocol,
            family: FAMILY_V4,
            pad: [0; 2],
            src: src.ip().to_ipv6_mapped().octets(),
            dst: dst.ip().to_ipv6_mapped().octets(),
            src_port: src.port(),
            dst_port: dst.port(),
        }
    }

    /// Creates a key for an IPv6 flow.
    pub fn v6(protocol: ProtocolNumber, src: SocketAddrV6, dst: SocketAddrV6) -> Self {
        FlowKey {
            protocol,
            family: FAMILY_V6,
            pad: [0; 2],
            src: src.ip().octets(),
            dst: dst.ip().octets(),
            src_port: src.port(),
            dst_port: dst.port(),
        }
    }

    /// Creates a key from a pair of socket addresses.
    ///
    /// # Errors
    ///
    /// Returns `FlowKeyError::IpAddrMismatch` if one address is IPv4 and
    /// the other IPv6.
    pub fn new(
        protocol: ProtocolNumber,
        src: SocketAddr,
        dst: SocketAddr,
    ) -> Result<Self, FlowKeyError> {
        match (src, dst) {
            (SocketAddr::V4(src), SocketAddr::V4(dst)) => Ok(FlowKey::v4(protocol, src, dst)),
            (SocketAddr::V6(src), SocketAddr::V6(dst)) => Ok(FlowKey::v6(protocol, src, dst)),
            _ => Err(FlowKeyError::IpAddrMismatch(src.ip(), dst.ip())),
        }
    }

    /// Returns the transport protocol.
    #[inline]
    pub fn protocol(&self) -> ProtocolNumber {
        self.protocol
    }

    /// Returns whether the addresses are IPv4.
    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.family == FAMILY_V4
    }

    /// Returns the source address and port.
    pub fn src(&self) -> SocketAddr {
        SocketAddr::new(self.to_ip(&self.src), self.src_port)
    }

    /// Returns the destination address and port.
    pub fn dst(&self) -> SocketAddr {
        SocketAddr::new(self.to_ip(&self.dst), self.dst_port)
    }

    fn to_ip(&self, octets: &[u8; 16]) -> IpAddr {
        let [_, _, _, _, _, _, _, _, _, _, _, _, a, b, c, d] = *octets;
        if self.is_ipv4() {
            IpAddr::V4(Ipv4Addr::new(a, b, c, d))
        } else {
            IpAddr::V6(Ipv6Addr::from(*octets))
        }
    }

    /// Returns the key of the flow in the opposite direction.
    pub fn reverse(&self) -> Self {
        FlowKey {
            protocol: self.protocol,
            family: self.family,
            pad: [0; 2],
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Returns the key as raw bytes.
    pub fn as_bytes(&self) -> &[u8; FLOW_KEY_LEN] {
        // SAFETY: `FlowKey` is `repr(C)`, made only of byte arrays and
        // integers, and its size is asserted to be `FLOW_KEY_LEN` with no
        // padding in between.
        unsafe { &*(self as *const FlowKey as *const [u8; FLOW_KEY_LEN]) }
    }
}

impl fmt::Debug for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("flow")
            .field("protocol", &format_args!("{}", self.protocol))
            .field("src", &self.src())
            .field("dst", &self.dst())
            .finish()
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.protocol, self.src(), self.dst())
    }
}

#[inline]
fn crc32(init_val: u32, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(init_val);
    hasher.update(bytes);
    hasher.finalize()
}

/// Hashes a flow key with CRC-32 in four chained steps: the protocol word,
/// the source address, the destination address and the port pair. Each
/// step is seeded with the output of the previous one.
///
/// CRC-32 is affine over GF(2): two keys differing by the same bit pattern
/// always differ by the same hash bits, whatever their other fields. A
/// one-field change spreads like a random key only over random changes of
/// that field. A fixed change, e.g. TCP to UDP, moves every key by the same
/// bucket offset.
pub fn hash_crc(key: &FlowKey, init_val: u32) -> u32 {
    let mut ports = [0u8; 4];
    ports[..2].copy_from_slice(&key.src_port.to_be_bytes());
    ports[2..].copy_from_slice(&key.dst_port.to_be_bytes());

    let hash = crc32(init_val, &[key.protocol.0, key.family, 0, 0]);
    let hash = crc32(hash, &key.src);
    let hash = crc32(hash, &key.dst);
    crc32(hash, &ports)
}
