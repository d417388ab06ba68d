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

use std::fmt;

/// [IANA] assigned Internet protocol number.
///
/// [IANA]: https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct ProtocolNumber(pub u8);

impl ProtocolNumber {
    /// Creates a new protocol number.
    pub const fn new(value: u8) -> Self {
        ProtocolNumber(value)
    }
}

/// Protocol numbers commonly seen by the probe.
#[allow(non_snake_case)]
#[allow(non_upper_case_globals)]
pub mod ProtocolNumbers {
    use super::ProtocolNumber;

    /// Internet Control Message Protocol for IPv4.
    pub const Icmpv4: ProtocolNumber = ProtocolNumber(0x01);

    /// Transmission Control Protocol.
    pub const Tcp: ProtocolNumber = ProtocolNumber(0x06);

    /// User Datagram Protocol.
    pub const Udp: ProtocolNumber = ProtocolNumber(0x11);

    /// Generic Routing Encapsulation.
    pub const Gre: ProtocolNumber = ProtocolNumber(0x2F);

    /// Internet Control Message Protocol for IPv6.
    pub const Icmpv6: ProtocolNumber = ProtocolNumber(0x3A);

    /// Stream Control Transmission Protocol.
    pub const Sctp: ProtocolNumber = ProtocolNumber(0x84);
}

impl fmt::Display for ProtocolNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolNumbers::Icmpv4 => f.write_str("ICMPv4"),
            ProtocolNumbers::Tcp => f.write_str("TCP"),
            ProtocolNumbers::Udp => f.write_str("UDP"),
            ProtocolNumbers::Gre => f.write_str("GRE"),
            ProtocolNumbers::Icmpv6 => f.write_str("ICMPv6"),
            ProtocolNumbers::Sctp => f.write_str("SCTP"),
            _ => write!(f, "0x{:02x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_number_to_string() {
        assert_eq!("TCP", ProtocolNumbers::Tcp.to_string());
        assert_eq!("UDP", ProtocolNumbers::Udp.to_string());
        assert_eq!("0xfd", ProtocolNumber::new(0xfd).to_string());
    }
}
