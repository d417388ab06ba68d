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
use std::str::FromStr;
use thiserror::Error;

/// Ethernet MAC address of a port.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// A MAC address representing an unspecified address: 00:00:00:00:00:00.
    pub const UNSPECIFIED: Self = MacAddr([0, 0, 0, 0, 0, 0]);

    /// Creates a MAC address from 6 octets.
    #[allow(clippy::many_single_char_names)]
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        MacAddr([a, b, c, d, e, f])
    }

    /// Returns a locally administered unicast address derived from a
    /// port index. Virtual devices without an assigned address use it.
    pub fn local(index: u16) -> Self {
        let [hi, lo] = index.to_be_bytes();
        MacAddr([0x02, 0x70, 0x72, 0x6f, hi, lo])
    }

    /// Returns the six bytes the MAC address consists of.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns whether the address is 00:00:00:00:00:00.
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Returns whether the group bit is set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> MacAddr {
        MacAddr(octets)
    }
}

/// Error returned when parsing a malformed MAC address.
#[derive(Debug, Error)]
#[error("failed to parse '{0}' as MAC address.")]
pub struct MacParseError(String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split(|c| c == ':' || c == '-').collect::<Vec<_>>();
        if parts.len() != 6 {
            return Err(MacParseError(s.to_owned()));
        }

        let mut octets = [0; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_owned()))?;
        }

        Ok(octets.into())
    }
}
