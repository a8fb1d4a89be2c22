// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pre-dial IP validation. Classifies resolved addresses into the ranges an
//! egress request must never reach: loopback, link-local, RFC1918, CGNAT,
//! and the cloud metadata endpoints. IPv4-mapped IPv6 addresses are unwrapped
//! first so `::ffff:169.254.169.254` cannot slip through the v6 branch.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::domain::error::SecurityError;

/// IPv4 cloud metadata service.
pub const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// IPv6 metadata endpoint (`fd00:ec2::254`).
pub const METADATA_V6: Ipv6Addr = Ipv6Addr::new(0xfd00, 0x0ec2, 0, 0, 0, 0, 0, 0x254);

#[derive(Debug, Clone, Copy)]
pub struct IpPolicy {
    pub block_private: bool,
    pub block_metadata: bool,
}

impl Default for IpPolicy {
    fn default() -> Self {
        Self {
            block_private: true,
            block_metadata: true,
        }
    }
}

impl IpPolicy {
    pub fn is_active(&self) -> bool {
        self.block_private || self.block_metadata
    }
}

/// Reject an address that falls into a blocked range.
///
/// Error messages are intentionally generic: they name the *class* of the
/// block, never the resolved address or hostname.
pub fn validate_ip(ip: IpAddr, policy: &IpPolicy) -> Result<(), SecurityError> {
    let ip = unmap(ip);

    if policy.block_metadata && is_metadata(ip) {
        return Err(SecurityError::SecurityBlocked(
            "destination is a cloud metadata endpoint".into(),
        ));
    }
    if policy.block_private && is_private_or_local(ip) {
        return Err(SecurityError::SecurityBlocked(
            "destination resolves into a private or local address range".into(),
        ));
    }
    Ok(())
}

/// Unwrap IPv4-mapped IPv6 (`::ffff:a.b.c.d`) to the embedded IPv4 address.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

pub fn is_metadata(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == METADATA_V4,
        IpAddr::V6(v6) => v6 == METADATA_V6,
    }
}

pub fn is_private_or_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_unspecified()
                // 100.64.0.0/10 carrier-grade NAT
                || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (segments[0] & 0xFE00) == 0xFC00
                // fe80::/10 link local
                || (segments[0] & 0xFFC0) == 0xFE80
        }
    }
}
