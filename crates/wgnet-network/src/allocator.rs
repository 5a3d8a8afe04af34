//! Sequential IPv4 address allocation within a subnet.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use wgnet_common::{WgNetError, WgNetResult};

/// Hands out unused host addresses of a subnet in ascending order.
///
/// The cursor only moves forward. Addresses below it are never revisited,
/// and there is no release operation: every address handed out stays used
/// for the lifetime of the allocator.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    subnet: Ipv4Net,
    used: HashSet<u32>,
    // Cursor and bound are u64 so a subnet ending at 255.255.255.255 gets
    // the exclusive bound 2^32 without overflowing.
    next: u64,
    upper_bound: u64,
}

impl AddressAllocator {
    /// Create an allocator over `subnet`.
    ///
    /// The first candidate is the subnet base plus one and the exclusive
    /// upper bound is the subnet's last address plus one, so a /32 has no
    /// candidates and a /31 has one.
    #[must_use]
    pub fn new(subnet: Ipv4Net) -> Self {
        let subnet = subnet.trunc();
        let next = u64::from(u32::from(subnet.network())) + 1;
        let upper_bound = u64::from(u32::from(subnet.broadcast())) + 1;

        Self {
            subnet,
            used: HashSet::new(),
            next,
            upper_bound,
        }
    }

    /// The subnet this allocator hands addresses out of.
    #[must_use]
    pub const fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// Whether `addr` has been handed out or marked used.
    #[must_use]
    pub fn is_used(&self, addr: Ipv4Addr) -> bool {
        self.used.contains(&u32::from(addr))
    }

    /// Mark `addr` as used without moving the cursor.
    pub fn mark_used(&mut self, addr: Ipv4Addr) {
        self.used.insert(u32::from(addr));
    }

    /// Hand out the next unused address, with the subnet's prefix length.
    ///
    /// # Errors
    ///
    /// Returns [`WgNetError::AddressesExhausted`] once the cursor reaches
    /// the end of the subnet.
    pub fn find_address(&mut self) -> WgNetResult<Ipv4Net> {
        while self.next < self.upper_bound {
            let Ok(candidate) = u32::try_from(self.next) else {
                break;
            };
            self.next += 1;

            if self.used.insert(candidate) {
                let addr = Ipv4Addr::from(candidate);
                tracing::trace!(%addr, subnet = %self.subnet, "Allocated address");
                return Ipv4Net::new(addr, self.subnet.prefix_len()).map_err(|e| {
                    WgNetError::InvalidRequest {
                        message: e.to_string(),
                    }
                });
            }
        }

        Err(WgNetError::AddressesExhausted {
            subnet: self.subnet.to_string(),
        })
    }
}
