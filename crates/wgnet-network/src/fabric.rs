//! Links between the root namespace and a network namespace.
//!
//! Every network namespace gets:
//! - an uplink veth pair: `wgnet<N>` in the root namespace, `veth0` inside,
//!   addressed from a /31 of 172.31.0.0/16, with a default route out;
//! - a bridge `br0` that container links are attached to.
//!
//! Container links are veth pairs whose root side is handed to the
//! container runtime, which moves it into the container.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use wgnet_common::{WgNetError, WgNetResult};

use crate::netlink::{Link, NetlinkHandle};
use crate::netns::NetNs;

/// Prefix for root-namespace link names.
pub const LINK_PREFIX: &str = "wgnet";

/// Name of the uplink inside the network namespace.
pub const UPLINK_NAME: &str = "veth0";

/// Prefix for container links inside the network namespace.
pub const INNER_PREFIX: &str = "veth";

/// Name of the bridge inside the network namespace.
pub const BRIDGE_NAME: &str = "br0";

/// Range uplink address pairs are drawn from.
pub const UPLINK_RANGE: Ipv4Net = match Ipv4Net::new(Ipv4Addr::new(172, 31, 0, 0), 16) {
    Ok(net) => net,
    Err(_) => panic!("invalid uplink range"),
};

/// Prefix length of an uplink address pair.
const UPLINK_PREFIX_LEN: u8 = 31;

/// Both ends of a network namespace's connection to the root namespace.
pub struct LinkFabric<'a> {
    /// The root namespace.
    pub root_ns: &'a NetNs,
    /// Netlink handle bound to the network namespace.
    pub network: &'a NetlinkHandle,
    /// Netlink handle bound to the root namespace.
    pub root: &'a NetlinkHandle,
}

impl LinkFabric<'_> {
    /// Create the uplink veth pair and default route.
    ///
    /// Returns the namespace-side address of the pair.
    pub async fn create_outbound_link(&self) -> WgNetResult<Ipv4Addr> {
        let public_name = find_unused_link_name(LINK_PREFIX, self.root).await?;
        let (outer, inner) = find_unused_address_pair(self.root).await?;

        self.network
            .add_veth_into(&public_name, UPLINK_NAME, self.root_ns)
            .await?;

        let outer_link = self.root.link_by_name(&public_name).await?;
        self.root
            .add_address(&outer_link, host_net(outer, UPLINK_PREFIX_LEN)?)
            .await?;
        self.root.set_up(&outer_link).await?;

        let inner_link = self.network.link_by_name(UPLINK_NAME).await?;
        self.network
            .add_address(&inner_link, host_net(inner, UPLINK_PREFIX_LEN)?)
            .await?;
        self.network.set_up(&inner_link).await?;

        self.network
            .add_default_route(&inner_link, inner, outer)
            .await?;

        tracing::info!(link = %public_name, %outer, %inner, "Created uplink");
        Ok(inner)
    }

    /// Create a container link attached to `bridge`.
    ///
    /// Returns the name of the root-namespace end.
    pub async fn create_container_link(&self, bridge: &Link) -> WgNetResult<String> {
        let public_name = find_unused_link_name(LINK_PREFIX, self.root).await?;
        let inner_name = find_unused_link_name(INNER_PREFIX, self.network).await?;

        self.network
            .add_veth_into(&public_name, &inner_name, self.root_ns)
            .await?;

        let inner_link = self.network.link_by_name(&inner_name).await?;
        if let Err(e) = self.wire_container_link(&public_name, &inner_link, bridge).await {
            // Deleting either end removes the pair.
            if let Err(cleanup) = self.network.delete_link(&inner_link).await {
                tracing::warn!(
                    error = %cleanup,
                    link = %inner_name,
                    "Failed to remove container link"
                );
            }
            return Err(e);
        }

        tracing::info!(link = %public_name, inner = %inner_name, "Created container link");
        Ok(public_name)
    }

    async fn wire_container_link(
        &self,
        public_name: &str,
        inner_link: &Link,
        bridge: &Link,
    ) -> WgNetResult<()> {
        let outer_link = self.root.link_by_name(public_name).await?;
        self.root.set_up(&outer_link).await?;
        self.network.set_controller(inner_link, bridge).await?;
        self.network.set_up(inner_link).await
    }

    /// Create the bridge with `address` assigned.
    pub async fn create_bridge(&self, address: Ipv4Net) -> WgNetResult<Link> {
        let bridge = self.network.add_bridge(BRIDGE_NAME).await?;
        self.network.add_address(&bridge, address).await?;
        self.network.set_up(&bridge).await?;

        tracing::info!(bridge = %bridge.name, %address, "Created bridge");
        Ok(bridge)
    }
}

/// Smallest `prefix<N>` not used as a link name in the handle's namespace.
pub async fn find_unused_link_name(prefix: &str, handle: &NetlinkHandle) -> WgNetResult<String> {
    let names = handle.link_names().await?;
    Ok(next_unused_name(prefix, &names))
}

/// First free /31 pair of the uplink range in the handle's namespace.
pub async fn find_unused_address_pair(
    handle: &NetlinkHandle,
) -> WgNetResult<(Ipv4Addr, Ipv4Addr)> {
    let used = handle.ipv4_addresses().await?;
    first_free_pair(UPLINK_RANGE, &used).ok_or_else(|| WgNetError::AddressSpaceExhausted {
        range: UPLINK_RANGE.to_string(),
    })
}

fn next_unused_name(prefix: &str, names: &[String]) -> String {
    let taken: HashSet<&str> = names.iter().map(String::as_str).collect();
    (0u32..)
        .map(|i| format!("{prefix}{i}"))
        .find(|name| !taken.contains(name.as_str()))
        .unwrap_or_else(|| format!("{prefix}{}", u32::MAX))
}

fn first_free_pair(range: Ipv4Net, used: &[Ipv4Net]) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let in_use = |addr: &Ipv4Addr| used.iter().any(|net| net.contains(addr));
    let base = u32::from(range.network());
    let size = 1u64 << (32 - range.prefix_len());

    (0..size).step_by(2).find_map(|offset| {
        let low = Ipv4Addr::from(base + u32::try_from(offset).ok()?);
        let high = Ipv4Addr::from(u32::from(low) + 1);
        (!in_use(&low) && !in_use(&high)).then_some((low, high))
    })
}

fn host_net(addr: Ipv4Addr, prefix_len: u8) -> WgNetResult<Ipv4Net> {
    Ipv4Net::new(addr, prefix_len).map_err(|e| WgNetError::InvalidRequest {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn nets(list: &[&str]) -> Vec<Ipv4Net> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn first_name_when_none_taken() {
        assert_eq!(next_unused_name("wgnet", &names(&["lo", "eth0"])), "wgnet0");
    }

    #[test]
    fn fills_lowest_gap() {
        let taken = names(&["wgnet0", "wgnet1", "wgnet3"]);
        assert_eq!(next_unused_name("wgnet", &taken), "wgnet2");
    }

    #[test]
    fn name_lookup_is_deterministic() {
        let taken = names(&["veth0", "br0"]);
        assert_eq!(next_unused_name("veth", &taken), "veth1");
        assert_eq!(next_unused_name("veth", &taken), "veth1");
    }

    #[test]
    fn first_pair_of_empty_range() {
        let pair = first_free_pair(UPLINK_RANGE, &[]).unwrap();
        assert_eq!(pair, ("172.31.0.0".parse().unwrap(), "172.31.0.1".parse().unwrap()));
    }

    #[test]
    fn skips_pairs_with_either_address_used() {
        let used = nets(&["172.31.0.0/31", "172.31.0.3/32", "10.0.0.1/24"]);
        let pair = first_free_pair(UPLINK_RANGE, &used).unwrap();
        assert_eq!(pair, ("172.31.0.4".parse().unwrap(), "172.31.0.5".parse().unwrap()));
    }

    #[test]
    fn covering_prefix_exhausts_range() {
        let used = nets(&["172.31.0.1/16"]);
        assert!(first_free_pair(UPLINK_RANGE, &used).is_none());
    }

    #[test]
    fn last_pair_of_range() {
        let used = nets(&[
            "172.31.0.0/17",
            "172.31.128.0/18",
            "172.31.192.0/19",
            "172.31.224.0/20",
            "172.31.240.0/21",
            "172.31.248.0/22",
            "172.31.252.0/23",
            "172.31.254.0/24",
            "172.31.255.0/25",
            "172.31.255.128/26",
            "172.31.255.192/27",
            "172.31.255.224/28",
            "172.31.255.240/29",
            "172.31.255.248/30",
            "172.31.255.252/31",
        ]);
        let pair = first_free_pair(UPLINK_RANGE, &used).unwrap();
        assert_eq!(
            pair,
            ("172.31.255.254".parse().unwrap(), "172.31.255.255".parse().unwrap())
        );
    }
}
