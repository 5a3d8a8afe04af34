//! # wgnet-network
//!
//! Network lifecycle engine for the wgnet Docker driver.
//!
//! Every Docker network gets its own network namespace, reached from the
//! host through a veth uplink and from the outside through a WireGuard
//! interface. This crate provides:
//! - namespace handles and scoped namespace switching
//! - link, address and route helpers over rtnetlink
//! - address allocation within a pool
//! - iptables chains and per-network forwarding rules
//! - the network registry behind the driver's operations

#![warn(missing_docs)]

pub mod allocator;
pub mod endpoint;
pub mod fabric;
pub mod forwarding;
pub mod host;
pub mod netlink;
pub mod netns;
pub mod network;
pub mod options;
pub mod orchestrator;
pub mod tunnel;

pub use allocator::AddressAllocator;
pub use endpoint::{Endpoint, EndpointInterface, EndpointRequest, EndpointTable};
pub use fabric::{LINK_PREFIX, LinkFabric};
pub use forwarding::{Forwarding, ForwardingRuleManager, IptablesCli, RuleTable, Table};
pub use host::Host;
pub use netlink::{Link, NetlinkHandle};
pub use netns::{NetNs, NetNsGuard};
pub use network::{JoinInfo, Network};
pub use options::{CreateNetwork, GENERIC_OPTIONS, IpamData, NetworkOptions, PoolConfig};
pub use orchestrator::Orchestrator;
pub use tunnel::{StaticRoute, TunnelConfig, TunnelInterface, WgQuick};
