//! A live network: namespace, uplink, tunnel, bridge and endpoints.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use wgnet_common::{EndpointId, NetworkId, WgNetError, WgNetResult};

use crate::allocator::AddressAllocator;
use crate::endpoint::{Endpoint, EndpointInterface, EndpointRequest, EndpointTable};
use crate::fabric::{LINK_PREFIX, LinkFabric};
use crate::forwarding::Forwarding;
use crate::host::Host;
use crate::netlink::{Link, NetlinkHandle};
use crate::netns::NetNs;
use crate::options::{NetworkOptions, PoolConfig};
use crate::tunnel::{StaticRoute, TunnelConfig};

/// What a container needs to join a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Root-namespace name of the container link.
    pub src_name: String,
    /// Prefix for the interface name inside the container.
    pub dst_prefix: String,
    /// Routes to the peer networks.
    pub routes: Vec<StaticRoute>,
}

/// Everything built inside a fresh namespace.
struct Wiring {
    tunnel_link: Link,
    bridge: Link,
    bridge_net: Ipv4Net,
    allocator: AddressAllocator,
    forwarding: Forwarding,
}

/// A network with its own namespace behind a tunnel.
pub struct Network {
    id: NetworkId,
    ns: NetNs,
    handle: NetlinkHandle,
    tunnel: TunnelConfig,
    tunnel_link: Link,
    bridge: Link,
    bridge_net: Ipv4Net,
    allocator: AddressAllocator,
    forwarding: Forwarding,
    endpoints: EndpointTable,
}

impl Network {
    /// Build a network.
    ///
    /// Nothing is left behind on failure, except a named namespace when
    /// `options.cleanup` is false.
    pub async fn create(
        host: &Host,
        id: NetworkId,
        pool: PoolConfig,
        options: NetworkOptions,
    ) -> WgNetResult<Self> {
        let tunnel = host.tunnel().load_config(&options.wgconf)?;
        tracing::debug!(
            network = %id.short(),
            listen_port = tunnel.listen_port,
            address = %tunnel.address,
            peers = tunnel.peer_networks.len(),
            "Loaded tunnel config"
        );

        let ns = NetNs::create(host.paths(), options.namespace.as_deref())?;
        tracing::info!(network = %id.short(), namespace = ?ns.name(), "Created network namespace");

        let handle = match NetlinkHandle::open_in(&ns) {
            Ok(handle) => handle,
            Err(e) => {
                discard_namespace(ns, options.cleanup);
                return Err(e);
            }
        };

        match wire(host, &ns, &handle, &tunnel, pool, &options).await {
            Ok(wiring) => {
                tracing::info!(
                    network = %id.short(),
                    bridge = %wiring.bridge_net,
                    tunnel = %wiring.tunnel_link.name,
                    forwarding = %wiring.forwarding,
                    "Network created"
                );
                Ok(Self {
                    id,
                    ns,
                    handle,
                    tunnel,
                    tunnel_link: wiring.tunnel_link,
                    bridge: wiring.bridge,
                    bridge_net: wiring.bridge_net,
                    allocator: wiring.allocator,
                    forwarding: wiring.forwarding,
                    endpoints: EndpointTable::new(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    network = %id.short(),
                    error = %e,
                    "Network creation failed, rolling back"
                );
                handle.close().await;
                discard_namespace(ns, options.cleanup);
                Err(e)
            }
        }
    }

    /// Tear the network down.
    ///
    /// Every step is attempted; the first error is returned.
    pub async fn delete(self, host: &Host) -> WgNetResult<()> {
        let Self {
            id,
            ns,
            handle,
            tunnel_link,
            forwarding,
            ..
        } = self;
        let mut result = Ok(());

        handle.close().await;

        if let Err(e) = ns.delete() {
            tracing::warn!(network = %id.short(), error = %e, "Failed to delete namespace");
            result = result.and(Err(e));
        }

        if let Err(e) = host.rules().remove_forwarding(host.root_ns(), &forwarding) {
            tracing::warn!(network = %id.short(), error = %e, "Failed to remove forwarding rules");
            result = result.and(Err(e));
        }

        if result.is_ok() {
            tracing::info!(
                network = %id.short(),
                tunnel = %tunnel_link.name,
                "Network deleted"
            );
        }
        result
    }

    /// Add an endpoint.
    pub fn create_endpoint(
        &mut self,
        id: EndpointId,
        request: &EndpointRequest,
    ) -> WgNetResult<EndpointInterface> {
        if self.endpoints.contains(&id) {
            return Err(WgNetError::EndpointExists { id: id.to_string() });
        }

        let endpoint = Endpoint::resolve(request, &mut self.allocator)?;
        tracing::info!(
            network = %self.id.short(),
            endpoint = %id.short(),
            address = %endpoint.address,
            mac = %endpoint.mac_address,
            "Created endpoint"
        );
        let response = endpoint.response(request);
        self.endpoints.insert(id, endpoint)?;
        Ok(response)
    }

    /// Create a container link for an endpoint.
    pub async fn join(&self, host: &Host, endpoint: &EndpointId) -> WgNetResult<JoinInfo> {
        self.endpoints.get(endpoint)?;

        let fabric = LinkFabric {
            root_ns: host.root_ns(),
            network: &self.handle,
            root: host.root_handle(),
        };
        let src_name = fabric.create_container_link(&self.bridge).await?;
        let routes = self.tunnel.routes(self.bridge_net.addr());

        tracing::info!(
            network = %self.id.short(),
            endpoint = %endpoint.short(),
            link = %src_name,
            routes = routes.len(),
            "Joined endpoint"
        );
        Ok(JoinInfo {
            src_name,
            dst_prefix: LINK_PREFIX.to_string(),
            routes,
        })
    }
}

async fn wire(
    host: &Host,
    ns: &NetNs,
    handle: &NetlinkHandle,
    tunnel: &TunnelConfig,
    pool: PoolConfig,
    options: &NetworkOptions,
) -> WgNetResult<Wiring> {
    let fabric = LinkFabric {
        root_ns: host.root_ns(),
        network: handle,
        root: host.root_handle(),
    };

    let outbound = fabric.create_outbound_link().await?;
    let tunnel_link = host.tunnel().bring_up(tunnel, ns, handle).await?;

    let mut allocator = AddressAllocator::new(pool.subnet);
    allocator.mark_used(tunnel.address.addr());

    let bridge_net = bridge_address(&pool, &mut allocator)?;
    let bridge = fabric.create_bridge(bridge_net).await?;

    let forwarding = Forwarding {
        container_side: outbound,
        endpoint: options.endpoint,
        port: tunnel.listen_port,
    };
    if let Err(e) = host.rules().install_forwarding(host.root_ns(), &forwarding) {
        // Rules inserted before the failure stay behind otherwise.
        if let Err(cleanup) = host.rules().remove_forwarding(host.root_ns(), &forwarding) {
            tracing::warn!(error = %cleanup, "Failed to remove partial forwarding rules");
        }
        return Err(e);
    }

    Ok(Wiring {
        tunnel_link,
        bridge,
        bridge_net,
        allocator,
        forwarding,
    })
}

/// The IPAM gateway when it is usable, otherwise the next free address.
fn bridge_address(pool: &PoolConfig, allocator: &mut AddressAllocator) -> WgNetResult<Ipv4Net> {
    let gateway = pool
        .usable_gateway()
        .filter(|gw| !allocator.is_used(*gw) && *gw != pool.subnet.network());

    match gateway {
        Some(gw) => {
            allocator.mark_used(gw);
            host_net(gw, pool.subnet.prefix_len())
        }
        None => allocator.find_address(),
    }
}

fn host_net(addr: Ipv4Addr, prefix_len: u8) -> WgNetResult<Ipv4Net> {
    Ipv4Net::new(addr, prefix_len).map_err(|e| WgNetError::InvalidRequest {
        message: e.to_string(),
    })
}

/// Release a namespace after a failed creation.
fn discard_namespace(ns: NetNs, cleanup: bool) {
    if cleanup {
        if let Err(e) = ns.delete() {
            tracing::warn!(error = %e, "Failed to clean up namespace");
        }
    } else if let Some(name) = ns.name() {
        tracing::info!(namespace = name, "Leaving namespace for inspection");
    }
}
