//! Netlink handles bound to a network namespace.

use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::{AsFd, AsRawFd};

use futures::TryStreamExt;
use ipnet::Ipv4Net;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::{LinkBridge, LinkUnspec, LinkVeth, RouteMessageBuilder};
use wgnet_common::{WgNetError, WgNetResult};

use crate::netns::NetNs;

/// A link as seen from one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface name.
    pub name: String,
    /// Interface index within its namespace.
    pub index: u32,
}

/// An rtnetlink connection that operates on one namespace.
///
/// The socket is opened while the thread is switched into the namespace
/// and keeps addressing it afterwards, so none of the async calls below
/// need to switch namespaces.
pub struct NetlinkHandle {
    handle: rtnetlink::Handle,
    conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkHandle {
    /// Open a connection into `ns`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open_in(ns: &NetNs) -> WgNetResult<Self> {
        let (conn, handle, _) = ns.run(|| {
            rtnetlink::new_connection().map_err(|e| WgNetError::link("open netlink socket", e))
        })?;
        let conn_task = tokio::spawn(conn);
        Ok(Self { handle, conn_task })
    }

    /// Close the connection.
    ///
    /// Waits until the socket is dropped, so the handle no longer keeps
    /// an anonymous namespace alive once this returns.
    pub async fn close(self) {
        self.conn_task.abort();
        let _ = self.conn_task.await;
    }

    /// Names of all links in the namespace.
    pub async fn link_names(&self) -> WgNetResult<Vec<String>> {
        let mut links = self.handle.link().get().execute();
        let mut names = Vec::new();

        while let Some(msg) = links
            .try_next()
            .await
            .map_err(|e| WgNetError::link("list links", e))?
        {
            if let Some(name) = link_name(&msg) {
                names.push(name);
            }
        }

        Ok(names)
    }

    /// Look up a link by name.
    pub async fn link_by_name(&self, name: &str) -> WgNetResult<Link> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(msg)) => Ok(Link {
                name: name.to_string(),
                index: msg.header.index,
            }),
            Ok(None) => Err(WgNetError::link(
                format!("find link {name}"),
                "no such link",
            )),
            Err(e) => Err(WgNetError::link(format!("find link {name}"), e)),
        }
    }

    /// First link whose kind matches `kind`.
    pub async fn link_by_kind(&self, kind: &InfoKind) -> WgNetResult<Option<Link>> {
        let mut links = self.handle.link().get().execute();

        while let Some(msg) = links
            .try_next()
            .await
            .map_err(|e| WgNetError::link("list links", e))?
        {
            let matches = msg.attributes.iter().any(|attr| match attr {
                LinkAttribute::LinkInfo(infos) => infos
                    .iter()
                    .any(|info| matches!(info, LinkInfo::Kind(k) if k == kind)),
                _ => false,
            });
            if matches {
                if let Some(name) = link_name(&msg) {
                    return Ok(Some(Link {
                        name,
                        index: msg.header.index,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Every IPv4 address, with its prefix, assigned to any link.
    pub async fn ipv4_addresses(&self) -> WgNetResult<Vec<Ipv4Net>> {
        let mut addresses = self.handle.address().get().execute();
        let mut nets = Vec::new();

        while let Some(msg) = addresses
            .try_next()
            .await
            .map_err(|e| WgNetError::link("list addresses", e))?
        {
            for attr in &msg.attributes {
                if let AddressAttribute::Address(IpAddr::V4(addr)) = attr {
                    if let Ok(net) = Ipv4Net::new(*addr, msg.header.prefix_len) {
                        nets.push(net);
                    }
                }
            }
        }

        Ok(nets)
    }

    /// Create a veth pair in this namespace and move `name` into `target`.
    ///
    /// `peer` stays in the namespace of this handle.
    pub async fn add_veth_into(&self, name: &str, peer: &str, target: &NetNs) -> WgNetResult<()> {
        tracing::debug!(name, peer, "Creating veth pair");
        self.handle
            .link()
            .add(
                LinkVeth::new(name, peer)
                    .setns_by_fd(target.as_fd().as_raw_fd())
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("add veth {name}/{peer}"), e))
    }

    /// Create a bridge.
    pub async fn add_bridge(&self, name: &str) -> WgNetResult<Link> {
        tracing::debug!(name, "Creating bridge");
        self.handle
            .link()
            .add(LinkBridge::new(name).build())
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("add bridge {name}"), e))?;
        self.link_by_name(name).await
    }

    /// Assign an address to a link.
    pub async fn add_address(&self, link: &Link, net: Ipv4Net) -> WgNetResult<()> {
        tracing::debug!(link = %link.name, address = %net, "Adding address");
        self.handle
            .address()
            .add(link.index, IpAddr::V4(net.addr()), net.prefix_len())
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("add address {net} to {}", link.name), e))
    }

    /// Bring a link up.
    pub async fn set_up(&self, link: &Link) -> WgNetResult<()> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(link.index).up().build())
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("set {} up", link.name), e))
    }

    /// Attach a link to a bridge.
    pub async fn set_controller(&self, link: &Link, bridge: &Link) -> WgNetResult<()> {
        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(link.index)
                    .controller(bridge.index)
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| {
                WgNetError::link(format!("attach {} to {}", link.name, bridge.name), e)
            })
    }

    /// Install a default route out of `link`.
    pub async fn add_default_route(
        &self,
        link: &Link,
        source: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> WgNetResult<()> {
        tracing::debug!(link = %link.name, %source, %gateway, "Adding default route");
        let route = RouteMessageBuilder::<Ipv4Addr>::new()
            .output_interface(link.index)
            .pref_source(source)
            .gateway(gateway)
            .build();

        self.handle
            .route()
            .add(route)
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("add default route via {gateway}"), e))
    }

    /// Delete a link.
    pub async fn delete_link(&self, link: &Link) -> WgNetResult<()> {
        self.handle
            .link()
            .del(link.index)
            .execute()
            .await
            .map_err(|e| WgNetError::link(format!("delete {}", link.name), e))
    }
}

fn link_name(msg: &LinkMessage) -> Option<String> {
    msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}
