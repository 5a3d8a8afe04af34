//! Host-side resources shared by every network.

use std::sync::Arc;

use wgnet_common::{WgNetPaths, WgNetResult};

use crate::forwarding::ForwardingRuleManager;
use crate::netlink::NetlinkHandle;
use crate::netns::NetNs;
use crate::tunnel::{TunnelInterface, WgQuick};

/// PID whose network namespace is the host's.
const INIT_PID: u32 = 1;

/// The root namespace and the collaborators that operate on it.
pub struct Host {
    paths: WgNetPaths,
    root_ns: NetNs,
    root: NetlinkHandle,
    rules: ForwardingRuleManager,
    tunnel: Arc<dyn TunnelInterface>,
}

impl Host {
    /// Use the namespace of PID 1, `iptables` and `wg-quick`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(paths: WgNetPaths) -> WgNetResult<Self> {
        Self::with_root(paths, NetNs::from_pid(INIT_PID)?)
    }

    /// Use `root_ns` as the host namespace.
    pub fn with_root(paths: WgNetPaths, root_ns: NetNs) -> WgNetResult<Self> {
        let root = NetlinkHandle::open_in(&root_ns)?;
        tracing::debug!("Opened root namespace");
        Ok(Self {
            paths,
            root_ns,
            root,
            rules: ForwardingRuleManager::iptables(),
            tunnel: Arc::new(WgQuick::new()),
        })
    }

    /// Replace the forwarding rule manager.
    #[must_use]
    pub fn with_rules(mut self, rules: ForwardingRuleManager) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the tunnel adapter.
    #[must_use]
    pub fn with_tunnel(mut self, tunnel: Arc<dyn TunnelInterface>) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// Standard paths.
    #[must_use]
    pub const fn paths(&self) -> &WgNetPaths {
        &self.paths
    }

    /// The root namespace.
    #[must_use]
    pub const fn root_ns(&self) -> &NetNs {
        &self.root_ns
    }

    /// Netlink handle bound to the root namespace.
    #[must_use]
    pub const fn root_handle(&self) -> &NetlinkHandle {
        &self.root
    }

    /// Forwarding rule manager.
    #[must_use]
    pub const fn rules(&self) -> &ForwardingRuleManager {
        &self.rules
    }

    /// Tunnel adapter.
    #[must_use]
    pub fn tunnel(&self) -> &dyn TunnelInterface {
        self.tunnel.as_ref()
    }
}
