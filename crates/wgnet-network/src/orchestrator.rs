//! Registry of live networks and the operations the driver exposes.

use std::collections::HashMap;

use tokio::sync::Mutex;
use wgnet_common::{EndpointId, NetworkId, WgNetError, WgNetResult};

use crate::endpoint::{EndpointInterface, EndpointRequest};
use crate::host::Host;
use crate::network::{JoinInfo, Network};
use crate::options::{CreateNetwork, NetworkOptions, PoolConfig};

/// Creates, tracks and deletes networks.
///
/// The registry lock is held for the whole of each operation, so at most
/// one operation touches namespaces at a time.
pub struct Orchestrator {
    host: Host,
    networks: Mutex<HashMap<NetworkId, Network>>,
}

impl Orchestrator {
    /// Create an orchestrator with no networks.
    pub fn new(host: Host) -> Self {
        Self {
            host,
            networks: Mutex::new(HashMap::new()),
        }
    }

    /// Host resources.
    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Set up the forwarding chains in the root namespace.
    ///
    /// Chains created before a failure are removed again.
    pub fn initialize(&self) -> WgNetResult<()> {
        let rules = self.host.rules();
        let Err(e) = rules.initialize(self.host.root_ns()) else {
            return Ok(());
        };

        tracing::warn!(error = %e, "Chain setup failed, removing partial chains");
        if let Err(cleanup) = rules.teardown(self.host.root_ns()) {
            tracing::warn!(error = %cleanup, "Failed to remove partial chains");
        }
        Err(e)
    }

    /// Create and register a network.
    pub async fn create_network(&self, request: CreateNetwork) -> WgNetResult<()> {
        let mut networks = self.networks.lock().await;
        if networks.contains_key(&request.id) {
            return Err(WgNetError::NetworkExists {
                id: request.id.to_string(),
            });
        }

        let pool = PoolConfig::from_request(&request.ipv4, &request.ipv6)?;
        let options = NetworkOptions::from_options(&request.options)?;
        tracing::info!(
            network = %request.id.short(),
            pool = %pool.subnet,
            wgconf = %options.wgconf.display(),
            namespace = ?options.namespace,
            "Creating network"
        );

        let network = Network::create(&self.host, request.id.clone(), pool, options).await?;
        networks.insert(request.id, network);
        Ok(())
    }

    /// Unregister and tear down a network.
    pub async fn delete_network(&self, id: &NetworkId) -> WgNetResult<()> {
        let mut networks = self.networks.lock().await;
        let network = networks
            .remove(id)
            .ok_or_else(|| WgNetError::NetworkNotFound { id: id.to_string() })?;
        network.delete(&self.host).await
    }

    /// Add an endpoint to a network.
    pub async fn create_endpoint(
        &self,
        network: &NetworkId,
        endpoint: EndpointId,
        request: &EndpointRequest,
    ) -> WgNetResult<EndpointInterface> {
        let mut networks = self.networks.lock().await;
        networks
            .get_mut(network)
            .ok_or_else(|| WgNetError::NetworkNotFound {
                id: network.to_string(),
            })?
            .create_endpoint(endpoint, request)
    }

    /// Attach an endpoint's container link to its network.
    pub async fn join(&self, network: &NetworkId, endpoint: &EndpointId) -> WgNetResult<JoinInfo> {
        let networks = self.networks.lock().await;
        networks
            .get(network)
            .ok_or_else(|| WgNetError::NetworkNotFound {
                id: network.to_string(),
            })?
            .join(&self.host, endpoint)
            .await
    }

    /// IDs of live networks.
    pub async fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.lock().await.keys().cloned().collect()
    }

    /// Delete every network, then remove the forwarding chains.
    pub async fn shutdown(&self) -> WgNetResult<()> {
        let mut networks = self.networks.lock().await;
        tracing::info!(networks = networks.len(), "Shutting down");

        for (id, network) in networks.drain() {
            if let Err(e) = network.delete(&self.host).await {
                tracing::warn!(network = %id.short(), error = %e, "Failed to delete network");
            }
        }

        self.host.rules().teardown(self.host.root_ns())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Map, json};
    use wgnet_common::WgNetPaths;

    use super::*;
    use crate::forwarding::{ForwardingRuleManager, Table};
    use crate::forwarding::tests::MemoryTable;
    use crate::netns::NetNs;
    use crate::options::IpamData;

    fn orchestrator() -> (Arc<MemoryTable>, Orchestrator) {
        let table = Arc::new(MemoryTable::new());
        let host = Host::with_root(WgNetPaths::new(), NetNs::current().unwrap())
            .unwrap()
            .with_rules(ForwardingRuleManager::new(table.clone()));
        (table, Orchestrator::new(host))
    }

    fn options() -> Map<String, serde_json::Value> {
        match json!({
            "com.docker.network.generic": {
                "wgconf": "/nonexistent/wg0.conf",
                "endpoint": "203.0.113.7",
            }
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn request(ipv4: Vec<IpamData>) -> CreateNetwork {
        CreateNetwork {
            id: NetworkId::new("net1"),
            ipv4,
            ipv6: Vec::new(),
            options: options(),
        }
    }

    fn pool() -> IpamData {
        IpamData {
            pool: "10.0.0.0/24".to_string(),
            gateway: None,
        }
    }

    #[tokio::test]
    async fn initialize_and_shutdown_without_networks() {
        let (table, orchestrator) = orchestrator();
        let pristine = table.snapshot();

        orchestrator.initialize().unwrap();
        assert_ne!(table.snapshot(), pristine);

        orchestrator.shutdown().await.unwrap();
        assert_eq!(table.snapshot(), pristine);
    }

    #[tokio::test]
    async fn failed_initialize_removes_partial_chains() {
        let table = Arc::new(MemoryTable::without_chain(Table::Filter, "FORWARD"));
        let host = Host::with_root(WgNetPaths::new(), NetNs::current().unwrap())
            .unwrap()
            .with_rules(ForwardingRuleManager::new(table.clone()));
        let orchestrator = Orchestrator::new(host);
        let pristine = table.snapshot();

        let err = orchestrator.initialize().unwrap_err();
        assert!(matches!(err, WgNetError::Rule { .. }));
        assert_eq!(table.snapshot(), pristine);
    }

    #[tokio::test]
    async fn rejects_bad_pools_before_touching_the_host() {
        let (_, orchestrator) = orchestrator();

        let err = orchestrator.create_network(request(Vec::new())).await.unwrap_err();
        assert!(matches!(err, WgNetError::InvalidRequest { .. }));

        let err = orchestrator
            .create_network(request(vec![pool(), pool()]))
            .await
            .unwrap_err();
        assert!(matches!(err, WgNetError::InvalidRequest { .. }));

        let mut ipv6 = request(vec![pool()]);
        ipv6.ipv6.push(IpamData {
            pool: "fd00::/64".to_string(),
            gateway: None,
        });
        let err = orchestrator.create_network(ipv6).await.unwrap_err();
        assert!(matches!(err, WgNetError::InvalidRequest { .. }));

        assert!(orchestrator.network_ids().await.is_empty());
    }

    #[tokio::test]
    async fn missing_option() {
        let (_, orchestrator) = orchestrator();
        let mut req = request(vec![pool()]);
        req.options.clear();

        let err = orchestrator.create_network(req).await.unwrap_err();
        assert!(matches!(err, WgNetError::ConfigMissing { key } if key == "wgconf"));
    }

    #[tokio::test]
    async fn unreadable_tunnel_config() {
        let (_, orchestrator) = orchestrator();
        let err = orchestrator.create_network(request(vec![pool()])).await.unwrap_err();
        assert!(matches!(err, WgNetError::ConfigParse { .. }));
        assert!(orchestrator.network_ids().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_network() {
        let (_, orchestrator) = orchestrator();
        let id = NetworkId::new("missing");

        let err = orchestrator.delete_network(&id).await.unwrap_err();
        assert!(matches!(err, WgNetError::NetworkNotFound { .. }));

        let err = orchestrator
            .create_endpoint(&id, EndpointId::new("ep"), &EndpointRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WgNetError::NetworkNotFound { .. }));

        let err = orchestrator.join(&id, &EndpointId::new("ep")).await.unwrap_err();
        assert!(matches!(err, WgNetError::NetworkNotFound { .. }));
    }
}
