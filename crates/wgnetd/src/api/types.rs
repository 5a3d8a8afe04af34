//! Request and response bodies of the Docker network plugin protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wgnet_common::{EndpointId, NetworkId, WgNetResult};
use wgnet_network::{
    CreateNetwork, EndpointInterface as DriverInterface, EndpointRequest, IpamData, JoinInfo,
    StaticRoute as DriverRoute,
};

/// Docker's route type for routes through a next hop.
const ROUTE_TYPE_NEXT_HOP: u8 = 0;

/// Response to `Plugin.Activate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec!["NetworkDriver".to_string()],
        }
    }
}

/// Response to `NetworkDriver.GetCapabilities`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: String,
    pub connectivity_scope: String,
}

impl Default for CapabilitiesResponse {
    fn default() -> Self {
        Self {
            scope: "local".to_string(),
            connectivity_scope: "local".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamDataWire {
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: NetworkId,
    #[serde(rename = "Options", default)]
    pub options: Option<Map<String, Value>>,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamDataWire>>,
    #[serde(rename = "IPv6Data", default)]
    pub ipv6_data: Option<Vec<IpamDataWire>>,
}

impl From<CreateNetworkRequest> for CreateNetwork {
    fn from(req: CreateNetworkRequest) -> Self {
        let pools = |data: Option<Vec<IpamDataWire>>| {
            data.unwrap_or_default()
                .into_iter()
                .map(|d| IpamData {
                    pool: d.pool,
                    gateway: d.gateway,
                })
                .collect()
        };
        Self {
            id: req.network_id,
            ipv4: pools(req.ipv4_data),
            ipv6: pools(req.ipv6_data),
            options: req.options.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: NetworkId,
}

/// Interface addresses, both in requests and responses.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterfaceWire {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

impl EndpointInterfaceWire {
    pub fn to_request(&self) -> WgNetResult<EndpointRequest> {
        EndpointRequest::parse(&self.address, &self.mac_address)
    }
}

impl From<DriverInterface> for EndpointInterfaceWire {
    fn from(iface: DriverInterface) -> Self {
        Self {
            address: iface.address.map(|a| a.to_string()).unwrap_or_default(),
            address_ipv6: String::new(),
            mac_address: iface.mac_address.map(|m| m.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: NetworkId,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: EndpointId,
    #[serde(rename = "Interface", default)]
    pub interface: Option<EndpointInterfaceWire>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    pub interface: EndpointInterfaceWire,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: NetworkId,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: EndpointId,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StaticRoute {
    pub destination: String,
    pub route_type: u8,
    pub next_hop: String,
}

impl From<DriverRoute> for StaticRoute {
    fn from(route: DriverRoute) -> Self {
        Self {
            destination: route.destination.to_string(),
            route_type: ROUTE_TYPE_NEXT_HOP,
            next_hop: route.next_hop.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub interface_name: InterfaceName,
    pub static_routes: Vec<StaticRoute>,
    pub disable_gateway_service: bool,
}

impl From<JoinInfo> for JoinResponse {
    fn from(info: JoinInfo) -> Self {
        Self {
            interface_name: InterfaceName {
                src_name: info.src_name,
                dst_prefix: info.dst_prefix,
            },
            static_routes: info.routes.into_iter().map(StaticRoute::from).collect(),
            disable_gateway_service: false,
        }
    }
}

/// Body of every failed response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn activate_and_capabilities() {
        assert_eq!(
            serde_json::to_value(ActivateResponse::default()).unwrap(),
            json!({"Implements": ["NetworkDriver"]})
        );
        assert_eq!(
            serde_json::to_value(CapabilitiesResponse::default()).unwrap(),
            json!({"Scope": "local", "ConnectivityScope": "local"})
        );
    }

    #[test]
    fn create_network_request_from_docker() {
        let body = json!({
            "NetworkID": "d1f0a2",
            "Options": {
                "com.docker.network.enable_ipv6": false,
                "com.docker.network.generic": {"wgconf": "/etc/wireguard/wg0.conf"}
            },
            "IPv4Data": [{"AddressSpace": "LocalDefault", "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24"}],
            "IPv6Data": null
        });
        let req: CreateNetworkRequest = serde_json::from_value(body).unwrap();
        let create = CreateNetwork::from(req);

        assert_eq!(create.id.as_str(), "d1f0a2");
        assert_eq!(create.ipv4.len(), 1);
        assert_eq!(create.ipv4[0].pool, "10.0.0.0/24");
        assert_eq!(create.ipv4[0].gateway.as_deref(), Some("10.0.0.1/24"));
        assert!(create.ipv6.is_empty());
        assert!(create.options.contains_key("com.docker.network.generic"));
    }

    #[test]
    fn endpoint_interface_omits_empty_fields() {
        let wire = EndpointInterfaceWire {
            address: "10.0.0.2/24".to_string(),
            ..EndpointInterfaceWire::default()
        };
        assert_eq!(
            serde_json::to_value(CreateEndpointResponse { interface: wire }).unwrap(),
            json!({"Interface": {"Address": "10.0.0.2/24"}})
        );
    }

    #[test]
    fn endpoint_request_without_interface() {
        let req: CreateEndpointRequest = serde_json::from_value(json!({
            "NetworkID": "n", "EndpointID": "e", "Options": {}
        }))
        .unwrap();
        let request = req.interface.unwrap_or_default().to_request().unwrap();
        assert_eq!(request, EndpointRequest::default());
    }

    #[test]
    fn join_response_shape() {
        let info = JoinInfo {
            src_name: "wgnet3".to_string(),
            dst_prefix: "wgnet".to_string(),
            routes: vec![DriverRoute {
                destination: "10.20.0.0/24".parse().unwrap(),
                next_hop: "10.0.0.1".parse().unwrap(),
            }],
        };
        assert_eq!(
            serde_json::to_value(JoinResponse::from(info)).unwrap(),
            json!({
                "InterfaceName": {"SrcName": "wgnet3", "DstPrefix": "wgnet"},
                "StaticRoutes": [{"Destination": "10.20.0.0/24", "RouteType": 0, "NextHop": "10.0.0.1"}],
                "DisableGatewayService": false
            })
        );
    }

    #[test]
    fn error_body() {
        let body = ErrorResponse {
            err: "[Leave] not supported".to_string(),
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"Err": "[Leave] not supported"})
        );
    }
}
