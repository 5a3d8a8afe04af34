//! Network creation requests and their typed options.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use ipnet::{IpNet, Ipv4Net};
use serde_json::{Map, Value};
use wgnet_common::{NetworkId, WgNetError, WgNetResult};

/// Key of the driver's options inside the request options.
pub const GENERIC_OPTIONS: &str = "com.docker.network.generic";

/// Address pool data as received from IPAM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpamData {
    /// Pool in CIDR notation.
    pub pool: String,
    /// Gateway, in CIDR or plain notation.
    pub gateway: Option<String>,
}

/// A request to create a network.
#[derive(Debug, Clone)]
pub struct CreateNetwork {
    /// Caller-assigned network ID.
    pub id: NetworkId,
    /// IPv4 pools.
    pub ipv4: Vec<IpamData>,
    /// IPv6 pools; any entry is rejected.
    pub ipv6: Vec<IpamData>,
    /// Request options, including [`GENERIC_OPTIONS`].
    pub options: Map<String, Value>,
}

/// The single IPv4 pool of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// The pool subnet.
    pub subnet: Ipv4Net,
    /// Gateway requested by IPAM.
    pub gateway: Option<Ipv4Addr>,
}

impl PoolConfig {
    /// Validate the pools of a request.
    ///
    /// Exactly one IPv4 pool and no IPv6 pool are accepted.
    pub fn from_request(ipv4: &[IpamData], ipv6: &[IpamData]) -> WgNetResult<Self> {
        if !ipv6.is_empty() {
            return Err(invalid_request("IPv6 pools are not supported"));
        }
        let data = match ipv4 {
            [data] => data,
            [] => return Err(invalid_request("an IPv4 pool is required")),
            _ => return Err(invalid_request("multiple IPv4 pools are not supported")),
        };

        let subnet = data
            .pool
            .parse::<Ipv4Net>()
            .map_err(|e| invalid_request(format!("invalid pool {:?}: {e}", data.pool)))?
            .trunc();

        let gateway = match data.gateway.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(gw) => Some(parse_gateway(gw)?),
        };

        Ok(Self { subnet, gateway })
    }

    /// The gateway, if it lies inside the pool.
    #[must_use]
    pub fn usable_gateway(&self) -> Option<Ipv4Addr> {
        self.gateway.filter(|gw| self.subnet.contains(gw))
    }
}

fn parse_gateway(gw: &str) -> WgNetResult<Ipv4Addr> {
    let addr = match gw.parse::<IpNet>() {
        Ok(net) => net.addr(),
        Err(_) => gw
            .parse::<IpAddr>()
            .map_err(|e| invalid_request(format!("invalid gateway {gw:?}: {e}")))?,
    };
    match addr {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(_) => Err(invalid_request(format!("IPv6 gateway {gw:?} is not supported"))),
    }
}

fn invalid_request(message: impl Into<String>) -> WgNetError {
    WgNetError::InvalidRequest {
        message: message.into(),
    }
}

/// Driver options of a network, from `docker network create -o key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Path of the tunnel configuration (`wgconf`).
    pub wgconf: PathBuf,
    /// Name to persist the namespace under (`namespace`).
    pub namespace: Option<String>,
    /// Remove the namespace when creation fails (`cleanup`, default true).
    pub cleanup: bool,
    /// Remote tunnel endpoint (`endpoint`).
    pub endpoint: Ipv4Addr,
}

impl NetworkOptions {
    /// Extract the driver options from request options.
    ///
    /// Unknown keys are ignored.
    pub fn from_options(options: &Map<String, Value>) -> WgNetResult<Self> {
        let empty = Map::new();
        let generic = match options.get(GENERIC_OPTIONS) {
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(WgNetError::InvalidOption {
                    key: GENERIC_OPTIONS.to_string(),
                    message: format!("expected an object, got {other}"),
                });
            }
            None => &empty,
        };
        Self::from_generic(generic)
    }

    /// Build options from the generic option map.
    pub fn from_generic(generic: &Map<String, Value>) -> WgNetResult<Self> {
        let wgconf = required_str(generic, "wgconf")?;
        if wgconf.is_empty() {
            return Err(invalid_option("wgconf", "must not be empty"));
        }

        let namespace = match optional_str(generic, "namespace")? {
            Some("") => return Err(invalid_option("namespace", "must not be empty")),
            Some(name) if name.contains('/') => {
                return Err(invalid_option("namespace", "must not contain '/'"));
            }
            other => other.map(ToString::to_string),
        };

        let cleanup = match generic.get("cleanup") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => parse_bool(s)
                .ok_or_else(|| invalid_option("cleanup", format!("invalid boolean {s:?}")))?,
            Some(other) => {
                return Err(invalid_option("cleanup", format!("expected a boolean, got {other}")));
            }
        };

        let endpoint = required_str(generic, "endpoint")?;
        let endpoint = match endpoint.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => addr,
            Ok(IpAddr::V6(_)) => return Err(invalid_option("endpoint", "IPv6 is not supported")),
            Err(e) => return Err(invalid_option("endpoint", format!("{endpoint:?}: {e}"))),
        };

        Ok(Self {
            wgconf: PathBuf::from(wgconf),
            namespace,
            cleanup,
            endpoint,
        })
    }
}

/// Boolean strings in the forms `1 t T TRUE true True 0 f F FALSE false False`.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn optional_str<'a>(map: &'a Map<String, Value>, key: &str) -> WgNetResult<Option<&'a str>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid_option(key, format!("expected a string, got {other}"))),
    }
}

fn required_str<'a>(map: &'a Map<String, Value>, key: &str) -> WgNetResult<&'a str> {
    optional_str(map, key)?.ok_or_else(|| WgNetError::ConfigMissing {
        key: key.to_string(),
    })
}

fn invalid_option(key: &str, message: impl Into<String>) -> WgNetError {
    WgNetError::InvalidOption {
        key: key.to_string(),
        message: message.into(),
    }
}
