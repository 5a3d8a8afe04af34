//! Container endpoints of a network.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use ipnet::Ipv4Net;
use wgnet_common::{EndpointId, MacAddress, WgNetError, WgNetResult};

use crate::allocator::AddressAllocator;

/// Interface settings the caller asked for. Either may be left to the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointRequest {
    /// Requested address.
    pub address: Option<Ipv4Net>,
    /// Requested MAC address.
    pub mac_address: Option<MacAddress>,
}

impl EndpointRequest {
    /// Parse protocol strings. Empty strings mean "not requested".
    pub fn parse(address: &str, mac_address: &str) -> WgNetResult<Self> {
        let address = match address.trim() {
            "" => None,
            s => Some(s.parse::<Ipv4Net>().map_err(|e| WgNetError::InvalidRequest {
                message: format!("invalid endpoint address {s:?}: {e}"),
            })?),
        };
        let mac_address = match mac_address.trim() {
            "" => None,
            s => Some(s.parse::<MacAddress>()?),
        };
        Ok(Self {
            address,
            mac_address,
        })
    }
}

/// Interface settings returned to the caller.
///
/// Fields the caller already supplied with the same value are left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointInterface {
    /// Assigned address.
    pub address: Option<Ipv4Net>,
    /// Assigned MAC address.
    pub mac_address: Option<MacAddress>,
}

/// A resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Interface address with the pool's prefix length.
    pub address: Ipv4Net,
    /// Locally administered unicast MAC address.
    pub mac_address: MacAddress,
}

impl Endpoint {
    /// Fill in whatever `request` leaves open.
    ///
    /// A requested address is marked used so the allocator never hands it
    /// out again.
    pub fn resolve(
        request: &EndpointRequest,
        allocator: &mut AddressAllocator,
    ) -> WgNetResult<Self> {
        let address = match request.address {
            Some(address) => {
                allocator.mark_used(address.addr());
                address
            }
            None => allocator.find_address()?,
        };
        let mac_address = request.mac_address.unwrap_or_else(MacAddress::generate);

        Ok(Self {
            address,
            mac_address,
        })
    }

    /// The response to the request that created this endpoint.
    #[must_use]
    pub fn response(&self, request: &EndpointRequest) -> EndpointInterface {
        let echoed_mac = request.mac_address == Some(self.mac_address);
        EndpointInterface {
            address: (request.address != Some(self.address)).then_some(self.address),
            mac_address: (!echoed_mac).then_some(self.mac_address),
        }
    }
}

/// Endpoints of one network, keyed by ID.
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: HashMap<EndpointId, Endpoint>,
}

impl EndpointTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.endpoints.contains_key(id)
    }

    /// Look up an endpoint.
    pub fn get(&self, id: &EndpointId) -> WgNetResult<&Endpoint> {
        self.endpoints
            .get(id)
            .ok_or_else(|| WgNetError::EndpointNotFound { id: id.to_string() })
    }

    /// Add an endpoint. An existing entry with the same ID is kept.
    pub fn insert(&mut self, id: EndpointId, endpoint: Endpoint) -> WgNetResult<()> {
        match self.endpoints.entry(id) {
            Entry::Occupied(entry) => Err(WgNetError::EndpointExists {
                id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(endpoint);
                Ok(())
            }
        }
    }
}
