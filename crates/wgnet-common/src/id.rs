//! Network, endpoint and MAC address identifiers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{WgNetError, WgNetResult};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a caller-assigned identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns a short version of the ID (first 12 characters).
            #[must_use]
            pub fn short(&self) -> &str {
                self.0.get(..12).unwrap_or(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a Docker network, assigned by the Docker daemon.
    ///
    /// The driver never generates these; they are opaque keys.
    NetworkId
);

opaque_id!(
    /// Identifier of an endpoint, unique within its network.
    EndpointId
);

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    const MULTICAST_BIT: u8 = 0x01;
    const LOCAL_BIT: u8 = 0x02;

    /// Create a MAC address from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Generate a random locally-administered unicast address.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill(&mut bytes);
        bytes[0] = (bytes[0] & !Self::MULTICAST_BIT) | Self::LOCAL_BIT;
        Self(bytes)
    }

    /// Raw address bytes.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the multicast bit is clear.
    #[must_use]
    pub const fn is_unicast(&self) -> bool {
        self.0[0] & Self::MULTICAST_BIT == 0
    }

    /// Whether the locally-administered bit is set.
    #[must_use]
    pub const fn is_locally_administered(&self) -> bool {
        self.0[0] & Self::LOCAL_BIT != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = WgNetError;

    /// Parses `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> WgNetResult<Self> {
        let invalid = || WgNetError::InvalidRequest {
            message: format!("invalid MAC address: {s}"),
        };

        let separator = if s.contains('-') { '-' } else { ':' };
        let mut bytes = [0u8; 6];
        let mut parts = s.split(separator);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids() {
        let id = NetworkId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(EndpointId::from("ep1").short(), "ep1");
    }

    #[test]
    fn generated_mac_is_local_unicast() {
        for _ in 0..64 {
            let mac = MacAddress::generate();
            assert!(mac.is_unicast());
            assert!(mac.is_locally_administered());
        }
    }

    #[test]
    fn generated_macs_differ() {
        assert_ne!(MacAddress::generate(), MacAddress::generate());
    }

    #[test]
    fn mac_parsing() {
        let mac: MacAddress = "02:42:AC:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(mac.to_string(), "02:42:ac:11:00:02");

        let dashed: MacAddress = "02-42-ac-11-00-02".parse().unwrap();
        assert_eq!(dashed, mac);
    }

    #[test]
    fn invalid_macs() {
        assert!("".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:02:03".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:zz".parse::<MacAddress>().is_err());
        assert!("2:42:ac:11:00:02".parse::<MacAddress>().is_err());
    }
}
