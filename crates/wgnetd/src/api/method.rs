//! Plugin protocol method names.

use std::fmt;

/// A request path of the plugin protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverMethod {
    /// `Plugin.Activate`
    Activate,
    /// `NetworkDriver.GetCapabilities`
    GetCapabilities,
    /// `NetworkDriver.CreateNetwork`
    CreateNetwork,
    /// `NetworkDriver.DeleteNetwork`
    DeleteNetwork,
    /// `NetworkDriver.CreateEndpoint`
    CreateEndpoint,
    /// `NetworkDriver.Join`
    Join,
    /// Any other method, by its short name.
    Unsupported(String),
}

const DRIVER_PREFIX: &str = "NetworkDriver.";

impl DriverMethod {
    /// Parse a method from a request path, with or without the leading `/`.
    pub fn parse(path: &str) -> Self {
        let name = path.trim_start_matches('/');
        if name == "Plugin.Activate" {
            return Self::Activate;
        }

        match name.strip_prefix(DRIVER_PREFIX) {
            Some("GetCapabilities") => Self::GetCapabilities,
            Some("CreateNetwork") => Self::CreateNetwork,
            Some("DeleteNetwork") => Self::DeleteNetwork,
            Some("CreateEndpoint") => Self::CreateEndpoint,
            Some("Join") => Self::Join,
            Some(other) => Self::Unsupported(other.to_string()),
            None => Self::Unsupported(name.to_string()),
        }
    }
}

impl fmt::Display for DriverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Activate => "Activate",
            Self::GetCapabilities => "GetCapabilities",
            Self::CreateNetwork => "CreateNetwork",
            Self::DeleteNetwork => "DeleteNetwork",
            Self::CreateEndpoint => "CreateEndpoint",
            Self::Join => "Join",
            Self::Unsupported(name) => name,
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_methods() {
        assert_eq!(DriverMethod::parse("/Plugin.Activate"), DriverMethod::Activate);
        assert_eq!(
            DriverMethod::parse("/NetworkDriver.GetCapabilities"),
            DriverMethod::GetCapabilities
        );
        assert_eq!(
            DriverMethod::parse("NetworkDriver.CreateNetwork"),
            DriverMethod::CreateNetwork
        );
        assert_eq!(DriverMethod::parse("/NetworkDriver.Join"), DriverMethod::Join);
    }

    #[test]
    fn unsupported_methods_keep_short_name() {
        for name in [
            "AllocateNetwork",
            "FreeNetwork",
            "DeleteEndpoint",
            "EndpointOperInfo",
            "Leave",
            "DiscoverNew",
            "DiscoverDelete",
            "ProgramExternalConnectivity",
            "RevokeExternalConnectivity",
        ] {
            let method = DriverMethod::parse(&format!("/NetworkDriver.{name}"));
            assert_eq!(method, DriverMethod::Unsupported(name.to_string()));
            assert_eq!(method.to_string(), name);
        }
    }

    #[test]
    fn unknown_plugin_path() {
        assert_eq!(
            DriverMethod::parse("/IpamDriver.RequestPool"),
            DriverMethod::Unsupported("IpamDriver.RequestPool".to_string())
        );
    }
}
