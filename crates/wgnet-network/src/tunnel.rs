//! WireGuard tunnel configuration and interface bring-up.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net};
use rtnetlink::packet_route::link::InfoKind;
use wgnet_common::{WgNetError, WgNetResult};

use crate::netlink::{Link, NetlinkHandle};
use crate::netns::NetNs;

/// The parts of a `wg-quick` configuration the driver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Path the configuration was loaded from.
    pub path: PathBuf,
    /// UDP port the interface listens on.
    pub listen_port: u16,
    /// Local tunnel address, with host bits kept.
    pub address: Ipv4Net,
    /// Networks reachable through the peers.
    pub peer_networks: Vec<Ipv4Net>,
}

/// A route handed to containers joining the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRoute {
    /// Destination network.
    pub destination: Ipv4Net,
    /// Next hop.
    pub next_hop: Ipv4Addr,
}

impl TunnelConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> WgNetResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WgNetError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(path, &contents)
    }

    /// Parse configuration text. `path` is recorded and used in errors.
    pub fn parse(path: &Path, contents: &str) -> WgNetResult<Self> {
        let fail = |message: String| WgNetError::ConfigParse {
            path: path.display().to_string(),
            message,
        };

        let sections = parse_ini(contents).map_err(&fail)?;

        let interface = sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case("Interface"))
            .ok_or_else(|| fail("[Interface] section missing".to_string()))?;

        let port = interface
            .get("ListenPort")
            .ok_or_else(|| fail("ListenPort missing from [Interface]".to_string()))?;
        let listen_port = port
            .parse::<u16>()
            .map_err(|e| fail(format!("invalid ListenPort {port:?}: {e}")))?;

        let address = interface
            .get("Address")
            .ok_or_else(|| fail("Address missing from [Interface]".to_string()))?;
        let address = first_ipv4_net(address).map_err(&fail)?;

        let mut peer_networks = Vec::new();
        let mut peers = 0;
        for peer in sections.iter().filter(|s| s.name.eq_ignore_ascii_case("Peer")) {
            peers += 1;
            let allowed: Vec<&str> = peer.get_all("AllowedIPs").collect();
            if allowed.is_empty() {
                return Err(fail(format!("AllowedIPs missing from [Peer] #{peers}")));
            }
            for list in allowed {
                peer_networks.extend(ipv4_nets(list).map_err(&fail)?);
            }
        }
        if peers == 0 {
            return Err(fail("no [Peer] section".to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            listen_port,
            address,
            peer_networks,
        })
    }

    /// One route per peer network, all via `gateway`.
    #[must_use]
    pub fn routes(&self, gateway: Ipv4Addr) -> Vec<StaticRoute> {
        self.peer_networks
            .iter()
            .map(|&destination| StaticRoute {
                destination,
                next_hop: gateway,
            })
            .collect()
    }
}

/// Brings tunnel interfaces up inside network namespaces.
#[async_trait]
pub trait TunnelInterface: Send + Sync {
    /// Load the configuration at `path`.
    fn load_config(&self, path: &Path) -> WgNetResult<TunnelConfig> {
        TunnelConfig::load(path)
    }

    /// Bring the interface described by `config` up inside `ns`.
    ///
    /// `handle` is bound to `ns`. Returns the live interface.
    async fn bring_up(
        &self,
        config: &TunnelConfig,
        ns: &NetNs,
        handle: &NetlinkHandle,
    ) -> WgNetResult<Link>;
}

/// Runs `wg-quick up` with the thread switched into the namespace.
#[derive(Debug, Clone)]
pub struct WgQuick {
    program: String,
}

impl WgQuick {
    /// Use `wg-quick` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "wg-quick".to_string(),
        }
    }
}

impl Default for WgQuick {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelInterface for WgQuick {
    async fn bring_up(
        &self,
        config: &TunnelConfig,
        ns: &NetNs,
        handle: &NetlinkHandle,
    ) -> WgNetResult<Link> {
        tracing::info!(path = %config.path.display(), "Bringing up tunnel interface");

        ns.run(|| {
            let output = Command::new(&self.program)
                .arg("up")
                .arg(&config.path)
                .output()
                .map_err(|e| WgNetError::link(format!("execute {}", self.program), e))?;

            if !output.status.success() {
                return Err(WgNetError::link(
                    format!("{} up {}", self.program, config.path.display()),
                    String::from_utf8_lossy(&output.stderr).trim(),
                ));
            }
            tracing::debug!(
                output = %String::from_utf8_lossy(&output.stderr).trim(),
                "wg-quick finished"
            );
            Ok(())
        })?;

        let link = handle
            .link_by_kind(&InfoKind::Wireguard)
            .await?
            .ok_or_else(|| {
                WgNetError::link("find tunnel interface", "no wireguard link in namespace")
            })?;

        tracing::info!(link = %link.name, "Tunnel interface up");
        Ok(link)
    }
}

#[derive(Debug)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.get_all(key).next()
    }

    fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal INI reader for wg-quick files.
///
/// Sections may repeat. Keys before the first section are rejected.
fn parse_ini(contents: &str) -> Result<Vec<Section>, String> {
    let mut sections: Vec<Section> = Vec::new();

    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw
            .split(['#', ';'])
            .next()
            .unwrap_or_default()
            .trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[') {
            let name = name
                .strip_suffix(']')
                .ok_or_else(|| format!("line {}: unterminated section header", lineno + 1))?;
            sections.push(Section {
                name: name.trim().to_string(),
                entries: Vec::new(),
            });
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key = value", lineno + 1))?;
        let section = sections
            .last_mut()
            .ok_or_else(|| format!("line {}: key outside of a section", lineno + 1))?;
        section
            .entries
            .push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok(sections)
}

/// IPv4 networks of a comma-separated CIDR list. IPv6 entries are skipped.
fn ipv4_nets(list: &str) -> Result<Vec<Ipv4Net>, String> {
    let mut nets = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<IpNet>() {
            Ok(IpNet::V4(net)) => nets.push(net.trunc()),
            Ok(IpNet::V6(_)) => tracing::debug!(entry, "Skipping IPv6 network"),
            Err(e) => return Err(format!("invalid network {entry:?}: {e}")),
        }
    }
    Ok(nets)
}

fn first_ipv4_net(list: &str) -> Result<Ipv4Net, String> {
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<IpNet>() {
            Ok(IpNet::V4(net)) => return Ok(net),
            Ok(IpNet::V6(_)) => {}
            Err(e) => return Err(format!("invalid Address {entry:?}: {e}")),
        }
    }
    Err(format!("no IPv4 address in {list:?}"))
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.next_hop)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CONFIG: &str = "\
# site-to-site tunnel
[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.10.0.1/24
listenport = 51820

[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
Endpoint = 198.51.100.4:51820
AllowedIPs = 10.20.0.0/24, fd00::/64
; second peer
[Peer]
PublicKey = TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=
AllowedIPs = 10.30.0.0/16
AllowedIPs = 10.40.1.7/24
";

    fn parse(contents: &str) -> WgNetResult<TunnelConfig> {
        TunnelConfig::parse(Path::new("/etc/wireguard/wg0.conf"), contents)
    }

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn parses_interface_and_peers() {
        let config = parse(CONFIG).unwrap();
        assert_eq!(config.listen_port, 51820);
        assert_eq!(config.address, net("10.10.0.1/24"));
        assert_eq!(config.address.addr(), Ipv4Addr::new(10, 10, 0, 1));
        assert_eq!(
            config.peer_networks,
            vec![net("10.20.0.0/24"), net("10.30.0.0/16"), net("10.40.1.0/24")]
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = TunnelConfig::load(file.path()).unwrap();
        assert_eq!(config.path, file.path());
        assert_eq!(config.listen_port, 51820);
    }

    #[test]
    fn missing_file() {
        let err = TunnelConfig::load(Path::new("/nonexistent/wg0.conf")).unwrap_err();
        assert!(matches!(err, WgNetError::ConfigParse { .. }));
    }

    #[test]
    fn missing_interface() {
        let err = parse("[Peer]\nAllowedIPs = 10.0.0.0/8\n").unwrap_err();
        assert!(err.to_string().contains("[Interface]"));
    }

    #[test]
    fn missing_listen_port() {
        let err = parse("[Interface]\nAddress = 10.0.0.1/24\n[Peer]\nAllowedIPs = 10.1.0.0/16\n")
            .unwrap_err();
        assert!(err.to_string().contains("ListenPort"));
    }

    #[test]
    fn listen_port_out_of_range() {
        let err = parse(
            "[Interface]\nAddress = 10.0.0.1/24\nListenPort = 70000\n[Peer]\nAllowedIPs = 10.1.0.0/16\n",
        )
        .unwrap_err();
        assert!(matches!(err, WgNetError::ConfigParse { .. }));
    }

    #[test]
    fn address_without_prefix_is_rejected() {
        let err = parse(
            "[Interface]\nAddress = 10.0.0.1\nListenPort = 51820\n[Peer]\nAllowedIPs = 10.1.0.0/16\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Address"));
    }

    #[test]
    fn no_peers() {
        let err = parse("[Interface]\nAddress = 10.0.0.1/24\nListenPort = 51820\n").unwrap_err();
        assert!(err.to_string().contains("[Peer]"));
    }

    #[test]
    fn peer_without_allowed_ips() {
        let err = parse(
            "[Interface]\nAddress = 10.0.0.1/24\nListenPort = 51820\n[Peer]\nPublicKey = abc=\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("AllowedIPs"));
    }

    #[test]
    fn malformed_allowed_ips() {
        let err = parse(
            "[Interface]\nAddress = 10.0.0.1/24\nListenPort = 51820\n[Peer]\nAllowedIPs = 10.1.0.0/99\n",
        )
        .unwrap_err();
        assert!(matches!(err, WgNetError::ConfigParse { .. }));
    }

    #[test]
    fn key_outside_section() {
        assert!(parse("ListenPort = 1\n").is_err());
    }

    #[test]
    fn section_lookup_ignores_key_case() {
        let sections = parse_ini("[Interface]\nListenPort = 51820\nlistenport = 1\n").unwrap();
        let interface = &sections[0];

        let key = String::from("LISTENPORT");
        assert_eq!(interface.get(&key), Some("51820"));
        assert_eq!(interface.get_all("ListenPort").count(), 2);
        assert_eq!(interface.get("Address"), None);
    }

    #[test]
    fn routes_via_gateway() {
        let config = parse(CONFIG).unwrap();
        let gateway = Ipv4Addr::new(10, 0, 0, 1);
        let routes = config.routes(gateway);

        assert_eq!(routes.len(), 3);
        assert!(routes.iter().all(|r| r.next_hop == gateway));
        assert_eq!(routes[0].destination, net("10.20.0.0/24"));
        assert_eq!(routes[0].to_string(), "10.20.0.0/24 via 10.0.0.1");
    }
}
