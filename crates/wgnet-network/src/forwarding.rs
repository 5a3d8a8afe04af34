//! UDP forwarding between the tunnel endpoint and network namespaces.
//!
//! Three chains are owned by the driver and hooked into the system chains
//! with a single `-p udp` jump each:
//!
//! | chain               | table    | hooked from   |
//! |---------------------|----------|---------------|
//! | `WGNET-PREROUTING`  | `nat`    | `PREROUTING`  |
//! | `WGNET-POSTROUTING` | `nat`    | `POSTROUTING` |
//! | `WGNET-FORWARD`     | `filter` | `FORWARD`     |
//!
//! Each network adds four rules that DNAT tunnel traffic arriving for the
//! remote endpoint to the namespace uplink, SNAT the replies, and accept
//! both directions in the forward chain.

use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Arc;

use wgnet_common::{WgNetError, WgNetResult};

use crate::netns::NetNs;

/// Netfilter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// The `nat` table.
    Nat,
    /// The `filter` table.
    Filter,
}

impl Table {
    fn as_str(self) -> &'static str {
        match self {
            Table::Nat => "nat",
            Table::Filter => "filter",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A driver-owned chain and the system chain it is hooked from.
#[derive(Debug, Clone, Copy)]
struct ChainSpec {
    table: Table,
    name: &'static str,
    parent: &'static str,
}

const PREROUTING: ChainSpec = ChainSpec {
    table: Table::Nat,
    name: "WGNET-PREROUTING",
    parent: "PREROUTING",
};

const POSTROUTING: ChainSpec = ChainSpec {
    table: Table::Nat,
    name: "WGNET-POSTROUTING",
    parent: "POSTROUTING",
};

const FORWARD: ChainSpec = ChainSpec {
    table: Table::Filter,
    name: "WGNET-FORWARD",
    parent: "FORWARD",
};

const CHAINS: [ChainSpec; 3] = [PREROUTING, POSTROUTING, FORWARD];

/// Rule operations on the netfilter tables of the calling thread's namespace.
///
/// A rule is given as its match/target arguments, without table or chain.
pub trait RuleTable: Send + Sync {
    /// Whether `chain` exists.
    fn chain_exists(&self, table: Table, chain: &str) -> WgNetResult<bool>;

    /// Create an empty chain.
    fn new_chain(&self, table: Table, chain: &str) -> WgNetResult<()>;

    /// Remove every rule from a chain.
    fn flush_chain(&self, table: Table, chain: &str) -> WgNetResult<()>;

    /// Delete an empty chain.
    fn delete_chain(&self, table: Table, chain: &str) -> WgNetResult<()>;

    /// Append a rule at the end of a chain.
    fn append(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<()>;

    /// Insert a rule at a 1-based position.
    fn insert(&self, table: Table, chain: &str, position: u32, rule: &[String]) -> WgNetResult<()>;

    /// Whether a matching rule exists.
    fn exists(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<bool>;

    /// Delete the first matching rule.
    fn delete(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<()>;
}

/// [`RuleTable`] backed by the `iptables` binary.
#[derive(Debug, Clone)]
pub struct IptablesCli {
    program: String,
}

impl Default for IptablesCli {
    fn default() -> Self {
        Self::new()
    }
}

impl IptablesCli {
    /// Use `iptables` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "iptables".to_string(),
        }
    }

    fn command_args(table: Table, action: &[&str], rule: &[String]) -> Vec<String> {
        let mut args = vec!["--wait".to_string(), "-t".to_string(), table.to_string()];
        args.extend(action.iter().map(ToString::to_string));
        args.extend(rule.iter().cloned());
        args
    }

    /// Run iptables, returning whether it exited successfully.
    ///
    /// Exit status 1 is iptables' "rule or chain not found"; with
    /// `tolerate_missing` it is reported as `false` instead of an error.
    fn run(&self, args: &[String], tolerate_missing: bool) -> WgNetResult<bool> {
        tracing::trace!(program = %self.program, ?args, "Running iptables");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| WgNetError::rule(format!("execute {}", self.program), e))?;

        if output.status.success() {
            return Ok(true);
        }
        if tolerate_missing && output.status.code() == Some(1) {
            return Ok(false);
        }
        Err(WgNetError::rule(
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim(),
        ))
    }

    fn exec(&self, table: Table, action: &[&str], rule: &[String]) -> WgNetResult<()> {
        self.run(&Self::command_args(table, action, rule), false)
            .map(|_| ())
    }
}

impl RuleTable for IptablesCli {
    fn chain_exists(&self, table: Table, chain: &str) -> WgNetResult<bool> {
        self.run(&Self::command_args(table, &["-n", "-L", chain], &[]), true)
    }

    fn new_chain(&self, table: Table, chain: &str) -> WgNetResult<()> {
        self.exec(table, &["-N", chain], &[])
    }

    fn flush_chain(&self, table: Table, chain: &str) -> WgNetResult<()> {
        self.exec(table, &["-F", chain], &[])
    }

    fn delete_chain(&self, table: Table, chain: &str) -> WgNetResult<()> {
        self.exec(table, &["-X", chain], &[])
    }

    fn append(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<()> {
        self.exec(table, &["-A", chain], rule)
    }

    fn insert(&self, table: Table, chain: &str, position: u32, rule: &[String]) -> WgNetResult<()> {
        let position = position.to_string();
        self.exec(table, &["-I", chain, &position], rule)
    }

    fn exists(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<bool> {
        self.run(&Self::command_args(table, &["-C", chain], rule), true)
    }

    fn delete(&self, table: Table, chain: &str, rule: &[String]) -> WgNetResult<()> {
        self.exec(table, &["-D", chain], rule)
    }
}

/// The per-network forwarding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarding {
    /// Namespace-side address of the uplink.
    pub container_side: Ipv4Addr,
    /// Remote tunnel endpoint.
    pub endpoint: Ipv4Addr,
    /// Tunnel UDP port.
    pub port: u16,
}

impl Forwarding {
    fn rules(&self) -> [(ChainSpec, Vec<String>); 4] {
        let Self {
            container_side: container,
            endpoint,
            port,
        } = self;

        [
            (
                PREROUTING,
                rule(&format!(
                    "-p udp -d {endpoint} --dport {port} -j DNAT --to-destination {container}"
                )),
            ),
            (
                POSTROUTING,
                rule(&format!(
                    "-p udp -s {container} --sport {port} -j SNAT --to-source {endpoint}"
                )),
            ),
            (
                FORWARD,
                rule(&format!("-p udp -d {container} --dport {port} -j ACCEPT")),
            ),
            (
                FORWARD,
                rule(&format!("-p udp -s {container} --sport {port} -j ACCEPT")),
            ),
        ]
    }
}

impl std::fmt::Display for Forwarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.endpoint, self.port, self.container_side, self.port
        )
    }
}

/// Split a rule written the way iptables prints it into arguments.
fn rule(spec: &str) -> Vec<String> {
    spec.split_whitespace().map(str::to_string).collect()
}

fn jump_rule(chain: &ChainSpec) -> Vec<String> {
    rule(&format!("-p udp -j {}", chain.name))
}

fn return_rule() -> Vec<String> {
    rule("-j RETURN")
}

/// Owns the driver chains and the per-network rules inside them.
#[derive(Clone)]
pub struct ForwardingRuleManager {
    table: Arc<dyn RuleTable>,
}

impl ForwardingRuleManager {
    /// Create a manager over `table`.
    pub fn new(table: Arc<dyn RuleTable>) -> Self {
        Self { table }
    }

    /// Create a manager that drives the `iptables` binary.
    #[must_use]
    pub fn iptables() -> Self {
        Self::new(Arc::new(IptablesCli::new()))
    }

    /// Create or reset the driver chains inside `ns`.
    pub fn initialize(&self, ns: &NetNs) -> WgNetResult<()> {
        ns.run(|| self.setup_chains())
    }

    /// Remove the driver chains from `ns`.
    pub fn teardown(&self, ns: &NetNs) -> WgNetResult<()> {
        ns.run(|| self.remove_chains())
    }

    /// Install the rules for one network inside `ns`.
    pub fn install_forwarding(&self, ns: &NetNs, forwarding: &Forwarding) -> WgNetResult<()> {
        ns.run(|| self.add_rules(forwarding))
    }

    /// Remove the rules for one network from `ns`.
    pub fn remove_forwarding(&self, ns: &NetNs, forwarding: &Forwarding) -> WgNetResult<()> {
        ns.run(|| self.delete_rules(forwarding))
    }

    pub(crate) fn setup_chains(&self) -> WgNetResult<()> {
        for chain in &CHAINS {
            if self.table.chain_exists(chain.table, chain.name)? {
                self.table.flush_chain(chain.table, chain.name)?;
            } else {
                self.table.new_chain(chain.table, chain.name)?;
            }
            self.table.append(chain.table, chain.name, &return_rule())?;

            let jump = jump_rule(chain);
            if !self.table.exists(chain.table, chain.parent, &jump)? {
                self.table.insert(chain.table, chain.parent, 1, &jump)?;
            }
            tracing::debug!(table = %chain.table, chain = chain.name, "Initialized chain");
        }
        tracing::info!("Forwarding chains initialized");
        Ok(())
    }

    pub(crate) fn remove_chains(&self) -> WgNetResult<()> {
        for chain in &CHAINS {
            let jump = jump_rule(chain);
            if self.table.exists(chain.table, chain.parent, &jump)? {
                self.table.delete(chain.table, chain.parent, &jump)?;
            }
            if self.table.chain_exists(chain.table, chain.name)? {
                self.table.flush_chain(chain.table, chain.name)?;
                self.table.delete_chain(chain.table, chain.name)?;
            }
            tracing::debug!(table = %chain.table, chain = chain.name, "Removed chain");
        }
        tracing::info!("Forwarding chains removed");
        Ok(())
    }

    pub(crate) fn add_rules(&self, forwarding: &Forwarding) -> WgNetResult<()> {
        tracing::debug!(%forwarding, "Adding forwarding rules");
        for (chain, rule) in forwarding.rules() {
            self.table.insert(chain.table, chain.name, 1, &rule)?;
        }
        Ok(())
    }

    pub(crate) fn delete_rules(&self, forwarding: &Forwarding) -> WgNetResult<()> {
        tracing::debug!(%forwarding, "Removing forwarding rules");
        for (chain, rule) in forwarding.rules() {
            if self.table.exists(chain.table, chain.name, &rule)? {
                self.table.delete(chain.table, chain.name, &rule)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ForwardingRuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingRuleManager").finish_non_exhaustive()
    }
}
