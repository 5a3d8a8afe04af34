//! Standard filesystem paths for wgnet.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Directory where named network namespaces are bind-mounted.
///
/// This is the location `ip netns` uses, so named namespaces created by the
/// driver show up in `ip netns list`.
pub static NETNS_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("WGNET_NETNS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/netns"))
});

/// Default control socket path, relative to the working directory.
pub const DEFAULT_SOCKET: &str = "wg";

/// Standard paths used by the driver.
#[derive(Debug, Clone)]
pub struct WgNetPaths {
    /// Named namespace directory (default: /var/run/netns).
    pub netns_dir: PathBuf,
}

impl WgNetPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom namespace directory.
    #[must_use]
    pub fn with_netns_dir(netns_dir: impl Into<PathBuf>) -> Self {
        Self {
            netns_dir: netns_dir.into(),
        }
    }

    /// Bind-mount target for a named namespace.
    #[must_use]
    pub fn netns(&self, name: &str) -> PathBuf {
        self.netns_dir.join(name)
    }

    /// Network namespace of a process.
    #[must_use]
    pub fn proc_netns(pid: u32) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/net"))
    }

    /// Network namespace of the calling thread.
    ///
    /// Namespaces are per thread, so `/proc/self` would name the main
    /// thread's namespace instead.
    #[must_use]
    pub fn thread_netns() -> PathBuf {
        PathBuf::from("/proc/thread-self/ns/net")
    }
}

impl Default for WgNetPaths {
    fn default() -> Self {
        Self {
            netns_dir: NETNS_DIR.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_netns_dir() {
        let paths = WgNetPaths::with_netns_dir("/tmp/wgnet-test");
        assert_eq!(paths.netns("blue"), PathBuf::from("/tmp/wgnet-test/blue"));
    }

    #[test]
    fn proc_paths() {
        assert_eq!(WgNetPaths::proc_netns(1), PathBuf::from("/proc/1/ns/net"));
        assert_eq!(
            WgNetPaths::thread_netns(),
            PathBuf::from("/proc/thread-self/ns/net")
        );
    }
}
