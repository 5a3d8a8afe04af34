#![allow(unsafe_code)]
//! Network namespace handles and scoped namespace switching.
//!
//! The current network namespace is a property of the calling OS thread.
//! Every switch in this crate goes through [`NetNsGuard`], which restores
//! the previous namespace when dropped. The guard is `!Send`: it cannot be
//! held across an `.await` on a multi-threaded runtime, so whatever runs
//! under it is synchronous and stays on the thread that switched.

use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use rustix::mount::UnmountFlags;
use rustix::thread::{LinkNameSpaceType, UnshareFlags};
use wgnet_common::{WgNetError, WgNetPaths, WgNetResult};

/// An open handle to a network namespace.
///
/// A namespace stays alive while any handle, socket or bind mount refers
/// to it. Anonymous namespaces disappear with their last handle; named ones
/// persist under the namespace directory until [`NetNs::delete`].
#[derive(Debug)]
pub struct NetNs {
    fd: OwnedFd,
    mount: Option<PathBuf>,
}

impl NetNs {
    /// Open the namespace of the calling thread.
    pub fn current() -> WgNetResult<Self> {
        Self::open(&WgNetPaths::thread_netns())
    }

    /// Open the namespace of a process.
    pub fn from_pid(pid: u32) -> WgNetResult<Self> {
        Self::open(&WgNetPaths::proc_netns(pid))
    }

    /// Open a namespace file.
    pub fn open(path: &Path) -> WgNetResult<Self> {
        let file = File::open(path)
            .map_err(|e| WgNetError::namespace(format!("open {}", path.display()), e))?;
        Ok(Self {
            fd: file.into(),
            mount: None,
        })
    }

    /// Create a new network namespace.
    ///
    /// With a name, the namespace is bind-mounted under the namespace
    /// directory so it outlives this handle. The calling thread is back in
    /// its original namespace when this returns, on success or failure.
    pub fn create(paths: &WgNetPaths, name: Option<&str>) -> WgNetResult<Self> {
        let _restore = NetNsGuard::save()?;

        // Safety: only the network namespace of this thread changes, and the
        // guard moves the thread back before returning.
        unsafe { rustix::thread::unshare_unsafe(UnshareFlags::NEWNET) }
            .map_err(|e| WgNetError::namespace("unshare", e))?;

        let mut ns = Self::current()?;
        if let Some(name) = name {
            let target = paths.netns(name);
            bind_thread_netns(&target)?;
            ns.mount = Some(target);
        }

        tracing::debug!(name, "Created network namespace");
        Ok(ns)
    }

    /// Name of the namespace, if it is bind-mounted.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.mount
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }

    /// Delete the namespace.
    ///
    /// Removes the bind mount of a named namespace and closes the handle.
    /// The kernel frees the namespace once nothing else refers to it.
    pub fn delete(self) -> WgNetResult<()> {
        if let Some(path) = &self.mount {
            tracing::debug!(path = %path.display(), "Deleting named network namespace");
            rustix::mount::unmount(path, UnmountFlags::DETACH)
                .map_err(|e| WgNetError::namespace(format!("unmount {}", path.display()), e))?;
            std::fs::remove_file(path)
                .map_err(|e| WgNetError::namespace(format!("remove {}", path.display()), e))?;
        }
        Ok(())
    }

    /// Whether both handles refer to the same namespace.
    pub fn is_same(&self, other: &Self) -> WgNetResult<bool> {
        let ours = rustix::fs::fstat(&self.fd).map_err(|e| WgNetError::namespace("fstat", e))?;
        let theirs = rustix::fs::fstat(&other.fd).map_err(|e| WgNetError::namespace("fstat", e))?;
        Ok(ours.st_dev == theirs.st_dev && ours.st_ino == theirs.st_ino)
    }

    /// Run `f` with the calling thread switched into this namespace.
    pub fn run<T>(&self, f: impl FnOnce() -> WgNetResult<T>) -> WgNetResult<T> {
        let _guard = NetNsGuard::enter(self)?;
        f()
    }
}

impl AsFd for NetNs {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Bind-mount the calling thread's namespace onto `target`.
fn bind_thread_netns(target: &Path) -> WgNetResult<()> {
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| WgNetError::namespace(format!("create {}", dir.display()), e))?;
    }
    File::create(target)
        .map_err(|e| WgNetError::namespace(format!("create {}", target.display()), e))?;

    if let Err(e) = rustix::mount::mount_bind(WgNetPaths::thread_netns(), target) {
        let _ = std::fs::remove_file(target);
        return Err(WgNetError::namespace(
            format!("bind mount {}", target.display()),
            e,
        ));
    }
    Ok(())
}

/// Restores the calling thread's previous namespace when dropped.
#[must_use = "the previous namespace is restored when the guard is dropped"]
pub struct NetNsGuard {
    // None when no switch happened.
    previous: Option<NetNs>,
    _not_send: PhantomData<*const ()>,
}

impl NetNsGuard {
    /// Remember the current namespace without switching.
    pub fn save() -> WgNetResult<Self> {
        Ok(Self {
            previous: Some(NetNs::current()?),
            _not_send: PhantomData,
        })
    }

    /// Switch the calling thread into `target`.
    ///
    /// Entering the namespace the thread is already in is a no-op.
    pub fn enter(target: &NetNs) -> WgNetResult<Self> {
        let current = NetNs::current()?;
        if current.is_same(target)? {
            return Ok(Self {
                previous: None,
                _not_send: PhantomData,
            });
        }

        rustix::thread::move_into_link_name_space(
            target.as_fd(),
            Some(LinkNameSpaceType::Network),
        )
        .map_err(|e| WgNetError::namespace("setns", e))?;

        Ok(Self {
            previous: Some(current),
            _not_send: PhantomData,
        })
    }
}

impl Drop for NetNsGuard {
    fn drop(&mut self) {
        let Some(previous) = &self.previous else {
            return;
        };
        if let Err(e) = rustix::thread::move_into_link_name_space(
            previous.as_fd(),
            Some(LinkNameSpaceType::Network),
        ) {
            tracing::error!(error = %e, "Failed to restore network namespace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_current_namespace() {
        let ns = NetNs::current().unwrap();
        assert!(ns.name().is_none());
    }

    #[test]
    fn missing_namespace_file() {
        let err = NetNs::open(Path::new("/nonexistent/netns/blue")).unwrap_err();
        assert!(matches!(err, WgNetError::Namespace { .. }));
    }

    #[test]
    fn same_namespace_twice() {
        let a = NetNs::current().unwrap();
        let b = NetNs::current().unwrap();
        assert!(a.is_same(&b).unwrap());
    }

    #[test]
    fn running_in_current_namespace_does_not_switch() {
        let ns = NetNs::current().unwrap();
        assert_eq!(ns.run(|| Ok(7)).unwrap(), 7);
        assert!(ns.is_same(&NetNs::current().unwrap()).unwrap());
    }

    #[test]
    fn run_propagates_errors() {
        let ns = NetNs::current().unwrap();
        let err = ns
            .run(|| -> WgNetResult<()> { Err(WgNetError::link("probe", "boom")) })
            .unwrap_err();
        assert!(matches!(err, WgNetError::Link { .. }));
    }

    #[test]
    fn anonymous_namespace_delete_is_noop() {
        let ns = NetNs::current().unwrap();
        assert!(ns.delete().is_ok());
    }
}
