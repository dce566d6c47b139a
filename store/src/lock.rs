//! Per-item read/write locks.
//!
//! Every item path gets a lazily-created slot guarded by an async
//! [`RwLock`]: any number of concurrent readers, or one writer. The slot
//! also mirrors the committed state of its item, so a writer can fork a
//! draft from the exact snapshot it locked. Acquisition is bounded by a
//! timeout; waiting forever on a wedged writer would stall every client
//! asking for the same artifact.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::errors::Error;
use crate::item::ItemSnapshot;
use crate::path::RepoPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
        })
    }
}

/// How long an acquisition is willing to wait on a contended lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Wait {
    /// Client-facing operations: wait out a slow writer.
    #[default]
    Normal,
    /// Background sweeps: skip busy items instead of queueing behind them.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeouts {
    pub normal: Duration,
    pub fail_fast: Duration,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        LockTimeouts {
            normal: Duration::from_secs(30),
            fail_fast: Duration::from_secs(2),
        }
    }
}

/// Committed state of the locked item, mirrored under its lock.
#[derive(Debug, Default)]
pub(crate) enum SlotState {
    /// The database has not been consulted yet.
    #[default]
    Unloaded,
    /// Known not to exist.
    Absent,
    /// The committed item.
    Present(Arc<ItemSnapshot>),
}

#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) state: SlotState,
}

impl Slot {
    pub(crate) fn snapshot(&self) -> Option<&Arc<ItemSnapshot>> {
        match &self.state {
            SlotState::Present(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub(crate) fn is_unloaded(&self) -> bool {
        matches!(self.state, SlotState::Unloaded)
    }
}

/// The map of live lock slots.
pub(crate) struct LockMap {
    slots: parking_lot::Mutex<HashMap<RepoPath, Arc<RwLock<Slot>>>>,
    timeouts: LockTimeouts,
}

impl LockMap {
    pub(crate) fn new(timeouts: LockTimeouts) -> Self {
        LockMap {
            slots: parking_lot::Mutex::new(HashMap::new()),
            timeouts,
        }
    }

    fn entry(&self, path: &RepoPath) -> Arc<RwLock<Slot>> {
        self.slots.lock().entry(path.clone()).or_default().clone()
    }

    fn duration(&self, wait: Wait) -> Duration {
        match wait {
            Wait::Normal => self.timeouts.normal,
            Wait::FailFast => self.timeouts.fail_fast,
        }
    }

    pub(crate) async fn read(
        &self,
        path: &RepoPath,
        wait: Wait,
    ) -> Result<OwnedRwLockReadGuard<Slot>, Error> {
        let entry = self.entry(path);
        let waited = self.duration(wait);
        tokio::time::timeout(waited, entry.read_owned())
            .await
            .map_err(|_| Error::LockTimeout {
                path: path.clone(),
                mode: LockMode::Read,
                waited,
            })
    }

    pub(crate) async fn write(
        &self,
        path: &RepoPath,
        wait: Wait,
    ) -> Result<OwnedRwLockWriteGuard<Slot>, Error> {
        let entry = self.entry(path);
        let waited = self.duration(wait);
        tokio::time::timeout(waited, entry.write_owned())
            .await
            .map_err(|_| Error::LockTimeout {
                path: path.clone(),
                mode: LockMode::Write,
                waited,
            })
    }

    /// Removes slots nobody holds anymore, returning how many were dropped.
    ///
    /// Guards (including acquisitions still waiting on the lock) hold their
    /// own `Arc` clone, so a strong count of one means the map holds the
    /// only reference.
    pub(crate) fn sweep(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, entry| Arc::strong_count(entry) > 1);
        before - slots.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_timeouts() -> LockTimeouts {
        LockTimeouts {
            normal: Duration::from_millis(200),
            fail_fast: Duration::from_millis(50),
        }
    }

    fn path() -> RepoPath {
        "libs-local:org/example/demo/1.0/demo-1.0.jar"
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn readers_share() {
        let locks = LockMap::new(test_timeouts());

        let _first = locks.read(&path(), Wait::Normal).await.unwrap();
        let _second = locks.read(&path(), Wait::Normal).await.unwrap();
    }

    #[tokio::test]
    async fn writer_excludes_writer() {
        let locks = LockMap::new(test_timeouts());

        let held = locks.write(&path(), Wait::Normal).await.unwrap();
        let err = locks.write(&path(), Wait::FailFast).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::LockTimeout {
                    mode: LockMode::Write,
                    ..
                }
            ),
            "got {:?}",
            err
        );

        drop(held);
        locks.write(&path(), Wait::FailFast).await.unwrap();
    }

    #[tokio::test]
    async fn writer_excludes_reader() {
        let locks = LockMap::new(test_timeouts());

        let _held = locks.write(&path(), Wait::Normal).await.unwrap();
        let err = locks.read(&path(), Wait::FailFast).await.unwrap_err();
        assert!(matches!(
            err,
            Error::LockTimeout {
                mode: LockMode::Read,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn different_paths_do_not_contend() {
        let locks = LockMap::new(test_timeouts());
        let other: RepoPath = "libs-local:org/example/other/1.0/other-1.0.jar"
            .parse()
            .unwrap();

        let _held = locks.write(&path(), Wait::Normal).await.unwrap();
        locks.write(&other, Wait::FailFast).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_keeps_held_slots() {
        let locks = LockMap::new(test_timeouts());

        let guard = locks.read(&path(), Wait::Normal).await.unwrap();
        let _unheld = locks.entry(&"libs-local:idle".parse().unwrap());
        drop(_unheld);

        assert_eq!(2, locks.len());
        assert_eq!(1, locks.sweep());
        assert_eq!(1, locks.len());

        drop(guard);
        assert_eq!(1, locks.sweep());
        assert_eq!(0, locks.len());
    }
}
