//! Mutual exclusion between a wipe and every other data operation.
//!
//! Ordinary operations enter as readers. A wipe raises the `wiping` flag first,
//! so new requests are rejected with `VaultBusy` instead of queueing, then
//! takes the writer side and waits for in-flight readers to drain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use pvault_core::{VaultError, VaultResult};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct VaultGate {
    wiping: AtomicBool,
    /// Bumped by every wipe; a reader that was queued behind a wipe sees it
    /// change and backs out.
    epoch: AtomicU64,
    lock: RwLock<()>,
}

/// Held for the duration of one encrypt/decrypt/export style operation.
#[derive(Debug)]
pub struct OperationGuard<'a> {
    _read: RwLockReadGuard<'a, ()>,
}

/// Held from `WipePending` until `Wiped`. Dropping it reopens the gate.
#[derive(Debug)]
pub struct WipeGuard<'a> {
    _write: RwLockWriteGuard<'a, ()>,
    _flag: WipingFlag<'a>,
}

/// Lowers `wiping` on drop, including when `begin_wipe` is abandoned while
/// still waiting for the writer side.
#[derive(Debug)]
struct WipingFlag<'a>(&'a AtomicBool);

impl Drop for WipingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        tracing::debug!("vault gate reopened");
    }
}

impl VaultGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter as an ordinary operation, or fail with `VaultBusy` if a wipe is
    /// pending or ran while this call was waiting.
    pub async fn enter(&self) -> VaultResult<OperationGuard<'_>> {
        if self.wiping.load(Ordering::Acquire) {
            return Err(VaultError::VaultBusy);
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let read = self.lock.read().await;
        if self.wiping.load(Ordering::Acquire) || self.epoch.load(Ordering::Acquire) != epoch {
            return Err(VaultError::VaultBusy);
        }
        Ok(OperationGuard { _read: read })
    }

    /// Close the gate for a wipe. A second concurrent wipe gets `VaultBusy`.
    pub async fn begin_wipe(&self) -> VaultResult<WipeGuard<'_>> {
        if self.wiping.swap(true, Ordering::AcqRel) {
            return Err(VaultError::VaultBusy);
        }
        let flag = WipingFlag(&self.wiping);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let write = self.lock.write().await;
        tracing::debug!("vault gate closed for wipe");
        Ok(WipeGuard {
            _write: write,
            _flag: flag,
        })
    }

    pub fn is_wiping(&self) -> bool {
        self.wiping.load(Ordering::Acquire)
    }
}
