//! Per-tenant mutual exclusion.
//!
//! Scans and ledger writes for one tenant are serialized; different
//! tenants never wait on each other. There is no global lock.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::{sync::Arc, time::Duration};

/// Held for the duration of one tenant operation.
pub type TenantGuard = ArcMutexGuard<RawMutex, ()>;

#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(tenant_id) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Block until `tenant_id` is free, then hold it until the guard drops.
    pub fn acquire(&self, tenant_id: &str) -> TenantGuard {
        let lock = self.lock_for(tenant_id);
        lock.lock_arc()
    }

    /// Like `acquire`, but gives up immediately if another operation holds it.
    pub fn try_acquire(&self, tenant_id: &str) -> Option<TenantGuard> {
        self.lock_for(tenant_id).try_lock_arc()
    }

    /// Like `acquire`, but waits at most `timeout` for the tenant to free up.
    pub fn acquire_within(&self, tenant_id: &str, timeout: Duration) -> Option<TenantGuard> {
        self.lock_for(tenant_id).try_lock_arc_for(timeout)
    }

    pub fn tenant_count(&self) -> usize {
        self.locks.len()
    }
}
