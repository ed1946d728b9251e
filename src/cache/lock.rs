use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(result: LockResult<G>, op: &'static str, mode: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_mode = mode,
            result = "poisoned_recovered",
            hint = "a writer panicked; entries reflect its last completed update",
            "Recovered from poisoned cache store lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), op, "read")
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), op, "write")
}
