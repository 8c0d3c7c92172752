//! Flow database lock discipline
//!
//! Two locks guard the tables of a bridge:
//!
//! - the data lock, a reader/writer lock every packet worker read-holds for
//!   its critical section and every control transaction write-holds;
//! - the update barrier, write-held for the whole of a control transaction.
//!
//! A worker that wants a quiescent point between bursts calls
//! [`FlowLock::check_update`]: taking and dropping the barrier's read side
//! parks the worker until any in-flight transaction has fully applied, so
//! no reader observes a half-applied transaction.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The update barrier paired with a data lock.
#[derive(Debug, Default)]
pub struct FlowLock {
    update: RwLock<()>,
}

/// Guard for a control-plane transaction: barrier plus data write lock.
pub struct WriteTransaction<'a> {
    _barrier: RwLockWriteGuard<'a, ()>,
}

impl FlowLock {
    /// New lock pair.
    pub fn new() -> Self {
        FlowLock::default()
    }

    /// Enter a control transaction: the caller must acquire the data write
    /// lock after this and hold both until the transaction is applied.
    pub fn begin_update(&self) -> WriteTransaction<'_> {
        WriteTransaction {
            _barrier: self.update.write(),
        }
    }

    /// Quiescent-state check for packet workers: blocks while a control
    /// transaction is in flight, then returns immediately.
    pub fn check_update(&self) {
        let guard: RwLockReadGuard<'_, ()> = self.update.read();
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_check_update_blocks_during_transaction() {
        let lock = Arc::new(FlowLock::new());
        let passed = Arc::new(AtomicBool::new(false));

        let txn = lock.begin_update();
        let reader = {
            let lock = lock.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                lock.check_update();
                passed.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));

        drop(txn);
        reader.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_check_update_free_when_idle() {
        let lock = FlowLock::new();
        lock.check_update();
    }
}
