use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Condvar, Mutex, PoisonError},
};

use tracing::trace;

/// Per-table write locks
///
/// The lock state stays consistent under a poisoned mutex (every change to it
/// is a single insert or remove), so poisoning is ignored.
///
/// A transaction takes all of its tables in one step, so there is no lock
/// ordering to get wrong. Requests are served in arrival order among those
/// that overlap: a request waits while any table it needs is held, or is
/// wanted by an overlapping request that arrived earlier.
#[derive(Default)]
pub struct TableLocks {
    state: Mutex<LockState>,
    released: Condvar,
}

#[derive(Default)]
struct LockState {
    held: BTreeSet<String>,
    waiting: VecDeque<(u64, BTreeSet<String>)>,
    next_ticket: u64,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every table is free, then holds them until the guard drops
    pub fn acquire(&self, tables: &[String]) -> TableLockGuard<'_> {
        let wanted: BTreeSet<String> = tables.iter().cloned().collect();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back((ticket, wanted.clone()));

        loop {
            let blocked = wanted.iter().any(|t| state.held.contains(t))
                || state
                    .waiting
                    .iter()
                    .take_while(|(t, _)| *t != ticket)
                    .any(|(_, other)| !other.is_disjoint(&wanted));
            if !blocked {
                break;
            }
            trace!(?wanted, "waiting for table locks");
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        state.waiting.retain(|(t, _)| *t != ticket);
        state.held.extend(wanted.iter().cloned());
        TableLockGuard { locks: self, tables: wanted }
    }
}

/// Releases its tables on drop
pub struct TableLockGuard<'a> {
    locks: &'a TableLocks,
    tables: BTreeSet<String>,
}

impl<'a> TableLockGuard<'a> {
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }
}

impl<'a> Drop for TableLockGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.locks.state.lock().unwrap_or_else(PoisonError::into_inner);
        for table in self.tables.iter() {
            state.held.remove(table);
        }
        drop(state);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::TableLocks;

    fn names(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    fn is_held(locks: &TableLocks, table: &str) -> bool {
        match locks.state.lock() {
            Ok(state) => state.held.contains(table),
            Err(poisoned) => poisoned.into_inner().held.contains(table),
        }
    }

    #[test]
    fn test_disjoint_tables() {
        let locks = TableLocks::new();
        let users = locks.acquire(&names(&["users"]));
        let group = locks.acquire(&names(&["group"]));
        assert!(users.contains("users"));
        assert!(is_held(&locks, "users") && is_held(&locks, "group"));
        drop(users);
        assert!(!is_held(&locks, "users"));
        drop(group);
    }

    #[test]
    fn test_overlapping_tables_serialize() {
        let locks = Arc::new(TableLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let tables = if i % 2 == 0 { names(&["users"]) } else { names(&["users", "group"]) };
            handles.push(thread::spawn(move || {
                let _guard = locks.acquire(&tables);
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                thread::sleep(Duration::from_millis(5));
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().expect("lock thread panicked");
        }
        assert!(!is_held(&locks, "users"));
    }

    #[test]
    fn test_poisoned_state_still_grants() {
        let locks = Arc::new(TableLocks::new());
        let held = locks.acquire(&names(&["users"]));

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || {
                let guard = locks.acquire(&names(&["users", "group"]));
                assert!(guard.contains("group"));
            })
        };
        thread::sleep(Duration::from_millis(10));

        let poisoner = locks.clone();
        let poisoned = thread::spawn(move || {
            let _state = poisoner.state.lock();
            panic!("panic while holding the lock state");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(locks.state.is_poisoned());

        // the woken waiter still gets its tables, and later requests are not stuck behind it
        drop(held);
        waiter.join().expect("waiter panicked");
        let users = locks.acquire(&names(&["users"]));
        assert!(is_held(&locks, "users") && !is_held(&locks, "group"));
        drop(users);
    }
}
