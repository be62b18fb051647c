#![forbid(unsafe_code)]

use super::StoreError;
use super::locks::{LockGuard, LockKey, LockManager, LockMode};
use ct_core::TreeId;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether structural bookkeeping is live for the current call chain.
///
/// A delayed context means the caller is batching many structural edits and will fix the
/// `lft/rght` columns afterwards; tree locks are skipped while it is in effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchContext {
    delayed: bool,
}

impl BatchContext {
    pub fn tracked() -> Self {
        Self { delayed: false }
    }

    pub fn delayed() -> Self {
        Self { delayed: true }
    }

    pub fn is_delayed(&self) -> bool {
        self.delayed
    }
}

/// Sorted, de-duplicated set of tree locks for one guarded block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockPlan {
    modes: BTreeMap<TreeId, LockMode>,
}

impl LockPlan {
    /// Exclusive wins when an id appears in both sets. The sentinel id is never locked.
    pub fn new(
        tree_ids: impl IntoIterator<Item = TreeId>,
        shared_tree_ids: impl IntoIterator<Item = TreeId>,
    ) -> Self {
        let mut modes = BTreeMap::new();
        for tree_id in shared_tree_ids {
            if !tree_id.is_all() {
                modes.insert(tree_id, LockMode::Shared);
            }
        }
        for tree_id in tree_ids {
            if !tree_id.is_all() {
                modes.insert(tree_id, LockMode::Exclusive);
            }
        }
        Self { modes }
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn has_exclusive(&self) -> bool {
        self.modes.values().any(|mode| *mode == LockMode::Exclusive)
    }

    /// Acquisition order: ascending tree id.
    pub fn iter(&self) -> impl Iterator<Item = (TreeId, LockMode)> + '_ {
        self.modes.iter().map(|(tree_id, mode)| (*tree_id, *mode))
    }
}

/// One logical transaction: a real transaction at top level, a savepoint when nested.
pub(in crate::store) struct Window<'c> {
    conn: &'c Connection,
    name: &'static str,
    nested: bool,
    finished: bool,
}

impl<'c> Window<'c> {
    pub(in crate::store) fn open(
        conn: &'c Connection,
        name: &'static str,
        write: bool,
    ) -> Result<Self, StoreError> {
        let nested = !conn.is_autocommit();
        if nested {
            conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        } else if write {
            conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            conn.execute_batch("BEGIN DEFERRED")?;
        }
        Ok(Self {
            conn,
            name,
            nested,
            finished: false,
        })
    }

    pub(in crate::store) fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        let sql = if self.nested {
            format!("RELEASE {}", self.name)
        } else {
            "COMMIT".to_string()
        };
        if let Err(err) = self.conn.execute_batch(&sql) {
            self.rollback_quietly();
            return Err(err.into());
        }
        Ok(())
    }

    pub(in crate::store) fn rollback(mut self) {
        self.finished = true;
        self.rollback_quietly();
    }

    fn rollback_quietly(&self) {
        let sql = if self.nested {
            format!("ROLLBACK TO {name}; RELEASE {name}", name = self.name)
        } else {
            "ROLLBACK".to_string()
        };
        if let Err(err) = self.conn.execute_batch(&sql) {
            warn!(window = self.name, error = %err, "rollback failed");
        }
    }
}

impl Drop for Window<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback_quietly();
        }
    }
}

/// Run `body` inside its own window, committing on success and rolling back on error.
fn in_window<T, F>(
    conn: &Connection,
    name: &'static str,
    write: bool,
    body: &mut F,
) -> Result<T, StoreError>
where
    F: FnMut(&Connection) -> Result<T, StoreError>,
{
    let window = Window::open(conn, name, write)?;
    match body(conn) {
        Ok(value) => window.commit().map(|()| value),
        Err(err) => {
            window.rollback();
            Err(err)
        }
    }
}

/// Serializes structural mutations with per-tree advisory locks.
pub struct TreeLockCoordinator<'a> {
    locks: &'a dyn LockManager,
    namespace: i64,
    wait: Duration,
}

impl<'a> TreeLockCoordinator<'a> {
    pub fn new(locks: &'a dyn LockManager, namespace: i64, wait: Duration) -> Self {
        Self {
            locks,
            namespace,
            wait,
        }
    }

    /// Run `body` while holding the plan's locks, inside one transaction window.
    ///
    /// A transient deadlock reruns the whole block once. Delayed contexts and empty plans skip
    /// the advisory locks but still run `body` in its own window.
    pub fn with_locks<T, F>(
        &self,
        conn: &Connection,
        ctx: &BatchContext,
        plan: &LockPlan,
        mut body: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(&Connection) -> Result<T, StoreError>,
    {
        if ctx.is_delayed() || plan.is_empty() {
            let write = plan.is_empty() || plan.has_exclusive();
            return in_window(conn, "unlocked_window", write, &mut body);
        }

        match self.attempt(conn, plan, &mut body) {
            Err(err) if err.is_transient_deadlock() => {
                warn!(error = %err, "deadlock inside tree lock window, retrying once");
                self.attempt(conn, plan, &mut body).map_err(|err| {
                    if err.is_transient_deadlock() {
                        StoreError::Deadlock(Box::new(err))
                    } else {
                        err
                    }
                })
            }
            outcome => outcome,
        }
    }

    fn attempt<T, F>(
        &self,
        conn: &Connection,
        plan: &LockPlan,
        body: &mut F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(&Connection) -> Result<T, StoreError>,
    {
        let window = Window::open(conn, "tree_lock_window", plan.has_exclusive())?;
        let guards = match self.acquire_all(plan) {
            Ok(guards) => guards,
            Err(err) => {
                window.rollback();
                return Err(err);
            }
        };

        let outcome = match body(conn) {
            Ok(value) => window.commit().map(|()| value),
            Err(err) => {
                window.rollback();
                Err(err)
            }
        };
        drop(guards);
        debug!(locks = plan.modes.len(), ok = outcome.is_ok(), "tree lock window closed");
        outcome
    }

    fn acquire_all(&self, plan: &LockPlan) -> Result<Vec<LockGuard<'a>>, StoreError> {
        let locks: &'a dyn LockManager = self.locks;
        let mut guards = Vec::with_capacity(plan.modes.len());
        for (tree_id, mode) in plan.iter() {
            let key = LockKey::new(self.namespace, tree_id.get());
            debug!(tree_id = tree_id.get(), ?mode, "acquiring tree lock");
            guards.push(locks.acquire(key, mode, self.wait)?);
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::locks::LocalLockManager;
    use rusqlite::ffi;
    use std::cell::Cell;

    fn busy() -> StoreError {
        StoreError::Sql(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);")
            .unwrap();
        conn
    }

    fn rows(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn plan_sorts_and_prefers_exclusive() {
        let plan = LockPlan::new(
            [TreeId::new(9), TreeId::new(2), TreeId::new(9)],
            [TreeId::new(2), TreeId::new(5), TreeId::ALL],
        );
        let order: Vec<(i64, LockMode)> = plan.iter().map(|(id, mode)| (id.get(), mode)).collect();
        assert_eq!(
            order,
            vec![
                (2, LockMode::Exclusive),
                (5, LockMode::Shared),
                (9, LockMode::Exclusive),
            ]
        );
    }

    #[test]
    fn deadlock_is_retried_exactly_once() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let calls = Cell::new(0);
        let plan = LockPlan::new([TreeId::new(1)], []);

        let value = coordinator
            .with_locks(&conn, &BatchContext::tracked(), &plan, |conn| {
                calls.set(calls.get() + 1);
                conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
                if calls.get() == 1 {
                    return Err(busy());
                }
                Ok(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.get(), 2);
        assert_eq!(rows(&conn), 1, "first attempt must be rolled back");
        assert_eq!(manager.held_count(), 0);
    }

    #[test]
    fn second_deadlock_is_fatal() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let calls = Cell::new(0);
        let plan = LockPlan::new([TreeId::new(1)], []);

        let err = coordinator
            .with_locks(&conn, &BatchContext::tracked(), &plan, |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>(busy())
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Deadlock(_)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let calls = Cell::new(0);
        let plan = LockPlan::new([TreeId::new(1)], []);

        let err = coordinator
            .with_locks(&conn, &BatchContext::tracked(), &plan, |conn| {
                calls.set(calls.get() + 1);
                conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
                Err::<(), _>(StoreError::UnknownId)
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::UnknownId));
        assert_eq!(calls.get(), 1);
        assert_eq!(rows(&conn), 0);
    }

    #[test]
    fn delayed_context_and_empty_plan_skip_locking() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let plan = LockPlan::new([TreeId::new(3)], []);

        coordinator
            .with_locks(&conn, &BatchContext::delayed(), &plan, |conn| {
                assert!(!conn.is_autocommit(), "delayed bodies still get a window");
                assert_eq!(manager.held_count(), 0);
                Ok(())
            })
            .unwrap();
        assert!(conn.is_autocommit());

        coordinator
            .with_locks(&conn, &BatchContext::tracked(), &LockPlan::default(), |_| {
                assert_eq!(manager.held_count(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delayed_failure_rolls_back_partial_writes() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let plan = LockPlan::new([TreeId::new(3)], []);

        let err = coordinator
            .with_locks(&conn, &BatchContext::delayed(), &plan, |conn| {
                conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
                Err::<(), _>(StoreError::UnknownId)
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::UnknownId));
        assert_eq!(rows(&conn), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn locks_are_held_for_the_window_only() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let plan = LockPlan::new([TreeId::new(1), TreeId::new(2)], [TreeId::new(3)]);

        coordinator
            .with_locks(&conn, &BatchContext::tracked(), &plan, |conn| {
                assert!(!conn.is_autocommit());
                assert_eq!(manager.held_count(), 3);
                Ok(())
            })
            .unwrap();
        assert_eq!(manager.held_count(), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn nested_window_uses_savepoint() {
        let manager = LocalLockManager::new();
        let coordinator = TreeLockCoordinator::new(&manager, 1, Duration::from_secs(1));
        let conn = conn();
        let outer = Window::open(&conn, "outer", true).unwrap();
        let plan = LockPlan::new([TreeId::new(1)], []);

        let _ = coordinator.with_locks(&conn, &BatchContext::tracked(), &plan, |conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Err::<(), _>(StoreError::UnknownId)
        });
        coordinator
            .with_locks(&conn, &BatchContext::tracked(), &plan, |conn| {
                conn.execute("INSERT INTO t (v) VALUES (2)", [])?;
                Ok(())
            })
            .unwrap();
        assert!(!conn.is_autocommit(), "outer transaction still open");
        outer.commit().unwrap();
        assert_eq!(rows(&conn), 1);
    }
}
