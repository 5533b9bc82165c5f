//! Tracking of open connections.
//!
//! Every connection opened through [`ConnectionRegistry::open`] is owned by
//! the registry and addressed through a [`ConnectionHandle`]. A top-level
//! command releases the whole registry on its way out, so every connection is
//! closed before the process exits even on error paths. This is an explicit
//! instance passed through the call chain, not a process-wide global.

use std::collections::BTreeMap;

use tracing::warn;

use crate::engine::{Connection, DatabaseTopology, Engine};
use crate::error::Error;

/// Handle to a connection owned by a [`ConnectionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle(u64);

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: u64,
    open: BTreeMap<u64, Box<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect through the given engine and track the resulting connection.
    pub fn open(
        &mut self,
        engine: &dyn Engine,
        url: &str,
        topology: &DatabaseTopology,
    ) -> Result<ConnectionHandle, Error> {
        let conn = engine.connect(url, topology)?;
        Ok(self.track(conn))
    }

    /// Track an already-open connection.
    pub fn track(&mut self, conn: Box<dyn Connection>) -> ConnectionHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(id, conn);
        ConnectionHandle(id)
    }

    /// Borrow a tracked connection.
    pub fn connection(&mut self, handle: ConnectionHandle) -> Result<&mut dyn Connection, Error> {
        match self.open.get_mut(&handle.0) {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(Error::Generic(format!(
                "connection {:?} is no longer open",
                handle
            ))),
        }
    }

    /// Close and stop tracking a connection. Releasing an already-released
    /// handle is a no-op.
    pub fn release(&mut self, handle: ConnectionHandle) -> Result<(), Error> {
        match self.open.remove(&handle.0) {
            Some(conn) => conn.close(),
            None => Ok(()),
        }
    }

    /// Close every connection still open. Failures are logged, not returned,
    /// so cleanup can never mask the error that triggered it.
    pub fn release_all(&mut self) {
        while let Some((_, conn)) = self.open.pop_first() {
            if let Err(e) = conn.close() {
                warn!("failed to close tracked connection: {e}");
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        if self.open_count() > 0 {
            warn!(
                "connection registry dropped with {} connection(s) still open",
                self.open_count()
            );
            self.release_all();
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("open", &self.open.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqlRow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingConnection {
        closed: Arc<AtomicUsize>,
    }

    impl Connection for CountingConnection {
        fn query(&mut self, _sql: &str) -> Result<Vec<SqlRow>, Error> {
            Ok(vec![])
        }
        fn execute(&mut self, _sql: &str) -> Result<(), Error> {
            Ok(())
        }
        fn close(self: Box<Self>) -> Result<(), Error> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn release_all_closes_every_tracked_connection() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = ConnectionRegistry::new();
        for _ in 0..3 {
            registry.track(Box::new(CountingConnection {
                closed: closed.clone(),
            }));
        }
        assert_eq!(registry.open_count(), 3);
        registry.release_all();
        assert_eq!(registry.open_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tracked_connection_is_usable_through_its_handle() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = ConnectionRegistry::new();
        let handle = registry.track(Box::new(CountingConnection {
            closed: closed.clone(),
        }));
        let conn = registry.connection(handle).unwrap();
        conn.execute("SELECT 1;").unwrap();
        assert_eq!(registry.connection(handle).unwrap().query("SELECT 1;").unwrap(), vec![]);
        registry.release(handle).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = ConnectionRegistry::new();
        let handle = registry.track(Box::new(CountingConnection {
            closed: closed.clone(),
        }));
        registry.release(handle).unwrap();
        registry.release(handle).unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(registry.connection(handle).is_err());
    }

    #[test]
    fn drop_closes_leftover_connections() {
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = ConnectionRegistry::new();
            registry.track(Box::new(CountingConnection {
                closed: closed.clone(),
            }));
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
