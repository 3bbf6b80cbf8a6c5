//! One handle per configured node.
//!
//! Every configured node keeps a slot for the lifetime of the pool. A slot is
//! either connected or absent; absent is a normal state that later cycles
//! retry. Each slot has its own lock, held only long enough to clone or swap
//! the handle, so reconnecting one node never waits on another node's reads.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use futures_util::future::join_all;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::config::{NodeName, NodeSpec};
use crate::error::{ConnectError, StoreError};
use crate::store::{Connector, NodeHandle};

/// Result of a bounded status query against one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// No handle is held for the node.
    Disconnected,
    /// The node has a handle but the status query failed.
    Down(String),
    Up { primary: bool },
}

struct NodeSlot {
    spec: NodeSpec,
    handle: RwLock<Option<NodeHandle>>,
}

impl NodeSlot {
    fn load(&self) -> Option<NodeHandle> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, handle: Option<NodeHandle>) {
        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = handle;
    }
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    slots: Vec<NodeSlot>,
}

impl ConnectionPool {
    /// Creates a pool with every node absent. Nothing is dialled until
    /// [`connect_all`](Self::connect_all) or [`reconnect`](Self::reconnect).
    pub fn new(
        connector: Arc<dyn Connector>,
        nodes: &[NodeSpec],
        connect_timeout: Duration,
    ) -> Self {
        let slots = nodes
            .iter()
            .cloned()
            .map(|spec| NodeSlot {
                spec,
                handle: RwLock::new(None),
            })
            .collect();
        Self {
            connector,
            connect_timeout,
            slots,
        }
    }

    /// Configured node names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &NodeName> {
        self.slots.iter().map(|slot| &slot.spec.name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current handle for `name`, without any I/O.
    pub fn get(&self, name: &NodeName) -> Option<NodeHandle> {
        self.slot(name).and_then(NodeSlot::load)
    }

    /// Establishes a handle for `spec` within the connect timeout.
    ///
    /// Failures are logged and reported as absent, never returned.
    pub async fn connect(&self, spec: &NodeSpec) -> Option<NodeHandle> {
        let started = Instant::now();
        let result = match timeout(self.connect_timeout, self.connector.connect(spec)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(handle) => {
                debug!(node = %spec.name, elapsed_ms = elapsed, "connected");
                Some(handle)
            }
            Err(err) => {
                warn!(node = %spec.name, elapsed_ms = elapsed, error = %err, "could not connect");
                None
            }
        }
    }

    /// Replaces the handle for `name` with a fresh connection attempt.
    ///
    /// The stale handle is dropped whether or not the attempt succeeds, so a
    /// node that stays down is left absent. Safe to call repeatedly.
    pub async fn reconnect(&self, name: &NodeName) -> Option<NodeHandle> {
        let slot = self.slot(name)?;
        let handle = self.connect(&slot.spec).await;
        slot.store(handle.clone());
        match &handle {
            Some(_) => info!(node = %name, "reconnected"),
            None => debug!(node = %name, "node left absent after reconnect attempt"),
        }
        handle
    }

    /// Connects every node concurrently and logs the role each one reports.
    pub async fn connect_all(&self, status_timeout: Duration) {
        let attempts = self.slots.iter().map(|slot| async move {
            let started = Instant::now();
            if self.reconnect(&slot.spec.name).await.is_none() {
                return;
            }
            let elapsed = started.elapsed().as_millis() as u64;
            match self.check(&slot.spec.name, status_timeout).await {
                Liveness::Up { primary: true } => {
                    info!(node = %slot.spec.name, elapsed_ms = elapsed, "connected where primary is available")
                }
                Liveness::Up { primary: false } => {
                    info!(node = %slot.spec.name, elapsed_ms = elapsed, "connected where secondary is available")
                }
                Liveness::Down(reason) => {
                    warn!(node = %slot.spec.name, elapsed_ms = elapsed, %reason, "connected but status query failed")
                }
                Liveness::Disconnected => {}
            }
        });
        join_all(attempts).await;
    }

    /// Runs one bounded status query against `name`. Does not touch the slot.
    pub async fn check(&self, name: &NodeName, status_timeout: Duration) -> Liveness {
        let Some(handle) = self.get(name) else {
            return Liveness::Disconnected;
        };
        let result = match timeout(status_timeout, handle.is_primary()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(status_timeout)),
        };
        match result {
            Ok(primary) => Liveness::Up { primary },
            Err(err) => Liveness::Down(err.to_string()),
        }
    }

    fn slot(&self, name: &NodeName) -> Option<&NodeSlot> {
        self.slots.iter().find(|slot| &slot.spec.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryReplicaSet;

    fn pool_for(set: &MemoryReplicaSet, members: &[&str]) -> ConnectionPool {
        let nodes: Vec<NodeSpec> = members
            .iter()
            .map(|member| NodeSpec::new(*member, MemoryReplicaSet::uri(member)))
            .collect();
        ConnectionPool::new(Arc::new(set.clone()), &nodes, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn starts_with_every_node_absent() {
        let set = MemoryReplicaSet::new(&["a", "b"]);
        let pool = pool_for(&set, &["a", "b"]);

        assert_eq!(pool.len(), 2);
        assert!(pool.get(&"a".into()).is_none());
        assert!(pool.get(&"b".into()).is_none());
        assert_eq!(set.connects("a"), 0);
    }

    #[tokio::test]
    async fn connect_all_fills_reachable_slots_only() {
        let set = MemoryReplicaSet::new(&["a", "b"]);
        set.crash("b");
        let pool = pool_for(&set, &["a", "b"]);

        pool.connect_all(Duration::from_secs(1)).await;

        assert!(pool.get(&"a".into()).is_some());
        assert!(pool.get(&"b".into()).is_none());
        let names: Vec<_> = pool.names().map(NodeName::to_string).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reconnect_replaces_the_handle() {
        let set = MemoryReplicaSet::new(&["a"]);
        let pool = pool_for(&set, &["a"]);
        let name = NodeName::from("a");

        let first = pool.reconnect(&name).await.expect("first connect");
        let second = pool.reconnect(&name).await.expect("second connect");
        let current = pool.get(&name).expect("handle present");

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &current));
        assert_eq!(set.connects("a"), 2);
    }

    #[tokio::test]
    async fn reconnect_on_a_down_node_is_idempotent() {
        let set = MemoryReplicaSet::new(&["a"]);
        let pool = pool_for(&set, &["a"]);
        let name = NodeName::from("a");
        pool.reconnect(&name).await.expect("initial connect");

        set.crash("a");
        for _ in 0..5 {
            assert!(pool.reconnect(&name).await.is_none());
            assert!(pool.get(&name).is_none());
        }
        assert_eq!(pool.names().count(), 1);

        set.restart("a");
        assert!(pool.reconnect(&name).await.is_some());
    }

    #[tokio::test]
    async fn reconnect_of_unknown_node_is_a_no_op() {
        let set = MemoryReplicaSet::new(&["a"]);
        let pool = pool_for(&set, &["a"]);
        assert!(pool.reconnect(&"zzz".into()).await.is_none());
        assert_eq!(set.connects("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_bounded_by_timeout() {
        let set = MemoryReplicaSet::new(&["a"]);
        set.set_stalled("a", true);
        let pool = pool_for(&set, &["a"]);

        let started = Instant::now();
        assert!(pool.reconnect(&"a".into()).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn check_reports_role_and_failures() {
        let set = MemoryReplicaSet::new(&["a", "b"]);
        set.elect(Some("a"));
        let pool = pool_for(&set, &["a", "b"]);
        let timeout = Duration::from_secs(1);

        assert_eq!(pool.check(&"a".into(), timeout).await, Liveness::Disconnected);

        pool.connect_all(timeout).await;
        assert_eq!(pool.check(&"a".into(), timeout).await, Liveness::Up { primary: true });
        assert_eq!(pool.check(&"b".into(), timeout).await, Liveness::Up { primary: false });

        set.crash("b");
        assert!(matches!(pool.check(&"b".into(), timeout).await, Liveness::Down(_)));
        assert!(pool.get(&"b".into()).is_some());
    }
}
