//! Shared harness: an in-memory replica set plus a connected pool.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use replica_probe::{
    config::{NodeSpec, ProbeConfig, Timeouts},
    cycle::{CycleResult, ProbeCycle, ProbeState},
    pool::ConnectionPool,
    store::memory::MemoryReplicaSet,
};

pub const KEY: &str = "one";
pub const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);

pub fn direct_nodes(members: &[&str]) -> Vec<NodeSpec> {
    members
        .iter()
        .map(|member| NodeSpec::new(*member, MemoryReplicaSet::uri(member)))
        .collect()
}

pub fn test_config(nodes: Vec<NodeSpec>) -> ProbeConfig {
    let mut config = ProbeConfig::new(nodes).expect("valid test config");
    config.key = KEY.to_string();
    config.timeouts = Timeouts {
        connect: Duration::from_secs(1),
        select: Duration::from_secs(1),
        socket: SOCKET_TIMEOUT,
    };
    config
}

/// A replica set, a pool over its members, and the config that ties them.
pub struct TestCluster {
    pub set: MemoryReplicaSet,
    pub pool: Arc<ConnectionPool>,
    pub config: ProbeConfig,
}

impl TestCluster {
    /// Connects to every node the way the binary does at start-up.
    pub async fn start(set: MemoryReplicaSet, nodes: Vec<NodeSpec>) -> Self {
        let config = test_config(nodes);
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(set.clone()),
            &config.nodes,
            config.timeouts.connect,
        ));
        pool.connect_all(config.timeouts.socket).await;
        Self { set, pool, config }
    }

    /// One direct endpoint per member, named after the member.
    pub async fn direct(set: MemoryReplicaSet, members: &[&str]) -> Self {
        Self::start(set, direct_nodes(members)).await
    }

    pub async fn cycle(&self, state: &mut ProbeState) -> CycleResult {
        ProbeCycle::new(&self.pool, &self.config).run(state).await
    }

    /// Stores `value` on every member, as if fully replicated.
    pub fn put_everywhere(&self, members: &[&str], value: i64) {
        for member in members {
            self.set.put(member, KEY, value);
        }
    }
}
