//! One probe iteration: locate the primary, write the counter, read it back
//! from every node.
//!
//! The write goes first and is sequential so that the reads can observe it.
//! The reads then run concurrently, each bounded by the socket timeout, and
//! the cycle waits for all of them. A node that fails is reconnected from its
//! own read future, so the reconnect only delays that node's result. Each node
//! is reconnected at most once per cycle.
//!
//! Nothing in here returns an error: every failure ends up as a value in the
//! [`CycleResult`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

use crate::config::{NodeName, ProbeConfig};
use crate::error::StoreError;
use crate::locator::find_primary;
use crate::pool::ConnectionPool;

const NOT_CONNECTED: &str = "not connected";

/// Counter owned by the driver loop across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeState {
    next_value: i64,
}

impl ProbeState {
    /// Starts counting after `last_observed`. A value that leaves no room to
    /// count upwards restarts the counter from zero.
    pub fn new(last_observed: i64) -> Self {
        let next_value = last_observed.checked_add(1).unwrap_or_else(|| {
            warn!(last_observed, "stored counter cannot be advanced, counting from zero");
            1
        });
        Self { next_value }
    }

    /// Resumes from the value currently stored on the primary, or from zero
    /// when no primary answers.
    pub async fn seed(pool: &ConnectionPool, config: &ProbeConfig) -> Self {
        let socket = config.timeouts.socket;
        let Some(primary) = find_primary(pool, socket).await else {
            info!("no primary at start-up, counting from zero");
            return Self::new(0);
        };
        let Some(handle) = pool.get(&primary) else {
            return Self::new(0);
        };

        match timeout(socket, handle.find_one(&config.key, config.read_level)).await {
            Ok(Ok(value)) => {
                let last = value.unwrap_or(0);
                info!(node = %primary, key = %config.key, last, "resuming counter");
                Self::new(last)
            }
            Ok(Err(err)) => {
                warn!(node = %primary, error = %err, "could not read counter, counting from zero");
                Self::new(0)
            }
            Err(_) => {
                warn!(node = %primary, "counter read timed out, counting from zero");
                Self::new(0)
            }
        }
    }

    /// Value the next write will carry.
    pub fn next_value(&self) -> i64 {
        self.next_value
    }

    /// Last value known to have been written.
    pub fn expected(&self) -> i64 {
        self.next_value.saturating_sub(1)
    }

    fn advance(&mut self) {
        self.next_value = self.next_value.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No node reported primary; no write was attempted.
    NoPrimary,
    Written {
        node: NodeName,
        value: i64,
        previous: Option<i64>,
        latency: Duration,
        /// Whether `previous` was exactly `value - 1`.
        consistent: bool,
    },
    /// The write did not complete; the counter was not advanced.
    Failed {
        node: NodeName,
        value: i64,
        latency: Duration,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Observed { value: Option<i64>, matches: bool },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRead {
    pub node: NodeName,
    pub latency: Duration,
    pub status: ReadStatus,
}

impl NodeRead {
    pub fn matches(&self) -> bool {
        matches!(self.status, ReadStatus::Observed { matches: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResult {
    pub started_at: DateTime<Utc>,
    pub write: WriteOutcome,
    /// Value every read is compared against.
    pub expected: i64,
    /// One entry per configured node, in configuration order.
    pub reads: Vec<NodeRead>,
    /// Nodes whose handle was replaced by a successful reconnect during this
    /// cycle.
    pub reconnected: Vec<NodeName>,
}

impl CycleResult {
    pub fn read(&self, node: &NodeName) -> Option<&NodeRead> {
        self.reads.iter().find(|read| &read.node == node)
    }
}

pub struct ProbeCycle<'a> {
    pool: &'a ConnectionPool,
    config: &'a ProbeConfig,
}

impl<'a> ProbeCycle<'a> {
    pub fn new(pool: &'a ConnectionPool, config: &'a ProbeConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self, state: &mut ProbeState) -> CycleResult {
        let started_at = Utc::now();

        let write = match find_primary(self.pool, self.config.timeouts.socket).await {
            Some(primary) => self.write(&primary, state).await,
            None => WriteOutcome::NoPrimary,
        };
        let expected = state.expected();

        // The handle a write failed on is not reused for that node's read.
        let failed_primary = match &write {
            WriteOutcome::Failed { node, .. } => Some(node),
            _ => None,
        };
        let reads = join_all(self.pool.names().map(|name| {
            let stale = failed_primary == Some(name);
            self.read(name, expected, stale)
        }))
        .await;

        let mut reconnected = Vec::new();
        let mut node_reads = Vec::with_capacity(reads.len());
        for (read, did_reconnect) in reads {
            if did_reconnect {
                reconnected.push(read.node.clone());
            }
            node_reads.push(read);
        }

        CycleResult {
            started_at,
            write,
            expected,
            reads: node_reads,
            reconnected,
        }
    }

    async fn write(&self, primary: &NodeName, state: &mut ProbeState) -> WriteOutcome {
        let value = state.next_value();
        let Some(handle) = self.pool.get(primary) else {
            return WriteOutcome::Failed {
                node: primary.clone(),
                value,
                latency: Duration::ZERO,
                error: NOT_CONNECTED.to_string(),
            };
        };

        let started = Instant::now();
        let socket = self.config.timeouts.socket;
        let result = match timeout(
            socket,
            handle.upsert_and_return_previous(&self.config.key, value, self.config.write_ack),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(socket)),
        };
        let latency = started.elapsed();

        match result {
            Ok(previous) => {
                // A missing document counts as zero.
                let consistent = value
                    .checked_sub(1)
                    .is_some_and(|preceding| previous.unwrap_or(0) == preceding);
                if !consistent {
                    warn!(node = %primary, value, ?previous, "previous value does not precede the written value");
                }
                state.advance();
                WriteOutcome::Written {
                    node: primary.clone(),
                    value,
                    previous,
                    latency,
                    consistent,
                }
            }
            Err(err) => {
                warn!(node = %primary, value, latency_ms = latency.as_millis() as u64, error = %err, "write failed");
                WriteOutcome::Failed {
                    node: primary.clone(),
                    value,
                    latency,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Reads the probe key from one node. A `stale` node is reconnected before
    /// the read. The flag reports whether the node's handle was replaced.
    async fn read(&self, name: &NodeName, expected: i64, stale: bool) -> (NodeRead, bool) {
        let connect_started = Instant::now();
        let current = if stale { None } else { self.pool.get(name) };
        let (handle, mut reconnected) = match current {
            Some(handle) => (handle, false),
            None => match self.pool.reconnect(name).await {
                Some(handle) => (handle, true),
                None => {
                    let read = NodeRead {
                        node: name.clone(),
                        latency: connect_started.elapsed(),
                        status: ReadStatus::Failed {
                            error: NOT_CONNECTED.to_string(),
                        },
                    };
                    return (read, false);
                }
            },
        };

        let started = Instant::now();
        let socket = self.config.timeouts.socket;
        let result = match timeout(socket, handle.find_one(&self.config.key, self.config.read_level)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(socket)),
        };
        let latency = started.elapsed();

        let status = match result {
            Ok(value) => ReadStatus::Observed {
                value,
                matches: value.unwrap_or(0) == expected,
            },
            Err(err) => {
                warn!(node = %name, latency_ms = latency.as_millis() as u64, error = %err, "read failed");
                drop(handle);
                if !reconnected {
                    reconnected = self.pool.reconnect(name).await.is_some();
                }
                ReadStatus::Failed {
                    error: err.to_string(),
                }
            }
        };

        let read = NodeRead {
            node: name.clone(),
            latency,
            status,
        };
        (read, reconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_counts_from_last_observed() {
        let state = ProbeState::new(0);
        assert_eq!(state.next_value(), 1);
        assert_eq!(state.expected(), 0);

        let mut state = ProbeState::new(41);
        state.advance();
        assert_eq!(state.next_value(), 43);
        assert_eq!(state.expected(), 42);
    }

    #[test]
    fn state_never_overflows() {
        let state = ProbeState::new(i64::MAX);
        assert_eq!(state.next_value(), 1);

        let mut state = ProbeState::new(i64::MAX - 1);
        assert_eq!(state.next_value(), i64::MAX);
        state.advance();
        assert_eq!(state.next_value(), i64::MAX);

        let state = ProbeState::new(i64::MIN);
        assert_eq!(state.expected(), i64::MIN);
    }

    #[test]
    fn node_read_matches_only_on_observed_match() {
        let read = |status| NodeRead {
            node: "a".into(),
            latency: Duration::ZERO,
            status,
        };
        assert!(read(ReadStatus::Observed { value: Some(3), matches: true }).matches());
        assert!(!read(ReadStatus::Observed { value: Some(2), matches: false }).matches());
        assert!(!read(ReadStatus::Failed { error: "down".into() }).matches());
    }
}
